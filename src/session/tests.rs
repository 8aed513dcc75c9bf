use super::psk::{encode_record, parse_record};
use super::*;
use crate::message::MessageError;

const PSK: &[u8] = b"0123456789abcdef";

#[derive(Default)]
struct RecordingSink {
    records: Vec<Vec<u8>>,
    delivered: Vec<Vec<u8>>,
    fail_sends: bool,
}

impl RecordingSink {
    /// Concatenate everything emitted so far into one datagram.
    fn take_datagram(&mut self) -> Vec<u8> {
        self.records.drain(..).flatten().collect()
    }
}

impl RecordSink for RecordingSink {
    fn send_record(&mut self, record: &[u8]) -> Result<(), MessageError> {
        if self.fail_sends {
            return Err(MessageError::CapacityExceeded {
                len: record.len(),
                capacity: 0,
            });
        }
        self.records.push(record.to_vec());
        Ok(())
    }
}

impl SessionSink for RecordingSink {
    fn deliver(&mut self, plaintext: &[u8]) {
        self.delivered.push(plaintext.to_vec());
    }
}

/// Run a full handshake, returning (client, server, client_sink, server_sink).
fn establish() -> (PskSession, PskSession, RecordingSink, RecordingSink) {
    let mut client = PskSession::new(PSK).unwrap();
    let mut server = PskSession::new(PSK).unwrap();
    let mut client_sink = RecordingSink::default();
    let mut server_sink = RecordingSink::default();

    server.start(HandshakeRole::Server, &mut server_sink).unwrap();
    client.start(HandshakeRole::Client, &mut client_sink).unwrap();

    let hello = client_sink.take_datagram();
    server.receive(&hello, &mut server_sink);

    let server_hello = server_sink.take_datagram();
    client.receive(&server_hello, &mut client_sink);
    assert!(client.is_connected());

    let finished = client_sink.take_datagram();
    server.receive(&finished, &mut server_sink);
    assert!(server.is_connected());

    (client, server, client_sink, server_sink)
}

#[test]
fn test_full_handshake() {
    let mut client = PskSession::new(PSK).unwrap();
    let mut server = PskSession::new(PSK).unwrap();
    let mut client_sink = RecordingSink::default();
    let mut server_sink = RecordingSink::default();

    assert!(!client.is_started());
    client.start(HandshakeRole::Client, &mut client_sink).unwrap();
    assert!(client.is_started());
    assert!(!client.is_connected());
    assert_eq!(client.role(), Some(HandshakeRole::Client));
    assert_eq!(client_sink.records.len(), 1);
    assert_eq!(client_sink.records[0][0], RecordType::ClientHello.to_byte());

    server.start(HandshakeRole::Server, &mut server_sink).unwrap();
    assert!(server.is_started());
    assert!(server_sink.records.is_empty());

    server.receive(&client_sink.take_datagram(), &mut server_sink);
    assert!(!server.is_connected());
    assert_eq!(server_sink.records.len(), 1);

    client.receive(&server_sink.take_datagram(), &mut client_sink);
    assert!(client.is_connected());

    server.receive(&client_sink.take_datagram(), &mut server_sink);
    assert!(server.is_connected());
    assert!(client_sink.delivered.is_empty());
    assert!(server_sink.delivered.is_empty());
}

#[test]
fn test_application_data_both_directions() {
    let (mut client, mut server, mut client_sink, mut server_sink) = establish();

    client.send(b"request", &mut client_sink).unwrap();
    server.receive(&client_sink.take_datagram(), &mut server_sink);
    assert_eq!(server_sink.delivered, vec![b"request".to_vec()]);

    server.send(b"response", &mut server_sink).unwrap();
    client.receive(&server_sink.take_datagram(), &mut client_sink);
    assert_eq!(client_sink.delivered, vec![b"response".to_vec()]);
}

#[test]
fn test_multiple_records_in_one_datagram() {
    let (mut client, mut server, mut client_sink, mut server_sink) = establish();

    client.send(b"one", &mut client_sink).unwrap();
    client.send(b"two", &mut client_sink).unwrap();
    client.send(b"three", &mut client_sink).unwrap();
    assert_eq!(client_sink.records.len(), 3);

    server.receive(&client_sink.take_datagram(), &mut server_sink);
    assert_eq!(
        server_sink.delivered,
        vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
    );
}

#[test]
fn test_finished_and_data_coalesced() {
    let mut client = PskSession::new(PSK).unwrap();
    let mut server = PskSession::new(PSK).unwrap();
    let mut client_sink = RecordingSink::default();
    let mut server_sink = RecordingSink::default();

    server.start(HandshakeRole::Server, &mut server_sink).unwrap();
    client.start(HandshakeRole::Client, &mut client_sink).unwrap();
    server.receive(&client_sink.take_datagram(), &mut server_sink);
    client.receive(&server_sink.take_datagram(), &mut client_sink);

    // Finished and first data record leave in the same datagram
    client.send(b"early", &mut client_sink).unwrap();
    server.receive(&client_sink.take_datagram(), &mut server_sink);

    assert!(server.is_connected());
    assert_eq!(server_sink.delivered, vec![b"early".to_vec()]);
}

#[test]
fn test_wrong_psk_aborts_client() {
    let mut client = PskSession::new(PSK).unwrap();
    let mut server = PskSession::new(b"fedcba9876543210".to_vec()).unwrap();
    let mut client_sink = RecordingSink::default();
    let mut server_sink = RecordingSink::default();

    server.start(HandshakeRole::Server, &mut server_sink).unwrap();
    client.start(HandshakeRole::Client, &mut client_sink).unwrap();
    server.receive(&client_sink.take_datagram(), &mut server_sink);
    client.receive(&server_sink.take_datagram(), &mut client_sink);

    assert!(!client.is_connected());
    assert!(!client.is_started());
    assert!(client_sink.records.is_empty());
}

#[test]
fn test_replayed_record_dropped() {
    let (mut client, mut server, mut client_sink, mut server_sink) = establish();

    client.send(b"once", &mut client_sink).unwrap();
    let datagram = client_sink.take_datagram();

    server.receive(&datagram, &mut server_sink);
    server.receive(&datagram, &mut server_sink);

    assert_eq!(server_sink.delivered.len(), 1);
    assert!(server.is_connected());
}

#[test]
fn test_tampered_record_dropped() {
    let (mut client, mut server, mut client_sink, mut server_sink) = establish();

    client.send(b"payload", &mut client_sink).unwrap();
    let mut datagram = client_sink.take_datagram();
    let last = datagram.len() - 1;
    datagram[last] ^= 0x01;

    server.receive(&datagram, &mut server_sink);
    assert!(server_sink.delivered.is_empty());
    assert!(server.is_connected());
}

#[test]
fn test_send_requires_connection() {
    let mut client = PskSession::new(PSK).unwrap();
    let mut sink = RecordingSink::default();

    assert!(matches!(
        client.send(b"x", &mut sink),
        Err(SessionError::NotStarted)
    ));

    client.start(HandshakeRole::Client, &mut sink).unwrap();
    assert!(matches!(
        client.send(b"x", &mut sink),
        Err(SessionError::NotConnected)
    ));
}

#[test]
fn test_double_start_rejected() {
    let mut client = PskSession::new(PSK).unwrap();
    let mut sink = RecordingSink::default();

    client.start(HandshakeRole::Client, &mut sink).unwrap();
    assert!(matches!(
        client.start(HandshakeRole::Client, &mut sink),
        Err(SessionError::AlreadyStarted)
    ));
    assert_eq!(sink.records.len(), 1);
}

#[test]
fn test_stop_sends_close() {
    let (mut client, mut server, mut client_sink, mut server_sink) = establish();

    client.stop(&mut client_sink).unwrap();
    assert!(!client.is_started());
    assert_eq!(client_sink.records.len(), 1);
    assert_eq!(client_sink.records[0][0], RecordType::Close.to_byte());

    server.receive(&client_sink.take_datagram(), &mut server_sink);
    assert!(!server.is_started());
}

#[test]
fn test_stop_not_started() {
    let mut client = PskSession::new(PSK).unwrap();
    let mut sink = RecordingSink::default();
    assert!(matches!(
        client.stop(&mut sink),
        Err(SessionError::NotStarted)
    ));
}

#[test]
fn test_stop_during_handshake_is_silent() {
    let mut client = PskSession::new(PSK).unwrap();
    let mut sink = RecordingSink::default();

    client.start(HandshakeRole::Client, &mut sink).unwrap();
    sink.records.clear();

    client.stop(&mut sink).unwrap();
    assert!(!client.is_started());
    assert!(sink.records.is_empty());
}

#[test]
fn test_sink_failure_propagates() {
    let (mut client, _server, mut client_sink, _server_sink) = establish();

    client_sink.fail_sends = true;
    let result = client.send(b"data", &mut client_sink);
    assert!(matches!(result, Err(SessionError::Buffer(_))));
}

#[test]
fn test_start_sink_failure_leaves_idle() {
    let mut client = PskSession::new(PSK).unwrap();
    let mut sink = RecordingSink {
        fail_sends: true,
        ..Default::default()
    };

    assert!(client.start(HandshakeRole::Client, &mut sink).is_err());
    assert!(!client.is_started());
}

#[test]
fn test_psk_validation() {
    assert!(matches!(
        PskSession::new(b"short".to_vec()),
        Err(SessionError::InvalidPsk(_))
    ));
    assert!(PskSession::from_hex("00112233445566778899aabbccddeeff").is_ok());
    assert!(matches!(
        PskSession::from_hex("zz"),
        Err(SessionError::InvalidPsk(_))
    ));
}

#[test]
fn test_record_framing() {
    let record = encode_record(RecordType::ApplicationData, &[9, 8, 7]).unwrap();
    assert_eq!(record, vec![0x17, 0x00, 0x03, 9, 8, 7]);

    let mut two = record.clone();
    two.extend_from_slice(&encode_record(RecordType::Close, &[]).unwrap());

    let (record_type, body, rest) = parse_record(&two).unwrap();
    assert_eq!(record_type, RecordType::ApplicationData);
    assert_eq!(body, &[9, 8, 7]);
    assert_eq!(rest, &[0x15, 0x00, 0x00]);
}

#[test]
fn test_parse_record_rejects_malformed() {
    assert!(parse_record(&[0x17, 0x00]).is_err());
    assert!(parse_record(&[0x99, 0x00, 0x00]).is_err());
    assert!(parse_record(&[0x17, 0x00, 0x05, 1, 2]).is_err());
}

#[test]
fn test_garbage_datagram_ignored() {
    let (_client, mut server, _client_sink, mut server_sink) = establish();

    server.receive(&[0xde, 0xad, 0xbe, 0xef], &mut server_sink);
    assert!(server.is_connected());
    assert!(server_sink.delivered.is_empty());
}
