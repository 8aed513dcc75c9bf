//! Pre-shared-key session engine.
//!
//! A two-round handshake authenticated by a shared commissioning key,
//! followed by ChaCha20-Poly1305 application records.
//!
//! ## Record Format
//!
//! ```text
//! [type:1][length:2 BE][body:length]
//! ```
//!
//! Several records may share one datagram; they are processed in order.
//!
//! ## Handshake
//!
//! ```text
//!   -> ClientHello   client_random(32)
//!   <- ServerHello   server_random(32) || tag(16)   sealed with server key
//!   -> Finished      tag(16)                        sealed with client key
//! ```
//!
//! Both tags seal an empty plaintext under counter 0 with the transcript
//! hash SHA-256(client_random || server_random) as AAD. Keys come from
//! HKDF-SHA256(salt = client_random || server_random, ikm = psk).
//!
//! Application and close records carry `counter(8 LE) || ciphertext` and
//! authenticate `type || counter` as AAD. Received counters must strictly
//! increase.

use super::{
    CipherState, HandshakeRole, RecordSink, SessionEngine, SessionError, SessionSink, TAG_SIZE,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::{debug, info, warn};

/// Minimum accepted pre-shared key length in bytes.
pub const PSK_MIN_SIZE: usize = 16;

const RANDOM_SIZE: usize = 32;
const RECORD_HEADER_SIZE: usize = 3;
const COUNTER_SIZE: usize = 8;

const CLIENT_WRITE_LABEL: &[u8] = b"coaps-bridge client write";
const SERVER_WRITE_LABEL: &[u8] = b"coaps-bridge server write";

/// Record type identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// First client handshake record.
    ClientHello = 0x01,
    /// Server handshake response with key confirmation.
    ServerHello = 0x02,
    /// Client key confirmation.
    Finished = 0x03,
    /// Authenticated session close.
    Close = 0x15,
    /// Encrypted application data.
    ApplicationData = 0x17,
}

impl RecordType {
    /// Try to convert from a byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(RecordType::ClientHello),
            0x02 => Some(RecordType::ServerHello),
            0x03 => Some(RecordType::Finished),
            0x15 => Some(RecordType::Close),
            0x17 => Some(RecordType::ApplicationData),
            _ => None,
        }
    }

    /// Convert to a byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordType::ClientHello => "ClientHello",
            RecordType::ServerHello => "ServerHello",
            RecordType::Finished => "Finished",
            RecordType::Close => "Close",
            RecordType::ApplicationData => "ApplicationData",
        };
        write!(f, "{}", name)
    }
}

struct SessionKeys {
    client_write: [u8; 32],
    server_write: [u8; 32],
}

enum State {
    /// Not started, or torn down.
    Idle,
    /// Client sent ClientHello.
    AwaitServerHello { client_random: [u8; RANDOM_SIZE] },
    /// Server waiting for a ClientHello.
    AwaitClientHello,
    /// Server sent ServerHello.
    AwaitFinished {
        keys: SessionKeys,
        transcript: [u8; 32],
    },
    /// Handshake complete.
    Established {
        tx: CipherState,
        rx: CipherState,
        last_rx: u64,
    },
}

/// Session engine authenticated by a pre-shared key.
pub struct PskSession {
    psk: Vec<u8>,
    role: Option<HandshakeRole>,
    state: State,
}

impl PskSession {
    /// Create an engine for the given key.
    pub fn new(psk: impl Into<Vec<u8>>) -> Result<Self, SessionError> {
        let psk = psk.into();
        if psk.len() < PSK_MIN_SIZE {
            return Err(SessionError::InvalidPsk(format!(
                "expected at least {} bytes, got {}",
                PSK_MIN_SIZE,
                psk.len()
            )));
        }
        Ok(Self {
            psk,
            role: None,
            state: State::Idle,
        })
    }

    /// Create an engine from a hex-encoded key.
    pub fn from_hex(psk_hex: &str) -> Result<Self, SessionError> {
        let psk = hex::decode(psk_hex.trim())
            .map_err(|e| SessionError::InvalidPsk(format!("invalid hex: {}", e)))?;
        Self::new(psk)
    }

    /// Role of the most recent start, if any.
    pub fn role(&self) -> Option<HandshakeRole> {
        self.role
    }

    fn handle_record(
        &mut self,
        record_type: RecordType,
        body: &[u8],
        sink: &mut dyn SessionSink,
    ) -> Result<(), SessionError> {
        let state = std::mem::replace(&mut self.state, State::Idle);

        match (state, record_type) {
            (State::AwaitClientHello, RecordType::ClientHello) => {
                let Ok(client_random) = <[u8; RANDOM_SIZE]>::try_from(body) else {
                    self.state = State::AwaitClientHello;
                    return Err(SessionError::MalformedRecord(format!(
                        "ClientHello body is {} bytes",
                        body.len()
                    )));
                };

                let mut server_random = [0u8; RANDOM_SIZE];
                rand::thread_rng().fill_bytes(&mut server_random);

                let (keys, transcript) = derive_keys(&self.psk, &client_random, &server_random)?;
                let tag = CipherState::new(keys.server_write, 0).encrypt_with_counter(
                    &[],
                    0,
                    &transcript,
                )?;

                let mut reply = Vec::with_capacity(RANDOM_SIZE + TAG_SIZE);
                reply.extend_from_slice(&server_random);
                reply.extend_from_slice(&tag);

                self.state = State::AwaitFinished { keys, transcript };
                emit(sink, RecordType::ServerHello, &reply)?;
                debug!("ServerHello sent");
                Ok(())
            }

            (State::AwaitServerHello { client_random }, RecordType::ServerHello) => {
                if body.len() != RANDOM_SIZE + TAG_SIZE {
                    return Err(SessionError::HandshakeFailed(format!(
                        "ServerHello body is {} bytes",
                        body.len()
                    )));
                }
                let mut server_random = [0u8; RANDOM_SIZE];
                server_random.copy_from_slice(&body[..RANDOM_SIZE]);

                let (keys, transcript) = derive_keys(&self.psk, &client_random, &server_random)?;
                CipherState::new(keys.server_write, 0)
                    .decrypt_with_counter(&body[RANDOM_SIZE..], 0, &transcript)
                    .map_err(|_| {
                        SessionError::HandshakeFailed("server key confirmation failed".into())
                    })?;

                let finished = CipherState::new(keys.client_write, 0).encrypt_with_counter(
                    &[],
                    0,
                    &transcript,
                )?;
                emit(sink, RecordType::Finished, &finished)?;

                self.state = State::Established {
                    tx: CipherState::new(keys.client_write, 1),
                    rx: CipherState::new(keys.server_write, 1),
                    last_rx: 0,
                };
                info!(role = %HandshakeRole::Client, "Session established");
                Ok(())
            }

            (State::AwaitFinished { keys, transcript }, RecordType::Finished) => {
                CipherState::new(keys.client_write, 0)
                    .decrypt_with_counter(body, 0, &transcript)
                    .map_err(|_| {
                        SessionError::HandshakeFailed("client key confirmation failed".into())
                    })?;

                self.state = State::Established {
                    tx: CipherState::new(keys.server_write, 1),
                    rx: CipherState::new(keys.client_write, 1),
                    last_rx: 0,
                };
                info!(role = %HandshakeRole::Server, "Session established");
                Ok(())
            }

            (State::Established { tx, rx, last_rx }, RecordType::ApplicationData) => {
                match open(&rx, last_rx, RecordType::ApplicationData, body) {
                    Ok((counter, plaintext)) => {
                        self.state = State::Established {
                            tx,
                            rx,
                            last_rx: counter,
                        };
                        sink.deliver(&plaintext);
                        Ok(())
                    }
                    Err(e) => {
                        self.state = State::Established { tx, rx, last_rx };
                        Err(e)
                    }
                }
            }

            (State::Established { tx, rx, last_rx }, RecordType::Close) => {
                match open(&rx, last_rx, RecordType::Close, body) {
                    Ok(_) => {
                        info!("Peer closed session");
                        Ok(())
                    }
                    Err(e) => {
                        self.state = State::Established { tx, rx, last_rx };
                        Err(e)
                    }
                }
            }

            (state, record_type) => {
                self.state = state;
                debug!(record_type = %record_type, "Ignoring unexpected record");
                Ok(())
            }
        }
    }
}

impl SessionEngine for PskSession {
    fn start(&mut self, role: HandshakeRole, sink: &mut dyn RecordSink) -> Result<(), SessionError> {
        if self.is_started() {
            return Err(SessionError::AlreadyStarted);
        }
        self.role = Some(role);

        match role {
            HandshakeRole::Client => {
                let mut client_random = [0u8; RANDOM_SIZE];
                rand::thread_rng().fill_bytes(&mut client_random);

                emit(sink, RecordType::ClientHello, &client_random)?;
                self.state = State::AwaitServerHello { client_random };
                debug!("ClientHello sent");
            }
            HandshakeRole::Server => {
                self.state = State::AwaitClientHello;
                debug!("Awaiting ClientHello");
            }
        }
        Ok(())
    }

    fn stop(&mut self, sink: &mut dyn RecordSink) -> Result<(), SessionError> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => Err(SessionError::NotStarted),
            State::Established { mut tx, .. } => {
                let body = seal(&mut tx, RecordType::Close, &[])?;
                emit(sink, RecordType::Close, &body)?;
                debug!("Close sent");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn is_started(&self) -> bool {
        !matches!(self.state, State::Idle)
    }

    fn is_connected(&self) -> bool {
        matches!(self.state, State::Established { .. })
    }

    fn send(&mut self, plaintext: &[u8], sink: &mut dyn RecordSink) -> Result<(), SessionError> {
        let started = self.is_started();
        let State::Established { tx, .. } = &mut self.state else {
            return Err(if started {
                SessionError::NotConnected
            } else {
                SessionError::NotStarted
            });
        };

        let body = seal(tx, RecordType::ApplicationData, plaintext)?;
        emit(sink, RecordType::ApplicationData, &body)
    }

    fn receive(&mut self, datagram: &[u8], sink: &mut dyn SessionSink) {
        let mut rest = datagram;

        while !rest.is_empty() {
            let (record_type, body, remaining) = match parse_record(rest) {
                Ok(parts) => parts,
                Err(e) => {
                    debug!(error = %e, "Dropping malformed datagram tail");
                    return;
                }
            };
            rest = remaining;

            if let Err(e) = self.handle_record(record_type, body, sink) {
                if !self.is_started() {
                    warn!(record_type = %record_type, error = %e, "Handshake aborted");
                    return;
                }
                debug!(record_type = %record_type, error = %e, "Record rejected");
            }
        }
    }
}

impl fmt::Debug for PskSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PskSession")
            .field("role", &self.role)
            .field("started", &self.is_started())
            .field("connected", &self.is_connected())
            .field("psk", &"[redacted]")
            .finish()
    }
}

/// Derive directional keys and the transcript hash.
fn derive_keys(
    psk: &[u8],
    client_random: &[u8; RANDOM_SIZE],
    server_random: &[u8; RANDOM_SIZE],
) -> Result<(SessionKeys, [u8; 32]), SessionError> {
    let mut salt = [0u8; RANDOM_SIZE * 2];
    salt[..RANDOM_SIZE].copy_from_slice(client_random);
    salt[RANDOM_SIZE..].copy_from_slice(server_random);

    let hk = Hkdf::<Sha256>::new(Some(&salt), psk);
    let mut client_write = [0u8; 32];
    let mut server_write = [0u8; 32];
    hk.expand(CLIENT_WRITE_LABEL, &mut client_write)
        .map_err(|_| SessionError::HandshakeFailed("key derivation failed".into()))?;
    hk.expand(SERVER_WRITE_LABEL, &mut server_write)
        .map_err(|_| SessionError::HandshakeFailed("key derivation failed".into()))?;

    let mut hasher = Sha256::new();
    hasher.update(salt);
    let transcript: [u8; 32] = hasher.finalize().into();

    Ok((
        SessionKeys {
            client_write,
            server_write,
        },
        transcript,
    ))
}

fn record_aad(record_type: RecordType, counter: u64) -> [u8; 1 + COUNTER_SIZE] {
    let mut aad = [0u8; 1 + COUNTER_SIZE];
    aad[0] = record_type.to_byte();
    aad[1..].copy_from_slice(&counter.to_le_bytes());
    aad
}

/// Seal a counter-carrying record body.
fn seal(tx: &mut CipherState, record_type: RecordType, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
    let aad = record_aad(record_type, tx.next_counter());
    let (counter, ciphertext) = tx.encrypt(plaintext, &aad)?;

    let mut body = Vec::with_capacity(COUNTER_SIZE + ciphertext.len());
    body.extend_from_slice(&counter.to_le_bytes());
    body.extend_from_slice(&ciphertext);
    Ok(body)
}

/// Open a counter-carrying record body, rejecting non-increasing counters.
fn open(
    rx: &CipherState,
    last_rx: u64,
    record_type: RecordType,
    body: &[u8],
) -> Result<(u64, Vec<u8>), SessionError> {
    if body.len() < COUNTER_SIZE + TAG_SIZE {
        return Err(SessionError::MalformedRecord(format!(
            "{} body is {} bytes",
            record_type,
            body.len()
        )));
    }

    let mut counter_bytes = [0u8; COUNTER_SIZE];
    counter_bytes.copy_from_slice(&body[..COUNTER_SIZE]);
    let counter = u64::from_le_bytes(counter_bytes);

    if counter <= last_rx {
        return Err(SessionError::ReplayDetected(counter));
    }

    let aad = record_aad(record_type, counter);
    let plaintext = rx.decrypt_with_counter(&body[COUNTER_SIZE..], counter, &aad)?;
    Ok((counter, plaintext))
}

/// Frame a record.
pub(crate) fn encode_record(record_type: RecordType, body: &[u8]) -> Result<Vec<u8>, SessionError> {
    if body.len() > u16::MAX as usize {
        return Err(SessionError::RecordTooLarge {
            size: body.len(),
            max: u16::MAX as usize,
        });
    }

    let mut record = Vec::with_capacity(RECORD_HEADER_SIZE + body.len());
    record.push(record_type.to_byte());
    record.extend_from_slice(&(body.len() as u16).to_be_bytes());
    record.extend_from_slice(body);
    Ok(record)
}

/// Split the first record off a datagram.
pub(crate) fn parse_record(data: &[u8]) -> Result<(RecordType, &[u8], &[u8]), SessionError> {
    if data.len() < RECORD_HEADER_SIZE {
        return Err(SessionError::MalformedRecord(format!(
            "{} bytes is shorter than a record header",
            data.len()
        )));
    }

    let record_type = RecordType::from_byte(data[0]).ok_or_else(|| {
        SessionError::MalformedRecord(format!("unknown record type 0x{:02x}", data[0]))
    })?;
    let length = u16::from_be_bytes([data[1], data[2]]) as usize;

    let end = RECORD_HEADER_SIZE + length;
    if data.len() < end {
        return Err(SessionError::MalformedRecord(format!(
            "record length {} exceeds remaining {} bytes",
            length,
            data.len() - RECORD_HEADER_SIZE
        )));
    }

    Ok((record_type, &data[RECORD_HEADER_SIZE..end], &data[end..]))
}

fn emit(sink: &mut dyn RecordSink, record_type: RecordType, body: &[u8]) -> Result<(), SessionError> {
    let record = encode_record(record_type, body)?;
    sink.send_record(&record)?;
    Ok(())
}
