//! CoAP option and payload encoding.

use super::header::{CoapHeader, Code, MessageType, PAYLOAD_MARKER};
use super::ClientError;
use crate::message::{Message, MessageError, MessagePool};

/// Option numbers used by commissioning exchanges.
pub mod option {
    pub const URI_HOST: u16 = 3;
    pub const URI_PATH: u16 = 11;
    pub const CONTENT_FORMAT: u16 = 12;
    pub const URI_QUERY: u16 = 15;
}

/// Largest value an option delta or length can encode (14 + 2 extended bytes).
const MAX_EXTENDED: usize = u16::MAX as usize + 269;

/// One option as it appears in a parsed message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoapOption<'a> {
    pub number: u16,
    pub value: &'a [u8],
}

/// A parsed CoAP message borrowing from its buffer.
#[derive(Clone, Debug)]
pub struct CoapMessage<'a> {
    pub header: CoapHeader,
    pub options: Vec<CoapOption<'a>>,
    pub payload: &'a [u8],
}

impl<'a> CoapMessage<'a> {
    /// Parse a complete message.
    pub fn parse(data: &'a [u8]) -> Result<Self, ClientError> {
        let (header, mut pos) = CoapHeader::parse(data)?;
        let mut options = Vec::new();
        let mut number: u32 = 0;

        while pos < data.len() {
            let byte = data[pos];
            pos += 1;

            if byte == PAYLOAD_MARKER {
                if pos == data.len() {
                    return Err(ClientError::Malformed(
                        "payload marker without payload".into(),
                    ));
                }
                return Ok(Self {
                    header,
                    options,
                    payload: &data[pos..],
                });
            }

            let delta = read_extended(data, &mut pos, byte >> 4)?;
            let length = read_extended(data, &mut pos, byte & 0x0f)?;

            number += delta as u32;
            if number > u16::MAX as u32 {
                return Err(ClientError::Malformed(format!(
                    "option number {} out of range",
                    number
                )));
            }

            let end = pos + length;
            if end > data.len() {
                return Err(ClientError::Malformed(format!(
                    "option {} value truncated",
                    number
                )));
            }

            options.push(CoapOption {
                number: number as u16,
                value: &data[pos..end],
            });
            pos = end;
        }

        Ok(Self {
            header,
            options,
            payload: &[],
        })
    }

    /// Uri-Path segments joined with '/'.
    pub fn uri_path(&self) -> String {
        self.options
            .iter()
            .filter(|o| o.number == option::URI_PATH)
            .map(|o| String::from_utf8_lossy(o.value).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn read_extended(data: &[u8], pos: &mut usize, nibble: u8) -> Result<usize, ClientError> {
    match nibble {
        0..=12 => Ok(nibble as usize),
        13 => {
            let b = *data
                .get(*pos)
                .ok_or_else(|| ClientError::Malformed("option extension truncated".into()))?;
            *pos += 1;
            Ok(b as usize + 13)
        }
        14 => {
            let bytes = data
                .get(*pos..*pos + 2)
                .ok_or_else(|| ClientError::Malformed("option extension truncated".into()))?;
            *pos += 2;
            Ok(u16::from_be_bytes([bytes[0], bytes[1]]) as usize + 269)
        }
        _ => Err(ClientError::Malformed("reserved option nibble 15".into())),
    }
}

fn push_extended(out: &mut Vec<u8>, value: usize) {
    if value >= 269 {
        out.extend_from_slice(&((value - 269) as u16).to_be_bytes());
    } else if value >= 13 {
        out.push((value - 13) as u8);
    }
}

fn nibble(value: usize) -> u8 {
    match value {
        0..=12 => value as u8,
        13..=268 => 13,
        _ => 14,
    }
}

/// Builds an outbound request.
#[derive(Clone, Debug)]
pub struct RequestBuilder {
    header: CoapHeader,
    options: Vec<(u16, Vec<u8>)>,
    payload: Vec<u8>,
}

impl RequestBuilder {
    /// Start a request with the given header fields.
    pub fn new(
        message_type: MessageType,
        code: Code,
        message_id: u16,
        token: &[u8],
    ) -> Result<Self, ClientError> {
        Ok(Self {
            header: CoapHeader::new(message_type, code, message_id, token)?,
            options: Vec::new(),
            payload: Vec::new(),
        })
    }

    /// Add one Uri-Path option per non-empty `/`-separated segment.
    pub fn uri_path(mut self, path: &str) -> Self {
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            self.options
                .push((option::URI_PATH, segment.as_bytes().to_vec()));
        }
        self
    }

    /// Add an arbitrary option.
    pub fn option(mut self, number: u16, value: &[u8]) -> Self {
        self.options.push((number, value.to_vec()));
        self
    }

    /// Set the payload.
    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    /// The header this request will carry.
    pub fn header(&self) -> &CoapHeader {
        &self.header
    }

    /// Encode to bytes. Options are emitted in ascending number order.
    pub fn encode(&self) -> Result<Vec<u8>, ClientError> {
        let mut out = self.header.encode();

        let mut options: Vec<&(u16, Vec<u8>)> = self.options.iter().collect();
        options.sort_by_key(|(number, _)| *number);

        let mut previous = 0u16;
        for (number, value) in options {
            if value.len() > MAX_EXTENDED {
                return Err(ClientError::OptionTooLong {
                    number: *number,
                    len: value.len(),
                });
            }
            let delta = (*number - previous) as usize;
            out.push((nibble(delta) << 4) | nibble(value.len()));
            push_extended(&mut out, delta);
            push_extended(&mut out, value.len());
            out.extend_from_slice(value);
            previous = *number;
        }

        if !self.payload.is_empty() {
            out.push(PAYLOAD_MARKER);
            out.extend_from_slice(&self.payload);
        }
        Ok(out)
    }

    /// Encode into a message from `pool`.
    pub fn build(&self, pool: &MessagePool) -> Result<Message, ClientError> {
        let bytes = self.encode()?;
        pool.message_from(&bytes).map_err(|e: MessageError| {
            ClientError::Malformed(format!("cannot allocate request: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_with_path_and_payload() {
        let bytes = RequestBuilder::new(MessageType::Confirmable, Code::POST, 7, &[0x01])
            .unwrap()
            .uri_path("c/cp")
            .payload(b"hi")
            .encode()
            .unwrap();

        assert_eq!(
            bytes,
            vec![
                0x41, 0x02, 0x00, 0x07, 0x01, // header + token
                0xb1, b'c', // Uri-Path delta 11, len 1
                0x02, b'c', b'p', // Uri-Path delta 0, len 2
                0xff, b'h', b'i',
            ]
        );

        let parsed = CoapMessage::parse(&bytes).unwrap();
        assert_eq!(parsed.uri_path(), "c/cp");
        assert_eq!(parsed.payload, b"hi");
        assert_eq!(parsed.header.code, Code::POST);
    }

    #[test]
    fn test_options_sorted_and_extended() {
        let long_value = vec![b'x'; 20];
        let bytes = RequestBuilder::new(MessageType::NonConfirmable, Code::GET, 1, &[])
            .unwrap()
            .option(option::URI_QUERY, b"q")
            .option(option::URI_PATH, &long_value)
            .encode()
            .unwrap();

        let parsed = CoapMessage::parse(&bytes).unwrap();
        assert_eq!(parsed.options.len(), 2);
        assert_eq!(parsed.options[0].number, option::URI_PATH);
        assert_eq!(parsed.options[0].value, long_value.as_slice());
        assert_eq!(parsed.options[1].number, option::URI_QUERY);
        assert!(parsed.payload.is_empty());
    }

    #[test]
    fn test_parse_rejects_truncated_option() {
        // Uri-Path claiming 5 bytes with only 1 present
        let data = [0x40, 0x01, 0x00, 0x01, 0xb5, b'a'];
        assert!(CoapMessage::parse(&data).is_err());
    }

    #[test]
    fn test_parse_rejects_empty_payload_after_marker() {
        let data = [0x40, 0x01, 0x00, 0x01, 0xff];
        assert!(CoapMessage::parse(&data).is_err());
    }

    #[test]
    fn test_build_into_message() {
        let pool = MessagePool::new(1, 64);
        let message = RequestBuilder::new(MessageType::Confirmable, Code::GET, 3, &[9])
            .unwrap()
            .uri_path("a")
            .build(&pool)
            .unwrap();
        assert_eq!(pool.in_use(), 1);
        assert_eq!(message.as_bytes()[1], Code::GET.to_byte());
    }
}
