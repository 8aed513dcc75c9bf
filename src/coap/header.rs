//! CoAP fixed header and token.
//!
//! ```text
//!  0                   1                   2                   3
//! |Ver| T |  TKL  |      Code     |          Message ID           |
//! |   Token (if any, TKL bytes) ...
//! ```

use super::ClientError;
use std::fmt;

/// CoAP protocol version.
pub const COAP_VERSION: u8 = 1;

/// Size of the fixed header.
pub const HEADER_SIZE: usize = 4;

/// Longest token a message may carry.
pub const MAX_TOKEN_LENGTH: usize = 8;

/// Separates options from payload.
pub const PAYLOAD_MARKER: u8 = 0xff;

/// CoAP message type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Confirmable = 0,
    NonConfirmable = 1,
    Acknowledgment = 2,
    Reset = 3,
}

impl MessageType {
    /// Convert from the 2-bit wire value.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => MessageType::Confirmable,
            1 => MessageType::NonConfirmable,
            2 => MessageType::Acknowledgment,
            _ => MessageType::Reset,
        }
    }

    /// Convert to the 2-bit wire value.
    pub fn to_bits(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::Confirmable => "CON",
            MessageType::NonConfirmable => "NON",
            MessageType::Acknowledgment => "ACK",
            MessageType::Reset => "RST",
        };
        write!(f, "{}", s)
    }
}

/// Request method or response code (`class.detail`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Code(u8);

impl Code {
    pub const EMPTY: Code = Code::new(0, 0);
    pub const GET: Code = Code::new(0, 1);
    pub const POST: Code = Code::new(0, 2);
    pub const PUT: Code = Code::new(0, 3);
    pub const DELETE: Code = Code::new(0, 4);

    pub const CREATED: Code = Code::new(2, 1);
    pub const DELETED: Code = Code::new(2, 2);
    pub const VALID: Code = Code::new(2, 3);
    pub const CHANGED: Code = Code::new(2, 4);
    pub const CONTENT: Code = Code::new(2, 5);

    pub const BAD_REQUEST: Code = Code::new(4, 0);
    pub const UNAUTHORIZED: Code = Code::new(4, 1);
    pub const FORBIDDEN: Code = Code::new(4, 3);
    pub const NOT_FOUND: Code = Code::new(4, 4);

    pub const INTERNAL_SERVER_ERROR: Code = Code::new(5, 0);

    /// Build a code from its class (3 bits) and detail (5 bits).
    pub const fn new(class: u8, detail: u8) -> Self {
        Code(((class & 0x07) << 5) | (detail & 0x1f))
    }

    /// Wrap a raw code byte.
    pub const fn from_byte(b: u8) -> Self {
        Code(b)
    }

    /// The raw code byte.
    pub const fn to_byte(self) -> u8 {
        self.0
    }

    pub fn class(self) -> u8 {
        self.0 >> 5
    }

    pub fn detail(self) -> u8 {
        self.0 & 0x1f
    }

    /// 0.00, used by empty ACK/RST messages.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// 0.01 through 0.31.
    pub fn is_request(self) -> bool {
        self.class() == 0 && !self.is_empty()
    }

    /// Class 2 and above.
    pub fn is_response(self) -> bool {
        self.class() >= 2
    }

    /// Class 2.
    pub fn is_success(self) -> bool {
        self.class() == 2
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

/// Decoded fixed header plus token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoapHeader {
    pub message_type: MessageType,
    pub code: Code,
    pub message_id: u16,
    pub token: Vec<u8>,
}

impl CoapHeader {
    /// Create a header, validating the token length.
    pub fn new(
        message_type: MessageType,
        code: Code,
        message_id: u16,
        token: &[u8],
    ) -> Result<Self, ClientError> {
        if token.len() > MAX_TOKEN_LENGTH {
            return Err(ClientError::TokenTooLong(token.len()));
        }
        Ok(Self {
            message_type,
            code,
            message_id,
            token: token.to_vec(),
        })
    }

    /// Parse the header at the start of `data`.
    ///
    /// Returns the header and the number of bytes it occupied.
    pub fn parse(data: &[u8]) -> Result<(Self, usize), ClientError> {
        if data.len() < HEADER_SIZE {
            return Err(ClientError::Malformed(format!(
                "{} bytes is shorter than the fixed header",
                data.len()
            )));
        }

        let version = data[0] >> 6;
        if version != COAP_VERSION {
            return Err(ClientError::Malformed(format!(
                "unsupported version {}",
                version
            )));
        }

        let token_len = (data[0] & 0x0f) as usize;
        if token_len > MAX_TOKEN_LENGTH {
            return Err(ClientError::Malformed(format!(
                "reserved token length {}",
                token_len
            )));
        }

        let end = HEADER_SIZE + token_len;
        if data.len() < end {
            return Err(ClientError::Malformed(format!(
                "token truncated: need {} bytes, have {}",
                end,
                data.len()
            )));
        }

        let header = Self {
            message_type: MessageType::from_bits(data[0] >> 4),
            code: Code::from_byte(data[1]),
            message_id: u16::from_be_bytes([data[2], data[3]]),
            token: data[HEADER_SIZE..end].to_vec(),
        };
        Ok((header, end))
    }

    /// Append the encoded header to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push((COAP_VERSION << 6) | (self.message_type.to_bits() << 4) | self.token.len() as u8);
        out.push(self.code.to_byte());
        out.extend_from_slice(&self.message_id.to_be_bytes());
        out.extend_from_slice(&self.token);
    }

    /// Encode to a new buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.token.len());
        self.encode_into(&mut out);
        out
    }

    /// Token rendered as hex, for logs.
    pub fn token_hex(&self) -> String {
        hex::encode(&self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_classes() {
        assert_eq!(Code::CONTENT.to_byte(), 0x45);
        assert_eq!(Code::NOT_FOUND.to_byte(), 0x84);
        assert_eq!(format!("{}", Code::CONTENT), "2.05");
        assert_eq!(format!("{}", Code::GET), "0.01");

        assert!(Code::POST.is_request());
        assert!(!Code::POST.is_response());
        assert!(Code::CHANGED.is_response());
        assert!(Code::CHANGED.is_success());
        assert!(Code::NOT_FOUND.is_response());
        assert!(!Code::NOT_FOUND.is_success());
        assert!(Code::EMPTY.is_empty());
        assert!(!Code::EMPTY.is_request());
    }

    #[test]
    fn test_header_encoding() {
        let header =
            CoapHeader::new(MessageType::Confirmable, Code::POST, 0x1234, &[0xaa, 0xbb]).unwrap();
        assert_eq!(header.encode(), vec![0x42, 0x02, 0x12, 0x34, 0xaa, 0xbb]);

        let (parsed, len) = CoapHeader::parse(&[0x62, 0x44, 0x12, 0x34, 0xaa, 0xbb, 0xff]).unwrap();
        assert_eq!(len, 6);
        assert_eq!(parsed.message_type, MessageType::Acknowledgment);
        assert_eq!(parsed.code, Code::CHANGED);
        assert_eq!(parsed.message_id, 0x1234);
        assert_eq!(parsed.token_hex(), "aabb");
    }

    #[test]
    fn test_header_rejects_bad_input() {
        assert!(CoapHeader::parse(&[0x40, 0x01]).is_err());
        // Version 2
        assert!(CoapHeader::parse(&[0x80, 0x01, 0x00, 0x01]).is_err());
        // Token length 9 is reserved
        assert!(CoapHeader::parse(&[0x49, 0x01, 0x00, 0x01]).is_err());
        // Token truncated
        assert!(CoapHeader::parse(&[0x44, 0x01, 0x00, 0x01, 0x01]).is_err());

        assert_eq!(
            CoapHeader::new(MessageType::Confirmable, Code::GET, 1, &[0u8; 9]),
            Err(ClientError::TokenTooLong(9))
        );
    }
}
