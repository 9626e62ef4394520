//! Wire format encoding and decoding.
//!
//! Implements the 8-byte header format:
//! ```text
//! ┌───────┬───────┬──────────┬───────┬─────────────┐
//! │ 'X'   │ '!'   │ Msg type │ Flags │ Body length │
//! │ 1 byte│ 1 byte│ 1 byte   │ 1 byte│ int32 BE    │
//! └───────┴───────┴──────────┴───────┴─────────────┘
//! ```
//!
//! Hello and Bye carry no body. Quest and Answer always do.

use crate::error::{Result, XicError};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Leading magic bytes of every frame.
pub const MAGIC: [u8; 2] = *b"X!";

/// Default maximum body size (16 MiB).
pub const DEFAULT_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Kind of message carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Quest = b'Q',
    Answer = b'A',
    Hello = b'H',
    Bye = b'B',
}

impl MessageType {
    /// Parse a type byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'Q' => Some(MessageType::Quest),
            b'A' => Some(MessageType::Answer),
            b'H' => Some(MessageType::Hello),
            b'B' => Some(MessageType::Bye),
            _ => None,
        }
    }

    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// True for the lifecycle frames that never carry a body.
    #[inline]
    pub fn is_control(self) -> bool {
        matches!(self, MessageType::Hello | MessageType::Bye)
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Message type.
    pub msg_type: MessageType,
    /// Flags byte (reserved, always 0).
    pub flags: u8,
    /// Body length in bytes.
    pub body_length: i32,
}

impl Header {
    /// Create a new header with zero flags.
    pub fn new(msg_type: MessageType, body_length: i32) -> Self {
        Self {
            msg_type,
            flags: 0,
            body_length,
        }
    }

    /// Header of a bodiless control frame.
    pub fn control(msg_type: MessageType) -> Self {
        Self::new(msg_type, 0)
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use xic::protocol::{Header, MessageType};
    ///
    /// let bytes = Header::new(MessageType::Quest, 100).encode();
    /// assert_eq!(&bytes, b"X!Q\0\0\0\0\x64");
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (8 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..2].copy_from_slice(&MAGIC);
        buf[2] = self.msg_type.as_byte();
        buf[3] = self.flags;
        buf[4..8].copy_from_slice(&self.body_length.to_be_bytes());
    }

    /// Decode header from bytes.
    ///
    /// Fails on a short buffer, bad magic, or an unknown message type.
    ///
    /// # Example
    ///
    /// ```
    /// use xic::protocol::{Header, MessageType};
    ///
    /// let header = Header::decode(b"X!A\0\0\0\0\x05").unwrap();
    /// assert_eq!(header.msg_type, MessageType::Answer);
    /// assert_eq!(header.body_length, 5);
    /// ```
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(XicError::Protocol(format!(
                "header needs {} bytes, got {}",
                HEADER_SIZE,
                buf.len()
            )));
        }
        if buf[0..2] != MAGIC {
            return Err(XicError::Protocol(format!(
                "bad magic {:#04x} {:#04x}",
                buf[0], buf[1]
            )));
        }
        let msg_type = MessageType::from_byte(buf[2]).ok_or_else(|| {
            XicError::Protocol(format!("unknown message type {:#04x}", buf[2]))
        })?;
        Ok(Self {
            msg_type,
            flags: buf[3],
            body_length: i32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Body length is not negative and not above `max_size`
    /// - Hello and Bye have no body
    /// - Quest and Answer have a body
    pub fn validate(&self, max_size: usize) -> Result<()> {
        let len = self.body_length;
        if len < 0 || len as usize > max_size {
            return Err(XicError::MessageSize {
                size: i64::from(len),
                limit: max_size,
            });
        }

        if self.msg_type.is_control() && len != 0 {
            return Err(XicError::Protocol(format!(
                "{:?} frame with {} byte body",
                self.msg_type, len
            )));
        }

        if !self.msg_type.is_control() && len == 0 {
            return Err(XicError::Protocol(format!(
                "{:?} frame with empty body",
                self.msg_type
            )));
        }

        Ok(())
    }

    /// Body length as `usize`. Only meaningful after [`Header::validate`].
    #[inline]
    pub fn body_len(&self) -> usize {
        self.body_length.max(0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::new(MessageType::Quest, 1234);
        let decoded = Header::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_byte_layout() {
        let bytes = Header::new(MessageType::Answer, 0x0102_0304).encode();
        assert_eq!(bytes, [b'X', b'!', b'A', 0, 0x01, 0x02, 0x03, 0x04]);

        let hello = Header::control(MessageType::Hello).encode();
        assert_eq!(&hello, b"X!H\0\0\0\0\0");
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let err = Header::decode(b"Y!Q\0\0\0\0\x01").unwrap_err();
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = Header::decode(b"X!Z\0\0\0\0\x01").unwrap_err();
        assert!(err.to_string().contains("unknown message type"));
    }

    #[test]
    fn test_decode_too_short_buffer() {
        assert!(Header::decode(b"X!Q").is_err());
    }

    #[test]
    fn test_validate_body_rules() {
        assert!(Header::control(MessageType::Hello).validate(100).is_ok());
        assert!(Header::control(MessageType::Bye).validate(100).is_ok());
        assert!(Header::new(MessageType::Bye, 3).validate(100).is_err());
        assert!(Header::new(MessageType::Quest, 0).validate(100).is_err());
        assert!(Header::new(MessageType::Answer, 10).validate(100).is_ok());
    }

    #[test]
    fn test_validate_size_limit() {
        let too_big = Header::new(MessageType::Quest, 101);
        assert!(matches!(
            too_big.validate(100),
            Err(XicError::MessageSize { size: 101, limit: 100 })
        ));

        let negative = Header::new(MessageType::Quest, -5);
        assert!(matches!(negative.validate(100), Err(XicError::MessageSize { .. })));
    }
}
