//! Frame struct: a header plus its body.
//!
//! Uses `bytes::Bytes` for the body so decoded frames can be handed between
//! tasks without copying.
//!
//! # Example
//!
//! ```
//! use xic::protocol::{Frame, Header, MessageType};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(Header::control(MessageType::Hello), Bytes::new());
//! assert!(frame.body().is_empty());
//! assert_eq!(frame.header.encode(), *b"X!H\0\0\0\0\0");
//! ```

use bytes::Bytes;

use super::message::Message;
use super::wire_format::Header;
use crate::error::Result;

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Body bytes.
    pub body: Bytes,
}

impl Frame {
    pub fn new(header: Header, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Frame for a message, header length taken from the encoded body.
    pub fn from_message(msg: &Message) -> Self {
        let body = msg.encode_body();
        Self {
            header: Header::new(msg.msg_type(), body.len() as i32),
            body,
        }
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Decode the body into a message.
    pub fn to_message(&self) -> Result<Message> {
        Message::decode(&self.header, &self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Map;
    use crate::protocol::{MessageType, Quest};

    #[test]
    fn test_frame_from_message() {
        let quest = Quest::oneway("S", "m", Map::new());
        let frame = Frame::from_message(&Message::Quest(quest.clone()));

        assert_eq!(frame.header.msg_type, MessageType::Quest);
        assert_eq!(frame.header.body_len(), frame.body.len());
        assert_eq!(frame.to_message().unwrap(), Message::Quest(quest));
    }

    #[test]
    fn test_bye_frame_is_header_only() {
        let frame = Frame::from_message(&Message::Bye);
        assert!(frame.body().is_empty());
        let decoded = Header::decode(&frame.header.encode()).unwrap();
        assert_eq!(decoded.msg_type, MessageType::Bye);
    }
}
