//! Protocol module - wire format, framing, and message bodies.
//!
//! This module implements the binary protocol spoken on a connection:
//! - 8-byte header encoding/decoding
//! - Frame struct pairing a header with its body
//! - Quest/Answer bodies encoded as vbs tuples

mod frame;
mod message;
mod wire_format;

pub use frame::Frame;
pub use message::{Answer, Message, Quest, TXID_ASSIGN, TXID_ONEWAY};
pub use wire_format::{Header, MessageType, DEFAULT_MESSAGE_SIZE, HEADER_SIZE, MAGIC};
