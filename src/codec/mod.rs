//! VBS value codec.
//!
//! Values are encoded as a tag head followed by an optional payload. A
//! head packs the value kind and, for integers and string lengths, the low
//! bits of the number into one byte, preceded by 7-bit little-endian
//! continuation bytes (high bit set) when the number does not fit.
//!
//! ```text
//! 0x01 tail        0x02 list        0x03 dict        0x0F null
//! 0x10-0x17 descriptor              0x18/0x19 false/true
//! 0x1B blob        0x1C/0x1D decimal (+/-)           0x1E/0x1F floating (+/-)
//! 001x_xxxx string 010x_xxxx integer (+)             011x_xxxx integer (-)
//! ```
//!
//! Lists and dicts have no length prefix: their items are followed by a
//! tail tag.
//!
//! # Example
//!
//! ```
//! use xic::codec::{decode, encode, Map, Value};
//!
//! let mut args = Map::new();
//! args.insert("a", 1);
//! let bytes = encode(&Value::from(args.clone()));
//! assert_eq!(decode(&bytes).unwrap(), Value::from(args));
//! ```

mod pack;
mod textify;
mod unpack;
mod value;

pub use pack::{encode, pack, Packer};
pub use textify::textify;
pub use unpack::{decode, unpack, Unpacker, MAX_DEPTH};
pub use value::{Decimal, Map, Value};

/// Tag bytes.
pub mod tag {
    pub const TAIL: u8 = 0x01;
    pub const LIST: u8 = 0x02;
    pub const DICT: u8 = 0x03;
    pub const NULL: u8 = 0x0F;
    pub const DESCRIPTOR: u8 = 0x10;
    pub const BOOL: u8 = 0x18;
    pub const BLOB: u8 = 0x1B;
    pub const DECIMAL: u8 = 0x1C;
    pub const FLOATING: u8 = 0x1E;
    pub const STRING: u8 = 0x20;
    pub const INTEGER: u8 = 0x40;
    pub const INTEGER_NEGATIVE: u8 = 0x60;
}

/// Largest descriptor number.
pub const DESCRIPTOR_MAX: u16 = 0x7fff;

/// Flag bit for the special descriptor.
pub const SPECIAL_DESCRIPTOR: u16 = 0x8000;

// Exponents marking special float and decimal values (significand 0).
pub(crate) const FLT_ZERO: i64 = 1;
pub(crate) const FLT_INF: i64 = 2;
pub(crate) const FLT_NAN: i64 = 3;
pub(crate) const FLT_SNAN: i64 = 4;
