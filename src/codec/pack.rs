//! Value encoder.
//!
//! The encoder never fails: every [`Value`] has a vbs representation.

use bytes::Bytes;
use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{ToPrimitive, Zero};

use super::value::{is_quiet_nan, Decimal, Map, Value};
use super::{tag, DESCRIPTOR_MAX, FLT_INF, FLT_NAN, FLT_SNAN, FLT_ZERO};

/// Growable vbs output buffer.
#[derive(Debug, Default)]
pub struct Packer {
    buf: Vec<u8>,
}

impl Packer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.buf)
    }

    /// Kind in the high bits, low 5 bits of `num` in the final byte.
    fn put_kind(&mut self, kind: u8, mut num: u64) {
        while num >= 0x20 {
            self.buf.push(0x80 | (num & 0x7f) as u8);
            num >>= 7;
        }
        self.buf.push(kind | num as u8);
    }

    fn put_kind_big(&mut self, kind: u8, num: &BigUint) {
        if let Some(small) = num.to_u64() {
            return self.put_kind(kind, small);
        }
        let mut num = num.clone();
        let limit = BigUint::from(0x20u32);
        while num >= limit {
            self.buf.push(0x80 | low7(&num));
            num >>= 7;
        }
        self.buf.push(kind | low7(&num));
    }

    /// Full 7-bit groups followed by a bare tag byte.
    fn put_tag(&mut self, tag: u8, mut num: u64) {
        while num > 0 {
            self.buf.push(0x80 | (num & 0x7f) as u8);
            num >>= 7;
        }
        self.buf.push(tag);
    }

    fn put_tag_big(&mut self, tag: u8, num: &BigUint) {
        if let Some(small) = num.to_u64() {
            return self.put_tag(tag, small);
        }
        let mut num = num.clone();
        while num.bits() > 0 {
            self.buf.push(0x80 | low7(&num));
            num >>= 7;
        }
        self.buf.push(tag);
    }

    pub fn pack_i64(&mut self, n: i64) {
        if n < 0 {
            self.put_kind(tag::INTEGER_NEGATIVE, n.unsigned_abs());
        } else {
            self.put_kind(tag::INTEGER, n as u64);
        }
    }

    pub fn pack_integer(&mut self, n: &BigInt) {
        let kind = match n.sign() {
            Sign::Minus => tag::INTEGER_NEGATIVE,
            _ => tag::INTEGER,
        };
        self.put_kind_big(kind, n.magnitude());
    }

    pub fn pack_str(&mut self, s: &str) {
        self.put_kind(tag::STRING, s.len() as u64);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn pack_blob(&mut self, b: &[u8]) {
        self.put_tag(tag::BLOB, b.len() as u64);
        self.buf.extend_from_slice(b);
    }

    pub fn pack_bool(&mut self, b: bool) {
        self.buf.push(tag::BOOL | b as u8);
    }

    pub fn pack_null(&mut self) {
        self.buf.push(tag::NULL);
    }

    /// Encode as odd significand times a power of two.
    pub fn pack_f64(&mut self, x: f64) {
        let bits = x.to_bits();
        let negative = bits >> 63 != 0;
        let biased = ((bits >> 52) & 0x7ff) as i64;
        let mut significand = bits & 0x000f_ffff_ffff_ffff;

        let special = if biased == 0x7ff {
            Some(match significand {
                0 => FLT_INF,
                _ if is_quiet_nan(x) => FLT_NAN,
                _ => FLT_SNAN,
            })
        } else if biased == 0 && significand == 0 {
            Some(FLT_ZERO)
        } else {
            None
        };

        if let Some(code) = special {
            self.put_tag(tag::FLOATING, 0);
            self.pack_i64(if negative { -code } else { code });
            return;
        }

        let mut expo = if biased == 0 {
            1 - 1023
        } else {
            significand |= 1 << 52;
            biased - 1023
        };
        let shift = significand.trailing_zeros();
        significand >>= shift;
        expo = expo - 52 + i64::from(shift);

        self.put_tag(tag::FLOATING | negative as u8, significand);
        self.pack_i64(expo);
    }

    pub fn pack_decimal(&mut self, d: &Decimal) {
        let negative = d.is_negative();
        let code = match d {
            // A zero magnitude with an exponent would read back as a special.
            Decimal::Finite { significand, .. } if significand.is_zero() => FLT_ZERO,
            Decimal::Finite {
                significand,
                exponent,
            } => {
                self.put_tag_big(tag::DECIMAL | negative as u8, significand.magnitude());
                self.pack_i64(*exponent);
                return;
            }
            Decimal::Zero { .. } => FLT_ZERO,
            Decimal::Infinity { .. } => FLT_INF,
            Decimal::Nan { .. } => FLT_NAN,
            Decimal::SignalingNan { .. } => FLT_SNAN,
        };
        self.put_tag(tag::DECIMAL | negative as u8, 0);
        self.pack_i64(if negative { -code } else { code });
    }

    /// Opening tag of a list. Close it with [`Packer::tail`].
    pub fn list_head(&mut self) {
        self.buf.push(tag::LIST);
    }

    /// Opening tag of a dict. Close it with [`Packer::tail`].
    pub fn dict_head(&mut self) {
        self.buf.push(tag::DICT);
    }

    pub fn tail(&mut self) {
        self.buf.push(tag::TAIL);
    }

    /// Annotation prefix for the next value.
    ///
    /// `descriptor` is masked to 15 bits. `special` emits the special flag
    /// before the number.
    pub fn descriptor(&mut self, descriptor: u16, special: bool) {
        if special {
            self.buf.push(tag::DESCRIPTOR);
        }
        let mut num = descriptor & DESCRIPTOR_MAX;
        if num == 0 {
            return;
        }
        while num > 7 {
            self.buf.push(0x80 | (num & 0x7f) as u8);
            num >>= 7;
        }
        self.buf.push(tag::DESCRIPTOR | num as u8);
    }

    pub fn pack_map(&mut self, m: &Map) {
        self.dict_head();
        for (k, v) in m.iter() {
            self.pack(k);
            self.pack(v);
        }
        self.tail();
    }

    pub fn pack_list(&mut self, l: &[Value]) {
        self.list_head();
        for v in l {
            self.pack(v);
        }
        self.tail();
    }

    pub fn pack(&mut self, v: &Value) {
        match v {
            Value::Integer(n) => self.pack_integer(n),
            Value::Float(x) => self.pack_f64(*x),
            Value::Decimal(d) => self.pack_decimal(d),
            Value::Bool(b) => self.pack_bool(*b),
            Value::Null => self.pack_null(),
            Value::Blob(b) => self.pack_blob(b),
            Value::String(s) => self.pack_str(s),
            Value::List(l) => self.pack_list(l),
            Value::Map(m) => self.pack_map(m),
        }
    }
}

fn low7(num: &BigUint) -> u8 {
    num.iter_u32_digits().next().map_or(0, |d| (d & 0x7f) as u8)
}

/// Encode a single value.
pub fn encode(v: &Value) -> Bytes {
    let mut packer = Packer::new();
    packer.pack(v);
    packer.into_bytes()
}

/// Encode consecutive values with no enclosing list.
pub fn pack<'a, I>(values: I) -> Bytes
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut packer = Packer::new();
    for v in values {
        packer.pack(v);
    }
    packer.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_integers_are_single_byte() {
        assert_eq!(encode(&Value::from(0)).as_ref(), &[0x40]);
        assert_eq!(encode(&Value::from(31)).as_ref(), &[0x5f]);
        assert_eq!(encode(&Value::from(-1)).as_ref(), &[0x61]);
    }

    #[test]
    fn test_integer_continuation() {
        // 32 = 0b1_00000: low 7 bits first, then the remaining bits in the tag.
        assert_eq!(encode(&Value::from(32)).as_ref(), &[0xa0, 0x40]);
        assert_eq!(encode(&Value::from(-300)).as_ref(), &[0xac, 0x62]);
    }

    #[test]
    fn test_string_and_blob_heads() {
        assert_eq!(encode(&Value::from("ab")).as_ref(), &[0x22, b'a', b'b']);
        assert_eq!(encode(&Value::from("")).as_ref(), &[0x20]);
        assert_eq!(encode(&Value::from(&b"xy"[..])).as_ref(), &[0x82, 0x1b, b'x', b'y']);
        assert_eq!(encode(&Value::from(&b""[..])).as_ref(), &[0x1b]);
    }

    #[test]
    fn test_scalars() {
        assert_eq!(encode(&Value::from(true)).as_ref(), &[0x19]);
        assert_eq!(encode(&Value::from(false)).as_ref(), &[0x18]);
        assert_eq!(encode(&Value::Null).as_ref(), &[0x0f]);
    }

    #[test]
    fn test_float_specials() {
        assert_eq!(encode(&Value::from(0.0)).as_ref(), &[0x1e, 0x41]);
        assert_eq!(encode(&Value::from(-0.0)).as_ref(), &[0x1e, 0x61]);
        assert_eq!(encode(&Value::from(f64::INFINITY)).as_ref(), &[0x1e, 0x42]);
        assert_eq!(encode(&Value::from(f64::NEG_INFINITY)).as_ref(), &[0x1e, 0x62]);
        let quiet_nan = f64::from_bits(0x7ff8_0000_0000_0000);
        assert_eq!(encode(&Value::from(quiet_nan)).as_ref(), &[0x1e, 0x43]);
        assert_eq!(encode(&Value::from(-quiet_nan)).as_ref(), &[0x1e, 0x63]);
    }

    #[test]
    fn test_float_normal() {
        // 1.0 = 1 * 2^0, -1.5 = -3 * 2^-1
        assert_eq!(encode(&Value::from(1.0)).as_ref(), &[0x81, 0x1e, 0x40]);
        assert_eq!(encode(&Value::from(-1.5)).as_ref(), &[0x83, 0x1f, 0x61]);
    }

    #[test]
    fn test_list_and_map() {
        let list = Value::from(vec![Value::from(1), Value::from(2)]);
        assert_eq!(encode(&list).as_ref(), &[0x02, 0x41, 0x42, 0x01]);

        let map = Value::from(Map::from([("a", 1)]));
        assert_eq!(encode(&map).as_ref(), &[0x03, 0x21, b'a', 0x41, 0x01]);
    }

    #[test]
    fn test_descriptor_prefix() {
        let mut p = Packer::new();
        p.descriptor(3, false);
        p.pack_i64(1);
        assert_eq!(p.as_slice(), &[0x13, 0x41]);

        let mut p = Packer::new();
        p.descriptor(200, true);
        assert_eq!(p.as_slice(), &[0x10, 0xc8, 0x11]);
    }

    #[test]
    fn test_big_integer() {
        let n: BigInt = BigInt::from(u64::MAX) * 4;
        let bytes = encode(&Value::Integer(n));
        // 66 significant bits: nine 7-bit groups, then 3 bits in the tag.
        assert_eq!(bytes.len(), 10);
        assert_eq!(bytes[9] & 0xe0, tag::INTEGER);
    }
}
