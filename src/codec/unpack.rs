//! Value decoder.
//!
//! Decoding reads one tag head at a time. A head is an optional descriptor
//! prefix followed by a kind byte that may be preceded by 7-bit
//! continuation bytes. Every failure carries the offset it happened at.

use bytes::Bytes;
use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{ToPrimitive, Zero};

use super::value::{Decimal, Map, Value};
use super::{tag, DESCRIPTOR_MAX, FLT_INF, FLT_NAN, FLT_SNAN, FLT_ZERO, SPECIAL_DESCRIPTOR};
use crate::error::VbsError;

/// Maximum nesting depth of lists and dicts.
pub const MAX_DEPTH: usize = 256;

/// Largest magnitude accepted in a continuation chain, in bits.
const MAX_NUMBER_BITS: u32 = 1 << 16;

type Result<T> = std::result::Result<T, VbsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Tail,
    List,
    Dict,
    Null,
    Bool,
    Blob,
    Decimal,
    Floating,
    String,
    Integer,
}

/// Magnitude gathered from a continuation chain.
#[derive(Debug)]
enum Num {
    Small(u64),
    Big(BigUint),
}

impl Num {
    fn add_bits(&mut self, bits: u64, shift: u32, at: usize) -> Result<()> {
        if bits == 0 {
            return Ok(());
        }
        if shift > MAX_NUMBER_BITS {
            return Err(VbsError::TooBig(at));
        }
        match self {
            Num::Small(v) if shift < 64 && bits.leading_zeros() >= shift => {
                *v |= bits << shift;
            }
            Num::Small(v) => {
                *self = Num::Big(BigUint::from(*v) | (BigUint::from(bits) << shift));
            }
            Num::Big(b) => {
                *b |= BigUint::from(bits) << shift;
            }
        }
        Ok(())
    }

    fn is_zero(&self) -> bool {
        match self {
            Num::Small(v) => *v == 0,
            Num::Big(b) => b.is_zero(),
        }
    }

    fn to_usize(&self, at: usize) -> Result<usize> {
        match self {
            Num::Small(v) => usize::try_from(*v).map_err(|_| VbsError::TooBig(at)),
            Num::Big(_) => Err(VbsError::TooBig(at)),
        }
    }

    fn into_biguint(self) -> BigUint {
        match self {
            Num::Small(v) => BigUint::from(v),
            Num::Big(b) => b,
        }
    }

    fn to_signed_i64(&self, negative: bool, at: usize) -> Result<i64> {
        let mag = match self {
            Num::Small(v) => *v,
            Num::Big(_) => return Err(VbsError::TooBig(at)),
        };
        if negative {
            0i64.checked_sub_unsigned(mag).ok_or(VbsError::TooBig(at))
        } else {
            i64::try_from(mag).map_err(|_| VbsError::TooBig(at))
        }
    }
}

#[derive(Debug)]
struct Head {
    kind: Kind,
    num: Num,
    negative: bool,
    descriptor: u16,
    offset: usize,
}

/// Cursor over a vbs buffer.
pub struct Unpacker<'a> {
    buf: &'a [u8],
    pos: usize,
    last_descriptor: u16,
}

impl<'a> Unpacker<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self::at(buf, 0)
    }

    /// Start decoding at `offset`.
    pub fn at(buf: &'a [u8], offset: usize) -> Self {
        Self {
            buf,
            pos: offset.min(buf.len()),
            last_descriptor: 0,
        }
    }

    /// Current offset into the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Descriptor that prefixed the last value returned by [`Unpacker::next_value`].
    ///
    /// Bit 0x8000 is the special flag, the low 15 bits the descriptor number.
    pub fn descriptor(&self) -> u16 {
        self.last_descriptor
    }

    fn byte(&mut self) -> Result<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or(VbsError::Incomplete(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(VbsError::Incomplete(self.buf.len()))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn invalid(offset: usize, reason: &'static str) -> VbsError {
        VbsError::Invalid { offset, reason }
    }

    fn read_head(&mut self) -> Result<Head> {
        let mut descriptor: u16 = 0;
        loop {
            let offset = self.pos;
            let x = self.byte()?;

            if x < 0x80 {
                let (kind, num, negative) = match x {
                    0x20..=0x7f => {
                        let kind = if x & tag::INTEGER != 0 {
                            Kind::Integer
                        } else {
                            Kind::String
                        };
                        (kind, u64::from(x & 0x1f), x >= tag::INTEGER_NEGATIVE)
                    }
                    tag::BLOB => (Kind::Blob, 0, false),
                    0x18 | 0x19 => (Kind::Bool, u64::from(x & 1), false),
                    0x1c | 0x1d => (Kind::Decimal, 0, x & 1 != 0),
                    0x1e | 0x1f => (Kind::Floating, 0, x & 1 != 0),
                    0x10..=0x17 => {
                        let n = u16::from(x & 0x07);
                        if n == 0 {
                            if descriptor & SPECIAL_DESCRIPTOR != 0 {
                                return Err(Self::invalid(offset, "duplicate special descriptor"));
                            }
                            descriptor |= SPECIAL_DESCRIPTOR;
                        } else {
                            if descriptor & DESCRIPTOR_MAX != 0 {
                                return Err(Self::invalid(offset, "duplicate descriptor"));
                            }
                            descriptor |= n;
                        }
                        continue;
                    }
                    tag::TAIL => (Kind::Tail, 0, false),
                    tag::LIST => (Kind::List, 0, false),
                    tag::DICT => (Kind::Dict, 0, false),
                    tag::NULL => (Kind::Null, 0, false),
                    _ => return Err(Self::invalid(offset, "unknown tag")),
                };
                return Ok(Head {
                    kind,
                    num: Num::Small(num),
                    negative,
                    descriptor,
                    offset,
                });
            }

            let mut num = Num::Small(u64::from(x & 0x7f));
            let mut shift = 7u32;
            let last = loop {
                let at = self.pos;
                let b = self.byte()?;
                if b < 0x80 {
                    break b;
                }
                num.add_bits(u64::from(b & 0x7f), shift, at)?;
                shift += 7;
            };
            let at = self.pos - 1;

            let (kind, negative) = match last {
                0x20..=0x7f => {
                    num.add_bits(u64::from(last & 0x1f), shift, at)?;
                    let kind = if last & tag::INTEGER != 0 {
                        Kind::Integer
                    } else {
                        Kind::String
                    };
                    (kind, last >= tag::INTEGER_NEGATIVE)
                }
                0x1c | 0x1d => (Kind::Decimal, last & 1 != 0),
                0x1e | 0x1f => (Kind::Floating, last & 1 != 0),
                tag::BLOB => (Kind::Blob, false),
                0x10..=0x17 => {
                    num.add_bits(u64::from(last & 0x07), shift, at)?;
                    let n = match num {
                        Num::Small(n) if n > 0 && n <= u64::from(DESCRIPTOR_MAX) => n as u16,
                        _ => return Err(Self::invalid(offset, "descriptor out of range")),
                    };
                    if descriptor & DESCRIPTOR_MAX != 0 {
                        return Err(Self::invalid(offset, "duplicate descriptor"));
                    }
                    descriptor |= n;
                    continue;
                }
                // List and dict varieties are accepted and ignored.
                tag::LIST => (Kind::List, false),
                tag::DICT => (Kind::Dict, false),
                _ => return Err(Self::invalid(at, "invalid multi-byte tag")),
            };
            return Ok(Head {
                kind,
                num,
                negative,
                descriptor,
                offset,
            });
        }
    }

    /// Exponent of a float or decimal: a plain integer head.
    fn read_exponent(&mut self) -> Result<i64> {
        let head = self.read_head()?;
        if head.kind != Kind::Integer || head.descriptor != 0 {
            return Err(Self::invalid(head.offset, "exponent must be a plain integer"));
        }
        head.num.to_signed_i64(head.negative, head.offset)
    }

    /// Decode the next value. `Ok(None)` means a tail tag was read.
    fn value(&mut self, depth: usize) -> Result<Option<Value>> {
        let head = self.read_head()?;
        if depth == 0 {
            self.last_descriptor = head.descriptor;
        }

        let value = match head.kind {
            Kind::Tail => return Ok(None),
            Kind::Integer => {
                let sign = if head.negative { Sign::Minus } else { Sign::Plus };
                Value::Integer(BigInt::from_biguint(sign, head.num.into_biguint()))
            }
            Kind::String => {
                let len = head.num.to_usize(head.offset)?;
                let bytes = self.take(len)?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|_| Self::invalid(head.offset, "string is not utf-8"))?;
                Value::String(s.to_owned())
            }
            Kind::Blob => {
                let len = head.num.to_usize(head.offset)?;
                Value::Blob(Bytes::copy_from_slice(self.take(len)?))
            }
            Kind::Bool => Value::Bool(!head.num.is_zero()),
            Kind::Null => Value::Null,
            Kind::Floating => {
                let expo = self.read_exponent()?;
                Value::Float(make_f64(head.num, head.negative, expo))
            }
            Kind::Decimal => {
                let expo = self.read_exponent()?;
                Value::Decimal(make_decimal(head.num, head.negative, expo))
            }
            Kind::List => {
                if depth >= MAX_DEPTH {
                    return Err(Self::invalid(head.offset, "nesting too deep"));
                }
                let mut list = Vec::new();
                while let Some(v) = self.value(depth + 1)? {
                    list.push(v);
                }
                Value::List(list)
            }
            Kind::Dict => {
                if depth >= MAX_DEPTH {
                    return Err(Self::invalid(head.offset, "nesting too deep"));
                }
                let mut map = Map::new();
                while let Some(k) = self.value(depth + 1)? {
                    let at = self.pos;
                    let v = self
                        .value(depth + 1)?
                        .ok_or_else(|| Self::invalid(at, "dict key without value"))?;
                    map.insert(k, v);
                }
                Value::Map(map)
            }
        };
        Ok(Some(value))
    }

    /// Decode the next top-level value.
    ///
    /// Returns `Ok(None)` at a clean end of buffer. A tail tag at top
    /// level is invalid.
    pub fn next_value(&mut self) -> Result<Option<Value>> {
        if self.is_exhausted() {
            return Ok(None);
        }
        let offset = self.pos;
        match self.value(0)? {
            Some(v) => Ok(Some(v)),
            None => Err(Self::invalid(offset, "unexpected tail")),
        }
    }
}

fn make_f64(num: Num, negative: bool, expo: i64) -> f64 {
    if num.is_zero() {
        let neg = expo < 0;
        let code = expo.unsigned_abs() as i64;
        let x = if code <= FLT_ZERO {
            0.0
        } else if code == FLT_INF {
            f64::INFINITY
        } else if code == FLT_SNAN {
            f64::from_bits(0x7ff4_0000_0000_0000)
        } else {
            f64::from_bits(0x7ff8_0000_0000_0000)
        };
        return if neg { -x } else { x };
    }

    let (mag, expo) = match num {
        Num::Small(v) => (v, expo),
        Num::Big(b) => {
            let extra = b.bits().saturating_sub(64);
            let top = (b >> extra).to_u64().unwrap_or(u64::MAX);
            (top, expo.saturating_add(extra as i64))
        }
    };

    let point = 63 - i64::from(mag.leading_zeros());
    let e = expo.saturating_add(point);
    let bits = if e > 1023 {
        0x7ff0_0000_0000_0000
    } else if e >= -1022 {
        let m = if point > 52 {
            mag >> (point - 52)
        } else {
            mag << (52 - point)
        };
        (((e + 1023) as u64) << 52) | (m & 0x000f_ffff_ffff_ffff)
    } else {
        let s = expo.saturating_add(1074);
        if s >= 0 {
            mag << s
        } else if s <= -64 {
            0
        } else {
            mag >> (-s)
        }
    };

    let x = f64::from_bits(bits);
    if negative {
        -x
    } else {
        x
    }
}

fn make_decimal(num: Num, negative: bool, expo: i64) -> Decimal {
    if num.is_zero() {
        let neg = expo < 0;
        let code = expo.unsigned_abs() as i64;
        return if code <= FLT_ZERO {
            Decimal::Zero { negative: neg }
        } else if code == FLT_INF {
            Decimal::Infinity { negative: neg }
        } else if code == FLT_NAN {
            Decimal::Nan { negative: neg }
        } else {
            Decimal::SignalingNan { negative: neg }
        };
    }
    let sign = if negative { Sign::Minus } else { Sign::Plus };
    Decimal::Finite {
        significand: BigInt::from_biguint(sign, num.into_biguint()),
        exponent: expo,
    }
}

/// Decode exactly one value that spans the whole buffer.
pub fn decode(buf: &[u8]) -> Result<Value> {
    let mut unpacker = Unpacker::new(buf);
    let value = unpacker
        .next_value()?
        .ok_or(VbsError::Incomplete(0))?;
    if !unpacker.is_exhausted() {
        return Err(VbsError::Invalid {
            offset: unpacker.position(),
            reason: "trailing data",
        });
    }
    Ok(value)
}

/// Decode consecutive values starting at `offset`.
///
/// With `limit` set, exactly that many values are decoded and running out
/// of input first is `Incomplete`. Without it, decoding runs to the end of
/// the buffer. Returns the values and the offset just past the last one.
pub fn unpack(buf: &[u8], offset: usize, limit: Option<usize>) -> Result<(Vec<Value>, usize)> {
    let mut unpacker = Unpacker::at(buf, offset);
    let mut values = Vec::with_capacity(limit.unwrap_or(0));
    while limit.map_or(true, |k| values.len() < k) {
        match unpacker.next_value()? {
            Some(v) => values.push(v),
            None if limit.is_some() => return Err(VbsError::Incomplete(unpacker.position())),
            None => break,
        }
    }
    Ok((values, unpacker.position()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode, Packer};

    fn roundtrip(v: Value) {
        let bytes = encode(&v);
        assert_eq!(decode(&bytes).unwrap(), v, "roundtrip of {:?}", v);
    }

    #[test]
    fn test_roundtrip_integers_at_group_boundaries() {
        for n in [
            0i64,
            1,
            31,
            32,
            127,
            128,
            4095,
            4096,
            (1 << 26) - 1,
            1 << 26,
            i64::MAX,
            i64::MIN,
            -1,
            -32,
            -33,
        ] {
            roundtrip(Value::from(n));
        }
        roundtrip(Value::Integer(BigInt::from(u64::MAX) * BigInt::from(u64::MAX)));
        roundtrip(Value::Integer(-BigInt::from(u128::MAX)));
    }

    #[test]
    fn test_roundtrip_floats() {
        for x in [
            0.0,
            -0.0,
            1.0,
            -1.5,
            0.1,
            f64::MAX,
            f64::MIN_POSITIVE,
            5e-324,
            -2.2250738585072e-308,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::from_bits(0x7ff8_0000_0000_0000),
            f64::from_bits(0xfff8_0000_0000_0000),
            f64::from_bits(0x7ff4_0000_0000_0000),
        ] {
            roundtrip(Value::Float(x));
        }
    }

    #[test]
    fn test_roundtrip_decimals() {
        roundtrip(Value::Decimal(Decimal::new(12345, -2)));
        roundtrip(Value::Decimal(Decimal::new(-1, 300)));
        roundtrip(Value::Decimal(Decimal::Zero { negative: true }));
        roundtrip(Value::Decimal(Decimal::Infinity { negative: true }));
        roundtrip(Value::Decimal(Decimal::Nan { negative: false }));
        roundtrip(Value::Decimal(Decimal::SignalingNan { negative: false }));
    }

    #[test]
    fn test_roundtrip_containers() {
        let mut inner = Map::new();
        inner.insert("k", Value::from(vec![Value::Null, Value::from(true)]));
        inner.insert(7, &b"\x00\xff"[..]);
        let v = Value::from(vec![
            Value::from(""),
            Value::from(&b""[..]),
            Value::from(Map::new()),
            Value::from(Vec::<Value>::new()),
            Value::from(inner),
            Value::from("x".repeat(1000)),
        ]);
        roundtrip(v);
    }

    #[test]
    fn test_truncated_input_fails() {
        let v = Value::from(vec![
            Value::from("hello"),
            Value::from(1.25),
            Value::from(Map::from([("a", 123456)])),
        ]);
        let bytes = encode(&v);
        for cut in 0..bytes.len() {
            let err = decode(&bytes[..cut]).unwrap_err();
            assert!(matches!(err, VbsError::Incomplete(_)), "cut {}: {:?}", cut, err);
        }
    }

    #[test]
    fn test_short_string_is_incomplete() {
        assert!(matches!(decode(&[0x25, b'a', b'b']), Err(VbsError::Incomplete(_))));
    }

    #[test]
    fn test_top_level_tail_is_invalid() {
        assert!(matches!(decode(&[0x01]), Err(VbsError::Invalid { .. })));
    }

    #[test]
    fn test_dict_value_missing_is_invalid() {
        assert!(matches!(
            decode(&[0x03, 0x41, 0x01]),
            Err(VbsError::Invalid { reason: "dict key without value", .. })
        ));
    }

    #[test]
    fn test_descriptor_is_skipped_and_reported() {
        let mut p = Packer::new();
        p.descriptor(5, true);
        p.pack_i64(9);
        let bytes = p.into_bytes();

        let mut u = Unpacker::new(&bytes);
        assert_eq!(u.next_value().unwrap(), Some(Value::from(9)));
        assert_eq!(u.descriptor(), SPECIAL_DESCRIPTOR | 5);
    }

    #[test]
    fn test_descriptor_sequencing_rules() {
        // Two special flags.
        assert!(matches!(decode(&[0x10, 0x10, 0x41]), Err(VbsError::Invalid { .. })));
        // Two numbered descriptors.
        assert!(matches!(decode(&[0x11, 0x12, 0x41]), Err(VbsError::Invalid { .. })));
        // Multi-byte descriptor zero.
        assert!(matches!(decode(&[0x80, 0x10, 0x41]), Err(VbsError::Invalid { .. })));
        // Multi-byte descriptor above the maximum.
        assert!(matches!(
            decode(&[0xff, 0xff, 0x17, 0x41]),
            Err(VbsError::Invalid { .. })
        ));
        // One special plus one numbered is fine.
        assert_eq!(decode(&[0x10, 0x13, 0x41]).unwrap(), Value::from(1));
    }

    #[test]
    fn test_unknown_tag_is_invalid() {
        assert!(matches!(decode(&[0x04]), Err(VbsError::Invalid { .. })));
        assert!(matches!(decode(&[0x1a]), Err(VbsError::Invalid { .. })));
    }

    #[test]
    fn test_unpack_bounded_reports_offset() {
        let values = [Value::from(1), Value::from("two"), Value::from(3.0)];
        let bytes = crate::codec::pack(values.iter());
        let first_two = encode(&values[0]).len() + encode(&values[1]).len();

        let (got, consumed) = unpack(&bytes, 0, Some(2)).unwrap();
        assert_eq!(got, &values[..2]);
        assert_eq!(consumed, first_two);

        let (rest, end) = unpack(&bytes, consumed, None).unwrap();
        assert_eq!(rest, &values[2..]);
        assert_eq!(end, bytes.len());

        assert!(matches!(unpack(&bytes, 0, Some(4)), Err(VbsError::Incomplete(_))));
    }

    #[test]
    fn test_zero_finite_decimal_reads_back_as_zero() {
        let zero = Decimal::Finite {
            significand: BigInt::from(0),
            exponent: 5,
        };
        let decoded = decode(&encode(&Value::Decimal(zero))).unwrap();
        assert_eq!(decoded, Value::Decimal(Decimal::Zero { negative: false }));
        assert_eq!(decoded, Value::Decimal(Decimal::new(0, 5)));
    }

    #[test]
    fn test_large_dict_decodes_in_linear_time() {
        let n = 200_000;
        let map: Map = (0..n).map(|i| (i, i)).collect();
        let bytes = encode(&Value::Map(map));

        let started = std::time::Instant::now();
        let decoded = decode(&bytes).unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(10));

        let decoded = decoded.into_map().unwrap();
        assert_eq!(decoded.len(), n);
        assert_eq!(decoded.get_value(&Value::from(n - 1)), Some(&Value::from(n - 1)));
    }

    #[test]
    fn test_duplicate_dict_key_last_wins() {
        let mut p = Packer::new();
        p.dict_head();
        p.pack(&Value::from("k"));
        p.pack(&Value::from(1));
        p.pack(&Value::from("j"));
        p.pack(&Value::from(2));
        p.pack(&Value::from("k"));
        p.pack(&Value::from(3));
        p.tail();

        let map = decode(&p.into_bytes()).unwrap().into_map().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get_int("k"), Some(3));
        let keys: Vec<_> = map.keys().filter_map(Value::as_str).collect();
        assert_eq!(keys, ["k", "j"]);
    }

    #[test]
    fn test_nesting_limit() {
        let mut bytes = vec![tag::LIST; MAX_DEPTH + 1];
        bytes.extend(std::iter::repeat(tag::TAIL).take(MAX_DEPTH + 1));
        assert!(matches!(decode(&bytes), Err(VbsError::Invalid { reason: "nesting too deep", .. })));
    }
}
