//! Dynamically typed values carried by the vbs codec.
//!
//! [`Value`] is the one data model shared by the codec, the message bodies
//! and servant arguments. [`Map`] keeps insertion order for encoding but
//! compares equal regardless of order.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::Bytes;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::error::{Result, XicError};

/// A vbs value.
#[derive(Debug, Clone)]
pub enum Value {
    /// Arbitrary-precision signed integer.
    Integer(BigInt),
    /// IEEE-754 double.
    Float(f64),
    /// Decimal floating point.
    Decimal(Decimal),
    /// Boolean.
    Bool(bool),
    /// Null.
    Null,
    /// Raw bytes.
    Blob(Bytes),
    /// UTF-8 text.
    String(String),
    /// Ordered sequence.
    List(Vec<Value>),
    /// Key/value mapping.
    Map(Map),
}

impl Value {
    /// Short kind name, used in parameter errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Float(_) => "floating",
            Value::Decimal(_) => "decimal",
            Value::Bool(_) => "bool",
            Value::Null => "null",
            Value::Blob(_) => "blob",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "dict",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer value if it fits in an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => n.to_i64(),
            _ => None,
        }
    }

    pub fn as_bigint(&self) -> Option<&BigInt> {
        match self {
            Value::Integer(n) => Some(n),
            _ => None,
        }
    }

    /// Float value. Integers are converted.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Integer(n) => n.to_f64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Bytes> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_map(self) -> Option<Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
}

/// Floats compare by representation: NaN equals NaN of the same sign and
/// quietness, and `+0.0` differs from `-0.0`.
fn float_eq(a: f64, b: f64) -> bool {
    if a.is_nan() && b.is_nan() {
        return a.is_sign_negative() == b.is_sign_negative() && is_quiet_nan(a) == is_quiet_nan(b);
    }
    a.to_bits() == b.to_bits()
}

pub(crate) fn is_quiet_nan(x: f64) -> bool {
    x.to_bits() & (1 << 51) != 0
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => float_eq(*a, *b),
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Blob(a), Value::Blob(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

/// Consistent with `eq`: NaNs hash by sign and quietness only.
impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Integer(n) => n.hash(state),
            Value::Float(x) if x.is_nan() => {
                (x.is_sign_negative(), is_quiet_nan(*x)).hash(state)
            }
            Value::Float(x) => x.to_bits().hash(state),
            Value::Decimal(d) => d.hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Null => {}
            Value::Blob(b) => b.hash(state),
            Value::String(s) => s.hash(state),
            Value::List(l) => l.hash(state),
            Value::Map(m) => m.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&super::textify(self))
    }
}

/// Decimal floating point number.
///
/// A finite value is `significand * 10^exponent`. The significand is kept
/// as given, trailing zeros are not stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Decimal {
    /// Nonzero finite number.
    Finite {
        significand: BigInt,
        exponent: i64,
    },
    Zero {
        negative: bool,
    },
    Infinity {
        negative: bool,
    },
    Nan {
        negative: bool,
    },
    SignalingNan {
        negative: bool,
    },
}

impl Decimal {
    /// Build `significand * 10^exponent`. A zero significand gives positive zero.
    pub fn new(significand: impl Into<BigInt>, exponent: i64) -> Self {
        let significand = significand.into();
        if significand.is_zero() {
            Decimal::Zero { negative: false }
        } else {
            Decimal::Finite {
                significand,
                exponent,
            }
        }
    }

    pub fn is_negative(&self) -> bool {
        match self {
            Decimal::Finite { significand, .. } => significand.is_negative(),
            Decimal::Zero { negative }
            | Decimal::Infinity { negative }
            | Decimal::Nan { negative }
            | Decimal::SignalingNan { negative } => *negative,
        }
    }
}

impl fmt::Display for Decimal {
    /// Scientific string form: plain notation while the exponent is not
    /// positive and the adjusted exponent is at least -6.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.is_negative() { "-" } else { "" };
        let (significand, exponent) = match self {
            Decimal::Zero { .. } => return write!(f, "{}0", sign),
            Decimal::Infinity { .. } => return write!(f, "{}Infinity", sign),
            Decimal::Nan { .. } => return write!(f, "{}NaN", sign),
            Decimal::SignalingNan { .. } => return write!(f, "{}sNaN", sign),
            Decimal::Finite {
                significand,
                exponent,
            } => (significand, *exponent),
        };

        let digits = significand.magnitude().to_string();
        let len = digits.len() as i64;
        let adjusted = exponent + len - 1;

        if exponent <= 0 && adjusted >= -6 {
            if exponent == 0 {
                return write!(f, "{}{}", sign, digits);
            }
            let point = len + exponent;
            if point > 0 {
                let (int, frac) = digits.split_at(point as usize);
                write!(f, "{}{}.{}", sign, int, frac)
            } else {
                let zeros = "0".repeat((-point) as usize);
                write!(f, "{}0.{}{}", sign, zeros, digits)
            }
        } else {
            let (first, rest) = digits.split_at(1);
            write!(f, "{}{}", sign, first)?;
            if !rest.is_empty() {
                write!(f, ".{}", rest)?;
            }
            write!(f, "E{}{}", if adjusted >= 0 { "+" } else { "" }, adjusted)
        }
    }
}

/// Mapping of values to values.
///
/// Entries keep their insertion order, which is the order they are encoded
/// in. Equality ignores order. Keys are indexed, so lookups and inserts do
/// not scan the entries.
#[derive(Clone, Default)]
pub struct Map {
    entries: Vec<(Value, Value)>,
    index: HashMap<Value, usize>,
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an entry, replacing and returning any value under an equal key.
    ///
    /// A replaced entry keeps its original position.
    pub fn insert(&mut self, key: impl Into<Value>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        if let Some(&idx) = self.index.get(&key) {
            return Some(std::mem::replace(&mut self.entries[idx].1, value));
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        None
    }

    /// Look up an entry by string key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.get_value(&Value::String(key.to_string()))
    }

    /// Look up an entry by arbitrary key.
    pub fn get_value(&self, key: &Value) -> Option<&Value> {
        self.index.get(key).map(|&idx| &self.entries[idx].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.index.remove(&Value::String(key.to_string()))?;
        let (_, value) = self.entries.remove(idx);
        for slot in self.index.values_mut() {
            if *slot > idx {
                *slot -= 1;
            }
        }
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn get_map(&self, key: &str) -> Option<&Map> {
        self.get(key).and_then(Value::as_map)
    }

    fn want(&self, key: &str) -> Result<&Value> {
        self.get(key)
            .ok_or_else(|| XicError::ParameterMissing(key.to_string()))
    }

    fn wrong_type(key: &str, expected: &'static str) -> XicError {
        XicError::ParameterType {
            name: key.to_string(),
            expected,
        }
    }

    /// Required integer parameter.
    pub fn want_int(&self, key: &str) -> Result<i64> {
        self.want(key)?
            .as_i64()
            .ok_or_else(|| Self::wrong_type(key, "integer"))
    }

    /// Required float parameter. Integers are accepted.
    pub fn want_f64(&self, key: &str) -> Result<f64> {
        self.want(key)?
            .as_f64()
            .ok_or_else(|| Self::wrong_type(key, "floating"))
    }

    /// Required bool parameter.
    pub fn want_bool(&self, key: &str) -> Result<bool> {
        self.want(key)?
            .as_bool()
            .ok_or_else(|| Self::wrong_type(key, "bool"))
    }

    /// Required string parameter.
    pub fn want_str(&self, key: &str) -> Result<&str> {
        self.want(key)?
            .as_str()
            .ok_or_else(|| Self::wrong_type(key, "string"))
    }

    /// Required blob parameter.
    pub fn want_blob(&self, key: &str) -> Result<&Bytes> {
        self.want(key)?
            .as_blob()
            .ok_or_else(|| Self::wrong_type(key, "blob"))
    }

    /// Required list parameter.
    pub fn want_list(&self, key: &str) -> Result<&[Value]> {
        self.want(key)?
            .as_list()
            .ok_or_else(|| Self::wrong_type(key, "list"))
    }

    /// Required map parameter.
    pub fn want_map(&self, key: &str) -> Result<&Map> {
        self.want(key)?
            .as_map()
            .ok_or_else(|| Self::wrong_type(key, "dict"))
    }
}

impl PartialEq for Map {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries
                .iter()
                .all(|(k, v)| other.get_value(k) == Some(v))
    }
}

impl Eq for Map {}

/// Order-independent, to agree with `eq`.
impl Hash for Map {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut sum = 0u64;
        for entry in &self.entries {
            let mut h = DefaultHasher::new();
            entry.hash(&mut h);
            sum = sum.wrapping_add(h.finish());
        }
        self.len().hash(state);
        sum.hash(state);
    }
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

impl<K: Into<Value>, V: Into<Value>> FromIterator<(K, V)> for Map {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Map::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<K: Into<Value>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Map {
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl IntoIterator for Map {
    type Item = (Value, Value);
    type IntoIter = std::vec::IntoIter<(Value, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

macro_rules! from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(n: $t) -> Self {
                    Value::Integer(BigInt::from(n))
                }
            }
        )*
    };
}

from_int!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

impl From<BigInt> for Value {
    fn from(n: BigInt) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<f32> for Value {
    fn from(x: f32) -> Self {
        Value::Float(f64::from(x))
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Decimal(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Blob(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Blob(Bytes::copy_from_slice(b))
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<Map> for Value {
    fn from(m: Map) -> Self {
        Value::Map(m)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_equality_ignores_order() {
        let a = Map::from([("x", 1), ("y", 2)]);
        let b = Map::from([("y", 2), ("x", 1)]);
        assert_eq!(a, b);

        let c = Map::from([("x", 1), ("y", 3)]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_map_insert_replaces() {
        let mut m = Map::new();
        assert!(m.insert("k", 1).is_none());
        assert_eq!(m.insert("k", 2), Some(Value::from(1)));
        assert_eq!(m.len(), 1);
        assert_eq!(m.get_int("k"), Some(2));
    }

    #[test]
    fn test_map_remove_keeps_lookups_valid() {
        let mut m = Map::from([("a", 1), ("b", 2), ("c", 3)]);
        assert_eq!(m.remove("a"), Some(Value::from(1)));
        assert_eq!(m.get_int("b"), Some(2));
        assert_eq!(m.get_int("c"), Some(3));
        m.insert("a", 4);
        let keys: Vec<_> = m.keys().filter_map(Value::as_str).collect();
        assert_eq!(keys, ["b", "c", "a"]);
    }

    #[test]
    fn test_map_keys_of_any_kind() {
        let mut m = Map::new();
        m.insert(Value::Float(f64::NAN), "nan");
        m.insert(Map::from([("x", 1), ("y", 2)]), "map");
        assert_eq!(m.get_value(&Value::Float(f64::NAN)), Some(&Value::from("nan")));
        let reordered = Value::from(Map::from([("y", 2), ("x", 1)]));
        assert_eq!(m.get_value(&reordered), Some(&Value::from("map")));
    }

    #[test]
    fn test_want_errors() {
        let m = Map::from([("name", "bob")]);
        assert_eq!(m.want_str("name").unwrap(), "bob");
        assert!(matches!(m.want_int("age"), Err(XicError::ParameterMissing(k)) if k == "age"));
        assert!(matches!(
            m.want_int("name"),
            Err(XicError::ParameterType { expected: "integer", .. })
        ));
    }

    #[test]
    fn test_float_equality_is_representational() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
        assert_ne!(Value::Float(f64::NAN), Value::Float(-f64::NAN));
    }

    #[test]
    fn test_decimal_display() {
        assert_eq!(Decimal::new(12345, -2).to_string(), "123.45");
        assert_eq!(Decimal::new(5, -3).to_string(), "0.005");
        assert_eq!(Decimal::new(-7, 0).to_string(), "-7");
        assert_eq!(Decimal::new(15, 3).to_string(), "1.5E+4");
        assert_eq!(Decimal::new(1, -8).to_string(), "1E-8");
        assert_eq!(Decimal::Zero { negative: true }.to_string(), "-0");
        assert_eq!(Decimal::Infinity { negative: false }.to_string(), "Infinity");
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from(42u8).as_i64(), Some(42));
        assert_eq!(Value::from("s").as_str(), Some("s"));
        assert!(Value::from(None::<i32>).is_null());
        assert_eq!(Value::from(1.5).as_f64(), Some(1.5));
    }
}
