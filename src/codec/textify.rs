//! Human-readable rendering of values for diagnostic logs.
//!
//! ```text
//! integer   42            float     1.5 / INF / -INF / NAN
//! decimal   123.45D       bool      ~T ~F        null ~N
//! list      [1; 2; 3]     dict      {a^1; b^~T}
//! string    abc  ~!a b~  ~120!...~   blob ~3|...~ ~|~
//! ```
//!
//! Control bytes and the meta characters ``^~`;[]{}`` are escaped as a
//! backtick followed by two hex digits.

use std::fmt::Write;

use super::value::Value;

/// Strings of at least this many bytes get a length prefix.
const LONG_STRING: usize = 100;

const META: &[u8] = b"^~`;[]{}\x7f";

/// Render a value as text. Never fails.
pub fn textify(v: &Value) -> String {
    let mut out = String::new();
    print_one(&mut out, v);
    out
}

fn print_one(out: &mut String, v: &Value) {
    match v {
        Value::Integer(n) => {
            let _ = write!(out, "{}", n);
        }
        Value::Float(x) => print_float(out, *x),
        Value::Decimal(d) => {
            let _ = write!(out, "{}D", d);
        }
        Value::Bool(true) => out.push_str("~T"),
        Value::Bool(false) => out.push_str("~F"),
        Value::Null => out.push_str("~N"),
        Value::String(s) => print_str(out, s),
        Value::Blob(b) => print_blob(out, b),
        Value::List(l) => {
            out.push('[');
            for (i, item) in l.iter().enumerate() {
                if i > 0 {
                    out.push_str("; ");
                }
                print_one(out, item);
            }
            out.push(']');
        }
        Value::Map(m) => {
            out.push('{');
            for (i, (k, item)) in m.iter().enumerate() {
                if i > 0 {
                    out.push_str("; ");
                }
                print_one(out, k);
                out.push('^');
                print_one(out, item);
            }
            out.push('}');
        }
    }
}

fn print_float(out: &mut String, x: f64) {
    if x.is_nan() {
        out.push_str("NAN");
    } else if x.is_infinite() {
        out.push_str(if x < 0.0 { "-INF" } else { "INF" });
    } else {
        // Debug formatting is the shortest string that parses back exactly.
        let _ = write!(out, "{:?}", x);
    }
}

fn escape_byte(out: &mut String, b: u8) {
    let _ = write!(out, "`{:02X}", b);
}

fn needs_escape(b: u8) -> bool {
    b < 0x20 || META.contains(&b)
}

fn escape_str(out: &mut String, s: &str) {
    for c in s.chars() {
        if c.is_ascii() && needs_escape(c as u8) {
            escape_byte(out, c as u8);
        } else {
            out.push(c);
        }
    }
}

fn print_str(out: &mut String, s: &str) {
    let bytes = s.as_bytes();
    if bytes.is_empty() {
        out.push_str("~!~");
    } else if bytes.len() >= LONG_STRING {
        let _ = write!(out, "~{}!", bytes.len());
        escape_str(out, s);
        out.push('~');
    } else {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        let bare = (first.is_ascii_alphabetic() || first == b'_') && (33..127).contains(&last);
        if bare {
            escape_str(out, s);
        } else {
            out.push_str("~!");
            escape_str(out, s);
            out.push('~');
        }
    }
}

fn print_blob(out: &mut String, b: &[u8]) {
    if b.is_empty() {
        out.push_str("~|~");
        return;
    }
    let _ = write!(out, "~{}|", b.len());
    for &byte in b {
        if needs_escape(byte) || !byte.is_ascii() {
            escape_byte(out, byte);
        } else {
            out.push(byte as char);
        }
    }
    out.push('~');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Decimal, Map};

    #[test]
    fn test_scalars() {
        assert_eq!(textify(&Value::from(-42)), "-42");
        assert_eq!(textify(&Value::from(true)), "~T");
        assert_eq!(textify(&Value::Null), "~N");
        assert_eq!(textify(&Value::from(1.5)), "1.5");
        assert_eq!(textify(&Value::from(f64::NEG_INFINITY)), "-INF");
        assert_eq!(textify(&Value::from(Decimal::new(12345, -2))), "123.45D");
    }

    #[test]
    fn test_strings() {
        assert_eq!(textify(&Value::from("hello")), "hello");
        assert_eq!(textify(&Value::from("_id9")), "_id9");
        assert_eq!(textify(&Value::from("hello world")), "hello world");
        assert_eq!(textify(&Value::from("1abc")), "~!1abc~");
        assert_eq!(textify(&Value::from("ab ")), "~!ab ~");
        assert_eq!(textify(&Value::from("")), "~!~");
        assert_eq!(textify(&Value::from("a;b\n")), "~!a`3Bb`0A~");

        let long = "x".repeat(100);
        assert_eq!(textify(&Value::from(long.as_str())), format!("~100!{}~", long));
    }

    #[test]
    fn test_blobs() {
        assert_eq!(textify(&Value::from(&b""[..])), "~|~");
        assert_eq!(textify(&Value::from(&b"ab\x00\xff"[..])), "~4|ab`00`FF~");
    }

    #[test]
    fn test_containers() {
        let list = Value::from(vec![Value::from(1), Value::from("a"), Value::Null]);
        assert_eq!(textify(&list), "[1; a; ~N]");

        let mut m = Map::new();
        m.insert("a", 1);
        m.insert("b", Value::from(vec![Value::from(false)]));
        assert_eq!(textify(&Value::from(m)), "{a^1; b^[~F]}");
        assert_eq!(textify(&Value::from(Map::new())), "{}");
    }
}
