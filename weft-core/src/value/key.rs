//! Hashed keys for `map`/`set` values.
//!
//! Map/set keys carry a discriminator prefix by source
//! kind (`s:`, `i:`, `f:`, `b:true|b:false`) so the key space stays
//! totally ordered (required by the underlying persistent tree) and so
//! primitive values round-trip through `keys`/`toList`.

use crate::error::ErrorCode;
use crate::value::Value;
use compact_str::{format_compact, CompactString};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(CompactString);

impl Key {
    pub fn encode(v: &Value) -> Result<Key, ErrorCode> {
        let s = match v {
            Value::String(s) => format_compact!("s:{}", s),
            Value::Int(i) => format_compact!("i:{}", i),
            Value::Float(f) => format_compact!("f:{:016x}", f.to_bits()),
            Value::Bool(b) => format_compact!("b:{}", b),
            _ => return Err(ErrorCode::TypeError),
        };
        Ok(Key(s))
    }

    pub fn decode(&self) -> Value {
        let s = self.0.as_str();
        match s.as_bytes().first() {
            Some(b's') => Value::String(arcstr::ArcStr::from(&s[2..])),
            Some(b'i') => s[2..]
                .parse::<i64>()
                .map(Value::Int)
                .unwrap_or(Value::Void),
            Some(b'f') => u64::from_str_radix(&s[2..], 16)
                .map(|bits| Value::Float(f64::from_bits(bits)))
                .unwrap_or(Value::Void),
            Some(b'b') => Value::Bool(&s[2..] == "true"),
            _ => Value::Void,
        }
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_primitives() {
        for v in [
            Value::Int(42),
            Value::Int(-7),
            Value::String(arcstr::literal!("hello")),
            Value::Bool(true),
            Value::Bool(false),
            Value::Float(3.5),
            Value::Float(-0.0),
        ] {
            let k = Key::encode(&v).unwrap();
            assert_eq!(k.decode(), v);
        }
    }

    #[test]
    fn rejects_non_primitive_keys() {
        assert_eq!(Key::encode(&Value::Void), Err(ErrorCode::TypeError));
    }
}
