//! The runtime value model.
//!
//! `Value` is the single tagged-variant type every layer of the engine
//! (AIR through LIR, plus PIR) produces and consumes. Containers are
//! logically persistent: every operation in this module that looks like
//! a mutation (`list_push`, `map_insert`, `set_insert`, ...) returns a
//! new `Value` and leaves its input untouched. `RefCell` is the single
//! exception — it is an identity-bearing mutable cell, mutated in place.

pub mod key;

use crate::error::ErrorCode;
use arcstr::ArcStr;
use enumflags2::{bitflags, BitFlags};
use indexmap::{IndexMap, IndexSet};
use key::Key;
use std::cell::RefCell;
use std::rc::Rc;
use triomphe::Arc;

/// A `map`/`set` value's backing storage. Cloning a `Value::Map`/
/// `Value::Set` is an `Arc` bump (cheap); every logical "mutation" below
/// clones the underlying `IndexMap`/`IndexSet` once and wraps it in a
/// fresh `Arc`, so existing references never observe the change — the
/// persistence every container value requires, implemented by
/// copy-on-write rather than a structurally-shared tree.
pub type PersistentMap = Arc<IndexMap<Key, Value>>;
pub type PersistentSet = Arc<IndexSet<Key>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureStatus {
    Pending,
    Ready,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde_derive::Serialize, serde_derive::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelVariant {
    Mpsc,
    Spsc,
    Mpmc,
    Broadcast,
}

/// Document-level capability flags (`capabilities?`). Purely
/// advisory to the host; the core never gates behavior on them itself,
/// beyond surfacing them on the parsed `Document`.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Async,
    Effects,
    RaceDetection,
    DeadlockDetection,
}

pub type Capabilities = BitFlags<Capability>;

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    pub code: ErrorCode,
    pub message: ArcStr,
}

#[derive(Debug, Clone)]
pub enum Value {
    Void,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(ArcStr),
    List(Arc<Vec<Value>>),
    Map(PersistentMap),
    Set(PersistentSet),
    Option(Option<Box<Value>>),
    RefCell(Rc<RefCell<Value>>),
    Future {
        task_id: ArcStr,
        status: FutureStatus,
    },
    Channel {
        id: ArcStr,
        variant: ChannelVariant,
        buffer_size: i64,
    },
    Error(ErrorValue),
    SelectResult {
        index: i32,
        value: Box<Value>,
    },
    Opaque {
        name: ArcStr,
    },
    /// `lambda`/`fix` results. Not a wire-format tag —
    /// see [`crate::expr::ClosureValue`].
    Closure(Rc<crate::expr::ClosureValue>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Void, Void) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (String(a), String(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Map(a), Map(b)) => {
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
            }
            (Set(a), Set(b)) => a.len() == b.len() && a.iter().all(|k| b.contains(k)),
            (Option(a), Option(b)) => a == b,
            (RefCell(a), RefCell(b)) => Rc::ptr_eq(a, b),
            (Future { task_id: a, status: sa }, Future { task_id: b, status: sb }) => {
                a == b && sa == sb
            }
            (
                Channel { id: a, variant: va, buffer_size: ba },
                Channel { id: b, variant: vb, buffer_size: bb },
            ) => a == b && va == vb && ba == bb,
            (Error(a), Error(b)) => a == b,
            (SelectResult { index: ia, value: va }, SelectResult { index: ib, value: vb }) => {
                ia == ib && va == vb
            }
            (Opaque { name: a }, Opaque { name: b }) => a == b,
            (Closure(a), Closure(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Value {
    pub fn error(code: ErrorCode, message: impl Into<ArcStr>) -> Value {
        Value::Error(ErrorValue { code, message: message.into() })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn as_error(&self) -> Option<&ErrorValue> {
        match self {
            Value::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Option(_) => "option",
            Value::RefCell(_) => "refCell",
            Value::Future { .. } => "future",
            Value::Channel { .. } => "channel",
            Value::Error(_) => "error",
            Value::SelectResult { .. } => "selectResult",
            Value::Opaque { .. } => "opaque",
            Value::Closure(_) => "closure",
        }
    }

    /// Propagates the first error found among `args`, per the
    /// error-monotonicity rule: any operator/instruction that receives an
    /// error for a required input returns that error unchanged.
    pub fn first_error<'a, I: IntoIterator<Item = &'a Value>>(args: I) -> Option<Value> {
        args.into_iter().find(|v| v.is_error()).cloned()
    }

    // --- container constructors -------------------------------------

    pub fn list(elems: Vec<Value>) -> Value {
        Value::List(Arc::new(elems))
    }

    pub fn empty_map() -> Value {
        Value::Map(Arc::new(IndexMap::new()))
    }

    pub fn empty_set() -> Value {
        Value::Set(Arc::new(IndexSet::new()))
    }

    pub fn none() -> Value {
        Value::Option(None)
    }

    pub fn some(v: Value) -> Value {
        Value::Option(Some(Box::new(v)))
    }

    pub fn new_ref_cell(v: Value) -> Value {
        Value::RefCell(Rc::new(RefCell::new(v)))
    }

    pub fn closure(c: crate::expr::ClosureValue) -> Value {
        Value::Closure(Rc::new(c))
    }

    pub fn as_closure(&self) -> Option<&Rc<crate::expr::ClosureValue>> {
        match self {
            Value::Closure(c) => Some(c),
            _ => None,
        }
    }

    // --- container operations (all persistent / copy-on-write) ------

    pub fn list_len(&self) -> Result<i64, ErrorCode> {
        match self {
            Value::List(l) => Ok(l.len() as i64),
            _ => Err(ErrorCode::TypeError),
        }
    }

    pub fn list_get(&self, idx: i64) -> Result<Value, ErrorCode> {
        match self {
            Value::List(l) => {
                if idx < 0 || idx as usize >= l.len() {
                    Err(ErrorCode::DomainError)
                } else {
                    Ok(l[idx as usize].clone())
                }
            }
            _ => Err(ErrorCode::TypeError),
        }
    }

    pub fn list_push(&self, v: Value) -> Result<Value, ErrorCode> {
        match self {
            Value::List(l) => {
                let mut new = (**l).clone();
                new.push(v);
                Ok(Value::list(new))
            }
            _ => Err(ErrorCode::TypeError),
        }
    }

    pub fn map_insert(&self, key: &Value, v: Value) -> Result<Value, ErrorCode> {
        match self {
            Value::Map(m) => {
                let k = Key::encode(key)?;
                let mut new = (**m).clone();
                new.insert(k, v);
                Ok(Value::Map(Arc::new(new)))
            }
            _ => Err(ErrorCode::TypeError),
        }
    }

    pub fn map_get(&self, key: &Value) -> Result<Value, ErrorCode> {
        match self {
            Value::Map(m) => {
                let k = Key::encode(key)?;
                Ok(m.get(&k).cloned().map(Value::some).unwrap_or(Value::none()))
            }
            _ => Err(ErrorCode::TypeError),
        }
    }

    pub fn map_remove(&self, key: &Value) -> Result<Value, ErrorCode> {
        match self {
            Value::Map(m) => {
                let k = Key::encode(key)?;
                let mut new = (**m).clone();
                new.shift_remove(&k);
                Ok(Value::Map(Arc::new(new)))
            }
            _ => Err(ErrorCode::TypeError),
        }
    }

    pub fn map_keys(&self) -> Result<Value, ErrorCode> {
        match self {
            Value::Map(m) => Ok(Value::list(m.keys().map(Key::decode).collect())),
            _ => Err(ErrorCode::TypeError),
        }
    }

    pub fn map_contains(&self, key: &Value) -> Result<bool, ErrorCode> {
        match self {
            Value::Map(m) => {
                let k = Key::encode(key)?;
                Ok(m.contains_key(&k))
            }
            _ => Err(ErrorCode::TypeError),
        }
    }

    pub fn set_insert(&self, v: &Value) -> Result<Value, ErrorCode> {
        match self {
            Value::Set(s) => {
                let k = Key::encode(v)?;
                let mut new = (**s).clone();
                new.insert(k);
                Ok(Value::Set(Arc::new(new)))
            }
            _ => Err(ErrorCode::TypeError),
        }
    }

    pub fn set_remove(&self, v: &Value) -> Result<Value, ErrorCode> {
        match self {
            Value::Set(s) => {
                let k = Key::encode(v)?;
                let mut new = (**s).clone();
                new.shift_remove(&k);
                Ok(Value::Set(Arc::new(new)))
            }
            _ => Err(ErrorCode::TypeError),
        }
    }

    pub fn set_contains(&self, v: &Value) -> Result<bool, ErrorCode> {
        match self {
            Value::Set(s) => {
                let k = Key::encode(v)?;
                Ok(s.contains(&k))
            }
            _ => Err(ErrorCode::TypeError),
        }
    }

    /// `toList` — reconstructs the elements of a set as a list, in the
    /// set's internal (unspecified but stable) order.
    pub fn set_to_list(&self) -> Result<Value, ErrorCode> {
        match self {
            Value::Set(s) => Ok(Value::list(s.iter().map(Key::decode).collect())),
            _ => Err(ErrorCode::TypeError),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_push_does_not_mutate_input() {
        let a = Value::list(vec![Value::Int(1), Value::Int(2)]);
        let b = a.list_push(Value::Int(3)).unwrap();
        assert_eq!(a.list_len().unwrap(), 2);
        assert_eq!(b.list_len().unwrap(), 3);
    }

    #[test]
    fn map_insert_get_round_trip() {
        let m = Value::empty_map();
        let m = m.map_insert(&Value::String(arcstr::literal!("x")), Value::Int(42)).unwrap();
        assert_eq!(m.map_get(&Value::String(arcstr::literal!("x"))).unwrap(), Value::some(Value::Int(42)));
        assert_eq!(m.map_get(&Value::String(arcstr::literal!("y"))).unwrap(), Value::none());
    }

    #[test]
    fn set_round_trips_primitive_members() {
        let s = Value::empty_set();
        let s = s.set_insert(&Value::Int(7)).unwrap();
        let list = s.set_to_list().unwrap();
        assert_eq!(list, Value::list(vec![Value::Int(7)]));
    }

    #[test]
    fn ref_cell_equality_is_identity_based() {
        let a = Value::new_ref_cell(Value::Int(1));
        let b = Value::new_ref_cell(Value::Int(1));
        assert_ne!(a, b);
        assert_eq!(a.clone(), a);
    }

    #[test]
    fn error_propagation_picks_first_error() {
        let a = Value::Int(1);
        let e = Value::error(ErrorCode::DivideByZero, "boom");
        assert_eq!(Value::first_error([&a, &e]), Some(e));
    }
}
