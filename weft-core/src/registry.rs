//! The operator and effect registries.
//!
//! The core only requires `lookup`, arity checking, and invocation — the
//! concrete namespace of operators (`core:add`, a host's `db:query`, …)
//! is an external collaborator's concern. [`BuiltinRegistry`] is a
//! default operator/effect registry with `core:*` builtins, sufficient
//! to run arithmetic and container scenarios end to end; callers that
//! need their own namespace implement
//! [`OperatorRegistry`]/[`EffectRegistry`] directly.

use crate::error::ErrorCode;
use crate::value::Value;
use compact_str::CompactString;
use fxhash::FxHashMap;
use std::panic::{self, AssertUnwindSafe};

pub trait Operator {
    fn arity(&self) -> usize;
    fn pure(&self) -> bool {
        true
    }
    /// True for the explicit error-inspecting operators that are carved
    /// out of the blanket error-monotonicity rule (`isError`, `errorCode`,
    /// `errorMessage`) — these must see an `error` argument as data, not
    /// have it short-circuit the call before `invoke` runs.
    fn inspects_errors(&self) -> bool {
        false
    }
    fn invoke(&self, args: &[Value]) -> Value;
}

pub trait OperatorRegistry {
    fn lookup(&self, ns: &str, name: &str) -> Option<&dyn Operator>;
}

pub trait Effect {
    fn arity(&self) -> usize;
    fn invoke(&self, args: &[Value]) -> Value;
}

pub trait EffectRegistry {
    fn lookup(&self, op: &str) -> Option<&dyn Effect>;
}

/// One entry in the effects log: every effect invocation is recorded,
/// in order, regardless of outcome.
#[derive(Debug, Clone)]
pub struct EffectRecord {
    pub op: CompactString,
    pub args: Vec<Value>,
}

/// Resolves, arity-checks, and invokes an operator, applying the
/// error-monotonicity rule and a host-boundary panic reification: every
/// operator invocation runs behind a try/catch-analog that turns a panic
/// into `error(DomainError)` rather than unwinding past this call.
pub fn invoke_operator(
    registry: &dyn OperatorRegistry,
    ns: &str,
    name: &str,
    args: &[Value],
) -> Value {
    let Some(op) = registry.lookup(ns, name) else {
        return Value::error(ErrorCode::UnknownOperator, format!("{ns}:{name}"));
    };
    if !op.inspects_errors() {
        if let Some(e) = Value::first_error(args) {
            return e;
        }
    }
    if args.len() != op.arity() {
        return Value::error(
            ErrorCode::ArityError,
            format!("{ns}:{name} expects {} args, got {}", op.arity(), args.len()),
        );
    }
    match panic::catch_unwind(AssertUnwindSafe(|| op.invoke(args))) {
        Ok(v) => v,
        Err(cause) => {
            let msg = panic_message(&cause);
            log::warn!(target: "weft_core::registry", "operator {ns}:{name} panicked: {msg}");
            Value::error(ErrorCode::DomainError, msg)
        }
    }
}

/// Resolves, arity-checks, invokes and logs an effect: `effect` calls
/// the effect handler registered under `op` and logs `{op, args}` in
/// the effects list regardless of outcome.
pub fn invoke_effect(
    registry: &dyn EffectRegistry,
    op: &str,
    args: &[Value],
    log: &mut Vec<EffectRecord>,
) -> Value {
    let Some(handler) = registry.lookup(op) else {
        return Value::error(ErrorCode::UnknownOperator, op.to_string());
    };
    if let Some(e) = Value::first_error(args) {
        return e;
    }
    if args.len() != handler.arity() {
        return Value::error(
            ErrorCode::ArityError,
            format!("effect {op} expects {} args, got {}", handler.arity(), args.len()),
        );
    }
    let result = match panic::catch_unwind(AssertUnwindSafe(|| handler.invoke(args))) {
        Ok(v) => v,
        Err(cause) => Value::error(ErrorCode::DomainError, panic_message(&cause)),
    };
    log.push(EffectRecord { op: op.into(), args: args.to_vec() });
    result
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "operator panicked".to_string()
    }
}

struct FnOperator {
    arity: usize,
    pure: bool,
    inspects_errors: bool,
    f: fn(&[Value]) -> Value,
}

impl Operator for FnOperator {
    fn arity(&self) -> usize {
        self.arity
    }
    fn pure(&self) -> bool {
        self.pure
    }
    fn inspects_errors(&self) -> bool {
        self.inspects_errors
    }
    fn invoke(&self, args: &[Value]) -> Value {
        (self.f)(args)
    }
}

/// `core:*` builtins: arithmetic, comparisons, booleans, and container
/// accessors sufficient to run arithmetic, branch, and container
/// scenarios end to end.
pub struct BuiltinRegistry {
    ops: FxHashMap<(CompactString, CompactString), FnOperator>,
}

fn num(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        let mut ops = FxHashMap::default();
        macro_rules! reg {
            ($ns:expr, $name:expr, $arity:expr, $f:expr) => {
                ops.insert(
                    (CompactString::from($ns), CompactString::from($name)),
                    FnOperator { arity: $arity, pure: true, inspects_errors: false, f: $f },
                );
            };
        }
        macro_rules! reg_inspect {
            ($ns:expr, $name:expr, $arity:expr, $f:expr) => {
                ops.insert(
                    (CompactString::from($ns), CompactString::from($name)),
                    FnOperator { arity: $arity, pure: true, inspects_errors: true, f: $f },
                );
            };
        }

        reg!("core", "add", 2, |a| match (&a[0], &a[1]) {
            (Value::Int(x), Value::Int(y)) => Value::Int(x + y),
            (Value::String(x), Value::String(y)) => Value::String(arcstr::ArcStr::from(format!("{x}{y}"))),
            _ => match (num(&a[0]), num(&a[1])) {
                (Some(x), Some(y)) => Value::Float(x + y),
                _ => Value::error(ErrorCode::TypeError, "add expects numbers or strings"),
            },
        });
        reg!("core", "sub", 2, |a| match (&a[0], &a[1]) {
            (Value::Int(x), Value::Int(y)) => Value::Int(x - y),
            _ => match (num(&a[0]), num(&a[1])) {
                (Some(x), Some(y)) => Value::Float(x - y),
                _ => Value::error(ErrorCode::TypeError, "sub expects numbers"),
            },
        });
        reg!("core", "mul", 2, |a| match (&a[0], &a[1]) {
            (Value::Int(x), Value::Int(y)) => Value::Int(x * y),
            _ => match (num(&a[0]), num(&a[1])) {
                (Some(x), Some(y)) => Value::Float(x * y),
                _ => Value::error(ErrorCode::TypeError, "mul expects numbers"),
            },
        });
        reg!("core", "div", 2, |a| match (&a[0], &a[1]) {
            (Value::Int(_), Value::Int(0)) => Value::error(ErrorCode::DivideByZero, "division by zero"),
            (Value::Int(x), Value::Int(y)) => Value::Int(x / y),
            _ => match (num(&a[0]), num(&a[1])) {
                (Some(_), Some(y)) if y == 0.0 => {
                    Value::error(ErrorCode::DivideByZero, "division by zero")
                }
                (Some(x), Some(y)) => Value::Float(x / y),
                _ => Value::error(ErrorCode::TypeError, "div expects numbers"),
            },
        });
        reg!("core", "mod", 2, |a| match (&a[0], &a[1]) {
            (Value::Int(_), Value::Int(0)) => Value::error(ErrorCode::DivideByZero, "modulo by zero"),
            (Value::Int(x), Value::Int(y)) => Value::Int(x % y),
            _ => Value::error(ErrorCode::TypeError, "mod expects ints"),
        });
        reg!("core", "neg", 1, |a| match &a[0] {
            Value::Int(x) => Value::Int(-x),
            Value::Float(x) => Value::Float(-x),
            _ => Value::error(ErrorCode::TypeError, "neg expects a number"),
        });

        reg!("core", "eq", 2, |a| Value::Bool(a[0] == a[1]));
        reg!("core", "ne", 2, |a| Value::Bool(a[0] != a[1]));
        reg!("core", "lt", 2, |a| cmp(&a[0], &a[1], |o| o.is_lt()));
        reg!("core", "gt", 2, |a| cmp(&a[0], &a[1], |o| o.is_gt()));
        reg!("core", "lte", 2, |a| cmp(&a[0], &a[1], |o| o.is_le()));
        reg!("core", "gte", 2, |a| cmp(&a[0], &a[1], |o| o.is_ge()));

        reg!("core", "and", 2, |a| match (&a[0], &a[1]) {
            (Value::Bool(x), Value::Bool(y)) => Value::Bool(*x && *y),
            _ => Value::error(ErrorCode::TypeError, "and expects bools"),
        });
        reg!("core", "or", 2, |a| match (&a[0], &a[1]) {
            (Value::Bool(x), Value::Bool(y)) => Value::Bool(*x || *y),
            _ => Value::error(ErrorCode::TypeError, "or expects bools"),
        });
        reg!("core", "not", 1, |a| match &a[0] {
            Value::Bool(x) => Value::Bool(!x),
            _ => Value::error(ErrorCode::TypeError, "not expects a bool"),
        });

        reg!("core", "len", 1, |a| match &a[0] {
            Value::List(l) => Value::Int(l.len() as i64),
            Value::String(s) => Value::Int(s.chars().count() as i64),
            Value::Map(m) => Value::Int(m.len() as i64),
            Value::Set(s) => Value::Int(s.len() as i64),
            _ => Value::error(ErrorCode::TypeError, "len expects a container"),
        });
        reg!("core", "get", 2, |a| match &a[0] {
            Value::List(_) => a[1]
                .as_int()
                .map(|i| a[0].list_get(i).unwrap_or(Value::error(ErrorCode::DomainError, "index out of range")))
                .unwrap_or(Value::error(ErrorCode::TypeError, "get index must be an int")),
            Value::Map(_) => a[0].map_get(&a[1]).unwrap_or(Value::error(ErrorCode::TypeError, "bad key")),
            _ => Value::error(ErrorCode::TypeError, "get expects a list or map"),
        });
        reg!("core", "push", 2, |a| {
            a[0].list_push(a[1].clone()).unwrap_or(Value::error(ErrorCode::TypeError, "push expects a list"))
        });
        reg!("core", "insert", 3, |a| match &a[0] {
            Value::Map(_) => a[0]
                .map_insert(&a[1], a[2].clone())
                .unwrap_or(Value::error(ErrorCode::TypeError, "insert expects a map")),
            _ => Value::error(ErrorCode::TypeError, "insert expects a map"),
        });
        reg!("core", "remove", 2, |a| match &a[0] {
            Value::Map(_) => a[0].map_remove(&a[1]).unwrap_or(Value::error(ErrorCode::TypeError, "bad key")),
            Value::Set(_) => a[0].set_remove(&a[1]).unwrap_or(Value::error(ErrorCode::TypeError, "bad member")),
            _ => Value::error(ErrorCode::TypeError, "remove expects a map or set"),
        });
        reg!("core", "keys", 1, |a| a[0].map_keys().unwrap_or(Value::error(ErrorCode::TypeError, "keys expects a map")));
        reg!("core", "contains", 2, |a| match &a[0] {
            Value::Map(_) => Value::Bool(a[0].map_contains(&a[1]).unwrap_or(false)),
            Value::Set(_) => Value::Bool(a[0].set_contains(&a[1]).unwrap_or(false)),
            _ => Value::error(ErrorCode::TypeError, "contains expects a map or set"),
        });
        reg!("core", "setInsert", 2, |a| a[0].set_insert(&a[1]).unwrap_or(Value::error(ErrorCode::TypeError, "setInsert expects a set")));
        reg!("core", "toList", 1, |a| a[0].set_to_list().unwrap_or(Value::error(ErrorCode::TypeError, "toList expects a set")));
        reg!("core", "emptyList", 0, |_a| Value::list(vec![]));

        // Error-inspecting operators, the explicit exceptions to the
        // error-monotonicity rule. These see `error` values as ordinary
        // data, not as something to short-circuit on.
        reg_inspect!("core", "isError", 1, |a| Value::Bool(a[0].is_error()));
        reg_inspect!("core", "errorCode", 1, |a| match &a[0] {
            Value::Error(e) => Value::String(arcstr::ArcStr::from(e.code.to_string())),
            _ => Value::error(ErrorCode::TypeError, "errorCode expects an error value"),
        });
        reg_inspect!("core", "errorMessage", 1, |a| match &a[0] {
            Value::Error(e) => Value::String(e.message.clone()),
            _ => Value::error(ErrorCode::TypeError, "errorMessage expects an error value"),
        });
        reg_inspect!("core", "isSelectTimeout", 1, |a| match &a[0] {
            Value::Error(e) => Value::Bool(e.code == ErrorCode::SelectTimeout),
            _ => Value::Bool(false),
        });

        Self { ops }
    }
}

fn cmp(a: &Value, b: &Value, pick: impl Fn(std::cmp::Ordering) -> bool) -> Value {
    let ord = match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.partial_cmp(y),
        (Value::String(x), Value::String(y)) => x.as_str().partial_cmp(y.as_str()),
        _ => match (num(a), num(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    };
    match ord {
        Some(o) => Value::Bool(pick(o)),
        None => Value::error(ErrorCode::TypeError, "incomparable operands"),
    }
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OperatorRegistry for BuiltinRegistry {
    fn lookup(&self, ns: &str, name: &str) -> Option<&dyn Operator> {
        self.ops.get(&(CompactString::from(ns), CompactString::from(name))).map(|op| op as &dyn Operator)
    }
}

/// An effect registry with no handlers registered — useful as a default
/// for documents that never use `effect`. Every lookup fails with
/// `UnknownOperator`, the same code used for any other missing operator.
#[derive(Default)]
pub struct NullEffectRegistry;

impl EffectRegistry for NullEffectRegistry {
    fn lookup(&self, _op: &str) -> Option<&dyn Effect> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_two_ints() {
        let reg = BuiltinRegistry::new();
        let v = invoke_operator(&reg, "core", "add", &[Value::Int(10), Value::Int(32)]);
        assert_eq!(v, Value::Int(42));
    }

    #[test]
    fn div_by_zero_is_divide_by_zero() {
        let reg = BuiltinRegistry::new();
        let v = invoke_operator(&reg, "core", "div", &[Value::Int(1), Value::Int(0)]);
        assert_eq!(v, Value::error(ErrorCode::DivideByZero, "division by zero"));
    }

    #[test]
    fn unknown_operator_errors() {
        let reg = BuiltinRegistry::new();
        let v = invoke_operator(&reg, "core", "nope", &[]);
        assert_eq!(v.as_error().map(|e| e.code), Some(ErrorCode::UnknownOperator));
    }

    #[test]
    fn arity_mismatch_errors() {
        let reg = BuiltinRegistry::new();
        let v = invoke_operator(&reg, "core", "add", &[Value::Int(1)]);
        assert_eq!(v.as_error().map(|e| e.code), Some(ErrorCode::ArityError));
    }

    #[test]
    fn error_argument_short_circuits() {
        let reg = BuiltinRegistry::new();
        let e = Value::error(ErrorCode::TypeError, "boom");
        let v = invoke_operator(&reg, "core", "add", &[e.clone(), Value::Int(1)]);
        assert_eq!(v, e);
    }
}
