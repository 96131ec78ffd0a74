//! The recursive AIR/CIR/EIR expression evaluator.
//!
//! Every failure is reified as a `Value::Error` — this function never
//! panics and never returns a Rust `Result`; total evaluation (every
//! call returns a value, never unwinds) depends on that.

use super::{ClosureValue, Expr};
use crate::doc::{Document, Literal};
use crate::env::{Env, RefCellStore};
use crate::error::ErrorCode;
use crate::registry::{self, EffectRecord, EffectRegistry, OperatorRegistry};
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;
use triomphe::Arc;

/// Everything the evaluator needs besides the expression and its lexical
/// environment: the document (for `airRef` lookups), the operator/effect
/// registries, the effects log, and the named ref-cell store.
pub struct EvalCtx<'a> {
    pub doc: &'a Document,
    pub operators: &'a dyn OperatorRegistry,
    pub effects: &'a dyn EffectRegistry,
    pub effect_log: &'a mut Vec<EffectRecord>,
    pub ref_cells: &'a mut RefCellStore,
}

pub fn eval(expr: &Expr, env: &Env, ctx: &mut EvalCtx) -> Value {
    log::trace!(target: "weft_core::expr::eval", "dispatch {}", expr_kind(expr));
    match expr {
        Expr::Lit(lit) => literal_to_value(lit),

        Expr::Ref { id } => env
            .get(id)
            .cloned()
            .unwrap_or_else(|| Value::error(ErrorCode::UnboundIdentifier, id.to_string())),

        Expr::Var { name } => env
            .get(name)
            .cloned()
            .unwrap_or_else(|| Value::error(ErrorCode::UnboundIdentifier, name.to_string())),

        Expr::Call { ns, name, args } => {
            let argv = eval_args(args, env, ctx);
            if let Some(e) = Value::first_error(&argv) {
                return e;
            }
            registry::invoke_operator(ctx.operators, ns, name, &argv)
        }

        Expr::If { cond, then, else_ } => match eval(cond, env, ctx) {
            Value::Bool(true) => eval(then, env, ctx),
            Value::Bool(false) => eval(else_, env, ctx),
            e @ Value::Error(_) => e,
            _ => Value::error(ErrorCode::TypeError, "if condition must be bool"),
        },

        Expr::Let { name, value, body } => {
            let v = eval(value, env, ctx);
            if v.is_error() {
                return v;
            }
            let child = env.bind(name.clone(), v);
            eval(body, &child, ctx)
        }

        Expr::Lambda { params, body } => Value::closure(ClosureValue {
            params: params.clone(),
            body: Arc::new((**body).clone()),
            env: env.clone(),
        }),

        Expr::CallExpr { func, args } => {
            let f = eval(func, env, ctx);
            if f.is_error() {
                return f;
            }
            let argv = eval_args(args, env, ctx);
            if let Some(e) = Value::first_error(&argv) {
                return e;
            }
            apply(&f, argv, ctx)
        }

        Expr::Fix { func } => eval_fix(func, env, ctx),

        Expr::AirRef { ns, name, args } => eval_air_ref(ns, name, args, env, ctx),

        Expr::Seq { first, then } => {
            let f = eval(first, env, ctx);
            if f.is_error() {
                return f;
            }
            eval(then, env, ctx)
        }

        Expr::Assign { target, value } => {
            let v = eval(value, env, ctx);
            if v.is_error() {
                return v;
            }
            match ctx.ref_cells.get(target) {
                Some(cell) => {
                    *cell.borrow_mut() = v;
                    Value::Void
                }
                None => Value::error(ErrorCode::UnboundIdentifier, target.to_string()),
            }
        }

        Expr::While { cond, body } => loop {
            match eval(cond, env, ctx) {
                Value::Bool(true) => {
                    let r = eval(body, env, ctx);
                    if r.is_error() {
                        return r;
                    }
                }
                Value::Bool(false) => return Value::Void,
                e @ Value::Error(_) => return e,
                _ => return Value::error(ErrorCode::TypeError, "while condition must be bool"),
            }
        },

        Expr::For { init, cond, update, body } => {
            let iv = eval(init, env, ctx);
            if iv.is_error() {
                return iv;
            }
            loop {
                match eval(cond, env, ctx) {
                    Value::Bool(true) => {
                        let r = eval(body, env, ctx);
                        if r.is_error() {
                            return r;
                        }
                        let u = eval(update, env, ctx);
                        if u.is_error() {
                            return u;
                        }
                    }
                    Value::Bool(false) => return Value::Void,
                    e @ Value::Error(_) => return e,
                    _ => return Value::error(ErrorCode::TypeError, "for condition must be bool"),
                }
            }
        }

        // Approximated as a conditional loop; full element-extraction is
        // not modeled at this
        // layer — see the lowering pass for the CFG-shape guarantee.
        Expr::Iter { cond, body } => loop {
            match eval(cond, env, ctx) {
                Value::Bool(true) => {
                    let r = eval(body, env, ctx);
                    if r.is_error() {
                        return r;
                    }
                }
                Value::Bool(false) => return Value::Void,
                e @ Value::Error(_) => return e,
                _ => return Value::error(ErrorCode::TypeError, "iter condition must be bool"),
            }
        },

        Expr::Effect { op, args } => {
            let argv = eval_args(args, env, ctx);
            if let Some(e) = Value::first_error(&argv) {
                return e;
            }
            registry::invoke_effect(ctx.effects, op, &argv, ctx.effect_log)
        }

        Expr::RefCell { target, init } => {
            let v = eval(init, env, ctx);
            if v.is_error() {
                return v;
            }
            let cell = Rc::new(RefCell::new(v));
            ctx.ref_cells.insert(target.clone(), cell.clone());
            Value::RefCell(cell)
        }

        Expr::Deref { target } => match ctx.ref_cells.get(target) {
            Some(cell) => cell.borrow().clone(),
            None => Value::error(ErrorCode::UnboundIdentifier, target.to_string()),
        },

        Expr::Try { try_body, catch_param, catch_body, fallback } => {
            let v = eval(try_body, env, ctx);
            match v {
                Value::Error(e) => {
                    let child = env.bind(catch_param.clone(), Value::Error(e));
                    let r = eval(catch_body, &child, ctx);
                    if r.is_error() {
                        if let Some(fb) = fallback {
                            return eval(fb, env, ctx);
                        }
                    }
                    r
                }
                other => other,
            }
        }

        // PIR-only kinds only make sense once lowered to LIR and driven
        // by the async runtime — the plain expression evaluator reports
        // a defined error rather than attempting to run them.
        _ => Value::error(
            ErrorCode::DomainError,
            "async expression requires lowering to LIR and a PIR-capable runtime",
        ),
    }
}

fn expr_kind(expr: &Expr) -> &'static str {
    match expr {
        Expr::Lit(_) => "lit",
        Expr::Ref { .. } => "ref",
        Expr::Var { .. } => "var",
        Expr::Call { .. } => "call",
        Expr::If { .. } => "if",
        Expr::Let { .. } => "let",
        Expr::Lambda { .. } => "lambda",
        Expr::CallExpr { .. } => "callExpr",
        Expr::Fix { .. } => "fix",
        Expr::AirRef { .. } => "airRef",
        Expr::Seq { .. } => "seq",
        Expr::Assign { .. } => "assign",
        Expr::While { .. } => "while",
        Expr::For { .. } => "for",
        Expr::Iter { .. } => "iter",
        Expr::Effect { .. } => "effect",
        Expr::RefCell { .. } => "refCell",
        Expr::Deref { .. } => "deref",
        Expr::Try { .. } => "try",
        Expr::Spawn { .. } => "spawn",
        Expr::Await { .. } => "await",
        Expr::Par { .. } => "par",
        Expr::Channel { .. } => "channel",
        Expr::Send { .. } => "send",
        Expr::Recv { .. } => "recv",
        Expr::ChannelOp { .. } => "channelOp",
        Expr::Select { .. } => "select",
        Expr::Race { .. } => "race",
    }
}

fn eval_args(args: &[Expr], env: &Env, ctx: &mut EvalCtx) -> Vec<Value> {
    args.iter().map(|a| eval(a, env, ctx)).collect()
}

fn literal_to_value(lit: &Literal) -> Value {
    match lit {
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::String(arcstr::ArcStr::from(s.as_str())),
        Literal::Void => Value::Void,
    }
}

/// Applies a closure value to `args`, supporting partial application:
/// a call with fewer args than the closure's parameter list returns a
/// residual closure over the remaining ones. One level of implicit
/// deref is applied first so that
/// `fix`'s self-binding cell (see [`eval_fix`]) can stand in for a
/// closure at a call site without callers needing to know about it.
fn apply(f: &Value, mut args: Vec<Value>, ctx: &mut EvalCtx) -> Value {
    let resolved = match f {
        Value::RefCell(cell) => cell.borrow().clone(),
        other => other.clone(),
    };
    let closure = match resolved.as_closure() {
        Some(c) => c.clone(),
        None => {
            return Value::error(ErrorCode::TypeError, format!("cannot call a {}", resolved.type_name()))
        }
    };

    if args.len() > closure.params.len() {
        return Value::error(ErrorCode::ArityError, "too many arguments");
    }

    if args.len() < closure.params.len() {
        let mut env = closure.env.clone();
        let mut bound = 0;
        for (p, v) in closure.params.iter().zip(args.drain(..)) {
            env = env.bind(p.clone(), v);
            bound += 1;
        }
        let remaining = closure.params[bound..].to_vec();
        return Value::closure(ClosureValue { params: remaining, body: closure.body.clone(), env });
    }

    let mut env = closure.env.clone();
    for (p, v) in closure.params.iter().zip(args) {
        env = env.bind(p.clone(), v);
    }
    eval(&closure.body, &env, ctx)
}

/// `fix{fn}`: `fn` must evaluate to a one-argument
/// closure whose argument stands for "myself". A ref cell is allocated
/// up front and bound to that argument name; the closure body (almost
/// always itself another `lambda`, producing the real recursive function)
/// is evaluated with that binding in scope, and the cell is populated
/// with the result afterward — so a reference to "myself" captured
/// inside the real function's body resolves once that function is
/// actually called, by which point the cell holds it.
fn eval_fix(func: &Expr, env: &Env, ctx: &mut EvalCtx) -> Value {
    let outer = eval(func, env, ctx);
    if outer.is_error() {
        return outer;
    }
    let Some(outer_closure) = outer.as_closure().cloned() else {
        return Value::error(ErrorCode::TypeError, "fix expects a function of one argument");
    };
    if outer_closure.params.len() != 1 {
        return Value::error(ErrorCode::ArityError, "fix expects a function of exactly one argument");
    }
    let self_name = outer_closure.params[0].clone();
    let cell = Rc::new(RefCell::new(Value::Void));
    let inner_env = outer_closure.env.bind(self_name, Value::RefCell(cell.clone()));
    let inner = eval(&outer_closure.body, &inner_env, ctx);
    if inner.is_error() {
        return inner;
    }
    *cell.borrow_mut() = inner.clone();
    inner
}

/// `airRef{ns,name,args}`: invokes a named AIR definition. AIR defs are
/// evaluated in a fresh environment built only from their own parameters
/// — they are top-level pure definitions, not closures over a caller's
/// lexical scope.
fn eval_air_ref(ns: &str, name: &str, args: &[Expr], env: &Env, ctx: &mut EvalCtx) -> Value {
    let Some(def) = ctx.doc.air_defs.get(name) else {
        return Value::error(ErrorCode::UnknownOperator, format!("{ns}:{name}"));
    };
    if args.len() != def.params.len() {
        return Value::error(
            ErrorCode::ArityError,
            format!("airDef {name} expects {} args, got {}", def.params.len(), args.len()),
        );
    }
    let argv = eval_args(args, env, ctx);
    if let Some(e) = Value::first_error(&argv) {
        return e;
    }
    let mut call_env = Env::new();
    for (p, v) in def.params.iter().zip(argv) {
        call_env.set(p.clone(), v);
    }
    eval(&def.body, &call_env, ctx)
}
