//! The AIR/CIR/EIR expression tree and the closure value it
//! produces at evaluation time.
//!
//! `Expr` is the single tree shape shared by all three pre-CFG layers:
//! AIR uses only the pure applicative kinds (`lit`, `ref`, `var`, `call`,
//! `if`, `let`, `airRef`); CIR adds `lambda`/`callExpr`/`fix`; EIR adds
//! sequencing, mutation, loops, effects, ref cells, and `try`. The
//! PIR-only kinds (`spawn`, `await`, `par`, `channel`, `send`, `recv`,
//! `select`, `race`) appear here too, because the lowering pass (§4.2)
//! pattern-matches on them before they ever reach the CFG evaluator — the
//! plain expression evaluator in this crate cannot run them and reports
//! `error(DomainError)` if asked to (see [`eval::eval`]).

pub mod eval;

use crate::doc::{ChannelOpKind, Literal, NodeId};
use crate::env::Env;
use compact_str::CompactString;
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use triomphe::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Expr {
    Lit(Literal),
    Ref {
        id: NodeId,
    },
    Var {
        name: CompactString,
    },
    Call {
        ns: CompactString,
        name: CompactString,
        args: Vec<Expr>,
    },
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        #[serde(rename = "else")]
        else_: Box<Expr>,
    },
    Let {
        name: CompactString,
        value: Box<Expr>,
        body: Box<Expr>,
    },
    Lambda {
        params: Vec<CompactString>,
        body: Box<Expr>,
    },
    CallExpr {
        #[serde(rename = "fn")]
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    Fix {
        #[serde(rename = "fn")]
        func: Box<Expr>,
    },
    AirRef {
        ns: CompactString,
        name: CompactString,
        args: Vec<Expr>,
    },

    // EIR
    Seq {
        first: Box<Expr>,
        then: Box<Expr>,
    },
    Assign {
        target: CompactString,
        value: Box<Expr>,
    },
    While {
        cond: Box<Expr>,
        body: Box<Expr>,
    },
    For {
        init: Box<Expr>,
        cond: Box<Expr>,
        update: Box<Expr>,
        body: Box<Expr>,
    },
    /// Approximated as a conditional loop: `cond` stands in for the iteration
    /// predicate, full element-extraction is not modeled at this layer.
    Iter {
        cond: Box<Expr>,
        body: Box<Expr>,
    },
    Effect {
        op: CompactString,
        args: Vec<Expr>,
    },
    RefCell {
        target: CompactString,
        init: Box<Expr>,
    },
    Deref {
        target: CompactString,
    },
    Try {
        #[serde(rename = "tryBody")]
        try_body: Box<Expr>,
        #[serde(rename = "catchParam")]
        catch_param: CompactString,
        #[serde(rename = "catchBody")]
        catch_body: Box<Expr>,
        #[serde(default, rename = "fallback")]
        fallback: Option<Box<Expr>>,
    },

    // PIR — never executed directly by `eval::eval`; see lowering (§4.2).
    Spawn {
        entry: NodeId,
        args: Vec<Expr>,
    },
    Await {
        future: Box<Expr>,
    },
    Par {
        branches: Vec<Expr>,
    },
    Channel {
        variant: crate::value::ChannelVariant,
        #[serde(rename = "bufferSize")]
        buffer_size: i64,
    },
    Send {
        channel: Box<Expr>,
        value: Box<Expr>,
    },
    Recv {
        channel: Box<Expr>,
    },
    ChannelOp {
        op: ChannelOpKind,
        channel: Box<Expr>,
        #[serde(default)]
        value: Option<Box<Expr>>,
    },
    Select {
        futures: Vec<Expr>,
        #[serde(default)]
        timeout: Option<i64>,
        #[serde(default)]
        fallback: Option<Box<Expr>>,
        #[serde(default, rename = "returnIndex")]
        return_index: bool,
    },
    Race {
        tasks: Vec<Expr>,
    },
}

impl Expr {
    /// True for the PIR-only kinds that the plain (sync) expression
    /// evaluator cannot run — they only make sense once lowered to LIR
    /// and driven by the async runtime.
    pub fn is_async_only(&self) -> bool {
        matches!(
            self,
            Expr::Spawn { .. }
                | Expr::Await { .. }
                | Expr::Par { .. }
                | Expr::Channel { .. }
                | Expr::Send { .. }
                | Expr::Recv { .. }
                | Expr::ChannelOp { .. }
                | Expr::Select { .. }
                | Expr::Race { .. }
        )
    }
}

/// The runtime value produced by `lambda` and `fix`. Not one of the
/// wire-format `Value` tags — closures are ephemeral,
/// produced only during evaluation, and never appear in a parsed
/// document. [`crate::value::Value::Closure`] wraps this in an `Rc` so
/// cloning a closure value is cheap and equality is pointer identity,
/// the same discipline as `refCell`.
pub struct ClosureValue {
    pub params: Vec<CompactString>,
    pub body: Arc<Expr>,
    pub env: Env,
}

impl fmt::Debug for ClosureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureValue").field("params", &self.params).finish_non_exhaustive()
    }
}
