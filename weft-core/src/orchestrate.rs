//! Wires document validation, the expression-node prepass, and CFG
//! execution together into the top-level evaluation algorithm.
//!
//! `run` is the synchronous entry point: it has no notion of an async
//! host, so a PIR document's `result` node will surface
//! `error(DomainError)` from any instruction that needs a scheduler.
//! `weft-rt::Runtime` drives the same document model through
//! [`crate::cfg::run`] with a real [`crate::cfg::AsyncHost`] instead of
//! calling this module.

use crate::cfg;
use crate::doc::{Document, Node, NodeId};
use crate::env::{Env, RefCellStore};
use crate::error::{ErrorCode, WeftError};
use crate::expr::eval::EvalCtx;
use crate::expr::Expr;
use crate::registry::{EffectRecord, EffectRegistry, OperatorRegistry};
use crate::validate;
use crate::value::Value;
use fxhash::FxHashSet;
use smallvec::SmallVec;

pub struct Outcome {
    pub value: Value,
    pub effects: Vec<EffectRecord>,
}

pub fn run(
    doc: &Document,
    operators: &dyn OperatorRegistry,
    effects: &dyn EffectRegistry,
    max_steps: u64,
) -> Result<Outcome, WeftError> {
    validate::validate(doc)?;

    let mut ref_cells = RefCellStore::new();
    let mut effect_log = Vec::new();
    let mut ctx = EvalCtx { doc, operators, effects, effect_log: &mut effect_log, ref_cells: &mut ref_cells };

    let mut env = prepass(doc, &mut ctx);

    let value = match doc.node(&doc.result) {
        Some(Node::ExprNode { .. }) => env
            .get(&doc.result)
            .cloned()
            .unwrap_or_else(|| Value::error(ErrorCode::UnboundIdentifier, doc.result.to_string())),
        Some(Node::BlockNode { blocks, entry, .. }) => {
            cfg::execute_sync(blocks, entry.clone(), &mut env, &mut ctx, max_steps)
        }
        // Already rejected by `validate`.
        None => Value::error(ErrorCode::ValidationError, "result node missing"),
    };

    Ok(Outcome { value, effects: effect_log })
}

/// Evaluates every `ExprNode` in `doc` into a fresh [`Env`], in
/// dependency order regardless of declaration order, so a `BlockNode`
/// result can `ref` any of them immediately. Exposed so `weft-rt` can
/// build the same document-level environment it hands to every spawned
/// task, without duplicating the cycle-guarded recursion below.
pub fn prepass(doc: &Document, ctx: &mut EvalCtx) -> Env {
    let mut env = Env::new();
    let mut in_progress: FxHashSet<NodeId> = FxHashSet::default();
    for id in doc.nodes.keys() {
        eval_expr_node(id, doc, &mut env, ctx, &mut in_progress);
    }
    env
}

/// Evaluates node `id` (if it is an `ExprNode` and not yet bound) into
/// `env`, first recursing into every node it `ref`s so dependencies are
/// always evaluated before dependents regardless of declaration order.
/// A node reached while its own evaluation is already in progress is an
/// AIR-layer cycle — surfaced as `error(DomainError,
/// "cycle")` rather than overflowing the stack.
fn eval_expr_node(
    id: &NodeId,
    doc: &Document,
    env: &mut Env,
    ctx: &mut EvalCtx,
    in_progress: &mut FxHashSet<NodeId>,
) {
    if env.get(id).is_some() {
        return;
    }
    let Some(Node::ExprNode { expr, .. }) = doc.node(id) else {
        return;
    };
    if in_progress.contains(id) {
        env.set(id.clone(), Value::error(ErrorCode::DomainError, "cycle"));
        return;
    }
    in_progress.insert(id.clone());
    for dep in collect_refs(expr) {
        eval_expr_node(&dep, doc, env, ctx, in_progress);
    }
    in_progress.remove(id);

    let v = crate::expr::eval::eval(expr, env, ctx);
    env.set(id.clone(), v);
}

/// Collects every `ref{id}` appearing anywhere in `expr`, including
/// inside lambda bodies — a closure's captured environment must already
/// contain whatever it might dereference once called. Most expressions
/// reference a handful of other nodes at most, so this stays on the
/// stack in the common case.
fn collect_refs(expr: &Expr) -> SmallVec<[NodeId; 8]> {
    let mut out = SmallVec::new();
    walk(expr, &mut out);
    return out;

    fn walk(e: &Expr, out: &mut SmallVec<[NodeId; 8]>) {
        match e {
            Expr::Lit(_) | Expr::Var { .. } | Expr::Deref { .. } | Expr::Channel { .. } => {}
            Expr::Ref { id } => out.push(id.clone()),
            Expr::Call { args, .. } => args.iter().for_each(|a| walk(a, out)),
            Expr::If { cond, then, else_ } => {
                walk(cond, out);
                walk(then, out);
                walk(else_, out);
            }
            Expr::Let { value, body, .. } => {
                walk(value, out);
                walk(body, out);
            }
            Expr::Lambda { body, .. } => walk(body, out),
            Expr::CallExpr { func, args } => {
                walk(func, out);
                args.iter().for_each(|a| walk(a, out));
            }
            Expr::Fix { func } => walk(func, out),
            Expr::AirRef { args, .. } => args.iter().for_each(|a| walk(a, out)),
            Expr::Seq { first, then } => {
                walk(first, out);
                walk(then, out);
            }
            Expr::Assign { value, .. } => walk(value, out),
            Expr::While { cond, body } | Expr::Iter { cond, body } => {
                walk(cond, out);
                walk(body, out);
            }
            Expr::For { init, cond, update, body } => {
                walk(init, out);
                walk(cond, out);
                walk(update, out);
                walk(body, out);
            }
            Expr::Effect { args, .. } => args.iter().for_each(|a| walk(a, out)),
            Expr::RefCell { init, .. } => walk(init, out),
            Expr::Try { try_body, catch_body, fallback, .. } => {
                walk(try_body, out);
                walk(catch_body, out);
                if let Some(fb) = fallback {
                    walk(fb, out);
                }
            }
            Expr::Spawn { args, .. } => args.iter().for_each(|a| walk(a, out)),
            Expr::Await { future } => walk(future, out),
            Expr::Par { branches } => branches.iter().for_each(|b| walk(b, out)),
            Expr::Send { channel, value } => {
                walk(channel, out);
                walk(value, out);
            }
            Expr::Recv { channel } => walk(channel, out),
            Expr::ChannelOp { channel, value, .. } => {
                walk(channel, out);
                if let Some(v) = value {
                    walk(v, out);
                }
            }
            Expr::Select { futures, fallback, .. } => {
                futures.iter().for_each(|f| walk(f, out));
                if let Some(fb) = fallback {
                    walk(fb, out);
                }
            }
            Expr::Race { tasks } => tasks.iter().for_each(|t| walk(t, out)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::{Block, Instruction, Literal, Node, Terminator, Version};
    use crate::registry::{BuiltinRegistry, NullEffectRegistry};
    use indexmap::IndexMap;

    #[test]
    fn arithmetic_scenario_end_to_end() {
        let mut nodes = IndexMap::new();
        nodes.insert(
            "a".into(),
            Node::ExprNode { id: "a".into(), typ: None, expr: Expr::Lit(Literal::Int(10)) },
        );
        nodes.insert(
            "b".into(),
            Node::ExprNode { id: "b".into(), typ: None, expr: Expr::Lit(Literal::Int(32)) },
        );
        nodes.insert(
            "r".into(),
            Node::ExprNode {
                id: "r".into(),
                typ: None,
                expr: Expr::Call {
                    ns: "core".into(),
                    name: "add".into(),
                    args: vec![Expr::Ref { id: "a".into() }, Expr::Ref { id: "b".into() }],
                },
            },
        );
        let doc = Document {
            version: Version { major: 1, minor: 0, patch: 0 },
            capabilities: None,
            function_sigs: IndexMap::new(),
            air_defs: IndexMap::new(),
            nodes,
            result: "r".into(),
        };

        let ops = BuiltinRegistry::new();
        let fx = NullEffectRegistry;
        let outcome = run(&doc, &ops, &fx, 10_000).unwrap();
        assert_eq!(outcome.value, Value::Int(42));
    }

    #[test]
    fn block_result_drives_cfg() {
        let mut blocks = IndexMap::new();
        blocks.insert(
            "bb0".into(),
            Block {
                id: "bb0".into(),
                instructions: vec![Instruction::Assign { target: "x".into(), expr: Expr::Lit(Literal::Int(7)) }],
                terminator: Terminator::Return { value_id: Some("x".into()) },
            },
        );
        let mut nodes = IndexMap::new();
        nodes.insert("r".into(), Node::BlockNode { id: "r".into(), typ: None, blocks, entry: "bb0".into() });
        let doc = Document {
            version: Version { major: 1, minor: 0, patch: 0 },
            capabilities: None,
            function_sigs: IndexMap::new(),
            air_defs: IndexMap::new(),
            nodes,
            result: "r".into(),
        };

        let ops = BuiltinRegistry::new();
        let fx = NullEffectRegistry;
        let outcome = run(&doc, &ops, &fx, 10_000).unwrap();
        assert_eq!(outcome.value, Value::Int(7));
    }

    #[test]
    fn cyclic_air_reference_is_domain_error_not_overflow() {
        let mut nodes = IndexMap::new();
        nodes.insert("a".into(), Node::ExprNode { id: "a".into(), typ: None, expr: Expr::Ref { id: "b".into() } });
        nodes.insert("b".into(), Node::ExprNode { id: "b".into(), typ: None, expr: Expr::Ref { id: "a".into() } });
        let doc = Document {
            version: Version { major: 1, minor: 0, patch: 0 },
            capabilities: None,
            function_sigs: IndexMap::new(),
            air_defs: IndexMap::new(),
            nodes,
            result: "a".into(),
        };

        let ops = BuiltinRegistry::new();
        let fx = NullEffectRegistry;
        let outcome = run(&doc, &ops, &fx, 10_000).unwrap();
        assert_eq!(outcome.value.as_error().map(|e| e.code), Some(ErrorCode::DomainError));
    }
}
