//! The EIR→LIR lowering pass.
//!
//! Converts the EIR expression tree anchored at a document's `result`
//! node into a single `BlockNode` CFG: fresh block ids are minted from
//! an integer counter formatted as `bb<n>`, every block ends in a
//! terminator, `if` always produces two successor blocks joined by a
//! merge block, and the final block's terminator is `return{value}`
//! holding whatever the lowered expression evaluated to.
//!
//! Async-only expression kinds lower to the dedicated PIR instructions
//! `spawn`/`await`/`channelOp` where the document format already has one
//! (`spawn`, `await`, `send`, `recv`, `channelOp` itself); `channel`,
//! `select`, and `race` have no dedicated instruction in the wire
//! format, so they lower to `effect`-shaped instructions naming the
//! primitive instead — the async runtime (`weft-rt`) interprets those
//! three effect names directly during CFG execution rather than the
//! expression evaluator running them.

use crate::doc::{
    Block, BlockId, ChannelOpKind as DocChannelOpKind, Document, Instruction, Literal, Node, Terminator, VarId,
};
use crate::error::WeftError;
use crate::expr::Expr;
use crate::value::ChannelVariant;
use compact_str::format_compact;
use indexmap::IndexMap;

/// Produces the LIR document for `doc`. If `doc.result` is already a
/// `BlockNode`, this is a no-op clone (lowering is idempotent on LIR
/// input). Missing node ids referenced from the expression tree raise a
/// validation error here rather than at evaluation time.
pub fn lower(doc: &Document) -> Result<Document, WeftError> {
    let Some(result_node) = doc.node(&doc.result) else {
        return Err(WeftError::MissingResult(doc.result.clone()));
    };
    let expr = match result_node {
        Node::BlockNode { .. } => return Ok(doc.clone()),
        Node::ExprNode { expr, .. } => expr.clone(),
    };
    crate::validate::validate(doc)?;

    let mut b = Builder::new();
    let entry = b.fresh_block();
    let exit = b.fresh_block();
    let out = b.fresh_var();
    b.lower_expr(&expr, entry.clone(), &out, exit.clone());
    b.block(exit, vec![], Terminator::Return { value_id: Some(out) });

    let mut nodes = doc.nodes.clone();
    for (id, node) in b.extra_nodes {
        nodes.insert(id, node);
    }
    nodes.insert(
        doc.result.clone(),
        Node::BlockNode { id: doc.result.clone(), typ: None, blocks: b.blocks, entry },
    );

    Ok(Document {
        version: doc.version,
        capabilities: doc.capabilities,
        function_sigs: doc.function_sigs.clone(),
        air_defs: doc.air_defs.clone(),
        nodes,
        result: doc.result.clone(),
    })
}

struct Builder {
    blocks: IndexMap<BlockId, Block>,
    counter: u64,
    extra_nodes: Vec<(crate::doc::NodeId, Node)>,
}

impl Builder {
    fn new() -> Self {
        Self { blocks: IndexMap::new(), counter: 0, extra_nodes: Vec::new() }
    }

    fn fresh_block(&mut self) -> BlockId {
        let id: BlockId = format_compact!("bb{}", self.counter).into();
        self.counter += 1;
        id
    }

    fn fresh_var(&mut self) -> VarId {
        let id: VarId = format_compact!("__t{}", self.counter).into();
        self.counter += 1;
        id
    }

    fn fresh_node_id(&mut self) -> crate::doc::NodeId {
        let id: crate::doc::NodeId = format_compact!("__par{}", self.counter).into();
        self.counter += 1;
        id
    }

    fn block(&mut self, id: BlockId, instructions: Vec<Instruction>, terminator: Terminator) {
        self.blocks.insert(id.clone(), Block { id, instructions, terminator });
    }

    /// Lowers `expr` starting at block `entry`, arranging for its value
    /// to end up bound to `out` by the time control reaches `cont`.
    fn lower_expr(&mut self, expr: &Expr, entry: BlockId, out: &VarId, cont: BlockId) {
        match expr {
            // Simple, single-instruction forms: the tree evaluator already
            // implements these (including nested sub-expressions) in one
            // call, so lowering just wraps the whole subtree in an
            // `assign` instruction rather than decomposing it further.
            Expr::Lit(_)
            | Expr::Ref { .. }
            | Expr::Var { .. }
            | Expr::Call { .. }
            | Expr::Lambda { .. }
            | Expr::CallExpr { .. }
            | Expr::Fix { .. }
            | Expr::AirRef { .. }
            | Expr::RefCell { .. }
            | Expr::Deref { .. } => {
                self.block(
                    entry,
                    vec![Instruction::Assign { target: out.clone(), expr: expr.clone() }],
                    Terminator::Jump { to: cont },
                );
            }

            Expr::If { cond, then, else_ } => {
                let cond_var = self.fresh_var();
                let then_block = self.fresh_block();
                let else_block = self.fresh_block();
                self.block(
                    entry,
                    vec![Instruction::Assign { target: cond_var.clone(), expr: (**cond).clone() }],
                    Terminator::Branch { cond: cond_var, then: then_block.clone(), else_: else_block.clone() },
                );
                self.lower_expr(then, then_block, out, cont.clone());
                self.lower_expr(else_, else_block, out, cont);
            }

            Expr::Let { name, value, body } => {
                let mid = self.fresh_block();
                self.block(
                    entry,
                    vec![Instruction::Assign { target: name.clone(), expr: (**value).clone() }],
                    Terminator::Jump { to: mid.clone() },
                );
                self.lower_expr(body, mid, out, cont);
            }

            Expr::Seq { first, then } => {
                let mid = self.fresh_block();
                let discard = self.fresh_var();
                self.lower_expr(first, entry, &discard, mid.clone());
                self.lower_expr(then, mid, out, cont);
            }

            // `assign` mutates an existing ref cell in place (EIR's only
            // form of mutation); `assignRef` is the LIR instruction that
            // does the same, identified by the cell's name rather than a
            // bound var holding a `Value::RefCell` handle.
            Expr::Assign { target, value } => {
                let val_var = self.fresh_var();
                let mid = self.fresh_block();
                self.lower_expr(value, entry, &val_var, mid.clone());
                self.block(
                    mid,
                    vec![
                        Instruction::AssignRef { target: target.clone(), value_id: val_var },
                        Instruction::Assign { target: out.clone(), expr: Expr::Lit(Literal::Void) },
                    ],
                    Terminator::Jump { to: cont },
                );
            }

            // while: current -> header; header: branch(cond, body, exit); body -> header
            Expr::While { cond, body } => self.lower_loop(cond, body, entry, out, cont),
            // iter approximated as a conditional loop.
            Expr::Iter { cond, body } => self.lower_loop(cond, body, entry, out, cont),

            // for: init -> header; header: branch(cond, body, exit); body -> update -> header
            Expr::For { init, cond, update, body } => {
                let header = self.fresh_block();
                let body_block = self.fresh_block();
                let update_block = self.fresh_block();
                let exit_block = self.fresh_block();
                let init_discard = self.fresh_var();
                self.lower_expr(init, entry, &init_discard, header.clone());

                let cond_var = self.fresh_var();
                self.block(
                    header.clone(),
                    vec![Instruction::Assign { target: cond_var.clone(), expr: (**cond).clone() }],
                    Terminator::Branch { cond: cond_var, then: body_block.clone(), else_: exit_block.clone() },
                );
                let body_discard = self.fresh_var();
                self.lower_expr(body, body_block, &body_discard, update_block.clone());
                let update_discard = self.fresh_var();
                self.lower_expr(update, update_block, &update_discard, header);
                self.block(
                    exit_block,
                    vec![Instruction::Assign { target: out.clone(), expr: Expr::Lit(Literal::Void) }],
                    Terminator::Jump { to: cont },
                );
            }

            Expr::Effect { op, args } => {
                let arg_vars = self.lower_args(args, entry.clone());
                let last = arg_vars.last_block;
                self.block(
                    last,
                    vec![Instruction::Effect { target: Some(out.clone()), op: op.clone(), arg_ids: arg_vars.vars }],
                    Terminator::Jump { to: cont },
                );
            }

            // Conservative single-branch encoding: evaluate tryBody,
            // branch on whether the result
            // is an error, run catchBody (with catchParam rebound) on
            // that path, falling back to `fallback` only if catchBody
            // itself errors.
            Expr::Try { try_body, catch_param, catch_body, fallback } => {
                let try_var = self.fresh_var();
                let mid = self.fresh_block();
                self.lower_expr(try_body, entry, &try_var, mid.clone());

                let is_err_var = self.fresh_var();
                let catch_block = self.fresh_block();
                let ok_block = self.fresh_block();
                self.block(
                    mid,
                    vec![Instruction::Op {
                        target: is_err_var.clone(),
                        ns: "core".into(),
                        name: "isError".into(),
                        arg_ids: vec![try_var.clone()],
                    }],
                    Terminator::Branch { cond: is_err_var, then: catch_block.clone(), else_: ok_block.clone() },
                );
                self.block(
                    ok_block,
                    vec![Instruction::Assign { target: out.clone(), expr: Expr::Var { name: try_var.clone() } }],
                    Terminator::Jump { to: cont.clone() },
                );

                let catch_body_block = self.fresh_block();
                self.block(
                    catch_block,
                    vec![Instruction::Assign { target: catch_param.clone(), expr: Expr::Var { name: try_var } }],
                    Terminator::Jump { to: catch_body_block.clone() },
                );

                match fallback {
                    None => {
                        self.lower_expr(catch_body, catch_body_block, out, cont);
                    }
                    Some(fb) => {
                        let catch_result = self.fresh_var();
                        let after_catch = self.fresh_block();
                        self.lower_expr(catch_body, catch_body_block, &catch_result, after_catch.clone());

                        let catch_is_err = self.fresh_var();
                        let fallback_block = self.fresh_block();
                        let straight_block = self.fresh_block();
                        self.block(
                            after_catch,
                            vec![Instruction::Op {
                                target: catch_is_err.clone(),
                                ns: "core".into(),
                                name: "isError".into(),
                                arg_ids: vec![catch_result.clone()],
                            }],
                            Terminator::Branch {
                                cond: catch_is_err,
                                then: fallback_block.clone(),
                                else_: straight_block.clone(),
                            },
                        );
                        self.block(
                            straight_block,
                            vec![Instruction::Assign { target: out.clone(), expr: Expr::Var { name: catch_result } }],
                            Terminator::Jump { to: cont.clone() },
                        );
                        self.lower_expr(fb, fallback_block, out, cont);
                    }
                }
            }

            Expr::Spawn { entry: entry_node, args } => {
                let arg_vars = self.lower_args(args, entry.clone());
                self.block(
                    arg_vars.last_block,
                    vec![Instruction::Spawn { target: out.clone(), entry_id: entry_node.clone(), arg_ids: arg_vars.vars }],
                    Terminator::Jump { to: cont },
                );
            }

            Expr::Await { future } => {
                let future_var = self.fresh_var();
                let mid = self.fresh_block();
                self.lower_expr(future, entry, &future_var, mid.clone());
                self.block(
                    mid,
                    vec![Instruction::Await { target: out.clone(), future_id: future_var }],
                    Terminator::Jump { to: cont },
                );
            }

            // par: lowered to spawn-each (as synthetic nodes) + join-all,
            // producing a list of each branch's result in order. This
            // encoding choice is recorded in DESIGN.md.
            Expr::Par { branches } => {
                let mut cur = entry;
                let mut future_vars = Vec::new();
                for branch in branches {
                    let node_id = self.fresh_node_id();
                    self.extra_nodes.push((
                        node_id.clone(),
                        Node::ExprNode { id: node_id.clone(), typ: None, expr: branch.clone() },
                    ));
                    let future_var = self.fresh_var();
                    let next = self.fresh_block();
                    self.block(
                        cur,
                        vec![Instruction::Spawn { target: future_var.clone(), entry_id: node_id, arg_ids: vec![] }],
                        Terminator::Jump { to: next.clone() },
                    );
                    future_vars.push(future_var);
                    cur = next;
                }
                let join_to = self.fresh_block();
                let mut ref_cells = Vec::new();
                let mut results = Vec::new();
                for (i, v) in future_vars.iter().enumerate() {
                    let cell = format_compact!("__par_ref{}", i);
                    results.push(crate::doc::JoinResult { task: v.clone(), ref_cell: cell.clone() });
                    ref_cells.push(cell);
                }
                self.block(cur, vec![], Terminator::Join { tasks: future_vars, results, to: join_to.clone() });

                let list_expr = ref_cells.iter().fold(
                    Expr::Call { ns: "core".into(), name: "emptyList".into(), args: vec![] },
                    |acc, cell| Expr::Call {
                        ns: "core".into(),
                        name: "push".into(),
                        args: vec![acc, Expr::Deref { target: cell.clone() }],
                    },
                );
                self.block(
                    join_to,
                    vec![Instruction::Assign { target: out.clone(), expr: list_expr }],
                    Terminator::Jump { to: cont },
                );
            }

            Expr::Channel { variant, buffer_size } => {
                let variant_str = match variant {
                    ChannelVariant::Mpsc => "mpsc",
                    ChannelVariant::Spsc => "spsc",
                    ChannelVariant::Mpmc => "mpmc",
                    ChannelVariant::Broadcast => "broadcast",
                };
                let variant_var = self.fresh_var();
                let buf_var = self.fresh_var();
                self.block(
                    entry,
                    vec![
                        Instruction::Assign {
                            target: variant_var.clone(),
                            expr: Expr::Lit(Literal::String(variant_str.to_string())),
                        },
                        Instruction::Assign {
                            target: buf_var.clone(),
                            expr: Expr::Lit(Literal::Int(*buffer_size)),
                        },
                        Instruction::Effect {
                            target: Some(out.clone()),
                            op: "channel".into(),
                            arg_ids: vec![variant_var, buf_var],
                        },
                    ],
                    Terminator::Jump { to: cont },
                );
            }

            // Send/Recv/ChannelOp lower to the dedicated `channelOp` LIR
            // instruction, not a generic `effect` — the CFG
            // evaluator dispatches it straight to the async host (see
            // `weft-core::cfg`'s `Instruction::ChannelOp` arm), the same
            // seam `spawn`/`await` use.
            Expr::Send { channel, value } => {
                let chan_var = self.fresh_var();
                let mid = self.fresh_block();
                self.lower_expr(channel, entry, &chan_var, mid.clone());
                let val_var = self.fresh_var();
                let mid2 = self.fresh_block();
                self.lower_expr(value, mid, &val_var, mid2.clone());
                self.block(
                    mid2,
                    vec![Instruction::ChannelOp {
                        op: DocChannelOpKind::Send,
                        target: Some(out.clone()),
                        channel: chan_var,
                        value_id: Some(val_var),
                    }],
                    Terminator::Jump { to: cont },
                );
            }

            Expr::Recv { channel } => {
                let chan_var = self.fresh_var();
                let mid = self.fresh_block();
                self.lower_expr(channel, entry, &chan_var, mid.clone());
                self.block(
                    mid,
                    vec![Instruction::ChannelOp {
                        op: DocChannelOpKind::Recv,
                        target: Some(out.clone()),
                        channel: chan_var,
                        value_id: None,
                    }],
                    Terminator::Jump { to: cont },
                );
            }

            Expr::ChannelOp { op, channel, value } => {
                let chan_var = self.fresh_var();
                let mid = self.fresh_block();
                self.lower_expr(channel, entry, &chan_var, mid.clone());
                match value {
                    None => {
                        self.block(
                            mid,
                            vec![Instruction::ChannelOp {
                                op: *op,
                                target: Some(out.clone()),
                                channel: chan_var,
                                value_id: None,
                            }],
                            Terminator::Jump { to: cont },
                        );
                    }
                    Some(v) => {
                        let val_var = self.fresh_var();
                        let mid2 = self.fresh_block();
                        self.lower_expr(v, mid, &val_var, mid2.clone());
                        self.block(
                            mid2,
                            vec![Instruction::ChannelOp {
                                op: *op,
                                target: Some(out.clone()),
                                channel: chan_var,
                                value_id: Some(val_var),
                            }],
                            Terminator::Jump { to: cont },
                        );
                    }
                }
            }

            // select{futures,timeout?,fallback?,returnIndex}: the effect
            // call itself returns either the winning value/selectResult
            // or error(SelectTimeout); a branch on that error intercepts
            // it to run `fallback` lazily, only on an actual timeout
            // rather than evaluating it eagerly.
            Expr::Select { futures, timeout, fallback, return_index } => {
                let ri_var = self.fresh_var();
                let timeout_var = self.fresh_var();
                let mut cur = entry;
                let mut next = self.fresh_block();
                self.block(
                    cur,
                    vec![
                        Instruction::Assign { target: ri_var.clone(), expr: Expr::Lit(Literal::Bool(*return_index)) },
                        Instruction::Assign {
                            target: timeout_var.clone(),
                            expr: Expr::Lit(Literal::Int(timeout.unwrap_or(-1))),
                        },
                    ],
                    Terminator::Jump { to: next.clone() },
                );
                cur = next;
                let mut future_vars = vec![ri_var, timeout_var];
                for f in futures {
                    let v = self.fresh_var();
                    next = self.fresh_block();
                    self.lower_expr(f, cur, &v, next.clone());
                    future_vars.push(v);
                    cur = next;
                }
                let sel_var = self.fresh_var();
                let after = self.fresh_block();
                self.block(
                    cur,
                    vec![Instruction::Effect { target: Some(sel_var.clone()), op: "select".into(), arg_ids: future_vars }],
                    Terminator::Jump { to: after.clone() },
                );

                match fallback {
                    None => {
                        self.block(
                            after,
                            vec![Instruction::Assign { target: out.clone(), expr: Expr::Var { name: sel_var } }],
                            Terminator::Jump { to: cont },
                        );
                    }
                    Some(fb) => {
                        let timed_out_var = self.fresh_var();
                        let fb_block = self.fresh_block();
                        let straight_block = self.fresh_block();
                        self.block(
                            after,
                            vec![Instruction::Op {
                                target: timed_out_var.clone(),
                                ns: "core".into(),
                                name: "isSelectTimeout".into(),
                                arg_ids: vec![sel_var.clone()],
                            }],
                            Terminator::Branch { cond: timed_out_var, then: fb_block.clone(), else_: straight_block.clone() },
                        );
                        self.block(
                            straight_block,
                            vec![Instruction::Assign { target: out.clone(), expr: Expr::Var { name: sel_var } }],
                            Terminator::Jump { to: cont.clone() },
                        );
                        self.lower_expr(fb, fb_block, out, cont);
                    }
                }
            }

            Expr::Race { tasks } => {
                let arg_vars = self.lower_args(tasks, entry);
                self.block(
                    arg_vars.last_block,
                    vec![Instruction::Effect { target: Some(out.clone()), op: "race".into(), arg_ids: arg_vars.vars }],
                    Terminator::Jump { to: cont },
                );
            }
        }
    }

    /// `while(cond, body)` and `iter(cond, body)`: `current -> header;
    /// header: branch(cond, body, exit); body -> header`. Both evaluate
    /// to `void`.
    fn lower_loop(&mut self, cond: &Expr, body: &Expr, entry: BlockId, out: &VarId, cont: BlockId) {
        let header = self.fresh_block();
        let body_block = self.fresh_block();
        let exit_block = self.fresh_block();
        self.block(entry, vec![], Terminator::Jump { to: header.clone() });

        let cond_var = self.fresh_var();
        self.block(
            header.clone(),
            vec![Instruction::Assign { target: cond_var.clone(), expr: cond.clone() }],
            Terminator::Branch { cond: cond_var, then: body_block.clone(), else_: exit_block.clone() },
        );
        let body_discard = self.fresh_var();
        self.lower_expr(body, body_block, &body_discard, header);
        self.block(
            exit_block,
            vec![Instruction::Assign { target: out.clone(), expr: Expr::Lit(Literal::Void) }],
            Terminator::Jump { to: cont },
        );
    }

    /// Lowers a list of argument expressions in sequence, each into its
    /// own fresh var, chaining blocks; returns the resolved var ids and
    /// the block id control has reached once all are bound.
    fn lower_args(&mut self, args: &[Expr], entry: BlockId) -> LoweredArgs {
        let mut cur = entry;
        let mut vars = Vec::with_capacity(args.len());
        for a in args {
            let v = self.fresh_var();
            let next = self.fresh_block();
            self.lower_expr(a, cur, &v, next.clone());
            vars.push(v);
            cur = next;
        }
        LoweredArgs { vars, last_block: cur }
    }
}

struct LoweredArgs {
    vars: Vec<VarId>,
    last_block: BlockId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::{Literal, Version};
    use indexmap::IndexMap;

    fn doc_with_result(expr: Expr) -> Document {
        let mut nodes = IndexMap::new();
        nodes.insert("r".into(), Node::ExprNode { id: "r".into(), typ: None, expr });
        Document {
            version: Version { major: 1, minor: 0, patch: 0 },
            capabilities: None,
            function_sigs: IndexMap::new(),
            air_defs: IndexMap::new(),
            nodes,
            result: "r".into(),
        }
    }

    fn only_block(doc: &Document) -> (&IndexMap<BlockId, Block>, &BlockId) {
        match doc.node(&doc.result).unwrap() {
            Node::BlockNode { blocks, entry, .. } => (blocks, entry),
            _ => panic!("expected a BlockNode"),
        }
    }

    #[test]
    fn every_block_has_a_terminator_and_valid_jump_targets() {
        let doc = doc_with_result(Expr::If {
            cond: Box::new(Expr::Lit(Literal::Bool(true))),
            then: Box::new(Expr::Lit(Literal::Int(1))),
            else_: Box::new(Expr::Lit(Literal::Int(0))),
        });
        let lowered = lower(&doc).unwrap();
        let (blocks, _entry) = only_block(&lowered);
        for b in blocks.values() {
            match &b.terminator {
                Terminator::Jump { to } => assert!(blocks.contains_key(to)),
                Terminator::Branch { then, else_, .. } => {
                    assert!(blocks.contains_key(then));
                    assert!(blocks.contains_key(else_));
                }
                Terminator::Return { .. } | Terminator::Exit { .. } => {}
                Terminator::Fork { branches, continuation } => {
                    for br in branches {
                        assert!(blocks.contains_key(&br.block));
                    }
                    assert!(blocks.contains_key(continuation));
                }
                Terminator::Join { to, .. } => assert!(blocks.contains_key(to)),
                Terminator::Suspend { resume_block, .. } => assert!(blocks.contains_key(resume_block)),
            }
        }
    }

    #[test]
    fn terminal_block_returns_document_result() {
        let doc = doc_with_result(Expr::Lit(Literal::Int(42)));
        let lowered = lower(&doc).unwrap();
        let (blocks, entry) = only_block(&lowered);
        // Walk jumps from entry; the last block reached must `return`.
        let mut cur = entry.clone();
        let mut guard = 0;
        loop {
            guard += 1;
            assert!(guard < 100, "did not reach a return within a reasonable number of jumps");
            match &blocks[&cur].terminator {
                Terminator::Jump { to } => cur = to.clone(),
                Terminator::Return { value_id } => {
                    assert!(value_id.is_some());
                    break;
                }
                other => panic!("unexpected terminator on a straight-line literal: {other:?}"),
            }
        }
    }

    #[test]
    fn while_false_lowers_to_header_branching_straight_to_exit() {
        let doc = doc_with_result(Expr::While {
            cond: Box::new(Expr::Lit(Literal::Bool(false))),
            body: Box::new(Expr::Lit(Literal::Void)),
        });
        let lowered = lower(&doc).unwrap();
        let (blocks, entry) = only_block(&lowered);
        assert!(matches!(blocks[entry].terminator, Terminator::Jump { .. }));
    }

    #[test]
    fn already_lir_document_is_a_no_op() {
        let mut blocks = IndexMap::new();
        blocks.insert(
            "bb0".into(),
            Block { id: "bb0".into(), instructions: vec![], terminator: Terminator::Return { value_id: None } },
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
        let lowered = lower(&doc).unwrap();
        assert!(matches!(lowered.node("r"), Some(Node::BlockNode { .. })));
    }
}
