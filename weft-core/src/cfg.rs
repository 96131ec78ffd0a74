//! The CFG (LIR) evaluator — the main block-execution loop. Runs
//! instructions in order within the current block, then
//! dispatches the block's terminator to pick (or complete on) the next
//! block, tracking the `predecessor` block id that `phi` resolution
//! depends on and a step budget that guards against non-termination.
//!
//! This module alone only runs the *synchronous* subset of LIR
//! (assign/op/call/phi/effect/assignRef; jump/branch/return/exit).
//! `spawn`/`channelOp`/`await` instructions and `fork`/`join`/`suspend`
//! terminators (the PIR extension) need a scheduler to mean
//! anything — see [`AsyncHost`]. Without one (`host = None`), those
//! instructions/terminators resolve to `error(DomainError)` rather than
//! hanging or panicking.

use crate::doc::{
    Block, BlockId, ChannelOpKind, Document, ForkBranch, Instruction, Node, Terminator, VarId,
};
use crate::env::Env;
use crate::error::ErrorCode;
use crate::expr::eval::{self, EvalCtx};
use crate::registry;
use crate::value::Value;
use fxhash::FxHashMap;
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// A one-shot gate shared by every task spawned from a single `fork`
/// terminator and the parent that executed it: whichever
/// task's control flow reaches `block` (the fork's `continuation`)
/// first runs it; everyone else treats it as already done.
#[derive(Debug)]
pub struct ForkGuard {
    pub block: BlockId,
    pub executed: Cell<bool>,
}

/// Bookkeeping for a `fork` terminator that has already spawned its
/// branch tasks but is still waiting for them (and possibly a race
/// against them) to settle. Kept on [`CfgState`] so a `Blocked` retry
/// re-enters the same terminator without re-spawning.
pub struct PendingFork {
    pub tasks: Vec<Value>,
    pub guard: Rc<ForkGuard>,
}

/// The resumable state of one CFG execution (one task, in PIR terms).
/// Everything here is cheap to keep around across a `Blocked` retry.
pub struct CfgState {
    pub current: BlockId,
    pub predecessor: Option<BlockId>,
    pub cursor: usize,
    pub visited: FxHashMap<BlockId, u32>,
    pub steps: u64,
    /// Set by a scheduler on a task spawned as a fork branch; cleared
    /// the moment it is consumed (the continuation guard).
    pub guard: Option<Rc<ForkGuard>>,
    pub pending_fork: Option<PendingFork>,
}

impl CfgState {
    pub fn new(entry: BlockId) -> Self {
        Self {
            current: entry,
            predecessor: None,
            cursor: 0,
            visited: FxHashMap::default(),
            steps: 0,
            guard: None,
            pending_fork: None,
        }
    }
}

#[derive(Debug)]
pub enum StepOutcome {
    /// This CFG execution is finished; no more blocks to run.
    Done(Value),
    /// Waiting on something only the host can resolve (a channel, a
    /// future, a sibling task). Retry by calling [`run`] again with the
    /// same `state` once the host believes progress is possible.
    Blocked,
}

pub enum AwaitPoll {
    Ready(Value),
    Pending,
}

pub enum ChannelPoll {
    Ready(Value),
    Pending,
}

/// Outcome of polling a `select`.
pub enum SelectPoll {
    Ready(Value),
    TimedOut,
    Pending,
}

pub enum JoinPoll {
    Ready(Vec<Value>),
    Pending,
}

/// The seam between the synchronous CFG loop and an async runtime,
/// implemented by `weft-rt`. Every method here is expected to be
/// non-blocking in the OS sense —
/// cooperative scheduling means a host either has an answer right now
/// or reports `Pending` and expects to be asked again later.
pub trait AsyncHost {
    /// Spawns a task running `entry` with `args` bound into its initial
    /// environment; always returns immediately with a `future` handle
    /// that `spawn` binds to its target.
    fn spawn(&mut self, entry: &str, args: Vec<Value>) -> Value;

    fn channel_op(&mut self, op: ChannelOpKind, channel: &Value, value: Option<Value>) -> ChannelPoll;

    fn poll_future(&mut self, future: &Value) -> AwaitPoll;

    /// Spawns one task per branch, attaching `guard` to each so that
    /// whichever of them (or the parent, via the `fork` terminator
    /// itself) reaches `guard.block` first is the one that runs it.
    fn spawn_fork_branches(&mut self, branches: &[ForkBranch], guard: &Rc<ForkGuard>) -> Vec<Value>;

    fn poll_join(&mut self, tasks: &[Value]) -> JoinPoll;

    /// `channel{variant,bufferSize}` (an expression form lowered to an
    /// effect-shaped instruction naming the `channel`
    /// primitive): always completes immediately with a fresh
    /// `Value::Channel` handle, so this returns a `Value` directly
    /// rather than a poll outcome.
    fn create_channel(&mut self, variant: crate::value::ChannelVariant, buffer_size: i64) -> Value;

    /// `select{futures,timeout?,returnIndex?}`: races the
    /// given futures, optionally against a millisecond deadline.
    fn poll_select(&mut self, futures: &[Value], timeout_ms: Option<i64>, return_index: bool) -> SelectPoll;

    /// `race{tasks}`: the first of `tasks` to produce a
    /// value wins; there is no timeout.
    fn poll_race(&mut self, tasks: &[Value]) -> AwaitPoll;

    /// Scheduler bookkeeping: `currentTaskId`, alongside
    /// `activeTaskCount`/`globalSteps`, exposed to a running
    /// document as a zero-arg effect (handled here rather than through
    /// [`registry::EffectRegistry`], since only the host knows whose
    /// turn it is) so a task can label its own race-detector accesses
    /// without already knowing its dynamically minted id. `None` outside
    /// any task (there is no synchronous-evaluator equivalent).
    fn current_task_id(&self) -> Option<compact_str::CompactString>;

    /// Number of tasks the host still considers live (spawned, not yet
    /// `Done`) — the `activeTaskCount` scheduler primitive from spec.md
    /// §4.5.
    fn active_task_count(&self) -> usize;

    /// Cumulative step count across every task this host has ever
    /// stepped, as of the last [`Self::record_global_step`] call.
    fn global_steps(&self) -> u64;

    /// Bumps the cross-task step counter by one and returns the new
    /// total. Called once per block transition from [`run`] (the same
    /// granularity [`CfgState::steps`] uses per-task) so that a document
    /// which keeps every individual task under `maxSteps` but spawns
    /// unboundedly many of them still trips the global half of the step
    /// budget spec.md §5 requires.
    fn record_global_step(&mut self) -> u64;
}

fn parse_channel_variant(s: &str) -> Option<crate::value::ChannelVariant> {
    use crate::value::ChannelVariant::*;
    match s {
        "mpsc" => Some(Mpsc),
        "spsc" => Some(Spsc),
        "mpmc" => Some(Mpmc),
        "broadcast" => Some(Broadcast),
        _ => None,
    }
}

fn bind_opt(env: &mut Env, target: &Option<VarId>, v: Value) {
    if let Some(t) = target {
        env.set(t.clone(), v);
    }
}

fn resolve_args(env: &Env, arg_ids: &[VarId]) -> Vec<Value> {
    arg_ids
        .iter()
        .map(|id| env.get(id).cloned().unwrap_or_else(|| Value::error(ErrorCode::UnboundIdentifier, id.to_string())))
        .collect()
}

/// `phi{sources}`: picks the source whose `block` equals
/// the current predecessor, first match in source order; if none match,
/// falls back to the first source with a bound, non-error value.
fn resolve_phi(env: &Env, predecessor: &Option<BlockId>, sources: &[crate::doc::PhiSource]) -> Value {
    if let Some(pred) = predecessor {
        if let Some(src) = sources.iter().find(|s| &s.block == pred) {
            if let Some(v) = env.get(&src.id) {
                return v.clone();
            }
        }
    }
    for src in sources {
        if let Some(v) = env.get(&src.id) {
            if !v.is_error() {
                return v.clone();
            }
        }
    }
    Value::error(ErrorCode::DomainError, "phi: no matching or fallback source")
}

/// Runs `state` forward through `blocks` until it completes or blocks
/// on the host. `host = None` makes every PIR construct resolve to a
/// defined error instead of attempting anything (see module docs).
pub fn run(
    blocks: &IndexMap<BlockId, Block>,
    state: &mut CfgState,
    env: &mut Env,
    ctx: &mut EvalCtx,
    mut host: Option<&mut dyn AsyncHost>,
    max_steps: u64,
) -> StepOutcome {
    loop {
        if let Some(g) = &state.guard {
            if state.current == g.block {
                if g.executed.replace(true) {
                    return StepOutcome::Done(Value::Void);
                }
                state.guard = None;
            }
        }

        let already_visited = state.visited.contains_key(&state.current);
        if already_visited {
            state.steps += 1;
            log::debug!(target: "weft_core::cfg", "revisiting block {} (steps={})", state.current, state.steps);
            if state.steps > max_steps {
                return StepOutcome::Done(Value::error(ErrorCode::NonTermination, "step budget exceeded"));
            }
        } else {
            state.visited.insert(state.current.clone(), 1);
            log::debug!(target: "weft_core::cfg", "entering block {}", state.current);
        }

        // The global half of the step budget: a host tracks this across
        // every task it steps, so unboundedly many short-lived tasks
        // (each individually under `max_steps`) still trip
        // `NonTermination` even though no single task's local `steps`
        // ever gets close. No host (the synchronous, single-task path)
        // means there is only ever one task, which the per-task check
        // above already bounds.
        if let Some(h) = host.as_deref_mut() {
            let global = h.record_global_step();
            if global > max_steps {
                return StepOutcome::Done(Value::error(ErrorCode::NonTermination, "global step budget exceeded"));
            }
        }

        let Some(block) = blocks.get(&state.current) else {
            return StepOutcome::Done(Value::error(
                ErrorCode::DomainError,
                format!("block {} not found", state.current),
            ));
        };

        while state.cursor < block.instructions.len() {
            let instr = &block.instructions[state.cursor];
            match instr {
                Instruction::Assign { target, expr } => {
                    let v = eval::eval(expr, env, ctx);
                    env.set(target.clone(), v);
                }
                Instruction::Op { target, ns, name, arg_ids } => {
                    let args = resolve_args(env, arg_ids);
                    let v = match Value::first_error(&args) {
                        Some(e) => e,
                        None => registry::invoke_operator(ctx.operators, ns, name, &args),
                    };
                    env.set(target.clone(), v);
                }
                Instruction::Call { target, .. } => {
                    // The calling convention for a `call`
                    // instruction invoking a lowered first-class function
                    // is not specified; callers see a defined error
                    // rather than a panic.
                    env.set(
                        target.clone(),
                        Value::error(ErrorCode::DomainError, "call instruction has no defined calling convention"),
                    );
                }
                Instruction::Phi { target, sources } => {
                    let v = resolve_phi(env, &state.predecessor, sources);
                    env.set(target.clone(), v);
                }
                Instruction::Effect { target, op, arg_ids } => {
                    let args = resolve_args(env, arg_ids);
                    if let Some(e) = Value::first_error(&args) {
                        bind_opt(env, target, e);
                        state.cursor += 1;
                        continue;
                    }
                    // `channel`/`select`/`race` are the three async
                    // primitives that lower to an
                    // effect-shaped instruction whose op names the
                    // primitive; the async runtime interprets those
                    // effect names directly during CFG execution" —
                    // handled here by the host rather than the generic
                    // operator/effect registry, since only the host
                    // knows how to race/time-out futures or mint a
                    // fresh channel id.
                    match (op.as_str(), host.as_deref_mut()) {
                        ("channel", Some(h)) => {
                            let variant = args.first().and_then(|v| match v {
                                Value::String(s) => parse_channel_variant(s),
                                _ => None,
                            });
                            let buf = args.get(1).and_then(|v| v.as_int());
                            let v = match (variant, buf) {
                                (Some(variant), Some(buf)) => h.create_channel(variant, buf),
                                _ => Value::error(ErrorCode::TypeError, "channel expects (variant, bufferSize)"),
                            };
                            bind_opt(env, target, v);
                        }
                        ("select", Some(h)) => {
                            let return_index = matches!(args.first(), Some(Value::Bool(true)));
                            let timeout = match args.get(1).and_then(|v| v.as_int()) {
                                Some(-1) | None => None,
                                Some(ms) => Some(ms),
                            };
                            let futures = args.get(2..).unwrap_or(&[]);
                            match h.poll_select(futures, timeout, return_index) {
                                SelectPoll::Ready(v) => bind_opt(env, target, v),
                                SelectPoll::TimedOut => {
                                    bind_opt(env, target, Value::error(ErrorCode::SelectTimeout, "select timed out"))
                                }
                                SelectPoll::Pending => return StepOutcome::Blocked,
                            }
                        }
                        ("race", Some(h)) => match h.poll_race(&args) {
                            AwaitPoll::Ready(v) => bind_opt(env, target, v),
                            AwaitPoll::Pending => return StepOutcome::Blocked,
                        },
                        ("currentTaskId", Some(h)) => {
                            let v = match h.current_task_id() {
                                Some(id) => Value::String(arcstr::ArcStr::from(id.as_str())),
                                None => Value::error(ErrorCode::DomainError, "no current task"),
                            };
                            bind_opt(env, target, v);
                        }
                        ("activeTaskCount", Some(h)) => {
                            bind_opt(env, target, Value::Int(h.active_task_count() as i64));
                        }
                        ("globalSteps", Some(h)) => {
                            bind_opt(env, target, Value::Int(h.global_steps() as i64));
                        }
                        _ => {
                            let v = registry::invoke_effect(ctx.effects, op, &args, ctx.effect_log);
                            bind_opt(env, target, v);
                        }
                    }
                }
                Instruction::AssignRef { target, value_id } => {
                    let v = env
                        .get(value_id)
                        .cloned()
                        .unwrap_or_else(|| Value::error(ErrorCode::UnboundIdentifier, value_id.to_string()));
                    match ctx.ref_cells.get(target) {
                        Some(cell) => *cell.borrow_mut() = v,
                        None => {
                            ctx.ref_cells.insert(target.clone(), Rc::new(RefCell::new(v)));
                        }
                    }
                }
                Instruction::Spawn { target, entry_id, arg_ids } => {
                    let args = resolve_args(env, arg_ids);
                    if let Some(e) = Value::first_error(&args) {
                        env.set(target.clone(), e);
                    } else if let Some(host) = host.as_deref_mut() {
                        let fut = host.spawn(entry_id, args);
                        env.set(target.clone(), fut);
                    } else {
                        env.set(target.clone(), Value::error(ErrorCode::DomainError, "spawn requires an async runtime"));
                    }
                }
                Instruction::ChannelOp { op, target, channel, value_id } => {
                    let chan = env.get(channel).cloned();
                    let val = match value_id {
                        Some(id) => match env.get(id) {
                            Some(v) => Some(v.clone()),
                            None => {
                                bind_opt(env, target, Value::error(ErrorCode::UnboundIdentifier, id.to_string()));
                                state.cursor += 1;
                                continue;
                            }
                        },
                        None => None,
                    };
                    let Some(chan) = chan else {
                        bind_opt(env, target, Value::error(ErrorCode::UnboundIdentifier, channel.to_string()));
                        state.cursor += 1;
                        continue;
                    };
                    let Some(host) = host.as_deref_mut() else {
                        bind_opt(env, target, Value::error(ErrorCode::DomainError, "channel ops require an async runtime"));
                        state.cursor += 1;
                        continue;
                    };
                    match host.channel_op(*op, &chan, val) {
                        ChannelPoll::Ready(v) => bind_opt(env, target, v),
                        ChannelPoll::Pending => return StepOutcome::Blocked,
                    }
                }
                Instruction::Await { target, future_id } => {
                    let Some(fut) = env.get(future_id).cloned() else {
                        env.set(target.clone(), Value::error(ErrorCode::UnboundIdentifier, future_id.to_string()));
                        state.cursor += 1;
                        continue;
                    };
                    if !matches!(fut, Value::Future { .. }) {
                        env.set(target.clone(), Value::error(ErrorCode::TypeError, "await expects a future"));
                        state.cursor += 1;
                        continue;
                    }
                    let Some(host) = host.as_deref_mut() else {
                        env.set(target.clone(), Value::error(ErrorCode::DomainError, "await requires an async runtime"));
                        state.cursor += 1;
                        continue;
                    };
                    match host.poll_future(&fut) {
                        AwaitPoll::Ready(v) => env.set(target.clone(), v),
                        AwaitPoll::Pending => return StepOutcome::Blocked,
                    }
                }
            }
            state.cursor += 1;
        }

        match &block.terminator {
            Terminator::Jump { to } => advance(state, to.clone()),
            Terminator::Branch { cond, then, else_ } => match env.get(cond) {
                Some(Value::Bool(true)) => advance(state, then.clone()),
                Some(Value::Bool(false)) => advance(state, else_.clone()),
                Some(e @ Value::Error(_)) => return StepOutcome::Done(e.clone()),
                Some(_) => return StepOutcome::Done(Value::error(ErrorCode::TypeError, "branch condition must be bool")),
                None => return StepOutcome::Done(Value::error(ErrorCode::UnboundIdentifier, cond.to_string())),
            },
            Terminator::Return { value_id } => {
                let v = match value_id {
                    Some(id) => env
                        .get(id)
                        .cloned()
                        .unwrap_or_else(|| Value::error(ErrorCode::UnboundIdentifier, id.to_string())),
                    None => Value::Void,
                };
                return StepOutcome::Done(v);
            }
            Terminator::Exit { code } => {
                let v = match code {
                    Some(id) => env.get(id).cloned().unwrap_or(Value::Void),
                    None => Value::Void,
                };
                return StepOutcome::Done(v);
            }
            Terminator::Fork { branches, continuation } => {
                let Some(host) = host.as_deref_mut() else {
                    return StepOutcome::Done(Value::error(ErrorCode::DomainError, "fork requires an async runtime"));
                };
                if state.pending_fork.is_none() {
                    let guard = Rc::new(ForkGuard { block: continuation.clone(), executed: Cell::new(false) });
                    let tasks = host.spawn_fork_branches(branches, &guard);
                    state.pending_fork = Some(PendingFork { tasks, guard });
                }
                let pending = state.pending_fork.as_ref().unwrap();
                match host.poll_join(&pending.tasks) {
                    JoinPoll::Pending => return StepOutcome::Blocked,
                    JoinPoll::Ready(_) => {
                        let guard = state.pending_fork.take().unwrap().guard;
                        if guard.executed.replace(true) {
                            return StepOutcome::Done(Value::Void);
                        }
                        advance(state, continuation.clone());
                    }
                }
            }
            Terminator::Join { tasks, results, to } => {
                let Some(host) = host.as_deref_mut() else {
                    return StepOutcome::Done(Value::error(ErrorCode::DomainError, "join requires an async runtime"));
                };
                let resolved: Vec<Value> = tasks
                    .iter()
                    .map(|id| env.get(id).cloned().unwrap_or(Value::error(ErrorCode::UnboundIdentifier, id.to_string())))
                    .collect();
                match host.poll_join(&resolved) {
                    JoinPoll::Pending => return StepOutcome::Blocked,
                    JoinPoll::Ready(values) => {
                        for jr in results {
                            if let Some(idx) = tasks.iter().position(|t| t == &jr.task) {
                                if let Some(v) = values.get(idx) {
                                    match ctx.ref_cells.get(&jr.ref_cell) {
                                        Some(cell) => *cell.borrow_mut() = v.clone(),
                                        None => {
                                            ctx.ref_cells.insert(jr.ref_cell.clone(), Rc::new(RefCell::new(v.clone())));
                                        }
                                    }
                                }
                            }
                        }
                        advance(state, to.clone());
                    }
                }
            }
            Terminator::Suspend { future, resume_block } => {
                let Some(fut) = env.get(future).cloned() else {
                    return StepOutcome::Done(Value::error(ErrorCode::UnboundIdentifier, future.to_string()));
                };
                let Some(host) = host.as_deref_mut() else {
                    return StepOutcome::Done(Value::error(ErrorCode::DomainError, "suspend requires an async runtime"));
                };
                match host.poll_future(&fut) {
                    AwaitPoll::Pending => return StepOutcome::Blocked,
                    AwaitPoll::Ready(_) => advance(state, resume_block.clone()),
                }
            }
        }
    }
}

fn advance(state: &mut CfgState, to: BlockId) {
    state.predecessor = Some(state.current.clone());
    state.current = to;
    state.cursor = 0;
}

/// Drives a single-block-node LIR document (or any standalone CFG)
/// without an async host — every PIR instruction/terminator resolves to
/// `error(DomainError)` instead of blocking forever.
pub fn execute_sync(blocks: &IndexMap<BlockId, Block>, entry: BlockId, env: &mut Env, ctx: &mut EvalCtx, max_steps: u64) -> Value {
    let mut state = CfgState::new(entry);
    match run(blocks, &mut state, env, ctx, None, max_steps) {
        StepOutcome::Done(v) => v,
        StepOutcome::Blocked => Value::error(ErrorCode::DomainError, "PIR instruction requires an async runtime"),
    }
}

/// Looks up a block node by id in `doc`, for callers (the orchestrator,
/// `spawn`'s entry resolution in `weft-rt`) that only have a `Document`
/// and a node id.
pub fn block_node<'a>(doc: &'a Document, id: &str) -> Option<(&'a IndexMap<BlockId, Block>, BlockId)> {
    match doc.node(id)? {
        Node::BlockNode { blocks, entry, .. } => Some((blocks, entry.clone())),
        Node::ExprNode { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::{Literal, PhiSource};
    use crate::env::RefCellStore;
    use crate::expr::Expr;
    use crate::registry::{BuiltinRegistry, NullEffectRegistry};
    use crate::value::Value;

    fn ctx<'a>(
        doc: &'a Document,
        ops: &'a BuiltinRegistry,
        fx: &'a NullEffectRegistry,
        log: &'a mut Vec<crate::registry::EffectRecord>,
        cells: &'a mut RefCellStore,
    ) -> EvalCtx<'a> {
        EvalCtx { doc, operators: ops, effects: fx, effect_log: log, ref_cells: cells }
    }

    fn empty_doc() -> Document {
        Document {
            version: crate::doc::Version { major: 1, minor: 0, patch: 0 },
            capabilities: None,
            function_sigs: IndexMap::new(),
            air_defs: IndexMap::new(),
            nodes: IndexMap::new(),
            result: "r".into(),
        }
    }

    #[test]
    fn branch_scenario() {
        let doc = empty_doc();
        let ops = BuiltinRegistry::new();
        let fx = NullEffectRegistry;
        let mut log = Vec::new();
        let mut cells = RefCellStore::new();
        let mut c = ctx(&doc, &ops, &fx, &mut log, &mut cells);

        let mut blocks = IndexMap::new();
        blocks.insert(
            "entry".into(),
            Block {
                id: "entry".into(),
                instructions: vec![Instruction::Assign { target: "cond".into(), expr: Expr::Lit(Literal::Bool(true)) }],
                terminator: Terminator::Branch { cond: "cond".into(), then: "yes".into(), else_: "no".into() },
            },
        );
        blocks.insert(
            "yes".into(),
            Block { id: "yes".into(), instructions: vec![], terminator: Terminator::Return { value_id: Some("cond".into()) } },
        );
        blocks.insert(
            "no".into(),
            Block { id: "no".into(), instructions: vec![], terminator: Terminator::Return { value_id: None } },
        );

        let mut env = Env::new();
        let v = execute_sync(&blocks, "entry".into(), &mut env, &mut c, 1000);
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn phi_picks_predecessor_source() {
        let doc = empty_doc();
        let ops = BuiltinRegistry::new();
        let fx = NullEffectRegistry;
        let mut log = Vec::new();
        let mut cells = RefCellStore::new();
        let mut c = ctx(&doc, &ops, &fx, &mut log, &mut cells);

        let mut blocks = IndexMap::new();
        blocks.insert(
            "a".into(),
            Block {
                id: "a".into(),
                instructions: vec![Instruction::Assign { target: "x".into(), expr: Expr::Lit(Literal::Int(10)) }],
                terminator: Terminator::Jump { to: "c".into() },
            },
        );
        blocks.insert(
            "c".into(),
            Block {
                id: "c".into(),
                instructions: vec![Instruction::Phi {
                    target: "z".into(),
                    sources: vec![
                        PhiSource { block: "a".into(), id: "x".into() },
                        PhiSource { block: "b".into(), id: "y".into() },
                    ],
                }],
                terminator: Terminator::Return { value_id: Some("z".into()) },
            },
        );

        let mut env = Env::new();
        let v = execute_sync(&blocks, "a".into(), &mut env, &mut c, 1000);
        assert_eq!(v, Value::Int(10));
    }

    #[test]
    fn step_budget_triggers_non_termination() {
        let doc = empty_doc();
        let ops = BuiltinRegistry::new();
        let fx = NullEffectRegistry;
        let mut log = Vec::new();
        let mut cells = RefCellStore::new();
        let mut c = ctx(&doc, &ops, &fx, &mut log, &mut cells);

        let mut blocks = IndexMap::new();
        blocks.insert(
            "loop".into(),
            Block { id: "loop".into(), instructions: vec![], terminator: Terminator::Jump { to: "loop".into() } },
        );

        let mut env = Env::new();
        let v = execute_sync(&blocks, "loop".into(), &mut env, &mut c, 5);
        assert_eq!(v.as_error().map(|e| e.code), Some(ErrorCode::NonTermination));
    }

    #[test]
    fn pir_instruction_without_host_is_domain_error() {
        let doc = empty_doc();
        let ops = BuiltinRegistry::new();
        let fx = NullEffectRegistry;
        let mut log = Vec::new();
        let mut cells = RefCellStore::new();
        let mut c = ctx(&doc, &ops, &fx, &mut log, &mut cells);

        let mut blocks = IndexMap::new();
        blocks.insert(
            "entry".into(),
            Block {
                id: "entry".into(),
                instructions: vec![Instruction::Spawn { target: "f".into(), entry_id: "other".into(), arg_ids: vec![] }],
                terminator: Terminator::Return { value_id: Some("f".into()) },
            },
        );

        let mut env = Env::new();
        let v = execute_sync(&blocks, "entry".into(), &mut env, &mut c, 1000);
        assert_eq!(v.as_error().map(|e| e.code), Some(ErrorCode::DomainError));
    }

    /// A minimal `AsyncHost` whose only real behavior is the shared
    /// cross-call step counter — standing in for `weft_rt::host::Host`
    /// so this module can test the global step budget without depending
    /// on the scheduler crate.
    struct CountingHost {
        steps: u64,
    }

    impl AsyncHost for CountingHost {
        fn spawn(&mut self, _entry: &str, _args: Vec<Value>) -> Value {
            unreachable!("not exercised by this test")
        }
        fn channel_op(&mut self, _op: crate::doc::ChannelOpKind, _channel: &Value, _value: Option<Value>) -> ChannelPoll {
            unreachable!("not exercised by this test")
        }
        fn poll_future(&mut self, _future: &Value) -> AwaitPoll {
            unreachable!("not exercised by this test")
        }
        fn spawn_fork_branches(&mut self, _branches: &[ForkBranch], _guard: &Rc<ForkGuard>) -> Vec<Value> {
            unreachable!("not exercised by this test")
        }
        fn poll_join(&mut self, _tasks: &[Value]) -> JoinPoll {
            unreachable!("not exercised by this test")
        }
        fn create_channel(&mut self, _variant: crate::value::ChannelVariant, _buffer_size: i64) -> Value {
            unreachable!("not exercised by this test")
        }
        fn poll_select(&mut self, _futures: &[Value], _timeout_ms: Option<i64>, _return_index: bool) -> SelectPoll {
            unreachable!("not exercised by this test")
        }
        fn poll_race(&mut self, _tasks: &[Value]) -> AwaitPoll {
            unreachable!("not exercised by this test")
        }
        fn current_task_id(&self) -> Option<compact_str::CompactString> {
            None
        }
        fn active_task_count(&self) -> usize {
            0
        }
        fn global_steps(&self) -> u64 {
            self.steps
        }
        fn record_global_step(&mut self) -> u64 {
            self.steps += 1;
            self.steps
        }
    }

    #[test]
    fn global_step_budget_trips_across_many_short_lived_tasks_sharing_one_host() {
        let doc = empty_doc();
        let ops = BuiltinRegistry::new();
        let fx = NullEffectRegistry;
        let mut log = Vec::new();
        let mut cells = RefCellStore::new();

        // A single straight-line block: every `run` call below visits it
        // exactly once, so the per-task check (`state.steps`, which only
        // counts *revisits*) never fires no matter how many times this
        // loop runs.
        let mut blocks = IndexMap::new();
        blocks.insert(
            "entry".into(),
            Block {
                id: "entry".into(),
                instructions: vec![Instruction::Assign { target: "x".into(), expr: Expr::Lit(Literal::Int(1)) }],
                terminator: Terminator::Return { value_id: Some("x".into()) },
            },
        );

        let mut host = CountingHost { steps: 0 };
        let max_steps = 5;
        let mut last = Value::Void;
        for _ in 0..10 {
            let mut c = ctx(&doc, &ops, &fx, &mut log, &mut cells);
            let mut state = CfgState::new("entry".into());
            let mut env = Env::new();
            last = match run(&blocks, &mut state, &mut env, &mut c, Some(&mut host), max_steps) {
                StepOutcome::Done(v) => v,
                StepOutcome::Blocked => panic!("unexpected block"),
            };
            if last.as_error().is_some() {
                break;
            }
        }

        assert_eq!(last.as_error().map(|e| e.code), Some(ErrorCode::NonTermination));
        assert!(host.global_steps() > max_steps);
    }
}
