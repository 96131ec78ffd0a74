//! The top-level driver: validates a document, builds its shared
//! expression-node environment, and — if the result node is a block —
//! drives it (and whatever it spawns) to completion through [`Host`]'s
//! scheduler, honoring [`RuntimeConfig::schedule_mode`].
//!
//! Split from [`Host`] so that building an [`weft_core::expr::eval::EvalCtx`]
//! from the registries/effect log/ref-cell store (fields live here) never
//! aliases the `&mut dyn AsyncHost` borrow `cfg::run` needs (fields live
//! on `Host`) — see `step_task`.

use std::cell::RefCell;
use std::rc::Rc;

use fxhash::FxHashSet;
use weft_core::cfg::{self, AsyncHost, CfgState, StepOutcome};
use weft_core::doc::{BlockId, Document, Node, Terminator};
use weft_core::env::RefCellStore;
use weft_core::error::ErrorCode;
use weft_core::expr::eval::EvalCtx;
use weft_core::registry::{BuiltinRegistry, EffectRecord, EffectRegistry, OperatorRegistry};
use weft_core::value::Value;
use weft_core::validate;

use crate::config::{RuntimeConfig, ScheduleMode};
use crate::detect::{DeadlockDetector, RaceDetector};
use crate::effects::RuntimeEffects;
use crate::error::{Result, WeftRtError};
use crate::host::Host;
use crate::task::{TaskId, TaskRecord, TaskStatus};

pub struct Runtime {
    doc: Rc<Document>,
    operators: Box<dyn OperatorRegistry>,
    effects: Box<dyn EffectRegistry>,
    effect_log: Vec<EffectRecord>,
    ref_cells: RefCellStore,
    host: Host,
    config: RuntimeConfig,
    races: Rc<RefCell<RaceDetector>>,
    deadlocks: Rc<RefCell<DeadlockDetector>>,
}

pub struct Outcome {
    pub value: Value,
    pub effects: Vec<EffectRecord>,
}

const ROOT_TASK: &str = "root";

impl Runtime {
    pub fn new(doc: Document, operators: Box<dyn OperatorRegistry>, config: RuntimeConfig) -> Result<Self> {
        validate::validate(&doc)?;
        check_unique_fork_task_ids(&doc)?;

        let races = Rc::new(RefCell::new(RaceDetector::new(config.detect_races)));
        let deadlocks = Rc::new(RefCell::new(DeadlockDetector::new(config.detect_deadlocks)));
        let effects: Box<dyn EffectRegistry> = Box::new(RuntimeEffects::new(races.clone(), deadlocks.clone()));

        let doc = Rc::new(doc);
        let mut ref_cells = RefCellStore::new();
        let mut effect_log = Vec::new();
        let doc_env = {
            let mut ctx = EvalCtx {
                doc: &doc,
                operators: operators.as_ref(),
                effects: effects.as_ref(),
                effect_log: &mut effect_log,
                ref_cells: &mut ref_cells,
            };
            weft_core::orchestrate::prepass(&doc, &mut ctx)
        };

        let host = Host::new(doc.clone(), doc_env, config.schedule_mode);

        Ok(Self { doc, operators, effects, effect_log, ref_cells, host, config, races, deadlocks })
    }

    pub fn with_builtin_operators(doc: Document, config: RuntimeConfig) -> Result<Self> {
        Self::new(doc, Box::new(BuiltinRegistry::new()), config)
    }

    pub fn race_detector(&self) -> std::cell::Ref<'_, RaceDetector> {
        self.races.borrow()
    }

    pub fn deadlock_detector(&self) -> std::cell::Ref<'_, DeadlockDetector> {
        self.deadlocks.borrow()
    }

    /// A clonable handle onto the same detector [`execute`](Self::execute)
    /// drives, for callers that need to inspect it afterward —
    /// `execute` takes `self` by value (it hands the accumulated effect
    /// log off in the returned [`Outcome`]), so [`Self::race_detector`]
    /// can no longer be called once a run has started. Grab this first.
    pub fn race_detector_handle(&self) -> Rc<RefCell<RaceDetector>> {
        self.races.clone()
    }

    /// See [`Self::race_detector_handle`].
    pub fn deadlock_detector_handle(&self) -> Rc<RefCell<DeadlockDetector>> {
        self.deadlocks.clone()
    }

    pub fn effects_log(&self) -> &[EffectRecord] {
        &self.effect_log
    }

    /// Resolves the document's `result` node: an immediate value lookup
    /// for an `ExprNode` (every document-level expression was already
    /// folded into `doc_env` by the prepass in [`Self::new`]), or a full
    /// scheduler drive for a `BlockNode`.
    pub fn execute(mut self) -> Outcome {
        let result = self.doc.result.clone();
        let value = match self.doc.node(&result) {
            Some(Node::ExprNode { .. }) => self
                .host
                .doc_env()
                .get(&result)
                .cloned()
                .unwrap_or_else(|| Value::error(ErrorCode::UnboundIdentifier, result.to_string())),
            Some(Node::BlockNode { entry, .. }) => {
                let env = self.host.doc_env().clone();
                let entry = entry.clone();
                let root = TaskId::from(ROOT_TASK);
                self.host.insert_root_task(root.clone(), TaskRecord::new(result, CfgState::new(entry), env));
                self.drive(&root)
            }
            None => Value::error(ErrorCode::ValidationError, "result node missing"),
        };
        Outcome { value, effects: self.effect_log }
    }

    /// Repeatedly gives every runnable task a turn until the root task
    /// completes, the run queue empties with the root still unresolved
    /// (nothing left that could ever unblock it), or a full pass over
    /// the queue produces no observable progress anywhere (a structural
    /// deadlock distinct from the opt-in lock-cycle detector — e.g. two
    /// tasks each awaiting the other with no scheduler left to run).
    fn drive(&mut self, root: &TaskId) -> Value {
        loop {
            if let Some(v) = self.done_value(root) {
                return v;
            }
            if self.host.run_queue.is_empty() {
                return Value::error(ErrorCode::NonTermination, "scheduler stalled: no runnable task and result is unresolved");
            }

            let pass_len = self.host.run_queue.len();
            let mut progressed = false;
            for _ in 0..pass_len {
                let Some(id) = self.host.run_queue.pop_front() else { break };
                let before = self.host.tasks().get(&id).map(signature);
                if before.is_none() {
                    continue;
                }
                log::debug!(target: "weft_rt::scheduler", "resuming {id}");
                self.step_task(&id);
                let done = matches!(self.host.tasks().get(&id).map(|t| &t.status), Some(TaskStatus::Done(_)));
                if done {
                    progressed = true;
                } else {
                    let after = self.host.tasks().get(&id).map(signature);
                    if after != before {
                        progressed = true;
                    }
                    match self.config.schedule_mode {
                        ScheduleMode::Sequential => self.host.run_queue.push_front(id),
                        _ => self.host.run_queue.push_back(id),
                    }
                }
                if let Some(v) = self.done_value(root) {
                    return v;
                }
            }
            if !progressed {
                return Value::error(ErrorCode::NonTermination, "scheduler stalled: no task made progress this round");
            }
        }
    }

    fn done_value(&self, id: &TaskId) -> Option<Value> {
        match self.host.tasks().get(id) {
            Some(TaskRecord { status: TaskStatus::Done(v), .. }) => Some(v.clone()),
            _ => None,
        }
    }

    /// Advances one task by one `cfg::run` call (which itself runs until
    /// the task's next suspension point or completion). Destructures
    /// `self` field-by-field so the `EvalCtx` borrow (built from
    /// `operators`/`effects`/`effect_log`/`ref_cells`) and the `&mut dyn
    /// AsyncHost` borrow (`host`) are disjoint — both mutably borrow
    /// `self` if taken as a whole, but never overlap in which fields
    /// they touch.
    fn step_task(&mut self, id: &TaskId) {
        let Runtime { doc, operators, effects, effect_log, ref_cells, host, config, .. } = self;

        let Some(mut record) = host.tasks_mut().remove(id) else { return };
        host.current_task = Some(id.clone());
        host.current_node = Some(record.node.clone());

        let mut ctx = EvalCtx { doc: &**doc, operators: &**operators, effects: &**effects, effect_log, ref_cells };

        // spawn's task body evaluates the entry block or expression —
        // an `ExprNode` target has no suspension points at
        // all, so it runs to completion (or a value-level error) in one
        // step, never touching `cfg::run`/`AsyncHost`.
        if let Some(Node::ExprNode { expr, .. }) = doc.node(&record.node) {
            let v = weft_core::expr::eval::eval(expr, &record.env, &mut ctx);
            log::debug!(target: "weft_rt::scheduler", "{id} completed: {v:?}");
            record.status = TaskStatus::Done(v);
            host.tasks_mut().insert(id.clone(), record);
            return;
        }

        let Some((blocks, _)) = cfg::block_node(doc, &record.node) else {
            record.status = TaskStatus::Done(Value::error(ErrorCode::DomainError, "task node missing"));
            host.tasks_mut().insert(id.clone(), record);
            return;
        };

        let outcome = cfg::run(blocks, &mut record.state, &mut record.env, &mut ctx, Some(&mut *host as &mut dyn AsyncHost), config.max_steps);
        record.status = match outcome {
            StepOutcome::Done(v) => {
                log::debug!(target: "weft_rt::scheduler", "{id} completed: {v:?}");
                TaskStatus::Done(v)
            }
            StepOutcome::Blocked => {
                log::debug!(target: "weft_rt::scheduler", "{id} suspended at {}", record.state.current);
                TaskStatus::Blocked
            }
        };
        host.tasks_mut().insert(id.clone(), record);
    }
}

fn signature(rec: &TaskRecord) -> (BlockId, usize, u64) {
    (rec.state.current.clone(), rec.state.cursor, rec.state.steps)
}

/// `ForkBranch::task_id`s are document-authored, not minted by this
/// runtime — a document with two `fork` terminators reusing the same id
/// would silently let one branch's task record shadow the other's.
/// Checked once up front (`AsyncHost::spawn_fork_branches` has no way to
/// report an error) rather than during scheduling.
fn check_unique_fork_task_ids(doc: &Document) -> Result<()> {
    let mut seen: FxHashSet<compact_str::CompactString> = FxHashSet::default();
    for node in doc.nodes.values() {
        let Node::BlockNode { blocks, .. } = node else { continue };
        for block in blocks.values() {
            if let Terminator::Fork { branches, .. } = &block.terminator {
                for b in branches {
                    if !seen.insert(b.task_id.clone()) {
                        return Err(WeftRtError::DuplicateTask(b.task_id.clone()));
                    }
                }
            }
        }
    }
    Ok(())
}
