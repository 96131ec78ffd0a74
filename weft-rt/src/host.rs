//! [`Host`] implements [`weft_core::cfg::AsyncHost`] — the seam the
//! synchronous CFG evaluator calls into for every PIR construct. It owns
//! the task table, the run queue, and the channel store; it does *not*
//! own the operator/effect registries or the ref-cell store, since those
//! live on [`crate::runtime::Runtime`] and are threaded into each step
//! through a separate `EvalCtx` borrow (see `Runtime::step_task`'s
//! field-by-field destructure — the reason `Host` and `Runtime` are two
//! structs rather than one).

use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use fxhash::FxHashMap;
use smallvec::SmallVec;
use weft_core::cfg::{AsyncHost, AwaitPoll, ChannelPoll, CfgState, ForkGuard, JoinPoll, SelectPoll};
use weft_core::doc::{ChannelOpKind, Document, ForkBranch, Node, NodeId};
use weft_core::env::Env;
use weft_core::error::ErrorCode;
use weft_core::value::{ChannelVariant, Value};

use crate::channel::{self, ChannelStore};
use crate::config::ScheduleMode;
use crate::task::{TaskId, TaskRecord, TaskStatus};

pub struct Host {
    doc: Rc<Document>,
    doc_env: Env,
    schedule_mode: ScheduleMode,
    tasks: FxHashMap<TaskId, TaskRecord>,
    pub(crate) run_queue: VecDeque<TaskId>,
    channels: ChannelStore,
    next_task_seq: u64,
    /// Set by `Runtime::step_task` before every call into `cfg::run`, so
    /// that a host method invoked mid-step (e.g. `spawn_fork_branches`
    /// needing to know which node's blocks a branch reuses) knows whose
    /// turn it is without the `AsyncHost` trait needing a task parameter
    /// on every method.
    pub(crate) current_task: Option<TaskId>,
    pub(crate) current_node: Option<NodeId>,
    /// Per-task deadline for an in-flight `select{timeout}` — recorded on
    /// first poll so a retry compares against the same deadline instead
    /// of restarting the clock every call.
    pending_selects: FxHashMap<TaskId, Instant>,
    /// Cross-task step counter — see `AsyncHost::record_global_step`.
    global_steps: u64,
}

impl Host {
    pub fn new(doc: Rc<Document>, doc_env: Env, schedule_mode: ScheduleMode) -> Self {
        Self {
            doc,
            doc_env,
            schedule_mode,
            tasks: FxHashMap::default(),
            run_queue: VecDeque::new(),
            channels: ChannelStore::new(),
            next_task_seq: 0,
            current_task: None,
            current_node: None,
            pending_selects: FxHashMap::default(),
            global_steps: 0,
        }
    }

    fn mint_task_id(&mut self) -> TaskId {
        self.next_task_seq += 1;
        compact_str::format_compact!("task{}", self.next_task_seq)
    }

    fn enqueue(&mut self, id: TaskId) {
        match self.schedule_mode {
            ScheduleMode::DepthFirst => self.run_queue.push_front(id),
            _ => self.run_queue.push_back(id),
        }
    }

    pub fn tasks(&self) -> &FxHashMap<TaskId, TaskRecord> {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut FxHashMap<TaskId, TaskRecord> {
        &mut self.tasks
    }

    pub fn insert_root_task(&mut self, id: TaskId, record: TaskRecord) {
        self.tasks.insert(id.clone(), record);
        self.enqueue(id);
    }

    pub fn existing_task_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.tasks.keys()
    }

    /// The document-level environment every spawned task starts from
    /// (built once, by `Runtime::new`, from the `ExprNode` prepass).
    pub fn doc_env(&self) -> &Env {
        &self.doc_env
    }

    fn task_done_value(&self, future: &Value) -> Option<Option<Value>> {
        let Value::Future { task_id, .. } = future else {
            return None;
        };
        let id = TaskId::from(task_id.as_str());
        match self.tasks.get(&id) {
            Some(TaskRecord { status: TaskStatus::Done(v), .. }) => Some(Some(v.clone())),
            Some(_) => Some(None),
            None => Some(Some(Value::error(ErrorCode::DomainError, format!("unknown task {id}")))),
        }
    }
}

impl AsyncHost for Host {
    fn spawn(&mut self, entry: &str, args: Vec<Value>) -> Value {
        // spawn runs the task body (which evaluates the `entry` block
        // *or expression*) — an `ExprNode` target has no
        // blocks to enter, so it's recorded with an empty `CfgState` and
        // `Runtime::step_task` evaluates it directly instead of calling
        // into `cfg::run`.
        let entry_block = match self.doc.node(entry) {
            Some(Node::BlockNode { entry, .. }) => entry.clone(),
            Some(Node::ExprNode { .. }) => compact_str::CompactString::from(""),
            None => {
                // Still hands back a future so callers that only ever
                // inspect it via `await`/`select` see a consistent shape;
                // the task is created pre-failed.
                let id = self.mint_task_id();
                let err = Value::error(ErrorCode::DomainError, format!("spawn target {entry} does not exist"));
                self.tasks.insert(id.clone(), TaskRecord { node: entry.into(), state: CfgState::new("".into()), env: Env::new(), status: TaskStatus::Done(err) });
                return Value::Future { task_id: id.as_str().into(), status: weft_core::value::FutureStatus::Error };
            }
        };
        let id = self.mint_task_id();
        let mut env = self.doc_env.clone();
        for (i, a) in args.into_iter().enumerate() {
            env.set(compact_str::format_compact!("arg{i}"), a);
        }
        let record = TaskRecord::new(entry.into(), CfgState::new(entry_block), env);
        self.tasks.insert(id.clone(), record);
        self.enqueue(id.clone());
        log::debug!(target: "weft_rt::scheduler", "spawned {id} at {entry}");
        Value::Future { task_id: id.as_str().into(), status: weft_core::value::FutureStatus::Pending }
    }

    fn channel_op(&mut self, op: ChannelOpKind, channel: &Value, value: Option<Value>) -> ChannelPoll {
        let Value::Channel { id, .. } = channel else {
            return ChannelPoll::Ready(Value::error(ErrorCode::TypeError, "channel op target is not a channel"));
        };
        let task = self.current_task.clone().unwrap_or_else(|| TaskId::from(""));
        let poll = match op {
            ChannelOpKind::Send => self.channels.send(id.as_str(), &task, value.unwrap_or(Value::Void)),
            ChannelOpKind::Recv => self.channels.recv(id.as_str(), &task),
            ChannelOpKind::TrySend => {
                return ChannelPoll::Ready(self.channels.try_send(id.as_str(), &task, value.unwrap_or(Value::Void)))
            }
            ChannelOpKind::TryRecv => return ChannelPoll::Ready(self.channels.try_recv(id.as_str(), &task)),
        };
        match poll {
            channel::Poll::Ready(v) => ChannelPoll::Ready(v),
            channel::Poll::Pending => ChannelPoll::Pending,
        }
    }

    fn poll_future(&mut self, future: &Value) -> AwaitPoll {
        match self.task_done_value(future) {
            Some(Some(v)) => AwaitPoll::Ready(v),
            Some(None) => AwaitPoll::Pending,
            None => AwaitPoll::Ready(Value::error(ErrorCode::TypeError, "await expects a future")),
        }
    }

    fn spawn_fork_branches(&mut self, branches: &[ForkBranch], guard: &Rc<ForkGuard>) -> Vec<Value> {
        let node = self.current_node.clone().unwrap_or_default();
        let mut out = Vec::with_capacity(branches.len());
        for b in branches {
            let mut state = CfgState::new(b.block.clone());
            state.guard = Some(guard.clone());
            let id = TaskId::from(b.task_id.as_str());
            self.tasks.insert(id.clone(), TaskRecord::new(node.clone(), state, Env::new()));
            self.enqueue(id.clone());
            log::debug!(target: "weft_rt::scheduler", "forked {id} at {}", b.block);
            out.push(Value::Future { task_id: id.as_str().into(), status: weft_core::value::FutureStatus::Pending });
        }
        out
    }

    fn poll_join(&mut self, tasks: &[Value]) -> JoinPoll {
        // `join` sets are almost always a handful of branches (fork/par
        // lowering), so the accumulator stays inline instead of heap
        // allocating on every poll while the set is still incomplete.
        let mut values: SmallVec<[Value; 8]> = SmallVec::with_capacity(tasks.len());
        for t in tasks {
            match self.task_done_value(t) {
                Some(Some(v)) => values.push(v),
                Some(None) => return JoinPoll::Pending,
                None => values.push(Value::error(ErrorCode::TypeError, "join expects futures")),
            }
        }
        JoinPoll::Ready(values.into_vec())
    }

    fn create_channel(&mut self, variant: ChannelVariant, buffer_size: i64) -> Value {
        let id = self.channels.create(variant, buffer_size);
        Value::Channel { id: id.as_str().into(), variant, buffer_size }
    }

    fn poll_select(&mut self, futures: &[Value], timeout_ms: Option<i64>, return_index: bool) -> SelectPoll {
        let task = self.current_task.clone().unwrap_or_else(|| TaskId::from(""));
        for (i, fut) in futures.iter().enumerate() {
            if let Some(Some(v)) = self.task_done_value(fut) {
                self.pending_selects.remove(&task);
                return SelectPoll::Ready(if return_index {
                    Value::SelectResult { index: i as i32, value: Box::new(v) }
                } else {
                    v
                });
            }
        }
        match timeout_ms {
            None => SelectPoll::Pending,
            Some(ms) => {
                let deadline =
                    *self.pending_selects.entry(task.clone()).or_insert_with(|| Instant::now() + Duration::from_millis(ms.max(0) as u64));
                if Instant::now() >= deadline {
                    self.pending_selects.remove(&task);
                    SelectPoll::TimedOut
                } else {
                    SelectPoll::Pending
                }
            }
        }
    }

    fn poll_race(&mut self, tasks: &[Value]) -> AwaitPoll {
        for t in tasks {
            if let Some(Some(v)) = self.task_done_value(t) {
                return AwaitPoll::Ready(v);
            }
        }
        AwaitPoll::Pending
    }

    fn current_task_id(&self) -> Option<compact_str::CompactString> {
        self.current_task.clone()
    }

    fn active_task_count(&self) -> usize {
        self.tasks.values().filter(|t| !t.status.is_done()).count()
    }

    fn global_steps(&self) -> u64 {
        self.global_steps
    }

    fn record_global_step(&mut self) -> u64 {
        self.global_steps += 1;
        self.global_steps
    }
}
