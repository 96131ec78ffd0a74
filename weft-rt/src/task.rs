//! Task bookkeeping. Tasks are created by spawn/fork and are destroyed
//! after their result is produced and cached for subsequent awaits.
//!
//! A task is one resumable [`weft_core::cfg::CfgState`] plus the `Env` it
//! runs with, rooted at some block node in the document. `fork` branches
//! and `spawn`ed tasks both land here; they differ only in which
//! document node's block map they execute (a branch reuses its parent's
//! node; a spawned task gets a fresh one) and in how their `taskId` was
//! chosen (pre-assigned by `ForkBranch::task_id`, or minted fresh here).

use weft_core::cfg::CfgState;
use weft_core::doc::NodeId;
use weft_core::env::Env;
use weft_core::value::Value;

pub type TaskId = compact_str::CompactString;

#[derive(Debug)]
pub enum TaskStatus {
    /// Still has work to do; not currently blocked on anything the host
    /// knows about.
    Ready,
    /// Blocked on a channel, future, join, or select the last step
    /// couldn't resolve. Retried on the next scheduling round.
    Blocked,
    Done(Value),
}

impl TaskStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, TaskStatus::Done(_))
    }
}

/// One task's resumable state. `node` names the `BlockNode` this task's
/// `state.current`/instructions live in — looked up afresh each step via
/// [`weft_core::cfg::block_node`] rather than held as a borrow, since the
/// owning [`Document`](weft_core::doc::Document) is shared (`Rc`) across
/// every task and Rust won't let a struct borrow through a `Rc` it also
/// needs to hand out mutably elsewhere.
pub struct TaskRecord {
    pub node: NodeId,
    pub state: CfgState,
    pub env: Env,
    pub status: TaskStatus,
}

impl TaskRecord {
    pub fn new(node: NodeId, state: CfgState, env: Env) -> Self {
        Self { node, state, env, status: TaskStatus::Ready }
    }
}
