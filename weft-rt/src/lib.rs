//! `weft-rt`: the cooperative async runtime for Weft's PIR layer,
//! providing the async runtime, race detector, and deadlock detector.
//!
//! `weft-core` alone can parse, lower, and evaluate a PIR document
//! structurally, but every instruction that needs a scheduler (`spawn`,
//! `channelOp`, `await`) or terminator that needs one (`fork`, `join`,
//! `suspend`) resolves to `error(DomainError)` there — this crate
//! supplies the missing [`weft_core::cfg::AsyncHost`] and drives a
//! document to completion with it.
//!
//! Everything here is single-threaded and cooperative — no preemptive
//! or multi-threaded parallelism: tasks
//! are `Rc`/`RefCell`-based, never `Send`, and a [`Runtime`] only ever
//! makes progress while its own `execute` call is on the stack.

pub mod channel;
pub mod config;
pub mod detect;
pub mod effects;
pub mod error;
pub mod host;
pub mod runtime;
pub mod task;

pub use config::{RuntimeConfig, RuntimeConfigBuilder, ScheduleMode};
pub use detect::{ConflictType, DeadlockCycle, DeadlockDetector, RaceDetector, RaceReport};
pub use error::{Result, WeftRtError};
pub use runtime::{Outcome, Runtime};
pub use task::{TaskId, TaskStatus};
