//! Structural failures specific to standing up a runtime: duplicate task
//! ids baked into a document's `fork` branches, an unknown channel
//! variant, and the like. Mirrors `weft_core::error::WeftError`'s split —
//! nothing here occurs mid-execution, where every failure is a `Value`.

use compact_str::CompactString;

#[derive(Debug, thiserror::Error)]
pub enum WeftRtError {
    #[error("document error: {0}")]
    Document(#[from] weft_core::error::WeftError),

    #[error("task id {0} is already in use")]
    DuplicateTask(CompactString),

    #[error("entry node {0} does not exist")]
    UnknownEntry(CompactString),
}

pub type Result<T> = std::result::Result<T, WeftRtError>;
