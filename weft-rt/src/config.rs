//! Host-side runtime configuration. None of this appears in the wire
//! document format — it governs how *this* host drives a document,
//! analogous to how a compiler's optimization/target flags configure a
//! build without being part of the source being compiled.

use derive_builder::Builder;

/// The four scheduling disciplines. All are
/// single-threaded and cooperative — none of them ever run two tasks'
/// instructions concurrently; they differ only in the order ready tasks
/// are given a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleMode {
    /// Run each spawned task to completion before starting another.
    /// Tasks that block on a sibling that hasn't been given a turn yet
    /// will never unblock under this mode — an intentional restriction,
    /// not a bug.
    Sequential,
    /// Cooperative interleaving: every runnable task gets a turn each
    /// scheduling round.
    #[default]
    Parallel,
    /// FIFO ready queue; newly spawned tasks join the back.
    BreadthFirst,
    /// LIFO ready queue; newly spawned tasks jump to the front.
    DepthFirst,
}

#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", build_fn(error = "derive_builder::UninitializedFieldError"))]
pub struct RuntimeConfig {
    /// Checked both per-block (inside `weft_core::cfg::run`) and
    /// globally across every task.
    #[builder(default = "10_000")]
    pub max_steps: u64,
    #[builder(default)]
    pub schedule_mode: ScheduleMode,
    #[builder(default = "false")]
    pub detect_races: bool,
    #[builder(default = "false")]
    pub detect_deadlocks: bool,
    /// Used when a `channel` expression/effect omits an explicit buffer
    /// size (the wire format always supplies one, but host-constructed
    /// channels — e.g. test fixtures — may want a default).
    #[builder(default = "0")]
    pub default_channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfigBuilder::default().build().expect("all fields defaulted")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.max_steps, 10_000);
        assert_eq!(cfg.schedule_mode, ScheduleMode::Parallel);
        assert!(!cfg.detect_races);
        assert!(!cfg.detect_deadlocks);
    }

    #[test]
    fn builder_overrides_individual_fields() {
        let cfg = RuntimeConfigBuilder::default()
            .max_steps(500u64)
            .schedule_mode(ScheduleMode::Sequential)
            .build()
            .unwrap();
        assert_eq!(cfg.max_steps, 500);
        assert_eq!(cfg.schedule_mode, ScheduleMode::Sequential);
    }
}
