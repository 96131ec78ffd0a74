//! Race and deadlock detection — both are opt-in
//! (`RuntimeConfig::detect_races`/`detect_deadlocks`, default off) and
//! both are bug-surfacing tools, not proofs: the race detector's
//! happens-before is the transitive closure of recorded sync points
//! only, and the deadlock detector only sees locks the document
//! explicitly tracks through `trackLockAcquisition`/`trackLockAcquired`/
//! `trackLockRelease`.

pub mod deadlock;
pub mod race;

pub use deadlock::{DeadlockCycle, DeadlockDetector};
pub use race::{ConflictType, RaceDetector, RaceReport};
