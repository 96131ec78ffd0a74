//! The effect handlers a runtime registers by default: the race and
//! deadlock detectors' recording API, exposed as
//! ordinary `effect{op,argIds}` instructions so a document can drive
//! them the same way it drives any other side effect.
//!
//! Detector state is held behind `RefCell` rather than `&mut self`
//! because [`weft_core::registry::EffectRegistry::lookup`] only hands
//! out `&dyn Effect` — the same shared-mutable-cell pattern
//! `weft_core::value::Value::RefCell` uses for the single mutable slot
//! the rest of the engine is built around.

use std::cell::RefCell;
use std::rc::Rc;

use weft_core::error::ErrorCode;
use weft_core::registry::{Effect, EffectRegistry};
use weft_core::value::Value;

use crate::detect::{DeadlockDetector, RaceDetector};
use crate::detect::race::AccessKind;

fn task_id_arg(v: &Value) -> Option<crate::task::TaskId> {
    match v {
        Value::String(s) => Some(crate::task::TaskId::from(s.as_str())),
        _ => None,
    }
}

fn string_arg(v: &Value) -> Option<compact_str::CompactString> {
    match v {
        Value::String(s) => Some(compact_str::CompactString::from(s.as_str())),
        _ => None,
    }
}

fn access_kind_arg(v: &Value) -> Option<AccessKind> {
    match v {
        Value::String(s) if s.as_str() == "read" => Some(AccessKind::Read),
        Value::String(s) if s.as_str() == "write" => Some(AccessKind::Write),
        _ => None,
    }
}

/// `recordAccess(taskId, location, kind)`; `kind` is `"read"` or
/// `"write"`.
struct RecordAccess(Rc<RefCell<RaceDetector>>);
impl Effect for RecordAccess {
    fn arity(&self) -> usize {
        3
    }
    fn invoke(&self, args: &[Value]) -> Value {
        let (Some(task), Some(loc), Some(kind)) =
            (task_id_arg(&args[0]), string_arg(&args[1]), access_kind_arg(&args[2]))
        else {
            return Value::error(ErrorCode::TypeError, "recordAccess expects (taskId, location, \"read\"|\"write\")");
        };
        self.0.borrow_mut().record_access(task, loc, kind);
        Value::Void
    }
}

struct RecordSyncPoint(Rc<RefCell<RaceDetector>>);
impl Effect for RecordSyncPoint {
    fn arity(&self) -> usize {
        2
    }
    fn invoke(&self, args: &[Value]) -> Value {
        let Some(task) = task_id_arg(&args[0]) else {
            return Value::error(ErrorCode::TypeError, "recordSyncPoint expects a taskId");
        };
        let Value::List(priors) = &args[1] else {
            return Value::error(ErrorCode::TypeError, "recordSyncPoint expects a list of prior taskIds");
        };
        let priors: Option<Vec<_>> = priors.iter().map(task_id_arg).collect();
        let Some(priors) = priors else {
            return Value::error(ErrorCode::TypeError, "recordSyncPoint's prior list must be taskId strings");
        };
        self.0.borrow_mut().record_sync_point(task, &priors);
        Value::Void
    }
}

enum LockOp {
    Acquisition,
    Acquired,
    Release,
}

struct TrackLock(Rc<RefCell<DeadlockDetector>>, LockOp);
impl Effect for TrackLock {
    fn arity(&self) -> usize {
        2
    }
    fn invoke(&self, args: &[Value]) -> Value {
        let (Some(task), Some(lock)) = (task_id_arg(&args[0]), string_arg(&args[1])) else {
            return Value::error(ErrorCode::TypeError, "lock tracking expects (taskId, lockId)");
        };
        let mut d = self.0.borrow_mut();
        match self.1 {
            LockOp::Acquisition => d.track_acquisition(task, lock),
            LockOp::Acquired => d.track_acquired(task, lock),
            LockOp::Release => d.track_release(&task, &lock),
        }
        Value::Void
    }
}

/// The default effect registry a [`crate::runtime::Runtime`] installs:
/// the five detector-recording ops, nothing else. A caller with its own
/// effect needs (I/O, timers, custom instrumentation) supplies its own
/// [`EffectRegistry`] instead — this one exists so `detect_races`/
/// `detect_deadlocks` are usable out of the box.
pub struct RuntimeEffects {
    record_access: RecordAccess,
    record_sync_point: RecordSyncPoint,
    track_acquisition: TrackLock,
    track_acquired: TrackLock,
    track_release: TrackLock,
}

impl RuntimeEffects {
    pub fn new(races: Rc<RefCell<RaceDetector>>, deadlocks: Rc<RefCell<DeadlockDetector>>) -> Self {
        Self {
            record_access: RecordAccess(races.clone()),
            record_sync_point: RecordSyncPoint(races),
            track_acquisition: TrackLock(deadlocks.clone(), LockOp::Acquisition),
            track_acquired: TrackLock(deadlocks.clone(), LockOp::Acquired),
            track_release: TrackLock(deadlocks, LockOp::Release),
        }
    }
}

impl EffectRegistry for RuntimeEffects {
    fn lookup(&self, op: &str) -> Option<&dyn Effect> {
        match op {
            "recordAccess" => Some(&self.record_access),
            "recordSyncPoint" => Some(&self.record_sync_point),
            "trackLockAcquisition" => Some(&self.track_acquisition),
            "trackLockAcquired" => Some(&self.track_acquired),
            "trackLockRelease" => Some(&self.track_release),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::registry::invoke_effect;

    #[test]
    fn record_access_routes_kind_by_op_name() {
        let races = Rc::new(RefCell::new(RaceDetector::new(true)));
        let deadlocks = Rc::new(RefCell::new(DeadlockDetector::new(true)));
        let fx = RuntimeEffects::new(races.clone(), deadlocks);
        let mut log = Vec::new();

        invoke_effect(
            &fx,
            "recordAccess",
            &[Value::String("t1".into()), Value::String("x".into()), Value::String("write".into())],
            &mut log,
        );
        invoke_effect(
            &fx,
            "recordAccess",
            &[Value::String("t2".into()), Value::String("x".into()), Value::String("write".into())],
            &mut log,
        );

        assert_eq!(races.borrow().detect().len(), 1);
    }

    #[test]
    fn unknown_effect_is_unknown_operator() {
        let fx = RuntimeEffects::new(
            Rc::new(RefCell::new(RaceDetector::new(false))),
            Rc::new(RefCell::new(DeadlockDetector::new(false))),
        );
        let mut log = Vec::new();
        let v = invoke_effect(&fx, "nope", &[], &mut log);
        assert_eq!(v.as_error().map(|e| e.code), Some(ErrorCode::UnknownOperator));
    }
}
