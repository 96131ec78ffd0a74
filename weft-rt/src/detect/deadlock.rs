//! Deadlock detection: a wait-for graph over
//! `heldBy`/`waitingFor` relations, reporting strongly connected
//! components of size ≥ 2 (or a self-loop) as deadlock cycles.

use crate::task::TaskId;
use compact_str::CompactString;
use fxhash::{FxHashMap, FxHashSet};
use std::time::{Duration, Instant};

pub type LockId = CompactString;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockCycle {
    pub tasks: Vec<TaskId>,
    pub locks: Vec<LockId>,
    pub description: CompactString,
}

#[derive(Default)]
pub struct DeadlockDetector {
    enabled: bool,
    held_by: FxHashMap<LockId, TaskId>,
    waiting_for: FxHashMap<TaskId, FxHashSet<LockId>>,
}

impl DeadlockDetector {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, ..Default::default() }
    }

    pub fn track_acquisition(&mut self, task: TaskId, lock: LockId) {
        if !self.enabled {
            return;
        }
        self.waiting_for.entry(task).or_default().insert(lock);
    }

    pub fn track_acquired(&mut self, task: TaskId, lock: LockId) {
        if !self.enabled {
            return;
        }
        if let Some(set) = self.waiting_for.get_mut(&task) {
            set.remove(&lock);
        }
        self.held_by.insert(lock, task);
    }

    /// Only the current holder may release: clears `heldBy` only if the
    /// releaser is the current holder.
    pub fn track_release(&mut self, task: &TaskId, lock: &LockId) {
        if !self.enabled {
            return;
        }
        if self.held_by.get(lock) == Some(task) {
            self.held_by.remove(lock);
        }
    }

    /// Tarjan's SCC algorithm over the wait-for graph (`t1 -> t2` when
    /// `t1` waits for a lock `t2` holds). Any component of size ≥ 2, or a
    /// single task waiting on a lock it itself holds, is a cycle.
    pub fn detect(&self) -> Vec<DeadlockCycle> {
        if !self.enabled {
            return Vec::new();
        }

        let mut adj: FxHashMap<TaskId, Vec<(TaskId, LockId)>> = FxHashMap::default();
        for (task, locks) in &self.waiting_for {
            for lock in locks {
                if let Some(holder) = self.held_by.get(lock) {
                    adj.entry(task.clone()).or_default().push((holder.clone(), lock.clone()));
                }
            }
        }

        let nodes: Vec<TaskId> = self.waiting_for.keys().cloned().collect();
        let mut index = 0u32;
        let mut indices: FxHashMap<TaskId, u32> = FxHashMap::default();
        let mut lowlink: FxHashMap<TaskId, u32> = FxHashMap::default();
        let mut on_stack: FxHashSet<TaskId> = FxHashSet::default();
        let mut stack: Vec<TaskId> = Vec::new();
        let mut sccs: Vec<Vec<TaskId>> = Vec::new();

        for n in &nodes {
            if !indices.contains_key(n) {
                strongconnect(n, &adj, &mut index, &mut indices, &mut lowlink, &mut on_stack, &mut stack, &mut sccs);
            }
        }

        let mut cycles = Vec::new();
        for scc in sccs {
            let has_self_loop = scc.len() == 1
                && adj.get(&scc[0]).is_some_and(|edges| edges.iter().any(|(t, _)| t == &scc[0]));
            if scc.len() < 2 && !has_self_loop {
                continue;
            }
            let member_set: FxHashSet<&TaskId> = scc.iter().collect();
            let mut locks = Vec::new();
            for t in &scc {
                if let Some(edges) = adj.get(t) {
                    for (holder, lock) in edges {
                        if member_set.contains(holder) && !locks.contains(lock) {
                            locks.push(lock.clone());
                        }
                    }
                }
            }
            let description = compact_str::format_compact!(
                "deadlock cycle among tasks [{}] over locks [{}]",
                scc.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", "),
                locks.iter().map(|l| l.as_str()).collect::<Vec<_>>().join(", ")
            );
            cycles.push(DeadlockCycle { tasks: scc, locks, description });
        }
        cycles
    }

    /// Returns as soon as a cycle is found or the timeout elapses. The
    /// wait-for graph only changes between calls through
    /// `track_acquisition`/`track_acquired`/`track_release` on `&mut
    /// self`, so within one `&self` borrow nothing here can transition
    /// from empty to non-empty on its own; this still polls on the
    /// caller's behalf (mirroring `Host::poll_select`'s deadline pattern)
    /// rather than doing a single `detect()` and declaring victory, so a
    /// caller racing this against a background thread that's still
    /// filling in `track_acquired` calls sees a cycle the moment one
    /// exists instead of only at the next manual poll.
    pub fn detect_with_timeout(&self, timeout: Duration) -> Vec<DeadlockCycle> {
        let deadline = Instant::now() + timeout;
        loop {
            let cycles = self.detect();
            if !cycles.is_empty() || Instant::now() >= deadline {
                return cycles;
            }
            std::thread::sleep(Duration::from_millis(1).min(deadline.saturating_duration_since(Instant::now())));
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn strongconnect(
    v: &TaskId,
    adj: &FxHashMap<TaskId, Vec<(TaskId, LockId)>>,
    index: &mut u32,
    indices: &mut FxHashMap<TaskId, u32>,
    lowlink: &mut FxHashMap<TaskId, u32>,
    on_stack: &mut FxHashSet<TaskId>,
    stack: &mut Vec<TaskId>,
    sccs: &mut Vec<Vec<TaskId>>,
) {
    indices.insert(v.clone(), *index);
    lowlink.insert(v.clone(), *index);
    *index += 1;
    stack.push(v.clone());
    on_stack.insert(v.clone());

    if let Some(edges) = adj.get(v) {
        for (w, _) in edges.clone() {
            if !indices.contains_key(&w) {
                strongconnect(&w, adj, index, indices, lowlink, on_stack, stack, sccs);
                let lw = lowlink[&w];
                let lv = lowlink[v];
                lowlink.insert(v.clone(), lv.min(lw));
            } else if on_stack.contains(&w) {
                let iw = indices[&w];
                let lv = lowlink[v];
                lowlink.insert(v.clone(), lv.min(iw));
            }
        }
    }

    if lowlink[v] == indices[v] {
        let mut scc = Vec::new();
        loop {
            let w = stack.pop().unwrap();
            on_stack.remove(&w);
            let done = &w == v;
            scc.push(w);
            if done {
                break;
            }
        }
        sccs.push(scc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> TaskId {
        TaskId::from(s)
    }
    fn l(s: &str) -> LockId {
        LockId::from(s)
    }

    #[test]
    fn two_cycle_is_reported_with_both_tasks_and_locks() {
        let mut d = DeadlockDetector::new(true);
        d.track_acquisition(t("t1"), l("l1"));
        d.track_acquired(t("t1"), l("l1"));
        d.track_acquisition(t("t2"), l("l2"));
        d.track_acquired(t("t2"), l("l2"));
        d.track_acquisition(t("t1"), l("l2"));
        d.track_acquisition(t("t2"), l("l1"));

        let cycles = d.detect();
        assert_eq!(cycles.len(), 1);
        let mut tasks = cycles[0].tasks.clone();
        tasks.sort();
        assert_eq!(tasks, vec![t("t1"), t("t2")]);
        let mut locks = cycles[0].locks.clone();
        locks.sort();
        assert_eq!(locks, vec![l("l1"), l("l2")]);
    }

    #[test]
    fn releasing_a_lock_breaks_the_cycle() {
        let mut d = DeadlockDetector::new(true);
        d.track_acquisition(t("t1"), l("l1"));
        d.track_acquired(t("t1"), l("l1"));
        d.track_acquisition(t("t2"), l("l2"));
        d.track_acquired(t("t2"), l("l2"));
        d.track_acquisition(t("t1"), l("l2"));
        d.track_acquisition(t("t2"), l("l1"));
        d.track_release(&t("t1"), &l("l1"));

        assert_eq!(d.detect().len(), 0);
    }

    #[test]
    fn detect_with_timeout_returns_immediately_once_a_cycle_exists() {
        let mut d = DeadlockDetector::new(true);
        d.track_acquisition(t("t1"), l("l1"));
        d.track_acquired(t("t1"), l("l1"));
        d.track_acquisition(t("t2"), l("l2"));
        d.track_acquired(t("t2"), l("l2"));
        d.track_acquisition(t("t1"), l("l2"));
        d.track_acquisition(t("t2"), l("l1"));

        let start = Instant::now();
        let cycles = d.detect_with_timeout(Duration::from_secs(5));
        assert_eq!(cycles.len(), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn detect_with_timeout_elapses_when_no_cycle_ever_appears() {
        let d = DeadlockDetector::new(true);
        let start = Instant::now();
        let cycles = d.detect_with_timeout(Duration::from_millis(20));
        assert!(cycles.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn disabled_detector_reports_nothing() {
        let mut d = DeadlockDetector::new(false);
        d.track_acquisition(t("t1"), l("l1"));
        d.track_acquired(t("t1"), l("l1"));
        d.track_acquisition(t("t1"), l("l1"));
        assert_eq!(d.detect().len(), 0);
    }
}
