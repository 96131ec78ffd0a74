//! Data-race detection: record every `{taskId, location,
//! kind}` access and every `recordSyncPoint(taskId, priorTaskIds)`
//! assertion, then report conflicting accesses with no happens-before
//! edge between them.

use crate::task::TaskId;
use compact_str::CompactString;
use fxhash::{FxHashMap, FxHashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

#[derive(Debug, Clone)]
struct Access {
    task: TaskId,
    location: CompactString,
    kind: AccessKind,
    seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictType {
    WW,
    WR,
    RW,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceReport {
    pub location: CompactString,
    pub tasks: (TaskId, TaskId),
    pub conflict: ConflictType,
    pub description: CompactString,
}

/// `enabled = false` makes every record call a no-op: if detection is
/// disabled, `recordAccess` and `recordSyncPoint` are no-ops.
pub struct RaceDetector {
    enabled: bool,
    accesses: Vec<Access>,
    /// Directed edges `before -> after` contributed by `recordSyncPoint`
    /// calls; happens-before reachability is computed on demand in
    /// [`Self::detect`] rather than maintained incrementally, since sync
    /// points can arrive in any order relative to the accesses they
    /// relate.
    edges: Vec<(TaskId, TaskId)>,
    seq: u64,
}

impl RaceDetector {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, accesses: Vec::new(), edges: Vec::new(), seq: 0 }
    }

    pub fn record_access(&mut self, task: TaskId, location: impl Into<CompactString>, kind: AccessKind) {
        if !self.enabled {
            return;
        }
        self.seq += 1;
        self.accesses.push(Access { task, location: location.into(), kind, seq: self.seq });
    }

    pub fn record_sync_point(&mut self, task: TaskId, priors: &[TaskId]) {
        if !self.enabled {
            return;
        }
        for p in priors {
            self.edges.push((p.clone(), task.clone()));
        }
    }

    /// Every access recorded so far, in recording order — lets a host
    /// inspect what the detector has seen without waiting for
    /// `detect()` to surface a conflict.
    pub fn accesses(&self) -> impl Iterator<Item = (&TaskId, &str, AccessKind)> {
        self.accesses.iter().map(|a| (&a.task, a.location.as_str(), a.kind))
    }

    /// BFS reachability: is `to` reachable from `from` by following
    /// recorded happens-before edges?
    fn happens_before(&self, from: &TaskId, to: &TaskId) -> bool {
        let mut adj: FxHashMap<&TaskId, Vec<&TaskId>> = FxHashMap::default();
        for (a, b) in &self.edges {
            adj.entry(a).or_default().push(b);
        }
        let mut seen: FxHashSet<&TaskId> = FxHashSet::default();
        let mut stack = vec![from];
        while let Some(cur) = stack.pop() {
            if cur == to {
                return true;
            }
            if !seen.insert(cur) {
                continue;
            }
            if let Some(next) = adj.get(cur) {
                stack.extend(next.iter().copied());
            }
        }
        false
    }

    pub fn detect(&self) -> Vec<RaceReport> {
        let mut reports = Vec::new();
        let mut seen: FxHashSet<(CompactString, TaskId, TaskId)> = FxHashSet::default();
        for i in 0..self.accesses.len() {
            for j in (i + 1)..self.accesses.len() {
                let (a1, a2) = (&self.accesses[i], &self.accesses[j]);
                if a1.location != a2.location || a1.task == a2.task {
                    continue;
                }
                if a1.kind == AccessKind::Read && a2.kind == AccessKind::Read {
                    continue;
                }
                if self.happens_before(&a1.task, &a2.task) || self.happens_before(&a2.task, &a1.task) {
                    continue;
                }
                let (first, second) = if a1.seq < a2.seq { (a1, a2) } else { (a2, a1) };
                let key = if first.task < second.task {
                    (first.location.clone(), first.task.clone(), second.task.clone())
                } else {
                    (first.location.clone(), second.task.clone(), first.task.clone())
                };
                if !seen.insert(key) {
                    continue;
                }
                let conflict = match (first.kind, second.kind) {
                    (AccessKind::Write, AccessKind::Write) => ConflictType::WW,
                    (AccessKind::Write, AccessKind::Read) => ConflictType::WR,
                    (AccessKind::Read, AccessKind::Write) => ConflictType::RW,
                    (AccessKind::Read, AccessKind::Read) => unreachable!("filtered above"),
                };
                reports.push(RaceReport {
                    location: first.location.clone(),
                    tasks: (first.task.clone(), second.task.clone()),
                    conflict,
                    description: compact_str::format_compact!(
                        "race on {}: {} ({:?}) vs {} ({:?})",
                        first.location,
                        first.task,
                        first.kind,
                        second.task,
                        second.kind
                    ),
                });
            }
        }
        reports
    }
}
