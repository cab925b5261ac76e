use crate::transaction::{AbortReason, CommitOutcome};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running counters of transaction outcomes for one manager.
#[derive(Clone, Default)]
pub struct TransactionStats {
    inner: Arc<TransactionStatsInner>,
}

#[derive(Default)]
struct TransactionStatsInner {
    started: AtomicU64,
    committed: AtomicU64,
    validation_failed: AtomicU64,
    lock_failed: AtomicU64,
    requested: AtomicU64,
    faulted: AtomicU64,
    retried: AtomicU64,
}

/// Point-in-time copy of [`TransactionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatsSnapshot {
    pub started: u64,
    pub committed: u64,
    pub validation_failed: u64,
    pub lock_failed: u64,
    pub requested: u64,
    pub faulted: u64,
    pub retried: u64,
}

impl StatsSnapshot {
    pub fn aborted(&self) -> u64 {
        self.validation_failed + self.lock_failed + self.requested + self.faulted
    }
}

impl TransactionStats {
    pub fn new() -> Self {
        TransactionStats::default()
    }

    pub(crate) fn record_started(&self) {
        self.inner.started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.inner.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_outcome(&self, outcome: CommitOutcome) {
        let counter = match outcome {
            CommitOutcome::Committed => &self.inner.committed,
            CommitOutcome::Aborted(AbortReason::ValidationFailed) => &self.inner.validation_failed,
            CommitOutcome::Aborted(AbortReason::LockFailed) => &self.inner.lock_failed,
            CommitOutcome::Aborted(AbortReason::Requested) => &self.inner.requested,
            CommitOutcome::Aborted(AbortReason::ModuleError(_)) => &self.inner.faulted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            started: load(&self.inner.started),
            committed: load(&self.inner.committed),
            validation_failed: load(&self.inner.validation_failed),
            lock_failed: load(&self.inner.lock_failed),
            requested: load(&self.inner.requested),
            faulted: load(&self.inner.faulted),
            retried: load(&self.inner.retried),
        }
    }
}
