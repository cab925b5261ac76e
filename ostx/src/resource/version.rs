use crate::resource::ResourceId;
use dashmap::DashMap;
use indexmap::{IndexMap, IndexSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic per-resource version. Starts at zero and never decreases.
#[derive(Debug, Default)]
pub struct VersionCounter {
    value: AtomicU64,
}

impl VersionCounter {
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Increments the counter and returns the new version.
    pub fn bump(&self) -> u64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Version counters of every shared resource seen so far.
#[derive(Clone, Default)]
pub struct VersionTable {
    counters: Arc<DashMap<ResourceId, Arc<VersionCounter>>>,
}

impl VersionTable {
    pub fn new() -> Self {
        VersionTable::default()
    }

    /// Current version of `id`. A resource nobody committed to is at version zero.
    pub fn current(&self, id: &ResourceId) -> u64 {
        self.counters.get(id).map(|c| c.get()).unwrap_or(0)
    }

    pub fn bump(&self, id: &ResourceId) -> u64 {
        self.counter(id).bump()
    }

    pub fn counter(&self, id: &ResourceId) -> Arc<VersionCounter> {
        if let Some(counter) = self.counters.get(id) {
            return counter.clone();
        }
        self.counters
            .entry(id.clone())
            .or_insert_with(|| Arc::new(VersionCounter::default()))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

/// Resources one module touched during a transaction, with the versions seen at first
/// access and the subset the transaction mutates.
///
/// Every touched resource is validated, written or not, so two transactions with
/// overlapping writes can never both pass validation.
#[derive(Debug, Default)]
pub struct AccessSet {
    observed: IndexMap<ResourceId, u64>,
    written: IndexSet<ResourceId>,
}

impl AccessSet {
    pub fn new() -> Self {
        AccessSet::default()
    }

    /// Snapshots the version of `id` unless it was already observed.
    pub fn observe(&mut self, versions: &VersionTable, id: &ResourceId) {
        if !self.observed.contains_key(id) {
            let version = versions.current(id);
            log::trace!("Observed {} at version {}", id, version);
            self.observed.insert(id.clone(), version);
        }
    }

    /// Observes `id` and marks it as mutated by the transaction.
    pub fn write(&mut self, versions: &VersionTable, id: &ResourceId) {
        self.observe(versions, id);
        self.written.insert(id.clone());
    }

    /// Returns `true` when no observed resource changed version since it was snapshotted.
    pub fn validate(&self, versions: &VersionTable) -> bool {
        self.observed.iter().all(|(id, seen)| {
            let current = versions.current(id);
            if current != *seen {
                log::debug!(
                    "Version of {} moved from {} to {}, snapshot is stale",
                    id,
                    seen,
                    current
                );
                false
            } else {
                true
            }
        })
    }

    /// Bumps every written resource exactly once.
    pub fn publish(&self, versions: &VersionTable) {
        for id in &self.written {
            let version = versions.bump(id);
            log::trace!("Published {} at version {}", id, version);
        }
    }

    /// Version of `id` seen at first access, if the module touched it.
    pub fn snapshot(&self, id: &ResourceId) -> Option<u64> {
        self.observed.get(id).copied()
    }

    /// Returns `true` when `id` is still at the version seen at first access.
    pub fn is_current(&self, versions: &VersionTable, id: &ResourceId) -> bool {
        self.snapshot(id) == Some(versions.current(id))
    }

    pub fn observed(&self) -> impl Iterator<Item = &ResourceId> {
        self.observed.keys()
    }

    pub fn written(&self) -> impl Iterator<Item = &ResourceId> {
        self.written.iter()
    }

    pub fn is_written(&self, id: &ResourceId) -> bool {
        self.written.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }

    pub fn clear(&mut self) {
        self.observed.clear();
        self.written.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_resource_is_version_zero() {
        let table = VersionTable::new();
        assert_eq!(table.current(&ResourceId::named("a")), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn test_bump_is_monotonic() {
        let table = VersionTable::new();
        let id = ResourceId::named("a");
        assert_eq!(table.bump(&id), 1);
        assert_eq!(table.bump(&id), 2);
        assert_eq!(table.current(&id), 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_snapshot_taken_on_first_access_only() {
        let table = VersionTable::new();
        let id = ResourceId::named("a");
        let mut access = AccessSet::new();

        access.observe(&table, &id);
        table.bump(&id);
        access.observe(&table, &id);

        assert!(!access.validate(&table));
    }

    #[test]
    fn test_validate_after_foreign_commit() {
        let table = VersionTable::new();
        let a = ResourceId::named("a");
        let b = ResourceId::named("b");
        let mut access = AccessSet::new();
        access.observe(&table, &a);
        access.write(&table, &b);
        assert!(access.validate(&table));

        table.bump(&b);
        assert!(!access.validate(&table));
    }

    #[test]
    fn test_publish_bumps_written_once() {
        let table = VersionTable::new();
        let a = ResourceId::named("a");
        let b = ResourceId::named("b");
        let mut access = AccessSet::new();
        access.observe(&table, &a);
        access.write(&table, &b);
        access.write(&table, &b);

        access.publish(&table);
        assert_eq!(table.current(&a), 0);
        assert_eq!(table.current(&b), 1);
        assert!(access.is_written(&b));
        assert_eq!(access.written().count(), 1);
    }

    #[test]
    fn test_snapshot_and_is_current() {
        let table = VersionTable::new();
        let a = ResourceId::named("a");
        let mut access = AccessSet::new();
        assert_eq!(access.snapshot(&a), None);
        assert!(!access.is_current(&table, &a));

        table.bump(&a);
        access.observe(&table, &a);
        assert_eq!(access.snapshot(&a), Some(1));
        assert!(access.is_current(&table, &a));

        table.bump(&a);
        assert!(!access.is_current(&table, &a));
    }
}
