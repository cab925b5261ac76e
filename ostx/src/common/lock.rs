use crate::errors::{ErrorKind, OstxError, OstxResult};
use crate::resource::ResourceId;
use crate::transaction::TransactionId;
use itertools::Itertools;
use parking_lot::{Condvar, Mutex, RwLock};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An exclusive, owner-tagged lock on one shared resource.
///
/// Unlike a guard-based mutex the lock is held by a transaction id, so it can be taken in
/// `lock()` and given back in `unlock()` without keeping a guard alive in between.
pub struct ResourceLock {
    owner: Mutex<Option<TransactionId>>,
    released: Condvar,
}

impl ResourceLock {
    fn new() -> Self {
        ResourceLock {
            owner: Mutex::new(None),
            released: Condvar::new(),
        }
    }

    /// Tries to take the lock for `owner`, waiting at most `timeout`.
    ///
    /// Re-acquiring a lock already held by `owner` succeeds immediately.
    pub fn try_acquire_for(&self, owner: TransactionId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self.owner.lock();
        loop {
            match *slot {
                None => {
                    *slot = Some(owner);
                    return true;
                }
                Some(holder) if holder == owner => return true,
                Some(_) => {}
            }
            if self.released.wait_until(&mut slot, deadline).timed_out() {
                if slot.is_none() {
                    *slot = Some(owner);
                    return true;
                }
                return false;
            }
        }
    }

    /// Gives the lock back. Returns `false` if `owner` did not hold it.
    pub fn release(&self, owner: TransactionId) -> bool {
        let mut slot = self.owner.lock();
        if *slot == Some(owner) {
            *slot = None;
            self.released.notify_all();
            true
        } else {
            false
        }
    }

    pub fn holder(&self) -> Option<TransactionId> {
        *self.owner.lock()
    }
}

/// Registry of per-resource commit locks.
///
/// Locks are created lazily on first use and shared by every transaction of the owning
/// [`ResourceTable`](crate::resource::ResourceTable).
///
/// # Examples
///
/// ```
/// use ostx::common::ResourceLockTable;
/// use ostx::resource::ResourceId;
/// use ostx::transaction::TransactionId;
/// use std::time::Duration;
///
/// let table = ResourceLockTable::new();
/// let owner = TransactionId::new();
/// let id = ResourceId::named("counter");
/// assert!(table.acquire(&id, owner, Duration::from_millis(10)));
/// assert!(table.release(&id, owner));
/// ```
#[derive(Clone)]
pub struct ResourceLockTable {
    locks: Arc<RwLock<HashMap<ResourceId, Arc<ResourceLock>>>>,
}

impl ResourceLockTable {
    /// Creates a new empty lock table.
    pub fn new() -> Self {
        ResourceLockTable {
            locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Gets the lock for the given resource, creating it if needed.
    pub fn get_lock(&self, id: &ResourceId) -> Arc<ResourceLock> {
        if let Some(lock) = self.locks.read().get(id) {
            return lock.clone();
        }
        let mut locks = self.locks.write();
        locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(ResourceLock::new()))
            .clone()
    }

    pub fn acquire(&self, id: &ResourceId, owner: TransactionId, timeout: Duration) -> bool {
        self.get_lock(id).try_acquire_for(owner, timeout)
    }

    pub fn release(&self, id: &ResourceId, owner: TransactionId) -> bool {
        let lock = self.locks.read().get(id).cloned();
        match lock {
            Some(lock) => lock.release(owner),
            None => false,
        }
    }

    /// Returns the transaction currently holding the resource, if any.
    pub fn holder(&self, id: &ResourceId) -> Option<TransactionId> {
        self.locks.read().get(id).and_then(|lock| lock.holder())
    }

    /// Returns the number of locks currently registered.
    pub fn lock_count(&self) -> usize {
        self.locks.read().len()
    }
}

impl Default for ResourceLockTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The resource locks one module holds during a commit.
///
/// Acquisition always happens in ascending [`ResourceId`] order so that two transactions
/// touching the same resources can never wait on each other in a cycle.
#[derive(Debug, Default)]
pub struct HeldLocks {
    held: SmallVec<[ResourceId; 4]>,
}

impl HeldLocks {
    pub fn new() -> Self {
        HeldLocks::default()
    }

    /// Acquires every resource in `ids` in canonical order.
    ///
    /// On failure everything acquired by this call is released again before the error is
    /// returned, so the caller never has to clean up a partial acquisition.
    pub fn acquire_all<I>(
        &mut self,
        table: &ResourceLockTable,
        ids: I,
        owner: TransactionId,
        timeout: Duration,
    ) -> OstxResult<()>
    where
        I: IntoIterator<Item = ResourceId>,
    {
        let ordered = ids.into_iter().sorted().dedup().collect::<Vec<_>>();
        for id in ordered {
            if self.held.contains(&id) {
                continue;
            }
            if !table.acquire(&id, owner, timeout) {
                log::warn!(
                    "Transaction {} timed out after {:?} waiting for {} (held by {:?})",
                    owner,
                    timeout,
                    id,
                    table.holder(&id)
                );
                self.release_all(table, owner);
                return Err(OstxError::new(
                    &format!("Resource {} is busy", id),
                    ErrorKind::ResourceBusy,
                ));
            }
            self.held.push(id);
        }
        Ok(())
    }

    /// Releases every held lock, newest first.
    pub fn release_all(&mut self, table: &ResourceLockTable, owner: TransactionId) {
        while let Some(id) = self.held.pop() {
            if !table.release(&id, owner) {
                log::warn!("Transaction {} released {} without holding it", owner, id);
            }
        }
    }

    pub fn holds(&self, id: &ResourceId) -> bool {
        self.held.contains(id)
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}
