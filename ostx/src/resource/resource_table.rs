use crate::common::ResourceLockTable;
use crate::errors::{ErrorKind, OstxError, OstxResult};
use crate::resource::{PipePair, VersionTable};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// State shared by every transaction of one manager: version counters, commit locks and the
/// pipes opened through the manager.
///
/// Cloning is cheap and every clone refers to the same table.
#[derive(Clone, Default)]
pub struct ResourceTable {
    inner: Arc<ResourceTableInner>,
}

#[derive(Default)]
struct ResourceTableInner {
    versions: VersionTable,
    locks: ResourceLockTable,
    pipes: DashMap<u64, PipePair>,
    next_pipe_id: AtomicU64,
}

impl ResourceTable {
    pub fn new() -> Self {
        ResourceTable::default()
    }

    pub fn versions(&self) -> &VersionTable {
        &self.inner.versions
    }

    pub fn locks(&self) -> &ResourceLockTable {
        &self.inner.locks
    }

    /// Opens a new anonymous pipe and registers it with the table.
    pub fn open_pipe(&self) -> OstxResult<PipePair> {
        let id = self.inner.next_pipe_id.fetch_add(1, Ordering::Relaxed);
        let pipe = PipePair::open(id)?;
        self.inner.pipes.insert(id, pipe.clone());
        Ok(pipe)
    }

    pub fn pipe(&self, id: u64) -> OstxResult<PipePair> {
        self.inner
            .pipes
            .get(&id)
            .map(|p| p.clone())
            .ok_or_else(|| {
                OstxError::new(&format!("Pipe {} is not registered", id), ErrorKind::NotFound)
            })
    }

    /// Forgets a pipe. The OS object is closed once the last handle is dropped.
    pub fn close_pipe(&self, id: u64) -> bool {
        self.inner.pipes.remove(&id).is_some()
    }

    pub fn pipe_count(&self) -> usize {
        self.inner.pipes.len()
    }
}
