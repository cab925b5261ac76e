use crate::resource::{ResourceTable, VersionTable};
use crate::common::ResourceLockTable;
use crate::transaction::TransactionId;
use crate::tx_config::TxConfig;
use std::sync::Arc;

/// Transaction-scoped state handed to every module operation.
///
/// Carries the transaction identity together with the shared resource table and the
/// configuration, so modules never reach for process-wide state.
#[derive(Clone)]
pub struct TransactionContext {
    inner: Arc<TransactionContextInner>,
}

struct TransactionContextInner {
    id: TransactionId,
    resources: ResourceTable,
    config: TxConfig,
}

impl TransactionContext {
    pub fn new(resources: ResourceTable, config: TxConfig) -> Self {
        TransactionContext {
            inner: Arc::new(TransactionContextInner {
                id: TransactionId::new(),
                resources,
                config,
            }),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.inner.id
    }

    pub fn resources(&self) -> &ResourceTable {
        &self.inner.resources
    }

    pub fn versions(&self) -> &VersionTable {
        self.inner.resources.versions()
    }

    pub fn locks(&self) -> &ResourceLockTable {
        self.inner.resources.locks()
    }

    pub fn config(&self) -> &TxConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.inner.id)
            .finish()
    }
}
