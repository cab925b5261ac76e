use crate::common::SubscriberRef;
use crate::errors::OstxResult;
use crate::manager_builder::TransactionManagerBuilder;
use crate::resource::{PipePair, ResourceTable};
use crate::transaction::{
    CommitOutcome, StatsSnapshot, Transaction, TransactionContext, TransactionEventBus,
    TransactionEventListener, TransactionHooks, TransactionStats,
};
use crate::tx_config::TxConfig;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Entry point of the crate: owns the shared resource table and begins transactions.
///
/// Cloning is cheap and every clone shares the same resources, configuration, statistics
/// and listeners, so a manager can be handed to as many threads as needed.
///
/// # Examples
///
/// ```rust
/// use ostx::{pipe, TransactionManager};
///
/// let manager = TransactionManager::new();
/// let channel = manager.open_pipe().unwrap();
///
/// manager.run(|tx| pipe::write(tx, &channel, b"ping")).unwrap();
/// assert_eq!(channel.read(4).unwrap(), b"ping");
/// assert_eq!(manager.stats().committed, 1);
/// ```
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<TransactionManagerInner>,
}

struct TransactionManagerInner {
    resources: ResourceTable,
    config: TxConfig,
    event_bus: TransactionEventBus,
    stats: TransactionStats,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    /// Creates a manager with default configuration.
    pub fn new() -> Self {
        Self::with_config(TxConfig::new())
    }

    pub fn builder() -> TransactionManagerBuilder {
        TransactionManagerBuilder::new()
    }

    pub(crate) fn with_config(config: TxConfig) -> Self {
        config.freeze();
        log::debug!("Transaction manager created with {:?}", config);
        TransactionManager {
            inner: Arc::new(TransactionManagerInner {
                resources: ResourceTable::new(),
                config,
                event_bus: TransactionEventBus::new(),
                stats: TransactionStats::new(),
            }),
        }
    }

    pub fn config(&self) -> &TxConfig {
        &self.inner.config
    }

    pub fn resources(&self) -> &ResourceTable {
        &self.inner.resources
    }

    /// Starts a new transaction in phase `ACTIVE`.
    pub fn begin(&self) -> Transaction {
        self.inner.stats.record_started();
        let ctx = TransactionContext::new(self.inner.resources.clone(), self.inner.config.clone());
        Transaction::with_hooks(
            ctx,
            Some(TransactionHooks {
                event_bus: self.inner.event_bus.clone(),
                stats: self.inner.stats.clone(),
            }),
        )
    }

    /// Runs `body` in a transaction and commits it, retrying on contention.
    ///
    /// A body error or an abort whose cause is retryable (lock timeout or validation
    /// conflict) re-runs `body` in a fresh transaction, up to `max_retries` times, with a
    /// jittered exponential backoff in between. Any other error is returned at once.
    ///
    /// `body` may run several times and must not perform effects outside the transaction.
    pub fn run<R, F>(&self, mut body: F) -> OstxResult<R>
    where
        F: FnMut(&mut Transaction) -> OstxResult<R>,
    {
        let max_retries = self.inner.config.max_retries();
        let mut attempt = 0;
        loop {
            let mut tx = self.begin();
            let error = match body(&mut tx) {
                Ok(value) => match tx.commit()? {
                    CommitOutcome::Committed => return Ok(value),
                    aborted => match aborted.into_result() {
                        Err(e) => e,
                        Ok(()) => return Ok(value),
                    },
                },
                Err(e) => {
                    if tx.is_active() {
                        tx.abort()?;
                    }
                    e
                }
            };

            if !error.is_retryable() || attempt >= max_retries {
                if error.is_retryable() {
                    log::warn!(
                        "Transaction gave up after {} attempts: {}",
                        attempt + 1,
                        error
                    );
                }
                return Err(error);
            }

            let delay = self.jittered_backoff(attempt);
            log::warn!(
                "Transaction {} attempt {} failed ({}), retrying in {:?}",
                tx.id(),
                attempt + 1,
                error,
                delay
            );
            self.inner.stats.record_retry();
            drop(tx);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            attempt += 1;
        }
    }

    /// Registers a listener notified after every released transaction.
    pub fn subscribe(&self, listener: TransactionEventListener) -> OstxResult<SubscriberRef> {
        self.inner.event_bus.register(listener)
    }

    pub fn unsubscribe(&self, subscriber: SubscriberRef) -> OstxResult<()> {
        self.inner.event_bus.deregister(subscriber)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Opens an anonymous pipe whose reads and writes can take part in transactions.
    pub fn open_pipe(&self) -> OstxResult<PipePair> {
        self.inner.resources.open_pipe()
    }

    /// Removes every listener.
    pub fn close(&self) -> OstxResult<()> {
        self.inner.event_bus.close()
    }

    fn jittered_backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.inner.config.backoff_for(attempt);
        if ceiling.is_zero() {
            return ceiling;
        }
        let nanos = rand::thread_rng().gen_range(0..=ceiling.as_nanos() as u64);
        Duration::from_nanos(nanos)
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}
