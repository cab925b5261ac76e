use crate::errors::{OstxError, OstxResult};
use crate::manager::TransactionManager;
use crate::tx_config::TxConfig;
use std::time::Duration;

/// Fluent builder for [`TransactionManager`].
///
/// Setters never fail. The first invalid value is captured and returned by
/// [`build`](Self::build).
///
/// # Examples
///
/// ```rust
/// use ostx::TransactionManager;
/// use std::time::Duration;
///
/// let manager = TransactionManager::builder()
///     .lock_timeout(Duration::from_millis(20))
///     .max_retries(3)
///     .validate_on_yield(false)
///     .build()
///     .unwrap();
/// assert_eq!(manager.config().max_retries(), 3);
///
/// assert!(TransactionManager::builder()
///     .lock_timeout(Duration::ZERO)
///     .build()
///     .is_err());
/// ```
#[derive(Default)]
pub struct TransactionManagerBuilder {
    error: Option<OstxError>,
    config: TxConfig,
}

impl TransactionManagerBuilder {
    pub fn new() -> Self {
        TransactionManagerBuilder {
            error: None,
            config: TxConfig::new(),
        }
    }

    /// Upper bound on the wait for each resource lock at commit. Must be non-zero.
    pub fn lock_timeout(self, timeout: Duration) -> Self {
        self.capture(|config| config.set_lock_timeout(timeout))
    }

    pub fn max_retries(self, retries: u32) -> Self {
        self.capture(|config| config.set_max_retries(retries))
    }

    /// Base retry delay used by [`TransactionManager::run`].
    pub fn retry_backoff(self, backoff: Duration) -> Self {
        self.capture(|config| config.set_retry_backoff(backoff))
    }

    /// Whether scheduler yields inside a transaction validate early.
    pub fn validate_on_yield(self, enabled: bool) -> Self {
        self.capture(|config| config.set_validate_on_yield(enabled))
    }

    /// Builds the manager, or returns the first configuration error.
    pub fn build(self) -> OstxResult<TransactionManager> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(TransactionManager::with_config(self.config)),
        }
    }

    fn capture<F>(mut self, set: F) -> Self
    where
        F: FnOnce(&TxConfig) -> OstxResult<()>,
    {
        if self.error.is_none() {
            if let Err(e) = set(&self.config) {
                self.error = Some(e);
            }
        }
        self
    }
}
