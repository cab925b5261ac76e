//! Transaction manager configuration.

use crate::common::{
    atomic, Atomic, CopyExecutor, DEFAULT_LOCK_TIMEOUT, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_BACKOFF, MAX_RETRY_BACKOFF,
};
use crate::errors::{ErrorKind, OstxError, OstxResult};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Settings shared by every transaction of a manager.
///
/// Values can be changed until the owning manager is built; afterwards the configuration is
/// frozen and every setter fails with [`ErrorKind::InvalidOperation`].
///
/// # Examples
///
/// ```rust
/// use ostx::TxConfig;
/// use std::time::Duration;
///
/// let config = TxConfig::new();
/// config.set_lock_timeout(Duration::from_millis(50)).unwrap();
/// assert_eq!(config.lock_timeout(), Duration::from_millis(50));
/// assert!(config.set_lock_timeout(Duration::ZERO).is_err());
/// ```
#[derive(Clone)]
pub struct TxConfig {
    inner: Arc<TxConfigInner>,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TxConfig {
    pub fn new() -> Self {
        TxConfig {
            inner: Arc::new(TxConfigInner::new()),
        }
    }

    /// Upper bound on the wait for a single resource lock during commit.
    pub fn lock_timeout(&self) -> Duration {
        self.inner.lock_timeout.get()
    }

    /// # Errors
    ///
    /// Returns error if frozen or if `timeout` is zero.
    pub fn set_lock_timeout(&self, timeout: Duration) -> OstxResult<()> {
        self.inner.set_lock_timeout(timeout)
    }

    /// Number of times [`TransactionManager::run`](crate::TransactionManager::run) re-runs a
    /// transaction that aborted for a retryable reason.
    pub fn max_retries(&self) -> u32 {
        self.inner.max_retries.load(Ordering::Relaxed)
    }

    pub fn set_max_retries(&self, retries: u32) -> OstxResult<()> {
        self.inner.ensure_mutable("max_retries")?;
        self.inner.max_retries.store(retries, Ordering::Relaxed);
        Ok(())
    }

    /// Base delay between retries. The actual delay doubles per attempt, is capped and
    /// jittered.
    pub fn retry_backoff(&self) -> Duration {
        self.inner.retry_backoff.get()
    }

    /// # Errors
    ///
    /// Returns error if frozen or if `backoff` exceeds the maximum backoff.
    pub fn set_retry_backoff(&self, backoff: Duration) -> OstxResult<()> {
        self.inner.set_retry_backoff(backoff)
    }

    /// Whether a scheduler yield inside a transaction runs early validation.
    pub fn validate_on_yield(&self) -> bool {
        self.inner.validate_on_yield.load(Ordering::Relaxed)
    }

    pub fn set_validate_on_yield(&self, enabled: bool) -> OstxResult<()> {
        self.inner.ensure_mutable("validate_on_yield")?;
        self.inner.validate_on_yield.store(enabled, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.load(Ordering::Acquire)
    }

    pub(crate) fn freeze(&self) {
        self.inner.frozen.store(true, Ordering::Release);
    }

    /// Delay before retry number `attempt` (zero based), without jitter.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.retry_backoff();
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        base.saturating_mul(factor).min(MAX_RETRY_BACKOFF)
    }
}

impl std::fmt::Debug for TxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxConfig")
            .field("lock_timeout", &self.lock_timeout())
            .field("max_retries", &self.max_retries())
            .field("retry_backoff", &self.retry_backoff())
            .field("validate_on_yield", &self.validate_on_yield())
            .finish()
    }
}

struct TxConfigInner {
    frozen: AtomicBool,
    lock_timeout: Atomic<Duration>,
    max_retries: AtomicU32,
    retry_backoff: Atomic<Duration>,
    validate_on_yield: AtomicBool,
}

impl TxConfigInner {
    fn new() -> Self {
        TxConfigInner {
            frozen: AtomicBool::new(false),
            lock_timeout: atomic(DEFAULT_LOCK_TIMEOUT),
            max_retries: AtomicU32::new(DEFAULT_MAX_RETRIES),
            retry_backoff: atomic(DEFAULT_RETRY_BACKOFF),
            validate_on_yield: AtomicBool::new(true),
        }
    }

    fn ensure_mutable(&self, setting: &str) -> OstxResult<()> {
        if self.frozen.load(Ordering::Acquire) {
            log::error!("{} cannot be changed after the manager is built", setting);
            return Err(OstxError::new(
                &format!("{} cannot be changed after the manager is built", setting),
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }

    fn set_lock_timeout(&self, timeout: Duration) -> OstxResult<()> {
        self.ensure_mutable("lock_timeout")?;
        if timeout.is_zero() {
            log::error!("Lock timeout must be greater than zero");
            return Err(OstxError::new(
                "Lock timeout must be greater than zero",
                ErrorKind::InvalidConfig,
            ));
        }
        let previous = self.lock_timeout.replace(timeout);
        log::debug!("Lock timeout changed from {:?} to {:?}", previous, timeout);
        Ok(())
    }

    fn set_retry_backoff(&self, backoff: Duration) -> OstxResult<()> {
        self.ensure_mutable("retry_backoff")?;
        if backoff > MAX_RETRY_BACKOFF {
            log::error!(
                "Retry backoff {:?} exceeds the maximum of {:?}",
                backoff,
                MAX_RETRY_BACKOFF
            );
            return Err(OstxError::new(
                &format!(
                    "Retry backoff {:?} exceeds the maximum of {:?}",
                    backoff, MAX_RETRY_BACKOFF
                ),
                ErrorKind::InvalidConfig,
            ));
        }
        let previous = self.retry_backoff.replace(backoff);
        log::debug!("Retry backoff changed from {:?} to {:?}", previous, backoff);
        Ok(())
    }
}
