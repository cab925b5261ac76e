use crate::common::{ModuleKind, OstxEventBus};
use crate::errors::OstxResult;
use crate::transaction::{CommitOutcome, TransactionId};
use anyhow::Error;
use basu::error::BasuError;
use basu::event::Event;
use basu::Handle;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Event bus carrying transaction events.
pub type TransactionEventBus = OstxEventBus<TransactionEventInfo, TransactionEventListener>;

/// Published once per transaction, after every participant has been released.
#[derive(Clone)]
pub struct TransactionEventInfo {
    inner: Arc<TransactionEventInner>,
}

struct TransactionEventInner {
    id: TransactionId,
    outcome: CommitOutcome,
    participants: Vec<ModuleKind>,
    started_at: DateTime<Utc>,
    timestamp: DateTime<Utc>,
}

impl TransactionEventInfo {
    pub(crate) fn new(
        id: TransactionId,
        outcome: CommitOutcome,
        participants: Vec<ModuleKind>,
        started_at: DateTime<Utc>,
    ) -> Self {
        TransactionEventInfo {
            inner: Arc::new(TransactionEventInner {
                id,
                outcome,
                participants,
                started_at,
                timestamp: Utc::now(),
            }),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.inner.id
    }

    pub fn outcome(&self) -> CommitOutcome {
        self.inner.outcome
    }

    /// Participating module kinds in lock order.
    pub fn participants(&self) -> &[ModuleKind] {
        &self.inner.participants
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Time the transaction reached `RELEASED`.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.inner.timestamp
    }

    pub fn elapsed(&self) -> Duration {
        (self.inner.timestamp - self.inner.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

impl Debug for TransactionEventInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionEventInfo")
            .field("id", &self.id())
            .field("outcome", &self.outcome())
            .field("participants", &self.participants())
            .field("timestamp", &self.timestamp())
            .finish()
    }
}

/// Closure signature accepted by [`TransactionEventListener::new`].
pub trait TransactionEventCallback:
    Send + Sync + Fn(TransactionEventInfo) -> OstxResult<()>
{
}

impl<F> TransactionEventCallback for F where
    F: Send + Sync + Fn(TransactionEventInfo) -> OstxResult<()>
{
}

/// Listener notified of every released transaction.
///
/// ```ignore
/// manager.subscribe(TransactionEventListener::new(|event| {
///     println!("{} -> {}", event.id(), event.outcome());
///     Ok(())
/// }))?;
/// ```
#[derive(Clone)]
pub struct TransactionEventListener {
    on_event: Arc<dyn TransactionEventCallback>,
}

impl TransactionEventListener {
    pub fn new(on_event: impl TransactionEventCallback + 'static) -> Self {
        TransactionEventListener {
            on_event: Arc::new(on_event),
        }
    }
}

impl Handle<TransactionEventInfo> for TransactionEventListener {
    fn handle(&self, event: &Event<TransactionEventInfo>) -> Result<(), BasuError> {
        match (self.on_event)(event.data.clone()) {
            Ok(_) => Ok(()),
            Err(e) => Err(BasuError::HandlerError(Error::from(e))),
        }
    }
}

impl Debug for TransactionEventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionEventListener").finish()
    }
}
