use crate::common::TRANSACTION_EVENT;
use crate::errors::{ErrorKind, OstxError, OstxResult};
use basu::error::BasuError;
use basu::event::Event;
use basu::{EventBus, Handle, HandlerId};
use std::marker::PhantomData;
use std::sync::Arc;

/// Publishes transaction lifecycle events to registered listeners.
///
/// Publishing with no listeners registered is a cheap no-op, so the coordinator can publish
/// after every transaction unconditionally.
///
/// # Example
///
/// ```ignore
/// let event_bus: OstxEventBus<E, L> = OstxEventBus::new();
/// let subscriber = event_bus.register(listener)?;
/// event_bus.publish(event)?;
/// event_bus.deregister(subscriber)?;
/// ```
#[derive(Clone)]
pub struct OstxEventBus<E, L> {
    inner: Arc<OstxEventBusInner<E, L>>,
}

impl<E, L> Default for OstxEventBus<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E, L> OstxEventBus<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    pub fn new() -> Self {
        OstxEventBus {
            inner: Arc::new(OstxEventBusInner::new()),
        }
    }

    pub fn register(&self, listener: L) -> OstxResult<SubscriberRef> {
        self.inner.register(listener)
    }

    pub fn deregister(&self, subscriber: SubscriberRef) -> OstxResult<()> {
        self.inner.deregister(subscriber)
    }

    pub fn publish(&self, event: E) -> OstxResult<()> {
        self.inner.publish(event)
    }

    /// Clears all registered listeners.
    pub fn close(&self) -> OstxResult<()> {
        self.inner.close()
    }

    pub fn has_listeners(&self) -> bool {
        self.inner.has_listeners()
    }
}

/// Handle returned by [`OstxEventBus::register`], used to deregister the listener.
pub struct SubscriberRef {
    pub(crate) inner: HandlerId,
}

impl SubscriberRef {
    pub fn new(inner: HandlerId) -> Self {
        SubscriberRef { inner }
    }
}

struct OstxEventBusInner<E, L> {
    event_bus: EventBus<E>,
    phantom_data: PhantomData<L>,
}

impl<E, L> OstxEventBusInner<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    fn new() -> Self {
        OstxEventBusInner {
            event_bus: EventBus::new(),
            phantom_data: PhantomData,
        }
    }

    fn register(&self, listener: L) -> OstxResult<SubscriberRef> {
        self.event_bus
            .subscribe(TRANSACTION_EVENT, Box::new(listener))
            .map(SubscriberRef::new)
            .map_err(Self::ostx_error)
    }

    fn deregister(&self, subscriber: SubscriberRef) -> OstxResult<()> {
        self.event_bus
            .unsubscribe(TRANSACTION_EVENT, &subscriber.inner)
            .map_err(Self::ostx_error)
    }

    fn publish(&self, event: E) -> OstxResult<()> {
        if !self.has_listeners() {
            return Ok(());
        }

        let basu_event = Event::new(event);
        self.event_bus
            .publish(TRANSACTION_EVENT, &basu_event)
            .map_err(Self::ostx_error)
    }

    fn close(&self) -> OstxResult<()> {
        self.event_bus.clear().map_err(Self::ostx_error)
    }

    fn has_listeners(&self) -> bool {
        match self.event_bus.get_handler_count(TRANSACTION_EVENT) {
            Ok(count) => count > 0,
            Err(BasuError::EventTypeNotFOUND) => false,
            Err(e) => {
                log::warn!("Failed to check listeners: {}, defaulting to false", e);
                false
            }
        }
    }

    fn ostx_error(e: BasuError) -> OstxError {
        match e {
            BasuError::EventTypeNotFOUND => OstxError::new(
                "Event bus error: no listener registered for transaction events",
                ErrorKind::EventError,
            ),
            BasuError::MutexPoisoned => OstxError::new(
                "Event bus error: internal mutex poisoned",
                ErrorKind::EventError,
            ),
            BasuError::HandlerError(e) => {
                let error_message = e
                    .source()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| e.to_string());
                OstxError::new(
                    &format!("Event handler error: {}", error_message),
                    ErrorKind::EventError,
                )
            }
        }
    }
}
