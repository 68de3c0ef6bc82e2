//! Notification handler registration and fan-out.
//!
//! The IO task hands every notification it reads to a
//! [`NotificationDispatcher`], which broadcasts it to subscribers and calls
//! the handler currently stored in the shared [`HandlerSlot`]. The slot can
//! be replaced from any task while the IO loop is running.

use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, info};

use hcm_core::events::NotificationEvent;

/// Callback for unsolicited notifications.
///
/// Called on the IO task, so implementations must return quickly; hand heavy
/// work off to another task. Closures taking `&NotificationEvent` implement
/// this trait.
pub trait NotificationHandler: Send + Sync + 'static {
    fn handle(&self, event: &NotificationEvent);
}

impl<F> NotificationHandler for F
where
    F: Fn(&NotificationEvent) + Send + Sync + 'static,
{
    fn handle(&self, event: &NotificationEvent) {
        self(event)
    }
}

/// Shared, swappable reference to the active notification handler.
///
/// At most one handler is active; the last registration wins.
#[derive(Clone, Default)]
pub struct HandlerSlot {
    inner: Arc<RwLock<Option<Arc<dyn NotificationHandler>>>>,
}

impl HandlerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler`, replacing any previous one.
    pub fn replace<H: NotificationHandler>(&self, handler: H) {
        let handler: Arc<dyn NotificationHandler> = Arc::new(handler);
        *self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handler);
    }

    /// Remove the handler; notifications go to the default sink.
    pub fn clear(&self) {
        *self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    /// The handler active right now.
    pub fn current(&self) -> Option<Arc<dyn NotificationHandler>> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_set(&self) -> bool {
        self.current().is_some()
    }
}

impl std::fmt::Debug for HandlerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSlot")
            .field("set", &self.is_set())
            .finish()
    }
}

/// Routes parsed notifications to subscribers and the registered handler.
pub struct NotificationDispatcher {
    handlers: HandlerSlot,
    event_tx: broadcast::Sender<NotificationEvent>,
}

impl NotificationDispatcher {
    pub fn new(handlers: HandlerSlot, event_tx: broadcast::Sender<NotificationEvent>) -> Self {
        Self { handlers, event_tx }
    }

    /// Deliver one event.
    ///
    /// The handler reference is cloned out of the slot before it is called,
    /// so a concurrent `replace()` never blocks on a running handler.
    pub fn dispatch(&self, event: NotificationEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event.clone());

        match self.handlers.current() {
            Some(handler) => handler.handle(&event),
            None => info!(kind = %event.kind, "[URC] {}", event.raw),
        }
    }

    /// Drop an event that arrived while the listener was stopped.
    pub fn discard(&self, event: &NotificationEvent) {
        debug!(raw = %event.raw, "notification listener stopped, dropping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn stat() -> NotificationEvent {
        NotificationEvent {
            kind: "QBLESTAT".into(),
            fields: vec!["1".into()],
            raw: "+QBLESTAT:1".into(),
        }
    }

    #[test]
    fn slot_last_registration_wins() {
        let slot = HandlerSlot::new();
        assert!(!slot.is_set());

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&first);
        slot.replace(move |_: &NotificationEvent| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let s = Arc::clone(&second);
        slot.replace(move |_: &NotificationEvent| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        slot.current().unwrap().handle(&stat());
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        slot.clear();
        assert!(!slot.is_set());
    }

    #[test]
    fn dispatch_reaches_handler_and_subscribers() {
        let slot = HandlerSlot::new();
        let (event_tx, mut event_rx) = broadcast::channel(8);
        let dispatcher = NotificationDispatcher::new(slot.clone(), event_tx);

        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        slot.replace(move |ev: &NotificationEvent| {
            assert_eq!(ev.kind, "QBLESTAT");
            c.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.dispatch(stat());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(event_rx.try_recv().unwrap(), stat());
    }

    #[test]
    fn dispatch_without_handler_uses_default_sink() {
        let (event_tx, mut event_rx) = broadcast::channel(8);
        let dispatcher = NotificationDispatcher::new(HandlerSlot::new(), event_tx);

        dispatcher.dispatch(stat());
        assert_eq!(event_rx.try_recv().unwrap().raw, "+QBLESTAT:1");
    }
}
