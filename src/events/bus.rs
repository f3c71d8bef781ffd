//! Process-wide publish/subscribe registry keyed by event name.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::events::kind::{Event, EventKind};

/// Error a listener may report. It is logged and does not stop delivery.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// A subscriber callback.
pub type Listener = Arc<dyn Fn(&Event) -> Result<(), ListenerError> + Send + Sync>;

/// Handle identifying one registration, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("event `{name}` has not been declared")]
    UnknownEvent { name: String },
}

type Topic = Arc<RwLock<Vec<(SubscriptionId, Listener)>>>;

/// Synchronous event bus.
///
/// Every name must be declared before it can be published or subscribed to.
/// Listeners for one name are called in subscription order; registrations
/// are snapshotted at publish time, so a listener may subscribe or
/// unsubscribe without deadlocking the bus.
pub struct EventBus {
    topics: DashMap<EventKind, Topic>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create a bus with the request/response lifecycle names and
    /// `request:interrupt` already declared.
    pub fn new() -> Self {
        let bus = Self {
            topics: DashMap::new(),
            next_id: AtomicU64::new(1),
        };
        for kind in EventKind::builtin() {
            bus.declare_kind(kind);
        }
        bus
    }

    /// Declare a new event name. Declaring an existing name is a no-op.
    pub fn declare(&self, name: &str) {
        self.declare_kind(EventKind::from_name(name));
    }

    fn declare_kind(&self, kind: EventKind) {
        self.topics.entry(kind).or_default();
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.topics.contains_key(&EventKind::from_name(name))
    }

    /// Register `listener` for `name`. Registering the same callback twice
    /// means it is called twice per event.
    pub fn subscribe<F>(&self, name: &str, listener: F) -> Result<SubscriptionId, BusError>
    where
        F: Fn(&Event) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.subscribe_kind(&EventKind::from_name(name), Arc::new(listener))
    }

    /// Register one listener against every name declared at call time.
    pub fn subscribe_all<F>(&self, listener: F) -> Vec<(EventKind, SubscriptionId)>
    where
        F: Fn(&Event) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let kinds: Vec<EventKind> = self.topics.iter().map(|t| t.key().clone()).collect();
        kinds
            .into_iter()
            .filter_map(|kind| {
                let id = self.subscribe_kind(&kind, listener.clone()).ok()?;
                Some((kind, id))
            })
            .collect()
    }

    pub(crate) fn subscribe_kind(
        &self,
        kind: &EventKind,
        listener: Listener,
    ) -> Result<SubscriptionId, BusError> {
        let topic = self.topic(kind)?;
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        topic.write().push((id, listener));
        Ok(id)
    }

    /// Remove one registration. Returns whether it was present.
    pub fn unsubscribe(&self, name: &str, id: SubscriptionId) -> Result<bool, BusError> {
        let topic = self.topic(&EventKind::from_name(name))?;
        let mut listeners = topic.write();
        let before = listeners.len();
        listeners.retain(|(sub, _)| *sub != id);
        Ok(listeners.len() != before)
    }

    /// Deliver `event` to every listener of its name. Returns how many
    /// listeners completed without error.
    pub fn publish(&self, event: &Event) -> Result<usize, BusError> {
        let snapshot: Vec<Listener> = {
            let topic = self.topic(&event.kind)?;
            let listeners = topic.read();
            listeners.iter().map(|(_, l)| l.clone()).collect()
        };

        let mut delivered = 0;
        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::error!(
                        event = %event.kind,
                        request_id = %event.request_id,
                        error = %e,
                        "Event listener failed"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        event = %event.kind,
                        request_id = %event.request_id,
                        "Event listener panicked"
                    );
                }
            }
        }
        Ok(delivered)
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.topics
            .get(&EventKind::from_name(name))
            .map(|t| t.read().len())
            .unwrap_or(0)
    }

    fn topic(&self, kind: &EventKind) -> Result<Topic, BusError> {
        self.topics
            .get(kind)
            .map(|t| t.value().clone())
            .ok_or_else(|| BusError::UnknownEvent { name: kind.name().into_owned() })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
