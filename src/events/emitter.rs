//! Translates transport-level signals into bus events for one side of an exchange.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::events::bus::EventBus;
use crate::events::kind::{Event, EventKind, EventPayload, Side, Signal};
use crate::request::RequestId;

const OPEN: u8 = 0;
const ERRORED: u8 = 1;
const CLOSED: u8 = 2;

/// Publishes `request:*` or `response:*` events tagged with one request identity.
///
/// `error` suppresses any later `data`/`end`; `close` is published at most
/// once and nothing is published after it.
pub struct LifecycleEmitter {
    bus: Arc<EventBus>,
    request_id: RequestId,
    side: Side,
    started: AtomicBool,
    state: AtomicU8,
    created_at: Instant,
}

impl LifecycleEmitter {
    pub fn new(bus: Arc<EventBus>, request_id: RequestId, side: Side) -> Self {
        Self {
            bus,
            request_id,
            side,
            started: AtomicBool::new(false),
            state: AtomicU8::new(OPEN),
            created_at: Instant::now(),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Time since the emitter was attached.
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == CLOSED
    }

    /// Publish the synthetic `start` signal. Only the first call publishes.
    pub fn start(&self, deadline: Option<Duration>) -> bool {
        if self.started.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.emit(Signal::Start, EventPayload::Start { deadline })
    }

    pub fn data(&self, size: usize) -> bool {
        self.emit(Signal::Data, EventPayload::Chunk { size })
    }

    pub fn end(&self) -> bool {
        self.emit(Signal::End, EventPayload::Elapsed { elapsed: self.elapsed() })
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        if self
            .state
            .compare_exchange(OPEN, ERRORED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.publish(Signal::Error, EventPayload::Error { message: message.into() })
    }

    pub fn close(&self) -> bool {
        if self.state.swap(CLOSED, Ordering::AcqRel) == CLOSED {
            return false;
        }
        self.publish(Signal::Close, EventPayload::Elapsed { elapsed: self.elapsed() })
    }

    fn emit(&self, signal: Signal, payload: EventPayload) -> bool {
        if self.state.load(Ordering::Acquire) != OPEN {
            return false;
        }
        self.publish(signal, payload)
    }

    fn publish(&self, signal: Signal, payload: EventPayload) -> bool {
        let event = Event::new(
            EventKind::Lifecycle(self.side, signal),
            self.request_id,
            self.side,
            payload,
        );
        match self.bus.publish(&event) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(request_id = %self.request_id, error = %e, "Failed to publish lifecycle event");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorded(bus: &EventBus) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.subscribe_all(move |event| {
            s.lock().push(event.name().into_owned());
            Ok(())
        });
        seen
    }

    #[test]
    fn test_normal_sequence() {
        let bus = Arc::new(EventBus::new());
        let seen = recorded(&bus);
        let emitter = LifecycleEmitter::new(bus, RequestId::generate(), Side::Request);

        emitter.start(None);
        emitter.data(4);
        emitter.data(8);
        emitter.end();
        emitter.close();

        assert_eq!(
            *seen.lock(),
            vec!["request:start", "request:data", "request:data", "request:end", "request:close"]
        );
    }

    #[test]
    fn test_nothing_follows_close() {
        let bus = Arc::new(EventBus::new());
        let seen = recorded(&bus);
        let emitter = LifecycleEmitter::new(bus, RequestId::generate(), Side::Response);

        emitter.start(None);
        assert!(emitter.close());
        assert!(!emitter.data(1));
        assert!(!emitter.error("late"));
        assert!(!emitter.close());
        assert!(emitter.is_closed());

        assert_eq!(*seen.lock(), vec!["response:start", "response:close"]);
    }

    #[test]
    fn test_error_suppresses_data_but_allows_close() {
        let bus = Arc::new(EventBus::new());
        let seen = recorded(&bus);
        let emitter = LifecycleEmitter::new(bus, RequestId::generate(), Side::Response);

        emitter.start(None);
        emitter.error("reset by peer");
        assert!(!emitter.data(3));
        assert!(!emitter.end());
        assert!(!emitter.error("again"));
        emitter.close();

        assert_eq!(
            *seen.lock(),
            vec!["response:start", "response:error", "response:close"]
        );
    }

    #[test]
    fn test_start_published_once() {
        let bus = Arc::new(EventBus::new());
        let seen = recorded(&bus);
        let emitter = LifecycleEmitter::new(bus, RequestId::generate(), Side::Request);
        assert!(emitter.start(Some(Duration::from_millis(5))));
        assert!(!emitter.start(None));
        assert_eq!(seen.lock().len(), 1);
    }
}
