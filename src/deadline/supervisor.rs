//! Per-request deadline timers.
//!
//! # State Transitions
//! ```text
//! unarmed → armed        request:start observed
//! armed   → disarmed     response:close / response:error before expiry
//! armed   → fired        timer elapsed first
//! ```
//!
//! Removing the timer entry from the map is the claim on the terminal
//! transition: whichever of `disarm` and `expire` removes it first wins, the
//! other finds nothing to do. Once fired, the guard's own single-dispatch
//! claim decides between the forced timeout reply and a response that was
//! already on its way out.

use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::TimeoutConfig;
use crate::events::{Event, EventBus, EventKind, EventPayload, Side, Signal, SubscriptionId};
use crate::observability::metrics;
use crate::request::{DispatchOutcome, Reply, RequestId, RequestRegistry};

/// What happened when a timer elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// The timeout reply was dispatched and `request:interrupt` published.
    Interrupted,
    /// The response was already finalized: the natural path narrowly won.
    RaceLost,
    /// The request is no longer registered.
    Unknown,
    /// The timer had already been disarmed.
    Disarmed,
}

struct TimerEntry {
    started: Instant,
    budget: Duration,
    // Dropping the sender wakes and ends the timer task.
    _cancel: oneshot::Sender<()>,
}

pub struct DeadlineSupervisor {
    bus: Arc<EventBus>,
    registry: Arc<RequestRegistry>,
    config: ArcSwap<TimeoutConfig>,
    timers: DashMap<RequestId, TimerEntry>,
}

impl DeadlineSupervisor {
    pub fn new(bus: Arc<EventBus>, registry: Arc<RequestRegistry>, config: TimeoutConfig) -> Self {
        Self {
            bus,
            registry,
            config: ArcSwap::from_pointee(config),
            timers: DashMap::new(),
        }
    }

    /// Arm on `request:start`, disarm on `response:close` and `response:error`.
    pub fn install(self: &Arc<Self>) -> Vec<SubscriptionId> {
        let mut subscriptions = Vec::new();

        let weak: Weak<Self> = Arc::downgrade(self);
        let start = self.bus.subscribe(&EventKind::request(Signal::Start).name(), move |event| {
            if let Some(supervisor) = weak.upgrade() {
                let deadline = match event.payload {
                    EventPayload::Start { deadline } => deadline,
                    _ => None,
                };
                supervisor.arm(event.request_id, deadline);
            }
            Ok(())
        });
        subscriptions.extend(start.ok());

        for signal in [Signal::Close, Signal::Error] {
            let weak: Weak<Self> = Arc::downgrade(self);
            let finish = self.bus.subscribe(&EventKind::response(signal).name(), move |event| {
                if let Some(supervisor) = weak.upgrade() {
                    supervisor.disarm(&event.request_id);
                }
                Ok(())
            });
            subscriptions.extend(finish.ok());
        }
        subscriptions
    }

    /// Replace the timeout settings. Armed timers keep their budget.
    pub fn reconfigure(&self, config: TimeoutConfig) {
        tracing::info!(request_ms = config.request_ms, enabled = config.enabled, "Deadline settings updated");
        self.config.store(Arc::new(config));
    }

    pub fn default_deadline(&self) -> Duration {
        self.config.load().request_duration()
    }

    pub fn is_armed(&self, id: &RequestId) -> bool {
        self.timers.contains_key(id)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }

    /// Start the timer for `id`. Returns false if timeouts are disabled, the
    /// timer is already armed, or there is no runtime to drive it.
    pub fn arm(self: &Arc<Self>, id: RequestId, deadline: Option<Duration>) -> bool {
        let config = self.config.load();
        if !config.enabled {
            return false;
        }
        let budget = deadline.unwrap_or_else(|| config.request_duration());

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(request_id = %id, "No async runtime, deadline not armed");
            return false;
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        match self.timers.entry(id) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                slot.insert(TimerEntry {
                    started: Instant::now(),
                    budget,
                    _cancel: cancel_tx,
                });
            }
        }

        tracing::debug!(request_id = %id, budget_ms = budget.as_millis() as u64, "Request timer started");
        let weak = Arc::downgrade(self);
        runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(budget) => {
                    if let Some(supervisor) = weak.upgrade() {
                        supervisor.expire(&id);
                    }
                }
                _ = cancel_rx => {}
            }
        });
        true
    }

    /// Cancel the timer for `id`. Returns whether this call disarmed it.
    pub fn disarm(&self, id: &RequestId) -> bool {
        match self.timers.remove(id) {
            Some((_, entry)) => {
                tracing::debug!(
                    request_id = %id,
                    elapsed_ms = entry.started.elapsed().as_millis() as u64,
                    "Request timer cleared"
                );
                true
            }
            None => false,
        }
    }

    /// Handle an elapsed timer for `id`.
    pub fn expire(&self, id: &RequestId) -> Expiry {
        let Some((_, entry)) = self.timers.remove(id) else {
            return Expiry::Disarmed;
        };
        let elapsed = entry.started.elapsed();
        let budget_ms = entry.budget.as_millis();

        let Some(pair) = self.registry.lookup(id) else {
            tracing::info!(request_id = %id, "Deadline elapsed for a request that is no longer registered");
            return Expiry::Unknown;
        };

        match pair.guard.terminate(Reply::timeout(budget_ms)) {
            DispatchOutcome::AlreadyFinalized => {
                tracing::info!(request_id = %id, "Request already closed when deadline elapsed");
                Expiry::RaceLost
            }
            DispatchOutcome::Dispatched | DispatchOutcome::WriteFailed => {
                tracing::warn!(
                    request_id = %id,
                    method = %pair.context.method(),
                    path = %pair.context.path(),
                    budget_ms = budget_ms as u64,
                    "Request timed out"
                );
                let interrupt = Event::new(
                    EventKind::Interrupt,
                    *id,
                    Side::Request,
                    EventPayload::Interrupt {
                        reason: "Request Timeout".to_string(),
                        status: 408,
                        elapsed,
                    },
                );
                if let Err(e) = self.bus.publish(&interrupt) {
                    tracing::error!(request_id = %id, error = %e, "Failed to publish interrupt");
                }
                self.registry.remove(id);
                metrics::record_interrupt();
                Expiry::Interrupted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{RequestContext, ResponseGuard, StageOutcome};
    use crate::transport::{InboundRequest, MemorySink};
    use axum::http::{Method, StatusCode, Uri};
    use parking_lot::Mutex;

    struct Fixture {
        bus: Arc<EventBus>,
        registry: Arc<RequestRegistry>,
        supervisor: Arc<DeadlineSupervisor>,
        interrupts: Arc<Mutex<Vec<RequestId>>>,
    }

    fn fixture(request_ms: u64, with_cleanup: bool) -> Fixture {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(RequestRegistry::new());
        if with_cleanup {
            registry.install(&bus);
        }
        let supervisor = Arc::new(DeadlineSupervisor::new(
            bus.clone(),
            registry.clone(),
            TimeoutConfig { request_ms, enabled: true },
        ));
        let interrupts = Arc::new(Mutex::new(Vec::new()));
        let seen = interrupts.clone();
        bus.subscribe(EventKind::INTERRUPT_NAME, move |e| {
            seen.lock().push(e.request_id);
            Ok(())
        })
        .unwrap();
        Fixture { bus, registry, supervisor, interrupts }
    }

    fn register(f: &Fixture) -> (RequestId, Arc<RequestContext>, Arc<ResponseGuard>, MemorySink) {
        let id = RequestId::generate();
        let sink = MemorySink::new();
        let ctx = Arc::new(RequestContext::new(
            id,
            InboundRequest::new(Method::GET, Uri::from_static("/slow")),
            f.bus.clone(),
        ));
        let guard = Arc::new(ResponseGuard::new(id, Box::new(sink.clone()), f.bus.clone()));
        f.registry.register(id, ctx.clone(), guard.clone()).unwrap();
        (id, ctx, guard, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_wins() {
        let f = fixture(50, true);
        f.supervisor.install();
        let (id, ctx, guard, sink) = register(&f);

        ctx.emitter().start(None);
        assert!(f.supervisor.is_armed(&id));

        tokio::time::sleep(Duration::from_millis(60)).await;

        let record = sink.snapshot();
        assert_eq!(record.ends, 1);
        assert_eq!(record.status, Some(StatusCode::REQUEST_TIMEOUT));
        assert!(guard.is_finalized());
        assert!(!f.supervisor.is_armed(&id));
        assert!(f.registry.lookup(&id).is_none());
        assert_eq!(*f.interrupts.lock(), vec![id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_natural_completion_disarms() {
        let f = fixture(50, true);
        f.supervisor.install();
        let (id, ctx, guard, sink) = register(&f);

        ctx.emitter().start(None);
        guard.stage(Reply::text(StatusCode::OK, "done"));
        guard.dispatch();
        assert!(!f.supervisor.is_armed(&id));

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(sink.ends(), 1);
        assert_eq!(sink.snapshot().status, Some(StatusCode::OK));
        assert!(f.interrupts.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_after_natural_dispatch_is_noop() {
        // Cleanup listeners left off so the timer entry survives the dispatch,
        // as when both finalizers are scheduled in the same tick.
        let f = fixture(50, false);
        let (id, _ctx, guard, sink) = register(&f);
        assert!(f.supervisor.arm(id, None));

        assert_eq!(guard.dispatch(), DispatchOutcome::Dispatched);
        assert_eq!(f.supervisor.expire(&id), Expiry::RaceLost);

        assert_eq!(sink.ends(), 1);
        assert_eq!(sink.snapshot().status, Some(StatusCode::OK));
        assert!(f.interrupts.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_after_expiry_is_noop() {
        let f = fixture(50, false);
        let (id, _ctx, guard, sink) = register(&f);
        assert!(f.supervisor.arm(id, None));

        assert_eq!(f.supervisor.expire(&id), Expiry::Interrupted);
        assert_eq!(
            guard.stage(Reply::text(StatusCode::OK, "late")),
            StageOutcome::AlreadyHandled
        );
        assert_eq!(guard.dispatch(), DispatchOutcome::AlreadyFinalized);

        assert_eq!(sink.ends(), 1);
        assert_eq!(sink.snapshot().status, Some(StatusCode::REQUEST_TIMEOUT));
        assert_eq!(f.supervisor.expire(&id), Expiry::Disarmed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_then_timer_elapses() {
        let f = fixture(50, true);
        let (id, _ctx, _guard, sink) = register(&f);
        assert!(f.supervisor.arm(id, None));
        assert!(!f.supervisor.arm(id, None));

        assert!(f.supervisor.disarm(&id));
        assert!(!f.supervisor.disarm(&id));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(sink.ends(), 0);
        assert!(f.registry.lookup(&id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_payload_overrides_budget() {
        let f = fixture(10_000, true);
        f.supervisor.install();
        let (_id, ctx, _guard, sink) = register(&f);

        ctx.emitter().start(Some(Duration::from_millis(20)));
        tokio::time::sleep(Duration::from_millis(30)).await;

        let record = sink.snapshot();
        assert_eq!(record.status, Some(StatusCode::REQUEST_TIMEOUT));
        assert_eq!(
            record.body_json().unwrap()["message"],
            "Request could not be processed within 20ms"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_timeouts_never_arm() {
        let f = fixture(50, true);
        f.supervisor.reconfigure(TimeoutConfig { request_ms: 50, enabled: false });
        f.supervisor.install();
        let (id, ctx, _guard, sink) = register(&f);

        ctx.emitter().start(None);
        assert!(!f.supervisor.is_armed(&id));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sink.ends(), 0);
    }

    #[test]
    fn test_arm_without_runtime_is_refused() {
        let f = fixture(50, true);
        assert!(!f.supervisor.arm(RequestId::generate(), None));
        assert_eq!(f.supervisor.armed_count(), 0);
    }
}
