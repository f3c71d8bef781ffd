//! Table of in-flight requests, keyed by identity.

use std::sync::{Arc, Weak};

use axum::http::StatusCode;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::events::{EventBus, EventKind, Signal, SubscriptionId};
use crate::observability::metrics;
use crate::request::{DispatchOutcome, Reply, RequestContext, RequestId, ResponseGuard};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("request {0} is already registered")]
    DuplicateIdentity(RequestId),
}

/// The context/guard pair tracked for one request.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub context: Arc<RequestContext>,
    pub guard: Arc<ResponseGuard>,
}

/// Result of an administrative termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    Terminated,
    AlreadyClosed,
    NotFound,
}

impl TerminateOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminateOutcome::Terminated => "terminated",
            TerminateOutcome::AlreadyClosed => "already_closed",
            TerminateOutcome::NotFound => "not_found",
        }
    }
}

/// Concurrent map from request identity to its context/guard pair.
///
/// Entries are removed synchronously when the guard's `response:close` or
/// `response:error` event is published, once [`RequestRegistry::install`]
/// has wired the registry to the bus.
#[derive(Default)]
pub struct RequestRegistry {
    entries: DashMap<RequestId, RegistryEntry>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe the cleanup listeners.
    pub fn install(self: &Arc<Self>, bus: &EventBus) -> Vec<SubscriptionId> {
        [Signal::Close, Signal::Error]
            .into_iter()
            .filter_map(|signal| {
                let registry: Weak<Self> = Arc::downgrade(self);
                bus.subscribe(&EventKind::response(signal).name(), move |event| {
                    if let Some(registry) = registry.upgrade() {
                        registry.remove(&event.request_id);
                    }
                    Ok(())
                })
                .ok()
            })
            .collect()
    }

    pub fn register(
        &self,
        id: RequestId,
        context: Arc<RequestContext>,
        guard: Arc<ResponseGuard>,
    ) -> Result<(), RegistryError> {
        match self.entries.entry(id) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateIdentity(id)),
            Entry::Vacant(slot) => {
                tracing::trace!(request_id = %id, "Registering request");
                slot.insert(RegistryEntry { context, guard });
                Ok(())
            }
        }
    }

    pub fn lookup(&self, id: &RequestId) -> Option<RegistryEntry> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    pub fn remove(&self, id: &RequestId) -> Option<RegistryEntry> {
        self.entries.remove(id).map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of every entry, for listings.
    pub fn snapshot(&self) -> Vec<RegistryEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    /// Dispatch `{"error": reason, "status": status}` on the request's guard
    /// and drop it from the registry.
    pub fn force_terminate(&self, id: &RequestId, reason: &str, status: StatusCode) -> TerminateOutcome {
        // Clone out of the map first: dispatching publishes `response:close`,
        // whose listener removes from this same map.
        let Some(entry) = self.lookup(id) else {
            tracing::error!(request_id = %id, "Request not found or already closed");
            metrics::record_forced_termination(TerminateOutcome::NotFound);
            return TerminateOutcome::NotFound;
        };

        let outcome = match entry.guard.terminate(Reply::error(status, reason)) {
            DispatchOutcome::AlreadyFinalized => {
                tracing::info!(request_id = %id, "Request already closed");
                TerminateOutcome::AlreadyClosed
            }
            DispatchOutcome::Dispatched | DispatchOutcome::WriteFailed => {
                tracing::warn!(
                    request_id = %id,
                    reason = %reason,
                    status = status.as_u16(),
                    "Request killed"
                );
                self.remove(id);
                TerminateOutcome::Terminated
            }
        };
        metrics::record_forced_termination(outcome);
        outcome
    }
}
