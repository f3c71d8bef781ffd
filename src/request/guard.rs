//! Single-dispatch wrapper around the transport's outbound response.
//!
//! # State Transitions
//! ```text
//! Pending → Staged → Dispatched
//!    └────────┴──────→ Closed
//! ```
//!
//! Every transition happens under one lock, so concurrent `stage`, `dispatch`,
//! `terminate` and `mark_closed` calls resolve to exactly one winner. The
//! winner takes the sink out of the guard before writing, which is what makes
//! the terminating write reach the transport at most once.

use std::sync::Arc;

use axum::http::{header, StatusCode};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use crate::events::{EventBus, LifecycleEmitter, Side};
use crate::request::{Reply, RequestId};
use crate::transport::{ResponseSink, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardState {
    Pending,
    Staged,
    Dispatched,
    Closed,
}

impl GuardState {
    pub fn is_finalized(&self) -> bool {
        matches!(self, GuardState::Dispatched | GuardState::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Staged,
    /// The guard was no longer pending; the payload was ignored.
    AlreadyHandled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// This call finalized the guard and the transport accepted the response.
    Dispatched,
    /// This call finalized the guard but the transport rejected the write.
    WriteFailed,
    /// Another path finalized the guard first; nothing was written.
    AlreadyFinalized,
}

impl DispatchOutcome {
    /// Whether this call performed the finalizing transition.
    pub fn won(&self) -> bool {
        !matches!(self, DispatchOutcome::AlreadyFinalized)
    }
}

struct Inner {
    state: GuardState,
    staged: Option<Reply>,
    sent: Option<StatusCode>,
    sink: Option<Box<dyn ResponseSink>>,
}

/// Owns the outbound response for one request.
pub struct ResponseGuard {
    id: RequestId,
    inner: Mutex<Inner>,
    finalized: watch::Sender<bool>,
    emitter: LifecycleEmitter,
}

impl ResponseGuard {
    pub fn new(id: RequestId, sink: Box<dyn ResponseSink>, bus: Arc<EventBus>) -> Self {
        Self {
            id,
            inner: Mutex::new(Inner {
                state: GuardState::Pending,
                staged: None,
                sent: None,
                sink: Some(sink),
            }),
            finalized: watch::channel(false).0,
            emitter: LifecycleEmitter::new(bus, id, Side::Response),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn state(&self) -> GuardState {
        self.inner.lock().state
    }

    pub fn is_finalized(&self) -> bool {
        self.state().is_finalized()
    }

    /// Resolves once the guard is dispatched or closed, immediately if it
    /// already is.
    pub async fn finalized(&self) {
        let mut rx = self.finalized.subscribe();
        // The sender lives as long as `self`, so an error cannot occur here.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Status that reached the transport, once dispatched.
    pub fn sent_status(&self) -> Option<StatusCode> {
        self.inner.lock().sent
    }

    /// Status currently staged, if any.
    pub fn staged_status(&self) -> Option<StatusCode> {
        self.inner.lock().staged.as_ref().map(|r| r.status)
    }

    /// Record the reply to send. Only the first call on a pending guard counts.
    pub fn stage(&self, reply: Reply) -> StageOutcome {
        let mut inner = self.inner.lock();
        if inner.state != GuardState::Pending {
            tracing::trace!(request_id = %self.id, state = ?inner.state, "Ignoring stage on non-pending response");
            return StageOutcome::AlreadyHandled;
        }
        inner.staged = Some(reply);
        inner.state = GuardState::Staged;
        StageOutcome::Staged
    }

    /// Send whatever is staged (or an empty `200`) to the transport.
    pub fn dispatch(&self) -> DispatchOutcome {
        let claimed = {
            let mut inner = self.inner.lock();
            if inner.state.is_finalized() {
                None
            } else {
                let reply = inner.staged.take().unwrap_or_default();
                Some(self.claim(&mut inner, reply))
            }
        };
        match claimed {
            Some((sink, reply)) => self.write_out(sink, reply),
            None => DispatchOutcome::AlreadyFinalized,
        }
    }

    /// Replace any staged-but-unsent reply with `reply` and dispatch it.
    /// Used by forced termination; a no-op once finalized.
    pub fn terminate(&self, reply: Reply) -> DispatchOutcome {
        let claimed = {
            let mut inner = self.inner.lock();
            if inner.state.is_finalized() {
                None
            } else {
                inner.staged = None;
                Some(self.claim(&mut inner, reply))
            }
        };
        match claimed {
            Some((sink, reply)) => self.write_out(sink, reply),
            None => DispatchOutcome::AlreadyFinalized,
        }
    }

    /// The transport closed the connection without our dispatch.
    /// Returns whether this call performed the transition.
    pub fn mark_closed(&self) -> bool {
        let sink = {
            let mut inner = self.inner.lock();
            if inner.state.is_finalized() {
                return false;
            }
            inner.state = GuardState::Closed;
            inner.staged = None;
            self.finalized.send_replace(true);
            inner.sink.take()
        };
        drop(sink);
        tracing::debug!(request_id = %self.id, "Connection closed before dispatch");
        self.emitter.close();
        true
    }

    pub(crate) fn emitter(&self) -> &LifecycleEmitter {
        &self.emitter
    }

    fn claim(&self, inner: &mut Inner, reply: Reply) -> (Option<Box<dyn ResponseSink>>, Reply) {
        inner.state = GuardState::Dispatched;
        inner.sent = Some(reply.status);
        self.finalized.send_replace(true);
        (inner.sink.take(), reply)
    }

    fn write_out(&self, sink: Option<Box<dyn ResponseSink>>, reply: Reply) -> DispatchOutcome {
        let result = match sink {
            Some(mut sink) => self.send(sink.as_mut(), reply),
            None => Err(TransportError::Closed),
        };

        let outcome = match result {
            Ok(()) => DispatchOutcome::Dispatched,
            Err(e) => {
                tracing::warn!(request_id = %self.id, error = %e, "Transport rejected response");
                self.emitter.error(e.to_string());
                DispatchOutcome::WriteFailed
            }
        };
        self.emitter.close();
        outcome
    }

    fn send(&self, sink: &mut dyn ResponseSink, reply: Reply) -> Result<(), TransportError> {
        tracing::debug!(request_id = %self.id, status = reply.status.as_u16(), "Dispatching response");
        sink.set_status(reply.status);
        if let Some(content_type) = reply.content_type {
            sink.set_header(header::CONTENT_TYPE, content_type);
        }
        if !reply.body.is_empty() {
            let size = reply.body.len();
            sink.write(reply.body)?;
            self.emitter.data(size);
        }
        sink.end()?;
        self.emitter.end();
        Ok(())
    }
}

impl std::fmt::Debug for ResponseGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseGuard")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
