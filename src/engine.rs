//! Composition root.
//!
//! # Responsibilities
//! - Own the process-wide bus, registry and deadline supervisor
//! - Wire their bus subscriptions once at construction
//! - Turn each transport hand-off into a registered, supervised pipeline run
//! - Apply configuration reloads

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use axum::http::StatusCode;

use crate::config::EngineConfig;
use crate::deadline::DeadlineSupervisor;
use crate::events::EventBus;
use crate::observability::{self, LogHandle, LoggingError};
use crate::pipeline::{Pipeline, PipelineReport};
use crate::request::{RegistryError, RequestContext, RequestId, RequestRegistry, ResponseGuard, TerminateOutcome};
use crate::transport::{InboundRequest, ResponseSink};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error("no log handle installed")]
    NoLogHandle,
}

/// A registered request whose lifecycle has started.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub context: Arc<RequestContext>,
    pub guard: Arc<ResponseGuard>,
}

impl Exchange {
    pub fn id(&self) -> RequestId {
        self.context.id()
    }
}

pub struct Engine {
    bus: Arc<EventBus>,
    registry: Arc<RequestRegistry>,
    supervisor: Arc<DeadlineSupervisor>,
    log_handle: ArcSwapOption<LogHandle>,
}

impl Engine {
    pub fn new(config: &EngineConfig) -> Self {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(RequestRegistry::new());
        let supervisor = Arc::new(DeadlineSupervisor::new(
            bus.clone(),
            registry.clone(),
            config.timeouts.clone(),
        ));

        registry.install(&bus);
        supervisor.install();
        observability::metrics::install(&bus);
        if config.logging.trace_events {
            observability::trace_events(&bus);
        }

        Self {
            bus,
            registry,
            supervisor,
            log_handle: ArcSwapOption::empty(),
        }
    }

    /// Keep the handle returned by [`observability::init_logging`] so
    /// [`Engine::set_log_level`] and config reloads can change the filter.
    pub fn with_log_handle(self, handle: LogHandle) -> Self {
        self.log_handle.store(Some(Arc::new(handle)));
        self
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.registry
    }

    pub fn supervisor(&self) -> &Arc<DeadlineSupervisor> {
        &self.supervisor
    }

    /// Run one request through `pipeline`, from registration to `request:close`.
    pub async fn handle(
        &self,
        pipeline: &Pipeline,
        request: InboundRequest,
        sink: Box<dyn ResponseSink>,
    ) -> Result<PipelineReport, EngineError> {
        let exchange = self.open(pipeline, request, sink)?;
        Ok(self.run(pipeline, &exchange).await)
    }

    /// Wrap and register the transport pair, then publish `request:start`
    /// (arming the deadline) and `response:start`.
    ///
    /// Split from [`Engine::run`] so a transport can hold the guard, e.g. to
    /// mark it closed when the client goes away.
    pub fn open(
        &self,
        pipeline: &Pipeline,
        request: InboundRequest,
        sink: Box<dyn ResponseSink>,
    ) -> Result<Exchange, EngineError> {
        self.open_with_id(RequestId::generate(), pipeline, request, sink)
    }

    pub fn open_with_id(
        &self,
        id: RequestId,
        pipeline: &Pipeline,
        request: InboundRequest,
        sink: Box<dyn ResponseSink>,
    ) -> Result<Exchange, EngineError> {
        let context = Arc::new(RequestContext::new(id, request, self.bus.clone()));
        let guard = Arc::new(ResponseGuard::new(id, sink, self.bus.clone()));
        self.registry.register(id, context.clone(), guard.clone())?;

        tracing::debug!(
            request_id = %id,
            method = %context.method(),
            path = %context.path(),
            "Request received"
        );
        context.emitter().start(pipeline.deadline());
        guard.emitter().start(None);

        Ok(Exchange { context, guard })
    }

    /// Execute the pipeline for an opened exchange and publish `request:close`.
    pub async fn run(&self, pipeline: &Pipeline, exchange: &Exchange) -> PipelineReport {
        let report = pipeline.run(&exchange.context, &exchange.guard).await;
        exchange.context.emitter().close();

        tracing::debug!(
            request_id = %exchange.id(),
            halt = ?report.halt,
            dispatch = ?report.dispatch,
            status = ?exchange.guard.sent_status().map(|s| s.as_u16()),
            elapsed_ms = exchange.context.age().as_millis() as u64,
            "Request finished"
        );
        report
    }

    pub fn force_terminate(&self, id: &RequestId, reason: &str, status: StatusCode) -> TerminateOutcome {
        self.registry.force_terminate(id, reason, status)
    }

    /// Apply a reloaded configuration. Deadline settings affect requests
    /// armed after the call; the log level changes immediately.
    pub fn apply_config(&self, config: &EngineConfig) {
        self.supervisor.reconfigure(config.timeouts.clone());
        if let Some(handle) = self.log_handle.load_full() {
            if let Err(e) = handle.set_level(&config.logging.level) {
                tracing::error!(error = %e, "Failed to apply log level from config");
            }
        }
    }

    pub fn set_log_level(&self, directive: &str) -> Result<(), EngineError> {
        let handle = self.log_handle.load_full().ok_or(EngineError::NoLogHandle)?;
        handle.set_level(directive)?;
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("in_flight", &self.registry.len())
            .field("armed", &self.supervisor.armed_count())
            .finish()
    }
}
