//! Request Lifecycle Coordination Engine
//!
//! Runs each inbound request through an ordered, short-circuiting pipeline of
//! steps while publishing its lifecycle on an event bus, enforcing a
//! per-request deadline, and guaranteeing the response reaches the transport
//! at most once.
//!
//! # Architecture Overview
//!
//! ```text
//!   transport (http/)                    Engine
//!  ┌──────────────┐   InboundRequest   ┌──────────────────────────────────────────┐
//!  │ axum handler │──────────────────▶ │ RequestContext ──▶ Pipeline::run         │
//!  │ ChannelSink  │◀── one response ── │ ResponseGuard  ◀── stage / dispatch      │
//!  └──────────────┘                    │        │                                 │
//!                                      │        ▼ lifecycle events                │
//!                                      │    EventBus ──▶ RequestRegistry cleanup  │
//!                                      │        │    ──▶ DeadlineSupervisor       │
//!                                      │        │    ──▶ metrics / trace log      │
//!                                      └────────┼─────────────────────────────────┘
//!                                               ▼
//!                               admin API: force_terminate(id, reason, status)
//! ```

// Core
pub mod deadline;
pub mod engine;
pub mod events;
pub mod pipeline;
pub mod request;
pub mod transport;

// Collaborators
pub mod admin;
pub mod auth;
pub mod http;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::schema::EngineConfig;
pub use engine::{Engine, EngineError, Exchange};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use pipeline::{Pipeline, PipelineReport};
pub use request::{Reply, RequestContext, RequestId, ResponseGuard};
