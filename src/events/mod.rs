//! Lifecycle event subsystem.
//!
//! # Data Flow
//! ```text
//! transport signal (body chunk, end, error, close)
//!     → emitter.rs (LifecycleEmitter, one per request side)
//!     → bus.rs (EventBus::publish, synchronous fan-out)
//!     → subscribers (registry cleanup, deadline supervisor, metrics, user code)
//! ```
//!
//! # Design Decisions
//! - Event kinds are a tagged enum; the bus keys listeners by kind
//! - Names must be declared before use (fail fast on typos)
//! - A failing listener is logged and skipped, never aborts delivery

pub mod bus;
pub mod emitter;
pub mod kind;

pub use bus::{BusError, EventBus, Listener, ListenerError, SubscriptionId};
pub use emitter::LifecycleEmitter;
pub use kind::{Event, EventKind, EventPayload, Side, Signal};
