//! Per-request state: identity, context, response guard and the in-flight registry.
//!
//! # Data Flow
//! ```text
//! InboundRequest + ResponseSink
//!     → context.rs (RequestContext: identity, headers, body, principal)
//!     → guard.rs (ResponseGuard: stage/dispatch exactly once)
//!     → registry.rs (RequestRegistry: lookup by identity, forced termination)
//! ```

pub mod context;
pub mod guard;
pub mod id;
pub mod registry;
pub mod reply;

pub use context::{BodyError, Principal, RequestContext};
pub use guard::{DispatchOutcome, GuardState, ResponseGuard, StageOutcome};
pub use id::RequestId;
pub use registry::{RegistryEntry, RegistryError, RequestRegistry, TerminateOutcome};
pub use reply::Reply;
