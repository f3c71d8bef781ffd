//! HTTP transport subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, route → pipeline lookup, in-flight limit)
//!     → request.rs (axum request → InboundRequest, disconnect guard)
//!     → Engine::open / Engine::run in a spawned task
//!     → ChannelSink delivers the single dispatched response
//!     → response.rs (tag with X-Request-ID)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{inbound_from_axum, CloseOnDrop, X_REQUEST_ID};
pub use server::{HttpServer, ServerError};
