//! Transport seam.
//!
//! The HTTP transport (accept loop, parsing, TLS) is external. It hands the
//! engine an [`InboundRequest`] and a [`ResponseSink`] per exchange.
//!
//! # Design Decisions
//! - Sinks are synchronous: dispatch never awaits while holding a claim
//! - `end` is the only terminating write; the guard calls it at most once

pub mod inbound;
pub mod memory;
pub mod sink;

pub use inbound::{BodyStream, InboundRequest};
pub use memory::{MemoryRecord, MemorySink};
pub use sink::{ChannelSink, ResponseSink, TransportError};
