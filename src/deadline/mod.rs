//! Request deadlines.
//!
//! # Data Flow
//! ```text
//! request:start ──→ supervisor.rs arms a timer (configured or per-pipeline budget)
//! response:close ─→ timer disarmed
//! timer elapsed ──→ 408 forced through the ResponseGuard → request:interrupt
//! ```
//!
//! # Design Decisions
//! - Timeouts are per request; a hung step never delays other requests
//! - The supervisor holds identities only, never extends request lifetimes
//! - Timed-out requests answer 408 with the elapsed budget in the message

pub mod supervisor;

pub use supervisor::{DeadlineSupervisor, Expiry};
