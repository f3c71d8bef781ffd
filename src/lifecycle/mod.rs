//! Process lifecycle management.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → broadcast → HTTP server, admin API stop accepting and drain
//! ```
//!
//! # Design Decisions
//! - One broadcast channel reaches every long-running task
//! - Triggering twice is harmless

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::{spawn_signal_listener, wait_for_signal};
