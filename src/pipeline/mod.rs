//! Request pipelines.
//!
//! # Data Flow
//! ```text
//! RequestContext + ResponseGuard
//!     → runner.rs (Pipeline::run: steps in order)
//!         → step.rs (Step::call → continue / halt / fail)
//!     → guard.dispatch() once the chain stops
//! ```
//!
//! # Design Decisions
//! - Steps are append-only while building, immutable once built
//! - A finalized response stops the chain before the next step
//! - Failures never escape `run`; the caller always gets a report

pub mod runner;
pub mod step;

pub use runner::{Halt, Pipeline, PipelineBuilder, PipelineReport};
pub use step::{handler_fn, step_fn, FnStep, HandlerStep, Step, StepError, StepResult};
