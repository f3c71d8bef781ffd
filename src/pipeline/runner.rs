//! Ordered, short-circuiting execution of handler steps.

use std::borrow::Cow;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;

use crate::observability::metrics;
use crate::pipeline::step::{handler_fn, step_fn, Step, StepError, StepResult};
use crate::request::{DispatchOutcome, Reply, RequestContext, ResponseGuard};

/// Why the chain stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Halt {
    /// Every step returned `true`.
    Completed,
    /// A step returned `false`.
    Declined { step: String },
    /// A step returned an error or panicked.
    Failed { step: String, error: String },
    /// The response was finalized elsewhere before this step could run.
    Finalized { before: String },
    /// The response was finalized elsewhere while this step was suspended;
    /// the step was dropped at its await point.
    Abandoned { step: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Number of steps that were invoked.
    pub executed: usize,
    pub halt: Halt,
    /// Outcome of the pipeline's own dispatch attempt.
    pub dispatch: DispatchOutcome,
}

/// Append-only builder; [`PipelineBuilder::build`] freezes the step list.
#[derive(Default)]
pub struct PipelineBuilder {
    steps: Vec<Arc<dyn Step>>,
    deadline: Option<Duration>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step<S: Step>(mut self, step: S) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn step_fn<F, Fut>(self, name: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: Fn(Arc<RequestContext>, Arc<ResponseGuard>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult> + Send + 'static,
    {
        self.step(step_fn(name, f))
    }

    pub fn handler<F, Fut>(self, name: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: Fn(Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, StepError>> + Send + 'static,
    {
        self.step(handler_fn(name, f))
    }

    /// Override the configured request deadline for requests run through this pipeline.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            steps: self.steps.into(),
            deadline: self.deadline,
        }
    }
}

/// Immutable, cheaply clonable list of steps.
#[derive(Clone)]
pub struct Pipeline {
    steps: Arc<[Arc<dyn Step>]>,
    deadline: Option<Duration>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Run the steps in order, then dispatch the guard if nothing else has.
    ///
    /// Never fails: step errors and panics are logged, answered with a
    /// generic `500`, and reported in the returned [`PipelineReport`].
    ///
    /// A step still suspended when another path finalizes the guard is
    /// dropped at its await point.
    pub async fn run(&self, ctx: &Arc<RequestContext>, guard: &Arc<ResponseGuard>) -> PipelineReport {
        let mut executed = 0;
        let mut halt = Halt::Completed;

        for step in self.steps.iter() {
            if guard.is_finalized() {
                tracing::debug!(request_id = %ctx.id(), step = step.name(), "Response already finalized, skipping remaining steps");
                halt = Halt::Finalized { before: step.name().to_string() };
                break;
            }

            executed += 1;
            let fut = AssertUnwindSafe(step.call(ctx.clone(), guard.clone())).catch_unwind();
            let outcome = tokio::select! {
                biased;
                outcome = fut => Some(outcome),
                _ = guard.finalized() => None,
            };
            let Some(outcome) = outcome else {
                tracing::debug!(request_id = %ctx.id(), step = step.name(), "Response finalized elsewhere, abandoning step");
                halt = Halt::Abandoned { step: step.name().to_string() };
                break;
            };
            let result = match outcome {
                Ok(result) => result,
                Err(panic) => Err(StepError::Panicked(panic_message(&panic))),
            };

            match result {
                Ok(true) => continue,
                Ok(false) => {
                    tracing::debug!(request_id = %ctx.id(), step = step.name(), "Request processing halted by step");
                    halt = Halt::Declined { step: step.name().to_string() };
                    break;
                }
                Err(e) => {
                    tracing::error!(
                        request_id = %ctx.id(),
                        method = %ctx.method(),
                        path = %ctx.path(),
                        step = step.name(),
                        error = %e,
                        "Failed to process request"
                    );
                    metrics::record_step_failure(step.name());
                    guard.terminate(Reply::internal_error());
                    halt = Halt::Failed {
                        step: step.name().to_string(),
                        error: e.to_string(),
                    };
                    break;
                }
            }
        }

        PipelineReport {
            executed,
            halt,
            dispatch: guard.dispatch(),
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
