//! Handler steps.

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::request::{BodyError, Reply, RequestContext, ResponseGuard};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("{0}")]
    Message(String),
    #[error("step panicked: {0}")]
    Panicked(String),
    #[error(transparent)]
    Body(#[from] BodyError),
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl StepError {
    pub fn msg(message: impl Into<String>) -> Self {
        StepError::Message(message.into())
    }

    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StepError::Other(Box::new(error))
    }
}

/// `Ok(true)` continues the chain, `Ok(false)` halts it, `Err` halts it as a failure.
pub type StepResult = Result<bool, StepError>;

/// One unit of request processing.
///
/// Steps receive shared handles so they can await I/O without borrowing
/// from the pipeline.
pub trait Step: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn call(&self, ctx: Arc<RequestContext>, res: Arc<ResponseGuard>) -> BoxFuture<'static, StepResult>;
}

/// A step built from a closure.
pub struct FnStep<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F, Fut> Step for FnStep<F>
where
    F: Fn(Arc<RequestContext>, Arc<ResponseGuard>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepResult> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, ctx: Arc<RequestContext>, res: Arc<ResponseGuard>) -> BoxFuture<'static, StepResult> {
        (self.f)(ctx, res).boxed()
    }
}

pub fn step_fn<F, Fut>(name: impl Into<Cow<'static, str>>, f: F) -> FnStep<F>
where
    F: Fn(Arc<RequestContext>, Arc<ResponseGuard>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepResult> + Send + 'static,
{
    FnStep { name: name.into(), f }
}

/// A step that produces the reply instead of writing it: success stages the
/// reply and continues, failure halts the chain.
pub struct HandlerStep<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F, Fut> Step for HandlerStep<F>
where
    F: Fn(Arc<RequestContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, StepError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, ctx: Arc<RequestContext>, res: Arc<ResponseGuard>) -> BoxFuture<'static, StepResult> {
        let fut = (self.f)(ctx);
        async move {
            let reply = fut.await?;
            res.stage(reply);
            Ok::<_, StepError>(true)
        }
        .boxed()
    }
}

pub fn handler_fn<F, Fut>(name: impl Into<Cow<'static, str>>, f: F) -> HandlerStep<F>
where
    F: Fn(Arc<RequestContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, StepError>> + Send + 'static,
{
    HandlerStep { name: name.into(), f }
}
