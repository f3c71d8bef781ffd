//! Principal attachment.

use std::sync::Arc;

use axum::http::{header, HeaderMap};
use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;

use crate::pipeline::{Step, StepError, StepResult};
use crate::request::{Principal, RequestContext, ResponseGuard};

/// Resolves the caller from request headers.
///
/// `Ok(None)` means anonymous; later permission steps decide whether that
/// is acceptable. `Err` fails the request with a `500`.
pub trait Authenticate: Send + Sync + 'static {
    fn authenticate(&self, headers: &HeaderMap) -> BoxFuture<'static, Result<Option<Principal>, StepError>>;
}

impl<F> Authenticate for F
where
    F: Fn(&HeaderMap) -> Option<Principal> + Send + Sync + 'static,
{
    fn authenticate(&self, headers: &HeaderMap) -> BoxFuture<'static, Result<Option<Principal>, StepError>> {
        future::ready(Ok(self(headers))).boxed()
    }
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub struct AuthenticateStep<A> {
    authenticator: Arc<A>,
}

/// Attach the resolved principal to the request context and continue.
pub fn authenticate_step<A: Authenticate>(authenticator: A) -> AuthenticateStep<A> {
    AuthenticateStep {
        authenticator: Arc::new(authenticator),
    }
}

impl<A: Authenticate> Step for AuthenticateStep<A> {
    fn name(&self) -> &str {
        "authenticate"
    }

    fn call(&self, ctx: Arc<RequestContext>, _res: Arc<ResponseGuard>) -> BoxFuture<'static, StepResult> {
        let pending = self.authenticator.authenticate(ctx.headers());
        async move {
            if let Some(principal) = pending.await? {
                tracing::debug!(request_id = %ctx.id(), user = %principal.username, "Principal attached");
                if ctx.attach_principal(principal).is_err() {
                    tracing::warn!(request_id = %ctx.id(), "Principal already attached, keeping the first");
                }
            }
            Ok::<_, StepError>(true)
        }
        .boxed()
    }
}
