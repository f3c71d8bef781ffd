//! Permission-checking step.

use std::borrow::Cow;
use std::sync::Arc;

use axum::http::StatusCode;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::json;

use crate::pipeline::{Step, StepResult};
use crate::request::{Principal, Reply, RequestContext, ResponseGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl From<bool> for Decision {
    fn from(allowed: bool) -> Self {
        if allowed {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}

/// Decides whether `principal` may perform `action` on `resource`.
///
/// Role and rule storage live behind this trait; the engine only sees the
/// decision.
pub trait PermissionCheck: Send + Sync + 'static {
    fn check(&self, principal: &Principal, action: &str, resource: &str) -> Decision;
}

impl<F> PermissionCheck for F
where
    F: Fn(&Principal, &str, &str) -> Decision + Send + Sync + 'static,
{
    fn check(&self, principal: &Principal, action: &str, resource: &str) -> Decision {
        self(principal, action, resource)
    }
}

pub struct PermissionStep<C> {
    name: String,
    checker: Arc<C>,
    action: Cow<'static, str>,
    resource: Cow<'static, str>,
}

/// Halt with `401` when no principal is attached, `403` when the checker
/// denies, and continue otherwise.
pub fn permission_step<C: PermissionCheck>(
    checker: C,
    action: impl Into<Cow<'static, str>>,
    resource: impl Into<Cow<'static, str>>,
) -> PermissionStep<C> {
    let action = action.into();
    let resource = resource.into();
    PermissionStep {
        name: format!("permission:{}:{}", action, resource),
        checker: Arc::new(checker),
        action,
        resource,
    }
}

impl<C: PermissionCheck> PermissionStep<C> {
    fn decide(&self, ctx: &RequestContext, res: &ResponseGuard) -> bool {
        let Some(principal) = ctx.principal() else {
            tracing::warn!(request_id = %ctx.id(), "No principal attached to request");
            res.stage(Reply::json(StatusCode::UNAUTHORIZED, &json!({ "error": "Unauthorized" })));
            return false;
        };

        match self.checker.check(principal, &self.action, &self.resource) {
            Decision::Allow => true,
            Decision::Deny => {
                tracing::warn!(
                    request_id = %ctx.id(),
                    user = %principal.username,
                    action = %self.action,
                    resource = %self.resource,
                    "Permission denied"
                );
                res.stage(Reply::json(StatusCode::FORBIDDEN, &json!({ "error": "Forbidden" })));
                false
            }
        }
    }
}

impl<C: PermissionCheck> Step for PermissionStep<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, ctx: Arc<RequestContext>, res: Arc<ResponseGuard>) -> BoxFuture<'static, StepResult> {
        let allowed = self.decide(&ctx, &res);
        async move { Ok(allowed) }.boxed()
    }
}
