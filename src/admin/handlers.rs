use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::request::{GuardState, Reply, RequestId, TerminateOutcome};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub in_flight: usize,
    pub armed_timers: usize,
    pub default_deadline_ms: u64,
}

#[derive(Serialize)]
pub struct InFlightRequest {
    pub id: String,
    pub method: String,
    pub path: String,
    pub age_ms: u64,
    pub state: GuardState,
    pub user: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct KillRequest {
    pub reason: Option<String>,
    pub status: Option<u16>,
}

#[derive(Serialize)]
pub struct KillResponse {
    pub id: String,
    pub outcome: &'static str,
}

pub async fn get_status(State(state): State<Arc<AdminState>>) -> Json<SystemStatus> {
    let engine = &state.engine;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        in_flight: engine.registry().len(),
        armed_timers: engine.supervisor().armed_count(),
        default_deadline_ms: engine.supervisor().default_deadline().as_millis() as u64,
    })
}

pub async fn list_requests(State(state): State<Arc<AdminState>>) -> Json<Vec<InFlightRequest>> {
    let mut entries = state.engine.registry().snapshot();
    entries.sort_by_key(|e| e.context.id());

    Json(
        entries
            .into_iter()
            .map(|e| InFlightRequest {
                id: e.context.id().to_string(),
                method: e.context.method().to_string(),
                path: e.context.path().to_string(),
                age_ms: e.context.age().as_millis() as u64,
                state: e.guard.state(),
                user: e.context.principal().map(|p| p.username.clone()),
            })
            .collect(),
    )
}

/// `DELETE /admin/requests/{id}` with an optional `{reason, status}` body.
pub async fn kill_request(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let Ok(id) = id.parse::<RequestId>() else {
        return Reply::error(StatusCode::BAD_REQUEST, "Invalid request id").into_response();
    };
    let kill = if body.is_empty() {
        KillRequest::default()
    } else {
        match serde_json::from_slice::<KillRequest>(&body) {
            Ok(kill) => kill,
            Err(e) => {
                tracing::debug!(error = %e, "Malformed kill body");
                return Reply::error(StatusCode::BAD_REQUEST, "Invalid JSON body").into_response();
            }
        }
    };

    let reason = kill.reason.unwrap_or_else(|| "Terminated by administrator".to_string());
    let status = match kill.status.map(StatusCode::from_u16) {
        None => StatusCode::SERVICE_UNAVAILABLE,
        Some(Ok(status)) => status,
        Some(Err(_)) => {
            return Reply::error(StatusCode::BAD_REQUEST, "Invalid status code").into_response();
        }
    };

    let outcome = state.engine.force_terminate(&id, &reason, status);
    let code = match outcome {
        TerminateOutcome::Terminated => StatusCode::OK,
        TerminateOutcome::AlreadyClosed => StatusCode::CONFLICT,
        TerminateOutcome::NotFound => StatusCode::NOT_FOUND,
    };
    (
        code,
        Json(KillResponse {
            id: id.to_string(),
            outcome: outcome.as_str(),
        }),
    )
        .into_response()
}
