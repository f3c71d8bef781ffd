//! Administrative API.
//!
//! Bearer-key protected endpoints for inspecting in-flight requests and
//! terminating them out of band.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get},
    Router,
};

use crate::engine::Engine;
use self::auth::admin_auth_middleware;
use self::handlers::*;

pub struct AdminState {
    pub engine: Arc<Engine>,
    pub api_key: String,
}

pub fn setup_admin_router(engine: Arc<Engine>, api_key: impl Into<String>) -> Router {
    let state = Arc::new(AdminState {
        engine,
        api_key: api_key.into(),
    });

    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/requests", get(list_requests))
        .route("/admin/requests/{id}", delete(kill_request))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
