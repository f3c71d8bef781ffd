//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router mapping routes to pipelines
//! - Wire up middleware (tracing, body limit)
//! - Bound the number of in-flight requests
//! - Hand each request to the engine in its own task
//! - Shut down gracefully on the broadcast signal

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, MethodRouter};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::http::request::{inbound_from_axum, CloseOnDrop};
use crate::http::response::from_sink;
use crate::pipeline::Pipeline;
use crate::request::Reply;
use crate::transport::ChannelSink;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("No routes have been configured")]
    NoRoutes,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    in_flight: Arc<Semaphore>,
}

/// HTTP front end for the lifecycle engine.
pub struct HttpServer {
    config: EngineConfig,
    engine: Arc<Engine>,
    routes: BTreeMap<String, MethodRouter<AppState>>,
}

impl HttpServer {
    pub fn new(config: EngineConfig, engine: Arc<Engine>) -> Self {
        Self {
            config,
            engine,
            routes: BTreeMap::new(),
        }
    }

    /// Serve `pipeline` for `method` requests to `path` (axum path syntax).
    pub fn route(mut self, path: &str, method: MethodFilter, pipeline: Pipeline) -> Self {
        let handler = move |State(state): State<AppState>, request: Request<Body>| {
            let pipeline = pipeline.clone();
            async move { serve(state, pipeline, request).await }
        };
        let methods = self.routes.remove(path).unwrap_or_default();
        self.routes.insert(path.to_string(), methods.on(method, handler));
        self
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Build the Axum router with all middleware layers.
    pub fn into_router(self) -> Result<Router, ServerError> {
        if self.routes.is_empty() {
            return Err(ServerError::NoRoutes);
        }

        let state = AppState {
            engine: self.engine,
            in_flight: Arc::new(Semaphore::new(self.config.listener.max_connections)),
        };

        let router = self
            .routes
            .into_iter()
            .fold(Router::new(), |router, (path, methods)| router.route(&path, methods));

        Ok(router
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(self.config.http.body_limit_bytes))
            .layer(TraceLayer::new_for_http()))
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServerError> {
        let max_in_flight = self.config.listener.max_connections;
        let routes = self.route_count();
        let app = self.into_router()?;

        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, routes, max_in_flight, "HTTP server starting");

        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main request handler.
///
/// The pipeline runs in a spawned task so a client disconnect, which drops
/// this future, does not cancel handler steps mid-flight.
async fn serve(state: AppState, pipeline: Pipeline, request: Request<Body>) -> Response {
    let Ok(permit) = state.in_flight.clone().try_acquire_owned() else {
        tracing::warn!(path = %request.uri().path(), "In-flight limit reached, rejecting request");
        return Reply::error(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response();
    };

    let (sink, delivered) = ChannelSink::new();
    let exchange = match state.engine.open(&pipeline, inbound_from_axum(request), Box::new(sink)) {
        Ok(exchange) => exchange,
        Err(e) => {
            tracing::error!(error = %e, "Failed to register request");
            return Reply::internal_error().into_response();
        }
    };
    let id = exchange.id();
    let _close = CloseOnDrop(exchange.guard.clone());

    let engine = state.engine.clone();
    tokio::spawn(async move {
        let _permit = permit;
        engine.run(&pipeline, &exchange).await;
    });

    match delivered.await {
        Ok(response) => from_sink(response, id),
        Err(_) => {
            // The guard finalized without a completed write.
            tracing::warn!(request_id = %id, "Response was not delivered by the transport sink");
            Reply::internal_error().into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tower::ServiceExt;

    #[test]
    fn test_no_routes_is_an_error() {
        let config = EngineConfig::default();
        let engine = Arc::new(Engine::new(&config));
        let server = HttpServer::new(config, engine);
        assert!(matches!(server.into_router(), Err(ServerError::NoRoutes)));
    }

    #[test]
    fn test_methods_on_one_path_share_a_route() {
        let config = EngineConfig::default();
        let engine = Arc::new(Engine::new(&config));
        let server = HttpServer::new(config, engine)
            .route("/posts", MethodFilter::GET, Pipeline::builder().build())
            .route("/posts", MethodFilter::POST, Pipeline::builder().build())
            .route("/posts/{id}", MethodFilter::DELETE, Pipeline::builder().build());
        assert_eq!(server.route_count(), 2);
        assert!(server.into_router().is_ok());
    }

    #[tokio::test]
    async fn test_router_runs_pipeline() {
        let config = EngineConfig::default();
        let engine = Arc::new(Engine::new(&config));
        let app = HttpServer::new(config, engine.clone())
            .route(
                "/hello",
                MethodFilter::GET,
                Pipeline::builder()
                    .handler("hello", |_| async { Ok(Reply::text(StatusCode::OK, "hi")) })
                    .build(),
            )
            .into_router()
            .unwrap();

        let request = Request::builder().uri("/hello").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(crate::http::X_REQUEST_ID));
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(body.as_ref(), b"hi");
    }

    #[tokio::test]
    async fn test_in_flight_limit_rejects() {
        let mut config = EngineConfig::default();
        config.listener.max_connections = 0;
        let engine = Arc::new(Engine::new(&config));
        let app = HttpServer::new(config, engine.clone())
            .route("/x", MethodFilter::GET, Pipeline::builder().build())
            .into_router()
            .unwrap();

        let request = Request::builder().uri("/x").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(engine.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_hung_step_releases_slot() {
        let mut config = EngineConfig::default();
        config.listener.max_connections = 1;
        config.timeouts.request_ms = 50;
        let engine = Arc::new(Engine::new(&config));
        let app = HttpServer::new(config, engine.clone())
            .route(
                "/hang",
                MethodFilter::GET,
                Pipeline::builder()
                    .step_fn("hang", |_, _| std::future::pending())
                    .build(),
            )
            .route(
                "/ok",
                MethodFilter::GET,
                Pipeline::builder()
                    .handler("ok", |_| async { Ok(Reply::text(StatusCode::OK, "ok")) })
                    .build(),
            )
            .into_router()
            .unwrap();

        let request = Request::builder().uri("/hang").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

        // Let the abandoned pipeline task finish and drop its permit.
        tokio::time::sleep(Duration::from_millis(10)).await;

        for _ in 0..3 {
            let request = Request::builder().uri("/ok").body(Body::empty()).unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(engine.registry().is_empty());
    }
}
