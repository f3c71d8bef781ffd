//! Demo server for the request lifecycle engine.
//!
//! Serves a few routes that exercise the pipeline: an authenticated,
//! permission-checked listing, a body echo, and a deliberately slow route
//! that trips the deadline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::MethodFilter;
use clap::Parser;
use serde_json::json;
use tokio::net::TcpListener;

use request_lifecycle::admin::setup_admin_router;
use request_lifecycle::auth::{authenticate_step, bearer_token, permission_step, Decision};
use request_lifecycle::config::{load_config, ConfigWatcher, EngineConfig};
use request_lifecycle::lifecycle::{spawn_signal_listener, Shutdown};
use request_lifecycle::observability::{init_logging, metrics};
use request_lifecycle::pipeline::StepError;
use request_lifecycle::request::Principal;
use request_lifecycle::{Engine, HttpServer, Pipeline, Reply};

#[derive(Parser)]
#[command(name = "request-lifecycle")]
#[command(about = "Request lifecycle engine demo server", long_about = None)]
struct Args {
    /// Path to a TOML config file. Watched for changes when given.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn demo_principal(headers: &axum::http::HeaderMap) -> Option<Principal> {
    match bearer_token(headers)? {
        "admin-token" => Some(Principal {
            id: "1".into(),
            username: "alice".into(),
            roles: vec!["admin".into()],
        }),
        "viewer-token" => Some(Principal {
            id: "2".into(),
            username: "bob".into(),
            roles: vec!["viewer".into()],
        }),
        _ => None,
    }
}

fn role_check(principal: &Principal, action: &str, _resource: &str) -> Decision {
    let needed = if action == "read" { "viewer" } else { "admin" };
    principal
        .roles
        .iter()
        .any(|role| role == needed || role == "admin")
        .into()
}

fn routes(server: HttpServer, body_limit: usize) -> HttpServer {
    let health = Pipeline::builder()
        .handler("health", |_| async { Ok(Reply::json(StatusCode::OK, &json!({ "status": "ok" }))) })
        .build();

    let list_posts = Pipeline::builder()
        .step(authenticate_step(demo_principal))
        .step(permission_step(role_check, "read", "posts"))
        .handler("list-posts", |ctx| async move {
            let user = ctx.principal().map(|p| p.username.clone());
            Ok(Reply::json(StatusCode::OK, &json!({ "posts": [], "user": user })))
        })
        .build();

    let create_post = Pipeline::builder()
        .step(authenticate_step(demo_principal))
        .step(permission_step(role_check, "write", "posts"))
        .handler("create-post", move |ctx| async move {
            let body = ctx.read_body(body_limit).await?;
            let post: serde_json::Value = serde_json::from_slice(&body).map_err(StepError::other)?;
            Ok::<_, StepError>(Reply::json(StatusCode::CREATED, &post))
        })
        .build();

    let slow = Pipeline::builder()
        .deadline(Duration::from_millis(500))
        .handler("slow", |_| async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(Reply::text(StatusCode::OK, "finished"))
        })
        .build();

    server
        .route("/health", MethodFilter::GET, health)
        .route("/posts", MethodFilter::GET, list_posts)
        .route("/posts", MethodFilter::POST, create_post)
        .route("/slow", MethodFilter::GET, slow)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };

    let log_handle = init_logging(&config.logging)?;
    tracing::info!("request-lifecycle v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        request_timeout_ms = config.timeouts.request_ms,
        "Configuration loaded"
    );

    let engine = Arc::new(Engine::new(&config).with_log_handle(log_handle));
    let shutdown = Arc::new(Shutdown::new());
    spawn_signal_listener(shutdown.clone());

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher stops when dropped, so it lives until main returns.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let engine = engine.clone();
            tokio::spawn(async move {
                while let Some(new_config) = updates.recv().await {
                    engine.apply_config(&new_config);
                }
            });
            Some(watcher.run()?)
        }
        None => None,
    };

    if config.admin.enabled {
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
        let app = setup_admin_router(engine.clone(), config.admin.api_key.clone());
        let mut stop = shutdown.subscribe();
        tokio::spawn(async move {
            let served = axum::serve(admin_listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let body_limit = config.http.body_limit_bytes;
    let server = routes(HttpServer::new(config, engine), body_limit);
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
