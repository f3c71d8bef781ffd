//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use request_lifecycle::admin::setup_admin_router;
use request_lifecycle::config::EngineConfig;
use request_lifecycle::{Engine, HttpServer, Shutdown};
use tokio::net::TcpListener;

pub const ADMIN_KEY: &str = "test-admin-key";

/// A running HTTP server plus its admin API, stopped on drop of `shutdown`.
pub struct TestServer {
    pub addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub engine: Arc<Engine>,
    pub shutdown: Shutdown,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn admin_url(&self, path: &str) -> String {
        format!("http://{}{}", self.admin_addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub fn config_with_deadline(request_ms: u64) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.timeouts.request_ms = request_ms;
    config.listener.bind_address = "127.0.0.1:0".into();
    config
}

/// Start the server on an ephemeral port with the routes `build` adds.
pub async fn start_server<F>(config: EngineConfig, build: F) -> TestServer
where
    F: FnOnce(HttpServer) -> HttpServer,
{
    let engine = Arc::new(Engine::new(&config));
    let shutdown = Shutdown::new();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = build(HttpServer::new(config, engine.clone()));
    let stop = shutdown.subscribe();
    tokio::spawn(async move {
        server.run(listener, stop).await.unwrap();
    });

    let admin_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let admin_addr = admin_listener.local_addr().unwrap();
    let app = setup_admin_router(engine.clone(), ADMIN_KEY);
    let mut admin_stop = shutdown.subscribe();
    tokio::spawn(async move {
        axum::serve(admin_listener, app)
            .with_graceful_shutdown(async move {
                let _ = admin_stop.recv().await;
            })
            .await
            .unwrap();
    });

    TestServer {
        addr,
        admin_addr,
        engine,
        shutdown,
    }
}

/// Record every lifecycle event name published on the engine's bus.
pub fn record_events(engine: &Engine) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    engine.bus().subscribe_all(move |e| {
        s.lock().push(e.name().into_owned());
        Ok(())
    });
    seen
}

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
