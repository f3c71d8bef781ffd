//! End-to-end tests over real sockets.

use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::routing::MethodFilter;
use request_lifecycle::auth::{authenticate_step, bearer_token, permission_step, Decision};
use request_lifecycle::http::X_REQUEST_ID;
use request_lifecycle::pipeline::StepError;
use request_lifecycle::request::Principal;
use request_lifecycle::{Pipeline, Reply};
use serde_json::{json, Value};

mod common;

use common::{config_with_deadline, eventually, start_server, ADMIN_KEY};

fn slow_pipeline(delay: Duration) -> Pipeline {
    Pipeline::builder()
        .handler("slow", move |_| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, StepError>(Reply::text(StatusCode::OK, "late"))
        })
        .build()
}

fn echo_pipeline() -> Pipeline {
    Pipeline::builder()
        .handler("echo", |ctx| async move {
            let body = ctx.read_body(1024).await?;
            let value: Value = serde_json::from_slice(&body).map_err(StepError::other)?;
            Ok::<_, StepError>(Reply::json(StatusCode::CREATED, &json!({ "received": value })))
        })
        .build()
}

#[tokio::test]
async fn test_happy_path_and_request_id_header() {
    let server = start_server(config_with_deadline(1_000), |s| {
        s.route("/echo", MethodFilter::POST, echo_pipeline())
    })
    .await;
    let seen = common::record_events(&server.engine);

    let res = reqwest::Client::new()
        .post(server.url("/echo"))
        .json(&json!({ "title": "hello" }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::CREATED);
    let id = res.headers()[X_REQUEST_ID].to_str().unwrap().to_string();
    assert!(id.parse::<request_lifecycle::RequestId>().is_ok());
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "received": { "title": "hello" } }));

    let engine = server.engine.clone();
    assert!(eventually(Duration::from_secs(1), || engine.registry().is_empty()).await);
    let events = seen.lock().clone();
    assert_eq!(events.first().map(String::as_str), Some("request:start"));
    assert!(events.iter().any(|e| e == "request:data"));
    assert!(events.iter().any(|e| e == "request:end"));
    assert_eq!(events.iter().filter(|e| *e == "response:close").count(), 1);
}

#[tokio::test]
async fn test_slow_handler_gets_408() {
    let server = start_server(config_with_deadline(50), |s| {
        s.route("/slow", MethodFilter::GET, slow_pipeline(Duration::from_millis(300)))
    })
    .await;

    let started = Instant::now();
    let res = reqwest::get(server.url("/slow")).await.unwrap();
    let elapsed = started.elapsed();
    assert_eq!(res.status(), StatusCode::REQUEST_TIMEOUT);
    assert!(elapsed >= Duration::from_millis(50), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(250), "answered after {:?}", elapsed);
    let body: Value = res.json().await.unwrap();
    assert_eq!(
        body,
        json!({
            "error": "Request Timeout",
            "message": "Request could not be processed within 50ms"
        })
    );
}

#[tokio::test]
async fn test_hung_handler_does_not_hold_a_connection_slot() {
    let mut config = config_with_deadline(50);
    config.listener.max_connections = 1;
    let server = start_server(config, |s| {
        s.route(
            "/hang",
            MethodFilter::GET,
            Pipeline::builder()
                .step_fn("hang", |_, _| std::future::pending())
                .build(),
        )
        .route("/fast", MethodFilter::GET, slow_pipeline(Duration::from_millis(1)))
    })
    .await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let res = client.get(server.url("/hang")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::REQUEST_TIMEOUT);
        let engine = server.engine.clone();
        assert!(eventually(Duration::from_secs(1), || engine.registry().is_empty()).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // The slot is released just after the response is sent, so allow a
    // short window rather than a single attempt.
    let mut status = StatusCode::SERVICE_UNAVAILABLE;
    for _ in 0..20 {
        status = client.get(server.url("/fast")).send().await.unwrap().status();
        if status == StatusCode::OK {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_fast_handler_beats_deadline() {
    let server = start_server(config_with_deadline(500), |s| {
        s.route("/fast", MethodFilter::GET, slow_pipeline(Duration::from_millis(10)))
    })
    .await;

    let res = reqwest::get(server.url("/fast")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "late");
    assert_eq!(server.engine.supervisor().armed_count(), 0);
}

#[tokio::test]
async fn test_permission_statuses() {
    fn lookup(headers: &axum::http::HeaderMap) -> Option<Principal> {
        let token = bearer_token(headers)?;
        Some(Principal {
            id: token.to_string(),
            username: token.to_string(),
            roles: vec![token.to_string()],
        })
    }
    fn editors(p: &Principal, _: &str, _: &str) -> Decision {
        p.roles.iter().any(|r| r == "editor").into()
    }

    let pipeline = Pipeline::builder()
        .step(authenticate_step(lookup))
        .step(permission_step(editors, "write", "posts"))
        .handler("ok", |_| async { Ok::<_, StepError>(Reply::empty()) })
        .build();
    let server = start_server(config_with_deadline(1_000), |s| {
        s.route("/posts", MethodFilter::PUT, pipeline)
    })
    .await;
    let client = reqwest::Client::new();

    let res = client.put(server.url("/posts")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(res.json::<Value>().await.unwrap(), json!({ "error": "Unauthorized" }));

    let res = client.put(server.url("/posts")).bearer_auth("reader").send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(res.json::<Value>().await.unwrap(), json!({ "error": "Forbidden" }));

    let res = client.put(server.url("/posts")).bearer_auth("editor").send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_failing_step_hides_details() {
    let pipeline = Pipeline::builder()
        .step_fn("db", |_, _| async { Err(StepError::msg("password=hunter2")) })
        .build();
    let server = start_server(config_with_deadline(1_000), |s| {
        s.route("/boom", MethodFilter::GET, pipeline)
    })
    .await;

    let res = reqwest::get(server.url("/boom")).await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let text = res.text().await.unwrap();
    assert!(!text.contains("hunter2"));
    assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), json!({ "error": "Internal Server Error" }));
}

#[tokio::test]
async fn test_admin_kill_in_flight_request() {
    let server = start_server(config_with_deadline(10_000), |s| {
        s.route("/hang", MethodFilter::GET, slow_pipeline(Duration::from_secs(5)))
    })
    .await;
    let client = reqwest::Client::new();

    let pending = tokio::spawn(reqwest::get(server.url("/hang")));

    let engine = server.engine.clone();
    assert!(eventually(Duration::from_secs(2), || engine.registry().len() == 1).await);

    let listed: Value = client
        .get(server.admin_url("/admin/requests"))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed[0]["path"], "/hang");
    assert_eq!(listed[0]["state"], "pending");
    let id = listed[0]["id"].as_str().unwrap().to_string();

    let kill = client
        .delete(server.admin_url(&format!("/admin/requests/{}", id)))
        .bearer_auth(ADMIN_KEY)
        .json(&json!({ "reason": "Maintenance", "status": 503 }))
        .send()
        .await
        .unwrap();
    assert_eq!(kill.status(), StatusCode::OK);
    assert_eq!(kill.json::<Value>().await.unwrap()["outcome"], "terminated");

    let res = pending.await.unwrap().unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        res.json::<Value>().await.unwrap(),
        json!({ "error": "Maintenance", "status": 503 })
    );

    let again = client
        .delete(server.admin_url(&format!("/admin/requests/{}", id)))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_requires_key() {
    let server = start_server(config_with_deadline(1_000), |s| {
        s.route("/x", MethodFilter::GET, Pipeline::builder().build())
    })
    .await;
    let client = reqwest::Client::new();

    let res = client.get(server.admin_url("/admin/status")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(server.admin_url("/admin/status"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let status: Value = client
        .get(server.admin_url("/admin/status"))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "operational");
    assert_eq!(status["default_deadline_ms"], 1_000);

    let bad = client
        .delete(server.admin_url("/admin/requests/not-a-uuid"))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_client_disconnect_marks_closed() {
    let server = start_server(config_with_deadline(10_000), |s| {
        s.route("/hang", MethodFilter::GET, slow_pipeline(Duration::from_secs(5)))
    })
    .await;
    let seen = common::record_events(&server.engine);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    assert!(client.get(server.url("/hang")).send().await.is_err());

    let engine = server.engine.clone();
    assert!(eventually(Duration::from_secs(2), || engine.registry().is_empty()).await);
    assert_eq!(engine.supervisor().armed_count(), 0);
    let events = seen.lock().clone();
    assert!(events.iter().any(|e| e == "response:close"));
    assert!(!events.iter().any(|e| e == "response:end"));
}
