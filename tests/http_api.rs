mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use common::{ScriptedGenerator, Step, server_with};
use vortex_observer::http::router;

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| {
        Value::String(String::from_utf8_lossy(&bytes).into_owned())
    });
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = router(server_with(Arc::new(ScriptedGenerator::new([Step::Hang]))));
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("ok"));
}

#[tokio::test]
async fn test_submit_then_poll_until_done() {
    let app = router(server_with(Arc::new(ScriptedGenerator::replying(
        r#"{"scenarios": {"critical": [{"condition": "IAM", "why": "supradesnivel ST"}]}}"#,
    ))));

    let (status, receipt) = send(
        &app,
        post_json(
            "/analysis",
            r#"{"clinical_text": "dolor opresivo irradiado a brazo izquierdo", "age": 62}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(receipt["status"], "processing");
    assert_eq!(receipt["coalesced"], false);
    let task_id = receipt["task_id"].as_str().unwrap().to_string();

    let mut body = Value::Null;
    for _ in 0..200 {
        let (status, polled) = send(&app, get(&format!("/analysis/{}", task_id))).await;
        assert_eq!(status, StatusCode::OK);
        if polled["status"] == "ok" {
            body = polled;
            break;
        }
        assert_eq!(polled["status"], "processing");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(body["task_status"], "done");
    let analysis = &body["analysis"];
    assert_eq!(analysis["severity"], "red");
    assert_eq!(analysis["llm_status"], "ok");
    assert_eq!(analysis["critical"][0]["label"], "IAM");
    assert_eq!(analysis["critical"][0]["rationale"], "supradesnivel ST");
    assert!(analysis["workup"].as_array().unwrap().is_empty());
    assert_eq!(analysis["clinical_phase"], "experimental");

    let (_, summary) = send(&app, get("/cognitive/summary")).await;
    assert_eq!(summary["total_analyses"], 1);

    let (_, metrics) = send(&app, get("/metrics")).await;
    assert_eq!(metrics["submitted"], 1);
    assert_eq!(metrics["completed_done"], 1);
    assert_eq!(metrics["processing"], 0);
}

#[tokio::test]
async fn test_rejects_non_object_bodies() {
    let app = router(server_with(Arc::new(ScriptedGenerator::new([Step::Hang]))));

    let (status, body) = send(&app, post_json("/analysis", "[1, 2]")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_params");

    let (status, _) = send(&app, post_json("/analysis", "not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let app = router(server_with(Arc::new(ScriptedGenerator::new([Step::Hang]))));
    let (status, body) = send(&app, get("/analysis/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "not_found");
    assert_eq!(body["task_id"], "does-not-exist");
}

#[tokio::test]
async fn test_status_reports_pending_warmup() {
    let app = router(server_with(Arc::new(ScriptedGenerator::new([Step::Hang]))));
    let (status, body) = send(&app, get("/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["warm"], false);
    assert_eq!(body["warmup"], "pending");
    assert_eq!(body["model"], "scripted");
}
