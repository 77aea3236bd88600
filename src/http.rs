//! HTTP transport for the analysis pipeline
//!
//! Submit returns 202 with a task id; polling a known task is always HTTP 200
//! and reports failure through `task_status` and the analysis body.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AnalysisRequest;
use crate::error::{Result, VortexError};
use crate::server::VortexServer;
use crate::tasks::PollOutcome;

pub fn router(server: VortexServer) -> Router {
    Router::new()
        .route("/analysis", post(submit_handler))
        .route("/analysis/:task_id", get(poll_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/cognitive/summary", get(cognitive_summary_handler))
        .route("/metrics", get(metrics_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    "ok"
}

pub async fn submit_handler(
    State(server): State<VortexServer>,
    body: Bytes,
) -> Result<Response> {
    let body: Value = serde_json::from_slice(&body)?;
    let request = AnalysisRequest::from_json(body)?;
    let receipt = server
        .orchestrator
        .submit(request.context, request.force)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "task_id": receipt.task_id,
            "status": "processing",
            "coalesced": receipt.coalesced,
        })),
    )
        .into_response())
}

pub async fn poll_handler(
    State(server): State<VortexServer>,
    Path(task_id): Path<String>,
) -> Result<Response> {
    let response = match server.orchestrator.poll(&task_id).await? {
        PollOutcome::Processing => Json(json!({
            "status": "processing",
            "task_id": task_id,
        }))
        .into_response(),
        PollOutcome::Done(analysis) => Json(json!({
            "status": "ok",
            "task_status": "done",
            "task_id": task_id,
            "analysis": analysis,
        }))
        .into_response(),
        PollOutcome::Failed { error, analysis } => Json(json!({
            "status": "ok",
            "task_status": "error",
            "task_id": task_id,
            "error": error,
            "analysis": analysis,
        }))
        .into_response(),
        PollOutcome::NotFound => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "status": "not_found",
                "task_id": task_id,
            })),
        )
            .into_response(),
    };
    Ok(response)
}

/// Warm-up probe
pub async fn status_handler(State(server): State<VortexServer>) -> Result<Json<Value>> {
    let info = server.generator_info();
    let mut body = serde_json::to_value(server.warmup.state())?;
    let Value::Object(fields) = &mut body else {
        return Err(VortexError::Internal {
            message: "warm-up state did not serialize to an object".into(),
        });
    };
    fields.insert("warm".into(), json!(server.warmup.is_warm()));
    fields.insert("model".into(), json!(info.model));
    fields.insert("endpoint".into(), json!(info.endpoint));
    Ok(Json(body))
}

pub async fn cognitive_summary_handler(State(server): State<VortexServer>) -> impl IntoResponse {
    Json(server.ledger.summary())
}

pub async fn metrics_handler(State(server): State<VortexServer>) -> Result<impl IntoResponse> {
    Ok(Json(server.orchestrator.stats().await?))
}

/// Serve until `shutdown` is cancelled
pub async fn start_http_server(server: VortexServer, shutdown: CancellationToken) -> Result<()> {
    let bind = server.config.runtime.http_bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|e| VortexError::Internal {
            message: format!("Failed to bind HTTP listener on {}: {}", bind, e),
        })?;

    tracing::info!("Starting HTTP server on {}", bind);

    axum::serve(listener, router(server))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| VortexError::Internal {
            message: format!("HTTP server error: {}", e),
        })?;

    tracing::info!("HTTP server stopped");
    Ok(())
}
