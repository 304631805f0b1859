//! Mesh node HTTP server (spec §4.13): the axum surface a remote node
//! exposes so another fabric's `MeshTransport` can reach it.

use crate::error::ChainboxError;
use crate::executor::{ExecuteOptions, Executor};
use crate::fabric::Fabric;
use crate::signer::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::types::{ExecutionResult, MeshBatchPayload, MeshPayload};
use axum::extract::{DefaultBodyLimit, Json, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Clone)]
struct NodeState {
    fabric: Arc<Fabric>,
    executor: Arc<Executor>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
    node: &'static str,
}

#[derive(Serialize)]
struct BatchResponse {
    results: Vec<ExecutionResult>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn verify_signature(fabric: &Fabric, headers: &HeaderMap, body: &serde_json::Value) -> Result<(), StatusCode> {
    if fabric.config.mesh.secret.is_none() {
        return Ok(());
    }
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;
    let timestamp: i64 = headers
        .get(TIMESTAMP_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;
    fabric
        .signer
        .verify(body, timestamp, signature, now_ms())
        .map_err(|_| StatusCode::UNAUTHORIZED)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        node: "chainbox-node",
    })
}

async fn execute_handler(
    State(state): State<NodeState>,
    headers: HeaderMap,
    Json(payload): Json<MeshPayload>,
) -> Result<Json<ExecutionResult>, StatusCode> {
    let body = serde_json::to_value(&payload).map_err(|_| StatusCode::BAD_REQUEST)?;
    verify_signature(&state.fabric, &headers, &body)?;

    let result = state
        .executor
        .execute(
            &payload.fn_name,
            payload.input,
            payload.identity,
            ExecuteOptions {
                trace_id: Some(payload.trace_id),
                force_local: true,
                inbound_frame: Some(payload.frame),
                ..Default::default()
            },
        )
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(result))
}

async fn execute_batch_handler(
    State(state): State<NodeState>,
    headers: HeaderMap,
    Json(payload): Json<MeshBatchPayload>,
) -> Result<Json<BatchResponse>, StatusCode> {
    let body = serde_json::to_value(&payload).map_err(|_| StatusCode::BAD_REQUEST)?;
    verify_signature(&state.fabric, &headers, &body)?;

    let calls = payload
        .calls
        .into_iter()
        .map(|c| (c.fn_name, c.input))
        .collect();
    let frame = payload.frame.continue_remote(now_ms());

    let outcomes = state
        .executor
        .parallel_root(calls, payload.identity, payload.trace_id, frame)
        .await;

    let results = outcomes
        .into_iter()
        .map(|outcome| match outcome {
            crate::executor::ParallelOutcome::Ok(value) => ExecutionResult {
                value,
                outcome: crate::error::Outcome::Success,
                trace: None,
            },
            crate::executor::ParallelOutcome::Err(envelope) => ExecutionResult {
                value: serde_json::to_value(&envelope).unwrap_or(serde_json::Value::Null),
                outcome: crate::error::Outcome::Failure,
                trace: None,
            },
        })
        .collect();

    Ok(Json(BatchResponse { results }))
}

/// Runs the mesh node server until ctrl-c or SIGTERM, draining in-flight
/// requests for up to `grace_period` before forcing shutdown (spec §4.13
/// "Safeguards").
pub async fn serve(fabric: Arc<Fabric>, bind_addr: &str, grace_period: Duration) -> Result<(), ChainboxError> {
    fabric.mark_as_mesh_node();
    let executor = Executor::new(fabric.clone());
    let state = NodeState { fabric: fabric.clone(), executor };

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/execute", post(execute_handler))
        .route("/execute/batch", post(execute_batch_handler))
        .layer(DefaultBodyLimit::max(fabric.config.max_body_size))
        .with_state(state);

    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| ChainboxError::Internal(format!("invalid bind address {bind_addr}: {e}")))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ChainboxError::Internal(format!("binding {addr}: {e}")))?;

    tracing::info!(%addr, "chainbox mesh node listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(grace_period))
        .await
        .map_err(|e| ChainboxError::Internal(format!("mesh server error: {e}")))
}

async fn shutdown_signal(grace_period: Duration) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("installing ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("chainbox mesh node shutting down, draining in-flight requests");
    tokio::time::sleep(grace_period).await;
}
