//! HTTP job surface.
//!
//! Clients submit a coordination request, receive a job id right away and
//! poll for status and result. Requests never wait on a coordination run.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use crate::agents::{AgentRegistry, ModelTier, confidence};
use crate::coordinator::CoordinationRequest;
use crate::error::JobError;
use crate::jobs::{JobManager, JobResultView, JobSnapshot, SubmitReceipt};

pub type ApiError = (StatusCode, Json<Value>);
pub type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

fn job_error(err: JobError) -> ApiError {
    let status = match &err {
        JobError::Validation(_) => StatusCode::BAD_REQUEST,
        JobError::NotFound(_) => StatusCode::NOT_FOUND,
        JobError::NotReady(_) => StatusCode::CONFLICT,
        JobError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, err.to_string())
}

#[derive(Debug, Serialize)]
pub struct AgentInfo {
    pub role: String,
    pub tier: ModelTier,
    pub retrieval: bool,
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

pub fn build_server_router(manager: Arc<JobManager>) -> Router {
    Router::new()
        .route("/healthz", get(handle_health))
        .route("/v1/agents", get(handle_agents))
        .route("/v1/jobs", post(handle_submit))
        .route("/v1/jobs/{id}", get(handle_status))
        .route("/v1/jobs/{id}/result", get(handle_result))
        .with_state(manager)
}

async fn handle_health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn handle_agents(State(manager): State<Arc<JobManager>>) -> Json<Vec<AgentInfo>> {
    Json(describe_agents(manager.coordinator().router().registry(), None))
}

async fn handle_submit(
    State(manager): State<Arc<JobManager>>,
    payload: std::result::Result<Json<CoordinationRequest>, JsonRejection>,
) -> std::result::Result<(StatusCode, Json<SubmitReceipt>), ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("invalid job request: {}", rejection.body_text()),
        )
    })?;
    let receipt = manager.submit(request).await.map_err(job_error)?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

async fn handle_status(
    State(manager): State<Arc<JobManager>>,
    Path(id): Path<String>,
) -> ApiResult<JobSnapshot> {
    manager.status(&id).await.map(Json).map_err(job_error)
}

async fn handle_result(
    State(manager): State<Arc<JobManager>>,
    Path(id): Path<String>,
) -> ApiResult<JobResultView> {
    manager.result(&id).await.map(Json).map_err(job_error)
}

/// Lists every unit, scored against `query` when one is given.
pub fn describe_agents(registry: &AgentRegistry, query: Option<&str>) -> Vec<AgentInfo> {
    registry
        .units()
        .iter()
        .map(|unit| AgentInfo {
            role: unit.role.clone(),
            tier: unit.tier,
            retrieval: unit.is_retrieval(),
            keywords: unit.keywords.iter().map(|k| k.term.clone()).collect(),
            confidence: query.map(|q| confidence(unit, q)),
        })
        .collect()
}

/// Serves the job API until Ctrl+C or SIGTERM, then drains the worker pool.
pub async fn run_server(manager: Arc<JobManager>, host: &str, port: u16) -> Result<()> {
    let addr = format!("{host}:{port}")
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid server bind address '{host}:{port}'"))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind server listener")?;
    info!(%addr, "colmeia listening (jobs: /v1/jobs, agents: /v1/agents, health: /healthz)");

    axum::serve(listener, build_server_router(Arc::clone(&manager)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server runtime failed")?;

    manager.shutdown().await;
    Ok(())
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down gracefully"),
        _ = terminate => info!("received SIGTERM, shutting down gracefully"),
    }
}
