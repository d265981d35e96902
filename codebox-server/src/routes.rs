//! HTTP API
//!
//! Thin handlers over [`SandboxService`]. Script failures and timeouts are
//! reported inside a 200 execution result, never as HTTP errors.

use crate::error::ApiError;
use axum::{
    extract::State,
    routing::{delete, get, post},
    Json, Router,
};
use codebox_sandbox::{ExecutionRequest, ExecutionResult, FileInfo, SandboxService, SessionStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SandboxService>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// Unix time in seconds
    pub timestamp: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FilesResponse {
    pub files: Vec<FileInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
    pub success: bool,
}

pub fn create_router(service: Arc<SandboxService>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/status", get(get_status))
        .route("/files", get(list_files).delete(clear_files))
        .route("/execute", post(execute_code))
        .route("/session", delete(reset_session))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { service })
}

async fn health_check() -> Json<HealthResponse> {
    let now = chrono::Utc::now();
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: now.timestamp_micros() as f64 / 1_000_000.0,
    })
}

async fn get_status(State(state): State<AppState>) -> Json<SessionStatus> {
    Json(state.service.status())
}

async fn list_files(State(state): State<AppState>) -> Json<FilesResponse> {
    Json(FilesResponse {
        files: state.service.list_files(),
    })
}

async fn clear_files(State(state): State<AppState>) -> Result<Json<MessageResponse>, ApiError> {
    state.service.clear_files().map_err(ApiError::ClearFiles)?;
    Ok(Json(MessageResponse {
        message: "All files cleared".to_string(),
        success: true,
    }))
}

async fn execute_code(
    State(state): State<AppState>,
    Json(request): Json<ExecutionRequest>,
) -> Json<ExecutionResult> {
    let started = Instant::now();
    match state.service.execute(request).await {
        Ok(result) => Json(result),
        Err(e) => {
            // The session could not run the code at all; report it like a failed run
            tracing::error!(error = %e, "Execution could not be served");
            let message = e.to_string();
            Json(ExecutionResult {
                stdout: String::new(),
                stderr: format!("{message}\n"),
                success: false,
                execution_time: started.elapsed().as_secs_f64(),
                files: state.service.list_files(),
                error: Some(message),
                timed_out: false,
            })
        }
    }
}

async fn reset_session(State(state): State<AppState>) -> Result<Json<MessageResponse>, ApiError> {
    state
        .service
        .reset_session()
        .await
        .map_err(ApiError::ResetSession)?;
    Ok(Json(MessageResponse {
        message: "Session reset".to_string(),
        success: true,
    }))
}
