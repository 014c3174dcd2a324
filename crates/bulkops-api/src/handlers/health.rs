use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use bulkops_jobs::{JobEngine, JobStore};
use tracing::warn;

pub async fn health_live() -> impl IntoResponse {
    StatusCode::OK
}

pub async fn health_ready(State(engine): State<Arc<JobEngine>>) -> impl IntoResponse {
    match engine.store().list(None).await {
        Ok(_) => StatusCode::OK,
        Err(err) => {
            warn!(error = %err, "job store is not ready");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
