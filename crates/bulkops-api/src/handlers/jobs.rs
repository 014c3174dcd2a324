use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use bulkops_common::error::BulkopsError;
use bulkops_jobs::{BulkJobRequest, Job, JobEngine, SubmittedJob};

use crate::{
    handlers::ApiError,
    types::{DispatchResponse, Owner},
};

pub async fn submit_job(
    State(engine): State<Arc<JobEngine>>,
    Extension(Owner(owner)): Extension<Owner>,
    Json(payload): Json<BulkJobRequest>,
) -> Result<(StatusCode, Json<SubmittedJob>), ApiError> {
    let submitted = engine.submit(&owner, payload).await?;
    Ok((StatusCode::ACCEPTED, Json(submitted)))
}

pub async fn list_jobs(
    State(engine): State<Arc<JobEngine>>,
    Extension(Owner(owner)): Extension<Owner>,
) -> Result<Json<Vec<Job>>, ApiError> {
    Ok(Json(engine.list_jobs(Some(&owner)).await?))
}

pub async fn get_job(
    State(engine): State<Arc<JobEngine>>,
    Extension(Owner(owner)): Extension<Owner>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    owned_job(&engine, &job_id, &owner).await.map(Json)
}

pub async fn cancel_job(
    State(engine): State<Arc<JobEngine>>,
    Extension(Owner(owner)): Extension<Owner>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    owned_job(&engine, &job_id, &owner).await?;
    Ok(Json(engine.cancel_job(&job_id).await?))
}

/// Re-triggers a job; a no-op when it is already in flight here or no longer pending.
pub async fn dispatch_job(
    State(engine): State<Arc<JobEngine>>,
    Extension(Owner(owner)): Extension<Owner>,
    Path(job_id): Path<String>,
) -> Result<Json<DispatchResponse>, ApiError> {
    let job = owned_job(&engine, &job_id, &owner).await?;
    if job.status.is_terminal() {
        return Err(BulkopsError::JobAlreadyTerminal(job_id).into());
    }

    let dispatched = engine.dispatch(&job_id).is_some();
    Ok(Json(DispatchResponse { dispatched }))
}

async fn owned_job(engine: &JobEngine, job_id: &str, owner: &str) -> Result<Job, ApiError> {
    let job = engine
        .get_job(job_id)
        .await?
        .ok_or_else(|| BulkopsError::JobNotFound(job_id.to_string()))?;
    if job.owner != owner {
        return Err(BulkopsError::AccessDenied(format!(
            "job {job_id} belongs to another owner"
        ))
        .into());
    }
    Ok(job)
}
