use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use bulkops_jobs::JobEngine;

use crate::{handlers, middleware::require_owner};

pub fn api_router(engine: Arc<JobEngine>) -> Router {
    let jobs = Router::new()
        .route(
            "/api/v1/bulk/jobs",
            get(handlers::jobs::list_jobs).post(handlers::jobs::submit_job),
        )
        .route(
            "/api/v1/bulk/jobs/{job_id}",
            get(handlers::jobs::get_job).delete(handlers::jobs::cancel_job),
        )
        .route(
            "/api/v1/bulk/jobs/{job_id}/dispatch",
            post(handlers::jobs::dispatch_job),
        )
        .route_layer(middleware::from_fn(require_owner));

    Router::new()
        .route("/health/live", get(handlers::health::health_live))
        .route("/health/ready", get(handlers::health::health_ready))
        .merge(jobs)
        .with_state(engine)
}
