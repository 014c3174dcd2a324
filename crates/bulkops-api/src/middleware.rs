use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use bulkops_common::error::BulkopsError;
use tracing::debug;

use crate::{
    handlers::ApiError,
    types::{OWNER_HEADER, Owner},
};

pub async fn require_owner(mut req: Request, next: Next) -> Response {
    let owner = req
        .headers()
        .get(OWNER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let Some(owner) = owner else {
        debug!(path = %req.uri().path(), "request without owner header rejected");
        return ApiError(BulkopsError::AccessDenied(format!(
            "{OWNER_HEADER} header is required"
        )))
        .into_response();
    };

    req.extensions_mut().insert(Owner(owner));
    next.run(req).await
}
