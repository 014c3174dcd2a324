use serde::Serialize;

/// Header carrying the caller identity; every job route requires it.
pub const OWNER_HEADER: &str = "x-bulkops-owner";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

#[derive(Debug, Clone, Serialize)]
pub struct DispatchResponse {
    pub dispatched: bool,
}
