pub mod file;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use bulkops_common::error::{BulkopsError, Result};
use chrono::{DateTime, Utc};

use crate::job::{Job, JobLease, JobPatch};

pub use file::FileJobStore;
pub use memory::MemoryJobStore;

/// Durable record of jobs. `update` must be atomic per call; nothing here spans calls.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: Job) -> Result<String>;
    async fn get(&self, id: &str) -> Result<Option<Job>>;
    /// Applies `patch` through [`Job::apply`] and returns the stored job.
    async fn update(&self, id: &str, patch: JobPatch) -> Result<Job>;
    /// Newest first. `None` lists every owner.
    async fn list(&self, owner: Option<&str>) -> Result<Vec<Job>>;

    /// Grants the lease when it is free, expired, or already held by `holder`.
    async fn try_acquire_lease(&self, id: &str, holder: &str, ttl: Duration) -> Result<bool>;
    async fn renew_lease(&self, id: &str, holder: &str, ttl: Duration) -> Result<bool>;
    async fn release_lease(&self, id: &str, holder: &str) -> Result<()>;
}

pub(crate) fn lease_expiry(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|err| BulkopsError::InvalidArgument(format!("invalid lease ttl: {err}")))?;
    Ok(now + ttl)
}

/// Shared lease rules so every backend grants and renews the same way.
pub(crate) fn grant_lease(job: &mut Job, holder: &str, ttl: Duration) -> Result<bool> {
    if job.status.is_terminal() {
        return Ok(false);
    }

    let now = Utc::now();
    if let Some(lease) = job.lease.as_ref() {
        if lease.holder != holder && !lease.is_expired(now) {
            return Ok(false);
        }
    }

    job.lease = Some(JobLease {
        holder: holder.to_string(),
        expires_at: lease_expiry(now, ttl)?,
    });
    Ok(true)
}

pub(crate) fn extend_lease(job: &mut Job, holder: &str, ttl: Duration) -> Result<bool> {
    if job.status.is_terminal() {
        return Ok(false);
    }

    let now = Utc::now();
    match job.lease.as_mut() {
        Some(lease) if lease.holder == holder && !lease.is_expired(now) => {
            lease.expires_at = lease_expiry(now, ttl)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

pub(crate) fn drop_lease(job: &mut Job, holder: &str) -> bool {
    if job.lease.as_ref().is_some_and(|lease| lease.holder == holder) {
        job.lease = None;
        return true;
    }
    false
}

pub(crate) fn sort_newest_first(jobs: &mut [Job]) {
    jobs.sort_by(|left, right| right.created_at.cmp(&left.created_at));
}
