use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use bulkops_common::error::{BulkopsError, Result};
use tokio::sync::RwLock;

use super::{JobStore, drop_lease, extend_lease, grant_lease, sort_newest_first};
use crate::job::{Job, JobPatch};

#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: Job) -> Result<String> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(BulkopsError::InvalidArgument(format!(
                "job already exists: {}",
                job.id
            )));
        }
        let id = job.id.clone();
        jobs.insert(id.clone(), job);
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn update(&self, id: &str, patch: JobPatch) -> Result<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| BulkopsError::JobNotFound(id.to_string()))?;
        job.apply(patch)?;
        Ok(job.clone())
    }

    async fn list(&self, owner: Option<&str>) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| owner.is_none_or(|owner| job.owner == owner))
            .cloned()
            .collect();
        sort_newest_first(&mut jobs);
        Ok(jobs)
    }

    async fn try_acquire_lease(&self, id: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| BulkopsError::JobNotFound(id.to_string()))?;
        grant_lease(job, holder, ttl)
    }

    async fn renew_lease(&self, id: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| BulkopsError::JobNotFound(id.to_string()))?;
        extend_lease(job, holder, ttl)
    }

    async fn release_lease(&self, id: &str, holder: &str) -> Result<()> {
        if let Some(job) = self.jobs.write().await.get_mut(id) {
            drop_lease(job, holder);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{
        job::JobProgress,
        types::{JobItem, JobStatus},
    };

    fn job(id: &str, owner: &str) -> Job {
        Job::new_pending(
            id,
            "session.pause",
            owner,
            vec![JobItem::new("a"), JobItem::new("b")],
            serde_json::Value::Null,
        )
    }

    #[tokio::test]
    async fn update_runs_lifecycle_checks() {
        let store = MemoryJobStore::new();
        store.create(job("j1", "acme")).await.unwrap();

        store.update("j1", JobPatch::running(Utc::now())).await.unwrap();
        let updated = store
            .update("j1", JobPatch::progress(JobProgress::from_counts(2, 1, 0)))
            .await
            .unwrap();
        assert_eq!(updated.progress_percent, 50);

        store
            .update("j1", JobPatch::failed("downstream unreachable", Utc::now()))
            .await
            .unwrap();
        let err = store
            .update("j1", JobPatch::progress(JobProgress::from_counts(2, 2, 0)))
            .await
            .unwrap_err();
        assert!(matches!(err, BulkopsError::JobAlreadyTerminal(_)));

        let stored = store.get("j1").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.processed_items, 1);
    }

    #[tokio::test]
    async fn update_missing_job_is_not_found() {
        let store = MemoryJobStore::new();
        let err = store
            .update("nope", JobPatch::running(Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, BulkopsError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn list_filters_by_owner() {
        let store = MemoryJobStore::new();
        store.create(job("j1", "acme")).await.unwrap();
        store.create(job("j2", "globex")).await.unwrap();
        store.create(job("j3", "acme")).await.unwrap();

        let acme = store.list(Some("acme")).await.unwrap();
        assert_eq!(acme.len(), 2);
        assert!(acme.iter().all(|job| job.owner == "acme"));
        assert_eq!(store.list(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn lease_is_exclusive_until_expired() {
        let store = MemoryJobStore::new();
        store.create(job("j1", "acme")).await.unwrap();
        let ttl = Duration::from_millis(50);

        assert!(store.try_acquire_lease("j1", "w1", ttl).await.unwrap());
        assert!(!store.try_acquire_lease("j1", "w2", ttl).await.unwrap());
        assert!(store.renew_lease("j1", "w1", ttl).await.unwrap());
        assert!(!store.renew_lease("j1", "w2", ttl).await.unwrap());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(store.try_acquire_lease("j1", "w2", ttl).await.unwrap());
        assert!(!store.renew_lease("j1", "w1", ttl).await.unwrap());

        store.release_lease("j1", "w1").await.unwrap();
        assert!(store.get("j1").await.unwrap().unwrap().lease.is_some());
        store.release_lease("j1", "w2").await.unwrap();
        assert!(store.get("j1").await.unwrap().unwrap().lease.is_none());
    }

    #[tokio::test]
    async fn terminal_job_cannot_be_leased() {
        let store = MemoryJobStore::new();
        store.create(job("j1", "acme")).await.unwrap();
        store
            .update("j1", JobPatch::failed("cancelled", Utc::now()))
            .await
            .unwrap();
        assert!(
            !store
                .try_acquire_lease("j1", "w1", Duration::from_secs(1))
                .await
                .unwrap()
        );
    }
}
