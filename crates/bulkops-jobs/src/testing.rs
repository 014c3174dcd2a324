use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bulkops_common::error::{BulkopsError, Result};

use crate::{
    executor::{ActionExecutor, ActionResult},
    job::{Job, JobPatch},
    outcome::ItemError,
    store::{JobStore, MemoryJobStore},
    types::{JobItem, JobStatus},
};

/// Memory store that keeps every applied patch and can be told to misbehave.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryJobStore,
    patches: Mutex<Vec<(String, JobPatch)>>,
    pub fail_completion: AtomicBool,
    pub fail_progress: AtomicBool,
    pub fail_renewal: AtomicBool,
    pub panic_on_progress: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn patches(&self, job_id: &str) -> Vec<JobPatch> {
        self.patches
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == job_id)
            .map(|(_, patch)| patch.clone())
            .collect()
    }

    pub fn progress_writes(&self, job_id: &str) -> Vec<u64> {
        self.patches(job_id)
            .into_iter()
            .filter(JobPatch::is_progress_only)
            .filter_map(|patch| patch.progress.map(|progress| progress.processed_items))
            .collect()
    }
}

#[async_trait]
impl JobStore for RecordingStore {
    async fn create(&self, job: Job) -> Result<String> {
        self.inner.create(job).await
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        self.inner.get(id).await
    }

    async fn update(&self, id: &str, patch: JobPatch) -> Result<Job> {
        if patch.is_progress_only() && self.panic_on_progress.load(Ordering::SeqCst) {
            panic!("progress write exploded");
        }
        if patch.is_progress_only() && self.fail_progress.load(Ordering::SeqCst) {
            return Err(BulkopsError::InternalError("progress write refused".to_string()));
        }
        if patch.status == Some(JobStatus::Completed) && self.fail_completion.load(Ordering::SeqCst)
        {
            return Err(BulkopsError::InternalError("store unreachable".to_string()));
        }
        let job = self.inner.update(id, patch.clone()).await?;
        self.patches.lock().unwrap().push((id.to_string(), patch));
        Ok(job)
    }

    async fn list(&self, owner: Option<&str>) -> Result<Vec<Job>> {
        self.inner.list(owner).await
    }

    async fn try_acquire_lease(&self, id: &str, holder: &str, ttl: Duration) -> Result<bool> {
        self.inner.try_acquire_lease(id, holder, ttl).await
    }

    async fn renew_lease(&self, id: &str, holder: &str, ttl: Duration) -> Result<bool> {
        if self.fail_renewal.load(Ordering::SeqCst) {
            return Err(BulkopsError::InternalError("lease store unreachable".to_string()));
        }
        self.inner.renew_lease(id, holder, ttl).await
    }

    async fn release_lease(&self, id: &str, holder: &str) -> Result<()> {
        self.inner.release_lease(id, holder).await
    }
}

#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail(&'static str),
    Hang,
    Panic,
    Delay(Duration),
}

/// Executor whose per-item behavior is scripted by item id; unknown ids succeed.
#[derive(Default)]
pub struct ScriptedExecutor {
    behaviors: HashMap<String, Behavior>,
    preflight_error: Option<String>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, item_id: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(item_id.to_string(), behavior);
        self
    }

    pub fn failing_preflight(mut self, message: &str) -> Self {
        self.preflight_error = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionExecutor for ScriptedExecutor {
    async fn preflight(&self, _job: &Job) -> Result<()> {
        match &self.preflight_error {
            Some(message) => Err(BulkopsError::MissingConfiguration(message.clone())),
            None => Ok(()),
        }
    }

    async fn apply(&self, item: &JobItem, _parameters: &serde_json::Value) -> ActionResult {
        self.calls.lock().unwrap().push(item.id.clone());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        // keep every call of a batch overlapping so fan-out is observable
        tokio::time::sleep(Duration::from_millis(5)).await;
        let behavior = self
            .behaviors
            .get(&item.id)
            .cloned()
            .unwrap_or(Behavior::Succeed);
        let result = match behavior {
            Behavior::Succeed => Ok(serde_json::json!({ "item": item.id })),
            Behavior::Fail(message) => Err(ItemError::Rejected(message.to_string())),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok(serde_json::Value::Null)
            }
            Behavior::Panic => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                panic!("executor blew up on {}", item.id);
            }
            Behavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(serde_json::Value::Null)
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub fn items(ids: &[&str]) -> Vec<JobItem> {
    ids.iter().map(|id| JobItem::new(*id)).collect()
}

pub fn numbered_items(count: usize) -> Vec<JobItem> {
    (0..count).map(|i| JobItem::new(format!("item-{i}"))).collect()
}
