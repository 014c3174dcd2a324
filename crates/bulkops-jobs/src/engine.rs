use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use bulkops_common::error::{BulkopsError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::EngineConfig,
    executor::ActionRegistry,
    guard::{DispatchGuard, DispatchPermit},
    job::{Job, JobPatch},
    scheduler::{BatchScheduler, RunOutcome, RunSignals, panic_message},
    store::JobStore,
    types::{JobItem, JobStatus},
};

pub const CANCELLED_MESSAGE: &str = "job cancelled";
pub const STALE_LEASE_MESSAGE: &str = "job lease expired before completion";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkJobRequest {
    pub kind: String,
    pub items: Vec<JobItem>,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedJob {
    pub job_id: String,
    pub total_items: u64,
}

type CancellationMap = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Admission ticket for one execution: holds the dispatch permit and the job's
/// cancellation token, releasing both when dropped.
struct InFlight {
    _permit: DispatchPermit,
    job_id: String,
    token: CancellationToken,
    cancellations: CancellationMap,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        lock_map(&self.cancellations).remove(&self.job_id);
    }
}

fn lock_map(map: &CancellationMap) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
    match map.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Clone)]
pub struct JobEngine {
    store: Arc<dyn JobStore>,
    registry: Arc<ActionRegistry>,
    scheduler: Arc<BatchScheduler>,
    guard: Arc<DispatchGuard>,
    cancellations: CancellationMap,
    config: Arc<EngineConfig>,
}

impl JobEngine {
    pub fn new(store: Arc<dyn JobStore>, registry: ActionRegistry, config: EngineConfig) -> Self {
        let config = config.normalized();
        let registry = Arc::new(registry);
        let scheduler = Arc::new(BatchScheduler::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            &config,
        ));

        Self {
            store,
            registry,
            scheduler,
            guard: Arc::new(DispatchGuard::new()),
            cancellations: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.store)
    }

    pub fn guard(&self) -> Arc<DispatchGuard> {
        Arc::clone(&self.guard)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn kinds(&self) -> Vec<String> {
        self.registry.kinds()
    }

    /// Creates a pending job and starts it in the background. Returns before any
    /// item is processed.
    pub async fn submit(&self, owner: &str, request: BulkJobRequest) -> Result<SubmittedJob> {
        self.validate_request(owner, &request)?;

        let job = Job::new_pending(
            Uuid::new_v4().to_string(),
            request.kind,
            owner,
            request.items,
            request.parameters,
        );
        let submitted = SubmittedJob {
            job_id: job.id.clone(),
            total_items: job.total_items,
        };
        let kind = job.kind.clone();
        self.store.create(job).await?;
        info!(
            job_id = %submitted.job_id,
            kind = %kind,
            owner = %owner,
            total_items = submitted.total_items,
            "bulk job submitted"
        );

        self.dispatch(&submitted.job_id);
        Ok(submitted)
    }

    fn validate_request(&self, owner: &str, request: &BulkJobRequest) -> Result<()> {
        if owner.trim().is_empty() {
            return Err(BulkopsError::InvalidArgument(
                "job owner is required".to_string(),
            ));
        }
        if !self.registry.contains(&request.kind) {
            return Err(BulkopsError::InvalidArgument(format!(
                "unsupported job kind: {}",
                request.kind
            )));
        }
        if request.items.is_empty() {
            return Err(BulkopsError::InvalidArgument(
                "bulk job requires at least one item".to_string(),
            ));
        }
        if request.items.len() > self.config.max_items {
            return Err(BulkopsError::InvalidArgument(format!(
                "bulk job has {} items; the limit is {}",
                request.items.len(),
                self.config.max_items
            )));
        }
        if let Some(position) = request
            .items
            .iter()
            .position(|item| item.id.trim().is_empty())
        {
            return Err(BulkopsError::InvalidArgument(format!(
                "item at position {position} has an empty id"
            )));
        }
        Ok(())
    }

    /// Starts a detached execution. `None` means an execution of this job is
    /// already in flight in this process.
    pub fn dispatch(&self, job_id: &str) -> Option<JoinHandle<()>> {
        let Some(in_flight) = self.admit(job_id) else {
            debug!(job_id = %job_id, "job already in flight; dispatch ignored");
            return None;
        };

        let engine = self.clone();
        Some(tokio::spawn(async move {
            let job_id = in_flight.job_id.clone();
            let token = in_flight.token.clone();
            match engine.run_admitted(&job_id, token).await {
                Ok(outcome) => {
                    debug!(job_id = %job_id, outcome = ?outcome, "job execution finished")
                }
                Err(err) => error!(job_id = %job_id, error = %err, "job execution failed"),
            }
            drop(in_flight);
        }))
    }

    /// Runs the job in the current task, admitted through the dispatch guard.
    pub async fn execute(&self, job_id: &str) -> Result<RunOutcome> {
        let Some(in_flight) = self.admit(job_id) else {
            return Ok(RunOutcome::AlreadyRunning);
        };
        let token = in_flight.token.clone();
        let result = self.run_admitted(job_id, token).await;
        drop(in_flight);
        result
    }

    fn admit(&self, job_id: &str) -> Option<InFlight> {
        let permit = self.guard.acquire(job_id)?;
        let token = CancellationToken::new();
        lock_map(&self.cancellations).insert(job_id.to_string(), token.clone());
        Some(InFlight {
            _permit: permit,
            job_id: job_id.to_string(),
            token,
            cancellations: Arc::clone(&self.cancellations),
        })
    }

    async fn run_admitted(&self, job_id: &str, cancel: CancellationToken) -> Result<RunOutcome> {
        let holder = self.config.worker_id.as_str();
        let lease_expires = Instant::now() + self.config.lease_ttl;
        match self
            .store
            .try_acquire_lease(job_id, holder, self.config.lease_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                info!(job_id = %job_id, "job is leased elsewhere or already finished");
                return Ok(RunOutcome::LeaseHeld);
            }
            Err(BulkopsError::JobNotFound(_)) => {
                info!(job_id = %job_id, "dispatched job no longer exists");
                return Ok(RunOutcome::Missing);
            }
            Err(err) => return Err(err),
        }

        let signals = RunSignals {
            cancel,
            lease_lost: CancellationToken::new(),
        };
        let renewal =
            self.spawn_lease_renewal(job_id, lease_expires, signals.lease_lost.clone());

        let scheduler = Arc::clone(&self.scheduler);
        let run_id = job_id.to_string();
        let run = tokio::spawn(async move { scheduler.run(&run_id, &signals).await });
        let result = match run.await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(err)) => self.fail_after_error(job_id, err.to_string()).await,
            Err(join_err) => {
                let message = format!("job worker panicked: {}", panic_message(join_err));
                self.fail_after_error(job_id, message).await
            }
        };

        renewal.abort();
        if let Err(err) = self.store.release_lease(job_id, holder).await {
            warn!(job_id = %job_id, error = %err, "failed to release job lease");
        }
        result
    }

    async fn fail_after_error(&self, job_id: &str, message: String) -> Result<RunOutcome> {
        error!(job_id = %job_id, error = %message, "job failed with a systemic error");
        match self
            .store
            .update(job_id, JobPatch::failed(&message, Utc::now()))
            .await
        {
            Ok(_) | Err(BulkopsError::JobAlreadyTerminal(_)) => Ok(RunOutcome::Failed(message)),
            Err(err) => {
                error!(job_id = %job_id, error = %err, "failed to record job failure");
                Err(err)
            }
        }
    }

    /// Renews the store lease until aborted. `lease_lost` fires when the store refuses a
    /// renewal or when the last confirmed expiry passes without a successful renewal.
    fn spawn_lease_renewal(
        &self,
        job_id: &str,
        mut lease_expires: Instant,
        lease_lost: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let config = Arc::clone(&self.config);
        let job_id = job_id.to_string();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.lease_renew_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let attempted_at = Instant::now();
                let renewal = tokio::time::timeout_at(
                    lease_expires,
                    store.renew_lease(&job_id, &config.worker_id, config.lease_ttl),
                )
                .await;

                match renewal {
                    Ok(Ok(true)) => lease_expires = attempted_at + config.lease_ttl,
                    Ok(Ok(false)) => {
                        warn!(job_id = %job_id, "job lease lost");
                        lease_lost.cancel();
                        break;
                    }
                    Ok(Err(err)) if Instant::now() >= lease_expires => {
                        warn!(
                            job_id = %job_id,
                            error = %err,
                            "job lease expired while renewal kept failing"
                        );
                        lease_lost.cancel();
                        break;
                    }
                    Ok(Err(err)) => {
                        warn!(job_id = %job_id, error = %err, "failed to renew job lease");
                    }
                    Err(_) => {
                        warn!(job_id = %job_id, "job lease expired before renewal completed");
                        lease_lost.cancel();
                        break;
                    }
                }
            }
        })
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        self.store.get(job_id).await
    }

    pub async fn list_jobs(&self, owner: Option<&str>) -> Result<Vec<Job>> {
        self.store.list(owner).await
    }

    /// In-flight jobs stop at the next batch boundary; pending jobs fail at once;
    /// terminal jobs are returned unchanged.
    pub async fn cancel_job(&self, job_id: &str) -> Result<Job> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| BulkopsError::JobNotFound(job_id.to_string()))?;
        if job.status.is_terminal() {
            return Ok(job);
        }

        let token = lock_map(&self.cancellations).get(job_id).cloned();
        if let Some(token) = token {
            token.cancel();
            info!(job_id = %job_id, "cancellation requested for in-flight job");
            return Ok(job);
        }

        if job.status == JobStatus::Running {
            return Err(BulkopsError::InvalidArgument(format!(
                "job {job_id} is running on another worker"
            )));
        }

        match self
            .store
            .update(job_id, JobPatch::failed(CANCELLED_MESSAGE, Utc::now()))
            .await
        {
            Ok(job) => {
                info!(job_id = %job_id, "pending job cancelled");
                Ok(job)
            }
            Err(BulkopsError::JobAlreadyTerminal(_)) => self
                .store
                .get(job_id)
                .await?
                .ok_or_else(|| BulkopsError::JobNotFound(job_id.to_string())),
            Err(err) => Err(err),
        }
    }

    /// Fails `running` jobs whose worker stopped renewing its lease.
    pub async fn recover_stale_jobs(&self) -> Result<usize> {
        let now = Utc::now();
        let mut recovered = 0;

        for job in self.store.list(None).await? {
            if job.status != JobStatus::Running || self.guard.is_in_flight(&job.id) {
                continue;
            }
            if job.lease.as_ref().is_some_and(|lease| !lease.is_expired(now)) {
                continue;
            }

            match self
                .store
                .update(&job.id, JobPatch::failed(STALE_LEASE_MESSAGE, Utc::now()))
                .await
            {
                Ok(_) => {
                    warn!(
                        job_id = %job.id,
                        processed = job.processed_items,
                        total = job.total_items,
                        "stale running job marked failed"
                    );
                    recovered += 1;
                }
                Err(BulkopsError::JobAlreadyTerminal(_)) => {}
                Err(err) => {
                    warn!(job_id = %job.id, error = %err, "failed to recover stale job");
                }
            }
        }

        Ok(recovered)
    }
}
