use std::{sync::Arc, time::Duration};

use bulkops_common::error::{BulkopsError, Result};
use chrono::Utc;
use futures::future::join_all;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::EngineConfig,
    executor::{ActionExecutor, ActionRegistry},
    job::{Job, JobPatch, JobProgress},
    outcome::{ItemError, ItemOutcome, OutcomeTally},
    progress::ProgressReporter,
    store::JobStore,
    types::{JobItem, JobStatus},
};

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(JobProgress),
    Failed(String),
    /// The job record vanished before it could run.
    Missing,
    /// The job was not pending when loaded.
    Skipped(JobStatus),
    /// Another execution in this process holds the job.
    AlreadyRunning,
    /// Another worker holds the store lease.
    LeaseHeld,
}

/// Stop requests observed between batches, never inside one.
#[derive(Debug, Clone, Default)]
pub struct RunSignals {
    pub cancel: CancellationToken,
    pub lease_lost: CancellationToken,
}

impl RunSignals {
    fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(BulkopsError::Cancelled);
        }
        if self.lease_lost.is_cancelled() {
            return Err(BulkopsError::LeaseLost);
        }
        Ok(())
    }

    async fn pause(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.cancel.cancelled() => {}
            _ = self.lease_lost.cancelled() => {}
        }
    }
}

pub struct BatchScheduler {
    store: Arc<dyn JobStore>,
    registry: Arc<ActionRegistry>,
    reporter: ProgressReporter,
    batch_size: usize,
    item_timeout: Duration,
    batch_pause: Duration,
}

impl BatchScheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<ActionRegistry>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            reporter: ProgressReporter::new(Arc::clone(&store)),
            store,
            registry,
            batch_size: config.batch_size.max(1),
            item_timeout: config.item_timeout,
            batch_pause: config.batch_pause,
        }
    }

    /// Drives one pending job to a terminal state. Store errors on the lifecycle
    /// writes are returned to the caller, which owns the last-resort failure write.
    pub async fn run(&self, job_id: &str, signals: &RunSignals) -> Result<RunOutcome> {
        let Some(job) = self.store.get(job_id).await? else {
            info!(job_id = %job_id, "dispatched job no longer exists");
            return Ok(RunOutcome::Missing);
        };

        if job.status != JobStatus::Pending {
            info!(job_id = %job_id, status = %job.status, "job is not pending; skipping");
            return Ok(RunOutcome::Skipped(job.status));
        }

        let executor = match self.preflight(&job, signals).await {
            Ok(executor) => executor,
            Err(err) => {
                let message = err.to_string();
                warn!(
                    job_id = %job_id,
                    kind = %job.kind,
                    error = %message,
                    "job precondition failed"
                );
                self.store
                    .update(job_id, JobPatch::failed(&message, Utc::now()))
                    .await?;
                return Ok(RunOutcome::Failed(message));
            }
        };

        self.store
            .update(job_id, JobPatch::running(Utc::now()))
            .await?;
        info!(
            job_id = %job_id,
            kind = %job.kind,
            total_items = job.total_items,
            batch_size = self.batch_size,
            "job running"
        );

        let mut tally = OutcomeTally::new(job.total_items);
        match self
            .process_batches(&job, executor, &mut tally, signals)
            .await
        {
            Ok(()) => {
                let progress = tally.progress();
                self.store
                    .update(
                        job_id,
                        JobPatch::completed(progress, tally.into_results(), Utc::now()),
                    )
                    .await?;
                info!(
                    job_id = %job_id,
                    succeeded = progress.successful_items,
                    failed = progress.failed_items,
                    "job completed"
                );
                Ok(RunOutcome::Completed(progress))
            }
            Err(err) => {
                let message = err.to_string();
                let progress = tally.progress();
                warn!(
                    job_id = %job_id,
                    processed = progress.processed_items,
                    error = %message,
                    "job stopped before all batches ran"
                );
                let patch = JobPatch::failed(&message, Utc::now())
                    .with_partial(progress, tally.into_results());
                self.store.update(job_id, patch).await?;
                Ok(RunOutcome::Failed(message))
            }
        }
    }

    async fn preflight(
        &self,
        job: &Job,
        signals: &RunSignals,
    ) -> Result<Arc<dyn ActionExecutor>> {
        signals.check()?;
        let executor = self.registry.get(&job.kind).ok_or_else(|| {
            BulkopsError::MissingConfiguration(format!(
                "no action registered for job kind {}",
                job.kind
            ))
        })?;
        executor.preflight(job).await?;
        Ok(executor)
    }

    async fn process_batches(
        &self,
        job: &Job,
        executor: Arc<dyn ActionExecutor>,
        tally: &mut OutcomeTally,
        signals: &RunSignals,
    ) -> Result<()> {
        let parameters = Arc::new(job.parameters.clone());
        let batch_count = job.items.len().div_ceil(self.batch_size);

        for (index, batch) in job.items.chunks(self.batch_size).enumerate() {
            if index > 0 {
                signals.check()?;
                signals.pause(self.batch_pause).await;
                signals.check()?;
            }

            let outcomes = self.run_batch(&job.id, batch, &executor, &parameters).await;
            tally.extend(outcomes);

            let progress = tally.progress();
            self.reporter.update_progress(&job.id, progress).await;
            debug!(
                job_id = %job.id,
                batch = index + 1,
                batches = batch_count,
                percent = progress.progress_percent,
                "batch settled"
            );
        }

        Ok(())
    }

    async fn run_batch(
        &self,
        job_id: &str,
        batch: &[JobItem],
        executor: &Arc<dyn ActionExecutor>,
        parameters: &Arc<serde_json::Value>,
    ) -> Vec<ItemOutcome> {
        let calls = batch.iter().map(|item| {
            let executor = Arc::clone(executor);
            let parameters = Arc::clone(parameters);
            let item = item.clone();
            let item_timeout = self.item_timeout;
            tokio::spawn(async move {
                match tokio::time::timeout(item_timeout, executor.apply(&item, &parameters)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(ItemError::Timeout),
                }
            })
        });

        let settled = join_all(calls).await;
        batch
            .iter()
            .zip(settled)
            .map(|(item, joined)| {
                let result = joined
                    .unwrap_or_else(|err| Err(ItemError::Panicked(panic_message(err))));
                if let Err(err) = &result {
                    debug!(job_id = %job_id, item_id = %item.id, error = %err, "item failed");
                }
                ItemOutcome::from_result(item.id.clone(), result)
            })
            .collect()
    }
}

pub(crate) fn panic_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task cancelled".to_string();
    }
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string()),
        Err(err) => err.to_string(),
    }
}
