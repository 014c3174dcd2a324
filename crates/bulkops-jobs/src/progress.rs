use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    job::{JobPatch, JobProgress},
    store::JobStore,
};

/// Best-effort progress writes. A failed write is logged and swallowed; the final
/// terminal write is what callers must rely on.
#[derive(Clone)]
pub struct ProgressReporter {
    store: Arc<dyn JobStore>,
}

impl ProgressReporter {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn update_progress(&self, job_id: &str, progress: JobProgress) -> bool {
        match self.store.update(job_id, JobPatch::progress(progress)).await {
            Ok(_) => {
                debug!(
                    job_id = %job_id,
                    processed = progress.processed_items,
                    succeeded = progress.successful_items,
                    failed = progress.failed_items,
                    percent = progress.progress_percent,
                    "job progress persisted"
                );
                true
            }
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "failed to persist job progress");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{job::Job, store::MemoryJobStore, types::JobItem};

    #[tokio::test]
    async fn persists_counters() {
        let store = Arc::new(MemoryJobStore::new());
        let job = Job::new_pending(
            "job-1",
            "toggle",
            "acme",
            vec![JobItem::new("a"), JobItem::new("b")],
            serde_json::Value::Null,
        );
        store.create(job).await.unwrap();
        store.update("job-1", JobPatch::running(Utc::now())).await.unwrap();

        let reporter = ProgressReporter::new(store.clone());
        assert!(
            reporter
                .update_progress("job-1", JobProgress::from_counts(2, 1, 1))
                .await
        );

        let stored = store.get("job-1").await.unwrap().unwrap();
        assert_eq!(stored.processed_items, 2);
        assert_eq!(stored.progress_percent, 100);
    }

    #[tokio::test]
    async fn write_failures_are_swallowed() {
        let reporter = ProgressReporter::new(Arc::new(MemoryJobStore::new()));
        assert!(
            !reporter
                .update_progress("missing", JobProgress::from_counts(1, 1, 0))
                .await
        );
    }
}
