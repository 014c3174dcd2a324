use bulkops_common::error::{BulkopsError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    outcome::JobResults,
    types::{JobItem, JobStatus},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLease {
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

impl JobLease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub processed_items: u64,
    pub successful_items: u64,
    pub failed_items: u64,
    pub progress_percent: u8,
}

impl JobProgress {
    pub fn from_counts(total: u64, successful: u64, failed: u64) -> Self {
        let processed = successful + failed;
        Self {
            processed_items: processed,
            successful_items: successful,
            failed_items: failed,
            progress_percent: percent_of(processed, total),
        }
    }
}

fn percent_of(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    // round half up without going through floats
    let percent = (processed.min(total) * 200 + total) / (total * 2);
    percent.min(100) as u8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub kind: String,
    pub owner: String,
    pub status: JobStatus,
    pub items: Vec<JobItem>,
    #[serde(default)]
    pub parameters: serde_json::Value,
    pub total_items: u64,
    pub processed_items: u64,
    pub successful_items: u64,
    pub failed_items: u64,
    pub progress_percent: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub results: JobResults,
    pub lease: Option<JobLease>,
}

impl Job {
    pub fn new_pending(
        id: impl Into<String>,
        kind: impl Into<String>,
        owner: impl Into<String>,
        items: Vec<JobItem>,
        parameters: serde_json::Value,
    ) -> Self {
        let total_items = items.len() as u64;
        Self {
            id: id.into(),
            kind: kind.into(),
            owner: owner.into(),
            status: JobStatus::Pending,
            items,
            parameters,
            total_items,
            processed_items: 0,
            successful_items: 0,
            failed_items: 0,
            progress_percent: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            results: JobResults::default(),
            lease: None,
        }
    }

    /// Applies a patch, refusing anything that would break the job lifecycle.
    /// Every store funnels writes through here.
    pub fn apply(&mut self, patch: JobPatch) -> Result<()> {
        if self.status.is_terminal() {
            return Err(BulkopsError::JobAlreadyTerminal(self.id.clone()));
        }

        if let Some(next) = patch.status {
            if next != self.status && !self.status.can_transition_to(next) {
                return Err(BulkopsError::InvalidTransition {
                    from: self.status.to_string(),
                    to: next.to_string(),
                });
            }
        }

        if let Some(progress) = patch.progress.as_ref() {
            self.validate_progress(progress)?;
        }

        if patch.status == Some(JobStatus::Completed) {
            let processed = patch
                .progress
                .map_or(self.processed_items, |progress| progress.processed_items);
            if processed != self.total_items {
                return Err(BulkopsError::InvalidProgress(format!(
                    "job {} cannot complete with {processed} of {} items processed",
                    self.id, self.total_items
                )));
            }
        }

        if let Some(progress) = patch.progress {
            self.processed_items = progress.processed_items;
            self.successful_items = progress.successful_items;
            self.failed_items = progress.failed_items;
            self.progress_percent = self.progress_percent.max(progress.progress_percent);
        }
        if let Some(started_at) = patch.started_at {
            self.started_at.get_or_insert(started_at);
        }
        if let Some(completed_at) = patch.completed_at {
            self.completed_at.get_or_insert(completed_at);
        }
        if let Some(results) = patch.results {
            self.results = results;
        }
        if let Some(message) = patch.error_message {
            self.error_message = Some(message);
        }
        if let Some(status) = patch.status {
            self.status = status;
            if status.is_terminal() {
                self.lease = None;
            }
        }

        Ok(())
    }

    fn validate_progress(&self, progress: &JobProgress) -> Result<()> {
        if progress.processed_items != progress.successful_items + progress.failed_items {
            return Err(BulkopsError::InvalidProgress(format!(
                "processed {} != successful {} + failed {}",
                progress.processed_items, progress.successful_items, progress.failed_items
            )));
        }
        if progress.processed_items > self.total_items {
            return Err(BulkopsError::InvalidProgress(format!(
                "processed {} exceeds total {}",
                progress.processed_items, self.total_items
            )));
        }
        if progress.processed_items < self.processed_items
            || progress.progress_percent < self.progress_percent
        {
            return Err(BulkopsError::InvalidProgress(format!(
                "progress for job {} cannot regress",
                self.id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: Option<JobProgress>,
    pub results: Option<JobResults>,
    pub error_message: Option<String>,
}

impl JobPatch {
    pub fn running(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Running),
            started_at: Some(at),
            ..Self::default()
        }
    }

    pub fn progress(progress: JobProgress) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn completed(progress: JobProgress, results: JobResults, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            completed_at: Some(at),
            progress: Some(progress),
            results: Some(results),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            completed_at: Some(at),
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_partial(mut self, progress: JobProgress, results: JobResults) -> Self {
        self.progress = Some(progress);
        self.results = Some(results);
        self
    }

    /// True when the patch only carries counters, i.e. an intermediate progress write.
    pub fn is_progress_only(&self) -> bool {
        self.progress.is_some()
            && self.status.is_none()
            && self.results.is_none()
            && self.error_message.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(total: usize) -> Job {
        let items = (0..total).map(|i| JobItem::new(format!("item-{i}"))).collect();
        Job::new_pending("job-1", "session.pause", "acme", items, serde_json::Value::Null)
    }

    #[test]
    fn percent_rounds_to_nearest() {
        assert_eq!(JobProgress::from_counts(3, 1, 0).progress_percent, 33);
        assert_eq!(JobProgress::from_counts(3, 2, 0).progress_percent, 67);
        assert_eq!(JobProgress::from_counts(8, 1, 0).progress_percent, 13);
        assert_eq!(JobProgress::from_counts(12, 5, 5).progress_percent, 83);
        assert_eq!(JobProgress::from_counts(12, 6, 6).progress_percent, 100);
        assert_eq!(JobProgress::from_counts(0, 0, 0).progress_percent, 100);
    }

    #[test]
    fn started_and_completed_are_written_once() {
        let mut job = pending(1);
        let first = Utc::now();
        job.apply(JobPatch::running(first)).unwrap();
        job.apply(JobPatch {
            started_at: Some(first + chrono::Duration::seconds(5)),
            ..JobPatch::default()
        })
        .unwrap();
        assert_eq!(job.started_at, Some(first));

        job.apply(JobPatch::completed(
            JobProgress::from_counts(1, 1, 0),
            JobResults::default(),
            first,
        ))
        .unwrap();
        assert_eq!(job.completed_at, Some(first));
    }

    #[test]
    fn terminal_job_rejects_updates() {
        let mut job = pending(2);
        job.apply(JobPatch::failed("missing token", Utc::now())).unwrap();

        let err = job
            .apply(JobPatch::progress(JobProgress::from_counts(2, 1, 0)))
            .unwrap_err();
        assert!(matches!(err, BulkopsError::JobAlreadyTerminal(_)));
        assert_eq!(job.processed_items, 0);
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn pending_cannot_jump_to_completed() {
        let mut job = pending(1);
        let err = job
            .apply(JobPatch::completed(
                JobProgress::from_counts(1, 1, 0),
                JobResults::default(),
                Utc::now(),
            ))
            .unwrap_err();
        assert!(matches!(err, BulkopsError::InvalidTransition { .. }));
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn progress_must_be_consistent_and_monotonic() {
        let mut job = pending(4);
        job.apply(JobPatch::running(Utc::now())).unwrap();
        job.apply(JobPatch::progress(JobProgress::from_counts(4, 2, 1)))
            .unwrap();

        let inconsistent = JobProgress {
            processed_items: 4,
            successful_items: 1,
            failed_items: 1,
            progress_percent: 100,
        };
        assert!(matches!(
            job.apply(JobPatch::progress(inconsistent)),
            Err(BulkopsError::InvalidProgress(_))
        ));
        assert!(matches!(
            job.apply(JobPatch::progress(JobProgress::from_counts(4, 1, 0))),
            Err(BulkopsError::InvalidProgress(_))
        ));
        assert!(matches!(
            job.apply(JobPatch::progress(JobProgress::from_counts(4, 5, 0))),
            Err(BulkopsError::InvalidProgress(_))
        ));
        assert_eq!(job.processed_items, 3);
    }

    #[test]
    fn job_serializes_camel_case() {
        let job = pending(1);
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["totalItems"], 1);
        assert_eq!(value["status"], "pending");
        assert!(value["errorMessage"].is_null());
    }
}
