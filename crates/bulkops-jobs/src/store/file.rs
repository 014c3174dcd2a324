use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use bulkops_common::error::{BulkopsError, Result};
use tokio::{
    fs::{self, OpenOptions},
    time::Instant,
};
use tracing::warn;
use uuid::Uuid;

use super::{JobStore, drop_lease, extend_lease, grant_lease, sort_newest_first};
use crate::job::{Job, JobPatch};

const JOB_FILE_EXTENSION: &str = "json";
const LOCK_FILE_EXTENSION: &str = "lock";
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(2);
const LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
/// A lock file older than this was left behind by a crashed writer.
const STALE_LOCK_AGE: Duration = Duration::from_secs(30);

/// One JSON document per job under `root`. Every read-modify-write cycle holds an
/// exclusive `<id>.lock` file, so several processes can share one root. Each write
/// lands via a uniquely named temp file + rename.
#[derive(Debug)]
pub struct FileJobStore {
    root: PathBuf,
}

impl FileJobStore {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_path(&self, id: &str) -> Option<PathBuf> {
        is_safe_id(id).then(|| self.root.join(format!("{id}.{JOB_FILE_EXTENSION}")))
    }

    async fn lock_job(&self, id: &str) -> Result<JobFileLock> {
        JobFileLock::acquire(self.root.join(format!("{id}.{LOCK_FILE_EXTENSION}"))).await
    }

    async fn read_job(&self, path: &Path) -> Result<Option<Job>> {
        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|err| {
                BulkopsError::InternalError(format!(
                    "failed to parse job record {}: {err}",
                    path.display()
                ))
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(BulkopsError::Io(err)),
        }
    }

    async fn write_job(&self, path: &Path, job: &Job) -> Result<()> {
        let payload = serde_json::to_vec_pretty(job).map_err(|err| {
            BulkopsError::InternalError(format!(
                "failed to serialize job record {}: {err}",
                path.display()
            ))
        })?;

        let tmp_path = self.root.join(format!("{}.{}.tmp", job.id, Uuid::new_v4()));
        fs::write(&tmp_path, payload).await?;
        if let Err(err) = fs::rename(&tmp_path, path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BulkopsError::Io(err));
        }
        Ok(())
    }

    async fn modify<T>(
        &self,
        id: &str,
        change: impl FnOnce(&mut Job) -> Result<T>,
    ) -> Result<(Job, T)> {
        let path = self
            .job_path(id)
            .ok_or_else(|| BulkopsError::JobNotFound(id.to_string()))?;

        let _lock = self.lock_job(id).await?;
        let mut job = self
            .read_job(&path)
            .await?
            .ok_or_else(|| BulkopsError::JobNotFound(id.to_string()))?;
        let value = change(&mut job)?;
        self.write_job(&path, &job).await?;
        Ok((job, value))
    }
}

fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

/// Exclusive per-job lock file, removed on drop so a cancelled caller cannot leak it.
#[derive(Debug)]
struct JobFileLock {
    path: PathBuf,
}

impl JobFileLock {
    async fn acquire(path: PathBuf) -> Result<Self> {
        let deadline = Instant::now() + LOCK_WAIT_TIMEOUT;
        loop {
            let created = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;

            match created {
                Ok(_) => return Ok(Self { path }),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path).await {
                        warn!(path = %path.display(), "removing stale job lock");
                        match fs::remove_file(&path).await {
                            Ok(()) => continue,
                            Err(err) if err.kind() == ErrorKind::NotFound => continue,
                            Err(err) => return Err(BulkopsError::Io(err)),
                        }
                    }
                    if Instant::now() >= deadline {
                        return Err(BulkopsError::InternalError(format!(
                            "timed out waiting for job lock {}",
                            path.display()
                        )));
                    }
                    tokio::time::sleep(LOCK_RETRY_DELAY).await;
                }
                Err(err) => return Err(BulkopsError::Io(err)),
            }
        }
    }
}

impl Drop for JobFileLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to release job lock");
            }
        }
    }
}

async fn lock_is_stale(path: &Path) -> bool {
    let Ok(modified) = fs::metadata(path).await.and_then(|meta| meta.modified()) else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .is_ok_and(|age| age >= STALE_LOCK_AGE)
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn create(&self, job: Job) -> Result<String> {
        let path = self.job_path(&job.id).ok_or_else(|| {
            BulkopsError::InvalidArgument(format!("invalid job id: {}", job.id))
        })?;

        let _lock = self.lock_job(&job.id).await?;
        if fs::try_exists(&path).await? {
            return Err(BulkopsError::InvalidArgument(format!(
                "job already exists: {}",
                job.id
            )));
        }
        self.write_job(&path, &job).await?;
        Ok(job.id)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        let Some(path) = self.job_path(id) else {
            return Ok(None);
        };
        self.read_job(&path).await
    }

    async fn update(&self, id: &str, patch: JobPatch) -> Result<Job> {
        let (job, ()) = self.modify(id, |job| job.apply(patch)).await?;
        Ok(job)
    }

    async fn list(&self, owner: Option<&str>) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(JOB_FILE_EXTENSION) {
                continue;
            }
            let Some(job) = self.read_job(&path).await? else {
                continue;
            };
            if owner.is_none_or(|owner| job.owner == owner) {
                jobs.push(job);
            }
        }
        sort_newest_first(&mut jobs);
        Ok(jobs)
    }

    async fn try_acquire_lease(&self, id: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let (_, granted) = self
            .modify(id, |job| grant_lease(job, holder, ttl))
            .await?;
        Ok(granted)
    }

    async fn renew_lease(&self, id: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let (_, renewed) = self
            .modify(id, |job| extend_lease(job, holder, ttl))
            .await?;
        Ok(renewed)
    }

    async fn release_lease(&self, id: &str, holder: &str) -> Result<()> {
        match self.modify(id, |job| Ok(drop_lease(job, holder))).await {
            Ok(_) | Err(BulkopsError::JobNotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}
