//! Detection of worker-count changes between runs of the same job.
//!
//! Block boundaries depend on the worker count, so progress records written
//! under one partition are meaningless under another. Before any worker
//! starts, the job's `thread_count` marker is compared with the current
//! count and stale state is discarded on mismatch.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Name of the marker file inside a job's progress directory.
pub const MARKER_FILE: &str = "thread_count";

/// What the guard found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    /// No marker existed; this is the first run of the job.
    Fresh,
    /// The marker matched; existing records are valid.
    Unchanged,
    /// The marker differed (or was unreadable); records and destination were deleted.
    Reset {
        /// Worker count of the previous run, if the marker could be parsed.
        previous: Option<usize>,
    },
}

/// Guards one job's progress directory against partition changes.
#[derive(Debug, Clone)]
pub struct ThreadCountGuard {
    progress_dir: PathBuf,
    destination: PathBuf,
}

impl ThreadCountGuard {
    /// Creates a guard for the given progress directory and destination file.
    #[must_use]
    pub fn new(progress_dir: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            progress_dir: progress_dir.into(),
            destination: destination.into(),
        }
    }

    /// Path of the marker file.
    #[must_use]
    pub fn marker_path(&self) -> PathBuf {
        self.progress_dir.join(MARKER_FILE)
    }

    /// Reconciles persisted state with `workers`, then records `workers`.
    ///
    /// Must complete before partitioning begins.
    ///
    /// # Errors
    ///
    /// Returns an error if stale state cannot be deleted or the marker cannot
    /// be written.
    pub async fn reconcile(&self, workers: usize) -> Result<GuardOutcome> {
        tokio::fs::create_dir_all(&self.progress_dir).await?;

        let outcome = match tokio::fs::read_to_string(self.marker_path()).await {
            Ok(contents) => match contents.trim().parse::<usize>() {
                Ok(previous) if previous == workers => GuardOutcome::Unchanged,
                Ok(previous) => {
                    log::warn!(
                        "Worker count changed from {previous} to {workers}, discarding state in {}",
                        self.progress_dir.display()
                    );
                    self.discard().await?;
                    GuardOutcome::Reset {
                        previous: Some(previous),
                    }
                }
                Err(_) => {
                    log::warn!(
                        "Unreadable worker-count marker {:?}, discarding state in {}",
                        contents.trim(),
                        self.progress_dir.display()
                    );
                    self.discard().await?;
                    GuardOutcome::Reset { previous: None }
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => GuardOutcome::Fresh,
            Err(e) => return Err(e.into()),
        };

        tokio::fs::write(self.marker_path(), workers.to_string()).await?;
        Ok(outcome)
    }

    /// Deletes every file in the progress directory and the partial destination.
    async fn discard(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.progress_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                remove_if_exists(&entry.path()).await?;
            }
        }
        remove_if_exists(&self.destination).await
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
