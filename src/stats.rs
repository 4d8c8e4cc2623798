//! Download statistics types.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::worker::FailedRange;

/// Outcome of one finished job.
#[derive(Debug, Clone)]
pub struct JobReport {
    /// Source URL.
    pub url: String,
    /// Destination file.
    pub destination: PathBuf,
    /// Total size of the file in bytes.
    pub total_size: u64,
    /// Bytes already on disk from a previous run.
    pub resumed_bytes: u64,
    /// Bytes received during this run, retried bytes included.
    pub transferred_bytes: u64,
    /// Time taken by this run.
    pub elapsed: Duration,
    /// Peak cumulative download speed in bytes per second.
    pub peak_speed: u64,
    /// Sub-blocks given up after exhausting retries.
    pub failed: Vec<FailedRange>,
    /// True if a worker-count change discarded state from a previous run.
    pub state_reset: bool,
}

impl JobReport {
    /// Returns true if every sub-block of the file was written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Bytes that may be missing from the destination file.
    #[must_use]
    pub fn missing_bytes(&self) -> u64 {
        self.failed.iter().map(FailedRange::bytes).sum()
    }

    /// Returns the average download speed of this run in bytes per second.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn average_speed(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.transferred_bytes as f64 / secs) as u64
        } else {
            0
        }
    }
}

/// Statistics for an entire download session.
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Number of files fully downloaded.
    pub files_completed: usize,
    /// Number of files that finished with failed sub-blocks.
    pub files_incomplete: usize,
    /// Number of files that failed with an error.
    pub files_failed: usize,
    /// Number of files stopped by cancellation.
    pub files_cancelled: usize,
    /// Total size of every finished file.
    pub total_bytes: u64,
    /// Bytes received during this session.
    pub transferred_bytes: u64,
    /// Total elapsed time for the session.
    pub elapsed: Duration,
    /// Highest per-file peak speed in bytes per second.
    pub peak_speed: u64,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStats {
    /// Creates a new empty session stats.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            files_completed: 0,
            files_incomplete: 0,
            files_failed: 0,
            files_cancelled: 0,
            total_bytes: 0,
            transferred_bytes: 0,
            elapsed: Duration::ZERO,
            peak_speed: 0,
        }
    }

    /// Returns the average download speed in bytes per second.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn average_speed(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.transferred_bytes as f64 / secs) as u64
        } else {
            0
        }
    }

    /// Returns true if every file completed without failed ranges or errors.
    #[must_use]
    pub const fn all_complete(&self) -> bool {
        self.files_incomplete == 0 && self.files_failed == 0 && self.files_cancelled == 0
    }
}

/// Builder for accumulating session statistics during downloads.
pub struct SessionStatsBuilder {
    stats: SessionStats,
    start_time: Instant,
}

impl Default for SessionStatsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStatsBuilder {
    /// Creates a new session stats builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stats: SessionStats::new(),
            start_time: Instant::now(),
        }
    }

    /// Records a finished job.
    pub fn add_report(&mut self, report: &JobReport) {
        if report.is_complete() {
            self.stats.files_completed += 1;
        } else {
            self.stats.files_incomplete += 1;
        }
        self.stats.total_bytes += report.total_size;
        self.stats.transferred_bytes += report.transferred_bytes;
        self.stats.peak_speed = self.stats.peak_speed.max(report.peak_speed);
    }

    /// Records a job that failed with an error.
    pub const fn add_failure(&mut self) {
        self.stats.files_failed += 1;
    }

    /// Records a job stopped by cancellation.
    pub const fn add_cancelled(&mut self) {
        self.stats.files_cancelled += 1;
    }

    /// Builds the final session statistics.
    #[must_use]
    pub fn build(self) -> SessionStats {
        SessionStats {
            elapsed: self.start_time.elapsed(),
            ..self.stats
        }
    }
}
