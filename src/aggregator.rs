//! Periodic progress aggregation across a job's workers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::download::DownloadProgress;
use crate::format::{format_bytes, format_speed};
use crate::worker::BlockCounters;

/// A point-in-time view of a job's progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    /// Bytes on disk across all blocks, resumed bytes included.
    pub downloaded: u64,
    /// Total size of the file.
    pub total_size: u64,
    /// Bytes received during this run across all blocks.
    pub transferred: u64,
    /// Time since the job started.
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Completion percentage in `[0, 100]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> f64 {
        if self.total_size == 0 {
            return 100.0;
        }
        self.downloaded as f64 / self.total_size as f64 * 100.0
    }

    /// Cumulative throughput of this run: transferred bytes over seconds since start.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn speed(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.transferred as f64 / secs
        } else {
            0.0
        }
    }

    /// Renders the status line emitted on every tick.
    #[must_use]
    pub fn status_line(&self, name: &str) -> String {
        let speed = format_speed(self.speed()).unwrap_or_else(|_| "0B/s".to_string());
        format!(
            "Downloading {name} → {}/{} ({:.2}%), Speed: {speed}",
            format_bytes(self.downloaded),
            format_bytes(self.total_size),
            self.percent(),
        )
    }
}

/// What the aggregator observed over the life of a job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatorSummary {
    /// Snapshot taken after the aggregator was stopped.
    pub last: ProgressSnapshot,
    /// Highest cumulative speed seen on any tick, in bytes per second.
    pub peak_speed: f64,
}

/// Sums per-block counters on a timer and reports them.
pub struct ProgressAggregator {
    name: Arc<str>,
    total_size: u64,
    counters: Vec<Arc<BlockCounters>>,
    started: Instant,
}

impl ProgressAggregator {
    /// Creates an aggregator over the given block counters.
    #[must_use]
    pub fn new(
        name: Arc<str>,
        total_size: u64,
        counters: Vec<Arc<BlockCounters>>,
        started: Instant,
    ) -> Self {
        Self {
            name,
            total_size,
            counters,
            started,
        }
    }

    /// Reads every counter once. Values may be slightly stale.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        let (downloaded, transferred) = self
            .counters
            .iter()
            .fold((0, 0), |(d, t), c| (d + c.downloaded(), t + c.transferred()));
        ProgressSnapshot {
            downloaded,
            total_size: self.total_size,
            transferred,
            elapsed: self.started.elapsed(),
        }
    }

    /// Runs the aggregator on its own task until `stop` is cancelled.
    ///
    /// Reports one snapshot per `period` and a final one after stopping.
    pub fn spawn(
        self,
        period: Duration,
        progress: Arc<dyn DownloadProgress>,
        stop: CancellationToken,
    ) -> JoinHandle<AggregatorSummary> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut peak_speed: f64 = 0.0;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshot = self.snapshot();
                        peak_speed = peak_speed.max(snapshot.speed());
                        progress.on_progress(&self.name, &snapshot);
                    }
                    () = stop.cancelled() => break,
                }
            }

            let last = self.snapshot();
            peak_speed = peak_speed.max(last.speed());
            progress.on_progress(&self.name, &last);
            AggregatorSummary { last, peak_speed }
        })
    }
}
