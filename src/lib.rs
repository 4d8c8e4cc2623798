//! shardfetch - parallel, resumable HTTP range downloads.
//!
//! A file is split into one contiguous block per worker. Each worker fetches
//! its block as a sequence of sub-block range requests, writes every chunk
//! at its absolute offset, and persists a per-block byte counter so that an
//! interrupted download resumes where it stopped.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use shardfetch::{AppConfig, DownloadConfig, DownloadProgress, Downloader, LogProgress};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> shardfetch::Result<()> {
//! let config = AppConfig {
//!     download: DownloadConfig::new().with_workers(16),
//!     ..AppConfig::default()
//! };
//! let downloader = Downloader::new(config)?;
//!
//! let progress: Arc<dyn DownloadProgress> = Arc::new(LogProgress);
//! let report = downloader
//!     .download(
//!         "https://example.com/model-00001-of-00004.safetensors",
//!         None,
//!         &progress,
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//!
//! if !report.is_complete() {
//!     eprintln!("{} sub-blocks failed", report.failed.len());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod aggregator;
pub mod block;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod format;
pub mod guard;
pub mod record;
pub mod stats;
pub mod url;
pub mod worker;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use aggregator::{ProgressAggregator, ProgressSnapshot};
pub use block::{BlockRange, partition};
pub use config::{AppConfig, DownloadConfig, PathConfig, ProxyConfig};
pub use download::{DownloadJob, DownloadProgress, Downloader, LogProgress, NoProgress};
pub use error::{Error, Result};
pub use format::{format_bytes, format_duration, format_file_size, format_speed};
pub use guard::{GuardOutcome, ThreadCountGuard};
pub use record::ProgressStore;
pub use stats::{JobReport, SessionStats, SessionStatsBuilder};
pub use worker::{BlockCounters, FailedRange, RetryPolicy};
