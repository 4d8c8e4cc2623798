//! Core download logic and abstractions.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{StreamExt, stream};
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{StatusCode, Url};
use tokio_util::sync::CancellationToken;

use crate::aggregator::{ProgressAggregator, ProgressSnapshot};
use crate::block::{BlockRange, partition};
use crate::config::{AppConfig, DownloadConfig, ProxyConfig};
use crate::error::{Error, Result};
use crate::format::{format_bytes, format_duration};
use crate::guard::{GuardOutcome, ThreadCountGuard};
use crate::record::ProgressStore;
use crate::stats::{JobReport, SessionStats, SessionStatsBuilder};
use crate::url::{file_name_from_url, parse_url};
use crate::worker::{BlockCounters, BlockOutcome, BlockWorker, FailedRange, RetryPolicy};

/// Trait for receiving download progress updates.
///
/// Implement this trait to receive callbacks during download operations.
/// All methods have default no-op implementations for convenience.
pub trait DownloadProgress: Send + Sync {
    /// Called once the total size is known, before any worker starts.
    fn on_job_start(&self, _job: &DownloadJob) {}

    /// Called on every aggregator tick and once more when the job stops.
    fn on_progress(&self, _name: &str, _snapshot: &ProgressSnapshot) {}

    /// Called when a sub-block is given up after exhausting its retries.
    fn on_sub_block_failed(&self, _name: &str, _failure: &FailedRange) {}

    /// Called when every worker of a job has finished.
    fn on_job_complete(&self, _name: &str, _report: &JobReport) {}

    /// Called when a job fails with an error.
    fn on_error(&self, _name: &str, _error: &str) {}
}

/// A null progress implementation that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl DownloadProgress for NoProgress {}

/// Logs one status line per aggregator tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl DownloadProgress for LogProgress {
    fn on_progress(&self, name: &str, snapshot: &ProgressSnapshot) {
        log::info!("{}", snapshot.status_line(name));
    }
}

/// One file to download. Immutable once created.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    url: Url,
    destination: PathBuf,
    total_size: u64,
    workers: usize,
    proxy: Option<ProxyConfig>,
}

impl DownloadJob {
    /// Creates a job, lowering `workers` to `total_size` when the file has
    /// fewer bytes than workers.
    #[must_use]
    pub fn new(
        url: Url,
        destination: PathBuf,
        total_size: u64,
        workers: usize,
        proxy: Option<ProxyConfig>,
    ) -> Self {
        let workers = if total_size > 0 && workers as u64 > total_size {
            log::warn!(
                "{} has only {total_size} bytes, using {total_size} workers instead of {workers}",
                destination.display()
            );
            usize::try_from(total_size).unwrap_or(workers)
        } else {
            workers
        };
        Self {
            url,
            destination,
            total_size,
            workers,
            proxy,
        }
    }

    /// Source URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Destination file.
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Total size of the file in bytes.
    #[must_use]
    pub const fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Effective number of workers (and blocks).
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Proxy applied to every request of the job.
    #[must_use]
    pub const fn proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }

    /// Logical name of the job: the destination's file name.
    #[must_use]
    pub fn name(&self) -> String {
        display_name(&self.destination)
    }

    /// Directory holding this job's progress records and worker-count marker.
    #[must_use]
    pub fn progress_dir(&self, progress_root: &Path) -> PathBuf {
        progress_root.join(self.name())
    }

    /// Partitions the file into one block per worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty file.
    pub fn blocks(&self) -> Result<Vec<BlockRange>> {
        partition(self.total_size, self.workers)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}

/// Builds the HTTP client shared by every request of a downloader.
pub(crate) fn build_client(config: &DownloadConfig) -> Result<reqwest::Client> {
    let builder = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(config.connect_timeout())
        .read_timeout(config.read_timeout())
        .pool_idle_timeout(Duration::from_secs(60))
        .tcp_keepalive(Duration::from_secs(30));
    let builder = match &config.proxy {
        Some(proxy) => builder.proxy(reqwest::Proxy::all(proxy.url())?),
        None => builder.no_proxy(),
    };
    Ok(builder.build()?)
}

/// Opens a write handle onto the destination without truncating it.
async fn open_destination(path: &Path) -> Result<std::fs::File> {
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .await?;
    Ok(file.into_std().await)
}

/// Core downloader that splits files into blocks and fetches them in parallel.
pub struct Downloader {
    client: reqwest::Client,
    config: AppConfig,
}

impl Downloader {
    /// Validates `config` and builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the client cannot
    /// be built (e.g. a malformed proxy).
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let client = build_client(&config.download)?;
        Ok(Self { client, config })
    }

    /// Returns a reference to the configuration.
    #[must_use]
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Returns `destination`, or the URL's file name inside the download directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if no destination is given and the URL
    /// has no file name.
    pub fn resolve_destination(&self, url: &Url, destination: Option<&Path>) -> Result<PathBuf> {
        match destination {
            Some(path) => Ok(path.to_path_buf()),
            None => Ok(self.config.paths.download_dir.join(file_name_from_url(url)?)),
        }
    }

    /// Determines the total size of the remote file.
    ///
    /// Tries `HEAD` first, then a one-byte range request whose
    /// `Content-Range` carries the total.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Metadata`] if neither request reports a size.
    pub async fn probe_size(&self, url: &Url) -> Result<u64> {
        let head_len = match self.client.head(url.clone()).send().await {
            Ok(resp) if resp.status().is_success() => resp
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok()),
            Ok(resp) => {
                log::debug!("HEAD {url} returned {}", resp.status());
                None
            }
            Err(e) => {
                log::debug!("HEAD {url} failed: {e}");
                None
            }
        };
        if let Some(len) = head_len.filter(|len| *len > 0) {
            return Ok(len);
        }
        if let Some(total) = self.probe_range_total(url).await {
            return Ok(total);
        }
        if head_len == Some(0) {
            return Ok(0);
        }
        Err(Error::Metadata {
            url: url.to_string(),
            reason: "server reported no content length".to_string(),
        })
    }

    async fn probe_range_total(&self, url: &Url) -> Option<u64> {
        let resp = match self
            .client
            .get(url.clone())
            .header(RANGE, "bytes=0-0")
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                log::debug!("Range probe of {url} failed: {e}");
                return None;
            }
        };
        if resp.status() != StatusCode::PARTIAL_CONTENT {
            log::debug!("Range probe of {url} returned {}", resp.status());
            return None;
        }
        let (_, total) = resp
            .headers()
            .get(CONTENT_RANGE)?
            .to_str()
            .ok()?
            .rsplit_once('/')?;
        total.trim().parse().ok()
    }

    /// Downloads one URL to `destination` (or the default destination).
    ///
    /// Resumes from the job's progress directory if a previous run with the
    /// same worker count left one behind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Metadata`] if the size cannot be determined,
    /// [`Error::Cancelled`] if `cancel` fired before every block finished,
    /// or an I/O error if local state cannot be prepared. Sub-blocks that
    /// exhaust their retries do not fail the job; they are listed in
    /// [`JobReport::failed`].
    pub async fn download(
        &self,
        url: &str,
        destination: Option<&Path>,
        progress: &Arc<dyn DownloadProgress>,
        cancel: &CancellationToken,
    ) -> Result<JobReport> {
        let url = parse_url(url)?;
        let destination = self.resolve_destination(&url, destination)?;
        let name = display_name(&destination);

        let result = self.run_job(url, destination, progress, cancel).await;
        if let Err(e) = &result
            && !matches!(e, Error::Cancelled)
        {
            progress.on_error(&name, &e.to_string());
        }
        result
    }

    async fn run_job(
        &self,
        url: Url,
        destination: PathBuf,
        progress: &Arc<dyn DownloadProgress>,
        cancel: &CancellationToken,
    ) -> Result<JobReport> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let started = Instant::now();
        let settings = &self.config.download;

        let total_size = self.probe_size(&url).await?;
        let job = DownloadJob::new(
            url,
            destination,
            total_size,
            settings.workers,
            settings.proxy.clone(),
        );
        let name: Arc<str> = Arc::from(job.name());
        log::info!(
            "Downloading {} ({}) to {} with {} workers",
            job.url(),
            format_bytes(total_size),
            job.destination().display(),
            job.workers()
        );
        progress.on_job_start(&job);

        if let Some(parent) = job
            .destination()
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        if total_size == 0 {
            tokio::fs::File::create(job.destination()).await?;
            let report = JobReport {
                url: job.url().to_string(),
                destination: job.destination().to_path_buf(),
                total_size: 0,
                resumed_bytes: 0,
                transferred_bytes: 0,
                elapsed: started.elapsed(),
                peak_speed: 0,
                failed: Vec::new(),
                state_reset: false,
            };
            log::info!("{name} is empty, created {}", job.destination().display());
            progress.on_job_complete(&name, &report);
            return Ok(report);
        }

        let progress_dir = job.progress_dir(&self.config.paths.progress_root);
        let guard = ThreadCountGuard::new(&progress_dir, job.destination());
        let state_reset = match guard.reconcile(job.workers()).await? {
            GuardOutcome::Reset { .. } => true,
            GuardOutcome::Unchanged => {
                log::info!("Resuming {name} from {}", progress_dir.display());
                false
            }
            GuardOutcome::Fresh => false,
        };
        let blocks = job.blocks()?;

        let mut files = Vec::with_capacity(blocks.len());
        for _ in &blocks {
            files.push(Arc::new(open_destination(job.destination()).await?));
        }
        if let Some(first) = files.first() {
            first.set_len(total_size)?;
        }

        let store = ProgressStore::new(&progress_dir);
        let counters: Vec<Arc<BlockCounters>> = blocks
            .iter()
            .map(|_| Arc::new(BlockCounters::new()))
            .collect();
        let stop = CancellationToken::new();
        let aggregator = ProgressAggregator::new(
            Arc::clone(&name),
            total_size,
            counters.clone(),
            started,
        )
        .spawn(settings.report_interval(), Arc::clone(progress), stop.clone());

        let policy = RetryPolicy::from_config(settings);
        let handles: Vec<_> = blocks
            .iter()
            .zip(files)
            .zip(&counters)
            .map(|((range, file), counters)| {
                let worker = BlockWorker {
                    client: self.client.clone(),
                    url: job.url().clone(),
                    range: *range,
                    file,
                    store: store.clone(),
                    counters: Arc::clone(counters),
                    policy,
                    sub_block_size: settings.sub_block_size,
                    name: Arc::clone(&name),
                    progress: Arc::clone(progress),
                    cancel: cancel.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (range, handle) in blocks.iter().zip(handles) {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    log::error!("Worker for block {} of {name} died: {e}", range.index);
                    outcomes.push(BlockOutcome {
                        index: range.index,
                        failed: vec![FailedRange {
                            block: range.index,
                            start: range.start,
                            end: range.end,
                            attempts: 0,
                            error: e.to_string(),
                        }],
                        ..BlockOutcome::default()
                    });
                }
            }
        }

        stop.cancel();
        let summary = aggregator.await.map_err(std::io::Error::other)?;

        if outcomes.iter().any(|o| o.cancelled) {
            log::info!(
                "Download of {name} cancelled, progress kept in {}",
                progress_dir.display()
            );
            return Err(Error::Cancelled);
        }

        if let Err(e) = tokio::fs::remove_dir_all(&progress_dir).await {
            log::warn!(
                "Failed to remove progress directory {}: {e}",
                progress_dir.display()
            );
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let peak_speed = summary.peak_speed as u64;
        let report = JobReport {
            url: job.url().to_string(),
            destination: job.destination().to_path_buf(),
            total_size,
            resumed_bytes: outcomes.iter().map(|o| o.resumed).sum(),
            transferred_bytes: summary.last.transferred,
            elapsed: started.elapsed(),
            peak_speed,
            failed: outcomes.into_iter().flat_map(|o| o.failed).collect(),
            state_reset,
        };

        if report.is_complete() {
            log::info!(
                "Finished {name}: {} in {}",
                format_bytes(total_size),
                format_duration(report.elapsed)
            );
        } else {
            log::error!(
                "Finished {name} with {} failed sub-block(s), up to {} missing or stale",
                report.failed.len(),
                format_bytes(report.missing_bytes())
            );
        }
        progress.on_job_complete(&name, &report);
        Ok(report)
    }

    /// Downloads every URL to its default destination, running up to
    /// `concurrent_jobs` jobs at once.
    ///
    /// Individual job errors are logged and counted but do not stop the
    /// other jobs. A URL whose file name repeats an earlier one in `urls` is
    /// counted as failed without being started.
    pub async fn download_all(
        &self,
        urls: &[String],
        progress: &Arc<dyn DownloadProgress>,
        cancel: &CancellationToken,
    ) -> SessionStats {
        let mut builder = SessionStatsBuilder::new();

        // Jobs sharing a file name would share a destination and progress directory.
        let mut names = HashSet::new();
        let mut accepted = Vec::with_capacity(urls.len());
        for url in urls {
            let name = parse_url(url)
                .and_then(|parsed| self.resolve_destination(&parsed, None))
                .map(|destination| display_name(&destination));
            match name {
                Ok(name) if !names.insert(name.clone()) => {
                    let e = Error::InvalidInput(format!(
                        "{url} resolves to {name}, which an earlier URL in this batch already downloads"
                    ));
                    log::error!("Skipping {url}: {e}");
                    progress.on_error(&name, &e.to_string());
                    builder.add_failure();
                }
                _ => accepted.push(url),
            }
        }

        let results: Vec<_> = stream::iter(accepted)
            .map(|url| async move { (url, self.download(url, None, progress, cancel).await) })
            .buffer_unordered(self.config.download.concurrent_jobs)
            .collect()
            .await;

        for (url, result) in results {
            match result {
                Ok(report) => builder.add_report(&report),
                Err(Error::Cancelled) => builder.add_cancelled(),
                Err(e) => {
                    log::error!("Download of {url} failed: {e}");
                    builder.add_failure();
                }
            }
        }

        builder.build()
    }
}
