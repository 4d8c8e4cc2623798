//! Command-line interface for shardfetch.

mod progress;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use crate::{
    AppConfig, DownloadProgress, Downloader, Error, LogProgress, ProxyConfig, SessionStats,
    SessionStatsBuilder,
};

pub use progress::{BarProgress, make_progress_bar, print_summary};

/// Parallel, resumable HTTP range downloader.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// URLs to download
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Destination file (single URL only; defaults to the URL's file name)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Directory for files saved under their URL name
    #[arg(short = 'd', long = "download-dir")]
    pub download_dir: Option<PathBuf>,

    /// Parallel workers (blocks) per file
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Files downloaded at the same time
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// HTTP proxy as host:port
    #[arg(long)]
    pub proxy: Option<ProxyConfig>,

    /// Root directory for resume state
    #[arg(long = "progress-dir")]
    pub progress_dir: Option<PathBuf>,

    /// TOML configuration file; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl Args {
    /// Loads the configuration file (if any) and applies flag overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the result is invalid.
    pub fn load_config(&self) -> crate::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::from_file(path)?,
            None => AppConfig::default(),
        };
        if let Some(dir) = &self.download_dir {
            config.paths.download_dir.clone_from(dir);
        }
        if let Some(dir) = &self.progress_dir {
            config.paths.progress_root.clone_from(dir);
        }
        if let Some(workers) = self.workers {
            config.download.workers = workers;
        }
        if let Some(jobs) = self.jobs {
            config.download.concurrent_jobs = jobs;
        }
        if self.proxy.is_some() {
            config.download.proxy.clone_from(&self.proxy);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Maps session results to the process exit code.
///
/// `0` when every file is complete, `2` when some file finished with failed
/// sub-blocks, `1` when any job failed or was cancelled.
#[must_use]
pub const fn exit_code(stats: &SessionStats) -> u8 {
    if stats.files_failed > 0 || stats.files_cancelled > 0 {
        1
    } else if stats.files_incomplete > 0 {
        2
    } else {
        0
    }
}

/// Runs the CLI download mode.
///
/// # Errors
///
/// Returns an error if the arguments or configuration are invalid. Failures
/// of individual downloads are counted in the returned stats instead.
pub async fn run(args: Args, cancel: CancellationToken) -> crate::Result<SessionStats> {
    if args.output.is_some() && args.urls.len() > 1 {
        return Err(Error::InvalidInput(
            "--output can only be used with a single URL".to_string(),
        ));
    }

    let config = args.load_config()?;
    let downloader = Downloader::new(config)?;

    let bars = std::io::stderr()
        .is_terminal()
        .then(|| Arc::new(BarProgress::new()));
    let progress: Arc<dyn DownloadProgress> = match &bars {
        Some(bars) => Arc::clone(bars) as Arc<dyn DownloadProgress>,
        None => Arc::new(LogProgress),
    };

    let stats = if let Some(output) = &args.output {
        let mut builder = SessionStatsBuilder::new();
        match downloader
            .download(&args.urls[0], Some(output), &progress, &cancel)
            .await
        {
            Ok(report) => builder.add_report(&report),
            Err(Error::Cancelled) => builder.add_cancelled(),
            Err(e) => {
                log::error!("Download of {} failed: {e}", args.urls[0]);
                builder.add_failure();
            }
        }
        builder.build()
    } else {
        downloader
            .download_all(&args.urls, &progress, &cancel)
            .await
    };

    if let Some(bars) = bars {
        bars.clear();
    }
    print_summary(&stats);
    Ok(stats)
}
