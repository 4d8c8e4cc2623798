//! Configuration types for download operations.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default size of one ranged request within a block (4 MiB).
pub const DEFAULT_SUB_BLOCK_SIZE: u64 = 4 * 1024 * 1024;

/// An explicit HTTP proxy applied to every request of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy host name or address.
    pub host: String,
    /// Proxy port.
    pub port: u16,
}

impl ProxyConfig {
    /// Returns the proxy as an `http://host:port` URL string.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ProxyConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidConfig(format!("proxy must be host:port, got {s:?}")))?;
        if host.is_empty() {
            return Err(Error::InvalidConfig(format!("proxy host is empty in {s:?}")));
        }
        let port = port
            .parse::<u16>()
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| Error::InvalidConfig(format!("invalid proxy port in {s:?}")))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// Configuration for download operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Number of blocks (and parallel workers) per file.
    pub workers: usize,
    /// Size in bytes of one ranged request within a block.
    pub sub_block_size: u64,
    /// Attempts per sub-block before it is given up.
    pub max_retries: u32,
    /// Lower bound of the retry backoff, in milliseconds.
    pub backoff_min_ms: u64,
    /// Width of the random jitter added to the backoff, in milliseconds.
    pub backoff_jitter_ms: u64,
    /// TCP connect timeout, in seconds.
    pub connect_timeout_secs: u64,
    /// Idle read timeout on a response body, in seconds.
    pub read_timeout_secs: u64,
    /// Period of progress reporting, in milliseconds.
    pub report_interval_ms: u64,
    /// Number of files downloaded concurrently in batch mode.
    pub concurrent_jobs: usize,
    /// Optional HTTP proxy; `None` means a direct connection.
    pub proxy: Option<ProxyConfig>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            sub_block_size: DEFAULT_SUB_BLOCK_SIZE,
            max_retries: 30,
            backoff_min_ms: 300,
            backoff_jitter_ms: 3000,
            connect_timeout_secs: 5,
            read_timeout_secs: 10,
            report_interval_ms: 1000,
            concurrent_jobs: 6,
            proxy: None,
        }
    }
}

impl DownloadConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of workers per file.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the sub-block size in bytes.
    #[must_use]
    pub const fn with_sub_block_size(mut self, size: u64) -> Self {
        self.sub_block_size = size;
        self
    }

    /// Sets the retry policy: attempts per sub-block and the backoff window.
    #[must_use]
    pub const fn with_retries(mut self, max_retries: u32, min_ms: u64, jitter_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.backoff_min_ms = min_ms;
        self.backoff_jitter_ms = jitter_ms;
        self
    }

    /// Sets the progress reporting period in milliseconds.
    #[must_use]
    pub const fn with_report_interval_ms(mut self, ms: u64) -> Self {
        self.report_interval_ms = ms;
        self
    }

    /// Sets the number of concurrent files in batch mode.
    #[must_use]
    pub const fn with_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.concurrent_jobs = jobs;
        self
    }

    /// Sets the HTTP proxy.
    #[must_use]
    pub fn with_proxy(mut self, proxy: Option<ProxyConfig>) -> Self {
        self.proxy = proxy;
        self
    }

    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Read timeout as a [`Duration`].
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Progress reporting period as a [`Duration`].
    #[must_use]
    pub const fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    /// Checks that every field is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be at least 1".into()));
        }
        if self.sub_block_size == 0 {
            return Err(Error::InvalidConfig(
                "sub_block_size must be at least 1".into(),
            ));
        }
        if self.max_retries == 0 {
            return Err(Error::InvalidConfig("max_retries must be at least 1".into()));
        }
        if self.report_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "report_interval_ms must be positive".into(),
            ));
        }
        if self.concurrent_jobs == 0 {
            return Err(Error::InvalidConfig(
                "concurrent_jobs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Path configuration for downloads and resume state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Directory where files are saved when no explicit destination is given.
    pub download_dir: PathBuf,
    /// Root under which each job keeps its progress directory.
    pub progress_root: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("."),
            progress_root: PathBuf::from("download_progress"),
        }
    }
}

/// Complete application configuration combining download and path settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Download configuration.
    pub download: DownloadConfig,
    /// Path configuration.
    pub paths: PathConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigFile`] if the TOML is malformed.
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Validates the download section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if any setting is out of range.
    pub fn validate(&self) -> Result<()> {
        self.download.validate()
    }
}
