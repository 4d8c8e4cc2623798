//! Error types for the shardfetch library.

use thiserror::Error;

/// Errors that can occur during download operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The total size of the remote file could not be determined.
    ///
    /// This is the only error that aborts a job before any worker starts.
    #[error("cannot determine size of {url}: {reason}")]
    Metadata {
        /// URL that was probed.
        url: String,
        /// What went wrong while probing.
        reason: String,
    },

    /// A sub-block request returned something other than `206 Partial Content`.
    #[error("unexpected status {status} for range {start}-{end}")]
    UnexpectedStatus {
        /// HTTP status code returned by the server.
        status: u16,
        /// First byte of the requested range.
        start: u64,
        /// Last byte (inclusive) of the requested range.
        end: u64,
    },

    /// A sub-block response body ended before the requested range was filled.
    #[error("short body for range {start}-{end}: expected {expected} bytes, got {received}")]
    ShortBody {
        /// First byte of the requested range.
        start: u64,
        /// Last byte (inclusive) of the requested range.
        end: u64,
        /// Number of bytes requested.
        expected: u64,
        /// Number of bytes actually received.
        received: u64,
    },

    /// HTTP transport error (connect, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A caller passed a value outside a function's contract.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// URL could not be parsed or has no usable file name.
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Configuration file could not be parsed.
    #[error("config file error: {0}")]
    ConfigFile(#[from] toml::de::Error),

    /// The job was cancelled before every block finished.
    #[error("download cancelled")]
    Cancelled,
}

impl Error {
    /// Returns true if a sub-block transfer failing with this error should be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedStatus { .. } | Self::ShortBody { .. } | Self::Http(_) | Self::Io(_)
        )
    }
}

/// A specialized `Result` type for shardfetch operations.
pub type Result<T> = std::result::Result<T, Error>;
