//! Durable per-block progress records.
//!
//! Each block owns one file `block_<index>.progress` inside the job's
//! progress directory. The file holds exactly eight bytes: the number of
//! bytes downloaded for that block, as a big-endian `u64`. Only the worker
//! owning a block ever touches its record.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Width of a serialized progress record.
pub const RECORD_LEN: usize = 8;

/// Reads and writes the progress records of one job.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    dir: PathBuf,
}

impl ProgressStore {
    /// Creates a store rooted at a job's progress directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the job's progress directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the record path for block `index`.
    #[must_use]
    pub fn record_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("block_{index}.progress"))
    }

    /// Reads the downloaded-byte counter of block `index`.
    ///
    /// A missing, short or unreadable record counts as zero bytes.
    pub async fn read(&self, index: usize) -> u64 {
        let path = self.record_path(index);
        match tokio::fs::read(&path).await {
            Ok(bytes) => decode(&bytes).unwrap_or_else(|| {
                log::warn!(
                    "Ignoring malformed progress record {} ({} bytes)",
                    path.display(),
                    bytes.len()
                );
                0
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => {
                log::warn!("Failed to read progress record {}: {e}", path.display());
                0
            }
        }
    }

    /// Overwrites the record of block `index` with `downloaded`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record file cannot be written.
    pub async fn write(&self, index: usize, downloaded: u64) -> std::io::Result<()> {
        tokio::fs::write(self.record_path(index), downloaded.to_be_bytes()).await
    }

    /// Removes the record of block `index`, marking the block complete.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub async fn remove(&self, index: usize) -> std::io::Result<()> {
        match tokio::fs::remove_file(self.record_path(index)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

fn decode(bytes: &[u8]) -> Option<u64> {
    let head: [u8; RECORD_LEN] = bytes.get(..RECORD_LEN)?.try_into().ok()?;
    Some(u64::from_be_bytes(head))
}
