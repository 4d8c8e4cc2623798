//! Per-block download worker.
//!
//! A worker owns one [`BlockRange`] for the life of a job. It resumes from
//! the block's progress record, fetches the remaining bytes as a sequence of
//! sub-block range requests in increasing offset order, and writes every
//! received chunk at its absolute offset through its own file handle.

use std::fs::File;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use rand::Rng;
use reqwest::header::RANGE;
use reqwest::{StatusCode, Url};
use tokio_util::sync::CancellationToken;

use crate::block::BlockRange;
use crate::config::DownloadConfig;
use crate::download::DownloadProgress;
use crate::error::{Error, Result};
use crate::record::ProgressStore;

/// Live byte counters of one block, read lock-free by the aggregator.
#[derive(Debug, Default)]
pub struct BlockCounters {
    /// Furthest byte reached from the block start. The progress record follows
    /// it until a sub-block is given up.
    downloaded: AtomicU64,
    /// Bytes received during this run, retried bytes included. Never persisted.
    transferred: AtomicU64,
}

impl BlockCounters {
    /// Creates zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            downloaded: AtomicU64::new(0),
            transferred: AtomicU64::new(0),
        }
    }

    /// Bytes of the block known to be on disk.
    #[must_use]
    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    /// Bytes received by this block during the current run.
    #[must_use]
    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub(crate) fn resume_at(&self, downloaded: u64) {
        self.downloaded.store(downloaded, Ordering::Relaxed);
    }

    /// Records `delta` new bytes reaching `contiguous` bytes from the block
    /// start and returns the updated downloaded counter.
    ///
    /// The downloaded counter is a high-water mark, so a retried sub-block
    /// never counts the same bytes twice.
    pub(crate) fn advance(&self, contiguous: u64, delta: u64) -> u64 {
        self.transferred.fetch_add(delta, Ordering::Relaxed);
        let previous = self.downloaded.fetch_max(contiguous, Ordering::Relaxed);
        previous.max(contiguous)
    }
}

/// Attempt budget and jittered backoff for one sub-block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per sub-block, the first one included.
    pub max_attempts: u32,
    /// Minimum sleep between attempts, in milliseconds.
    pub backoff_min_ms: u64,
    /// Width of the uniform random jitter added to the minimum, in milliseconds.
    pub backoff_jitter_ms: u64,
}

impl RetryPolicy {
    /// Extracts the retry settings of a download configuration.
    #[must_use]
    pub const fn from_config(config: &DownloadConfig) -> Self {
        Self {
            max_attempts: config.max_retries,
            backoff_min_ms: config.backoff_min_ms,
            backoff_jitter_ms: config.backoff_jitter_ms,
        }
    }

    /// Draws a delay uniformly from `[min, min + jitter)`.
    #[must_use]
    pub fn backoff(&self) -> Duration {
        let jitter = if self.backoff_jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..self.backoff_jitter_ms)
        };
        Duration::from_millis(self.backoff_min_ms + jitter)
    }
}

/// A sub-block that was given up after exhausting its attempts.
///
/// The bytes in `start..=end` may be missing or stale in the destination file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedRange {
    /// Block the sub-block belongs to.
    pub block: usize,
    /// First byte of the sub-block.
    pub start: u64,
    /// Last byte of the sub-block (inclusive).
    pub end: u64,
    /// Attempts made before giving up.
    pub attempts: u32,
    /// Error of the last attempt.
    pub error: String,
}

impl FailedRange {
    /// Number of bytes in the failed range.
    #[must_use]
    pub const fn bytes(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// How a worker finished.
#[derive(Debug, Clone, Default)]
pub struct BlockOutcome {
    /// Block index.
    pub index: usize,
    /// Bytes already on disk when the worker started.
    pub resumed: u64,
    /// Sub-blocks given up after exhausting retries.
    pub failed: Vec<FailedRange>,
    /// True if the worker stopped early because the job was cancelled.
    pub cancelled: bool,
}

enum SubBlockError {
    Exhausted(FailedRange),
    Cancelled,
}

/// Downloads one block of the destination file.
pub(crate) struct BlockWorker {
    pub(crate) client: reqwest::Client,
    pub(crate) url: Url,
    pub(crate) range: BlockRange,
    pub(crate) file: Arc<File>,
    pub(crate) store: ProgressStore,
    pub(crate) counters: Arc<BlockCounters>,
    pub(crate) policy: RetryPolicy,
    pub(crate) sub_block_size: u64,
    pub(crate) name: Arc<str>,
    pub(crate) progress: Arc<dyn DownloadProgress>,
    pub(crate) cancel: CancellationToken,
}

impl BlockWorker {
    /// Runs the block to completion, cancellation, or the end of its sub-blocks.
    pub(crate) async fn run(self) -> BlockOutcome {
        let index = self.range.index;
        let mut downloaded = self.store.read(index).await;
        if downloaded > self.range.len() {
            log::warn!(
                "Progress record for block {index} claims {downloaded} bytes but the block has {}, restarting it",
                self.range.len()
            );
            downloaded = 0;
        }
        if downloaded > 0 {
            log::debug!(
                "Block {index} resuming at byte {} ({downloaded} of {} already on disk)",
                self.range.start + downloaded,
                self.range.len()
            );
        }
        self.counters.resume_at(downloaded);

        let mut outcome = BlockOutcome {
            index,
            resumed: downloaded,
            ..BlockOutcome::default()
        };

        // The record never passes the first given-up sub-block.
        let mut ceiling = u64::MAX;
        for (start, end) in self.range.sub_blocks(downloaded, self.sub_block_size) {
            if self.cancel.is_cancelled() {
                outcome.cancelled = true;
                return outcome;
            }
            match self.fetch_sub_block(start, end, ceiling).await {
                Ok(()) => {}
                Err(SubBlockError::Exhausted(failure)) => {
                    if ceiling == u64::MAX {
                        ceiling = failure.start - self.range.start;
                        self.persist(self.counters.downloaded(), ceiling).await;
                    }
                    outcome.failed.push(failure);
                }
                Err(SubBlockError::Cancelled) => {
                    outcome.cancelled = true;
                    return outcome;
                }
            }
        }

        if let Err(e) = self.store.remove(index).await {
            log::warn!("Failed to remove progress record for block {index}: {e}");
        }
        log::debug!("Block {index} finished");
        outcome
    }

    /// Fetches `start..=end`, retrying the whole range from `start` on failure.
    async fn fetch_sub_block(
        &self,
        start: u64,
        end: u64,
        ceiling: u64,
    ) -> std::result::Result<(), SubBlockError> {
        let index = self.range.index;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let err = match self.transfer(start, end, ceiling).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if attempts >= self.policy.max_attempts || !err.is_retryable() {
                log::error!(
                    "Giving up on block {index} range [{start}-{end}] after {attempts} attempt(s): {err}"
                );
                let failure = FailedRange {
                    block: index,
                    start,
                    end,
                    attempts,
                    error: err.to_string(),
                };
                self.progress.on_sub_block_failed(&self.name, &failure);
                return Err(SubBlockError::Exhausted(failure));
            }

            let delay = self.policy.backoff();
            log::warn!(
                "Attempt {attempts} failed for block {index} range [{start}-{end}]: {err}. Retrying in {delay:?}"
            );
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.cancel.cancelled() => return Err(SubBlockError::Cancelled),
            }
        }
    }

    /// Writes the block's progress record, never past `ceiling`.
    async fn persist(&self, downloaded: u64, ceiling: u64) {
        let index = self.range.index;
        if let Err(e) = self.store.write(index, downloaded.min(ceiling)).await {
            log::warn!("Failed to persist progress for block {index}: {e}");
        }
    }

    /// One attempt: a single ranged GET streamed into the file.
    ///
    /// The persisted record is capped at `ceiling` so a restart refetches a
    /// sub-block given up earlier in this run.
    async fn transfer(&self, start: u64, end: u64, ceiling: u64) -> Result<()> {
        let response = self
            .client
            .get(self.url.clone())
            .header(RANGE, format!("bytes={start}-{end}"))
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::PARTIAL_CONTENT {
            return Err(Error::UnexpectedStatus {
                status: status.as_u16(),
                start,
                end,
            });
        }

        let mut offset = start;
        let mut stream = response.bytes_stream();
        while offset <= end {
            let Some(chunk) = stream.next().await else {
                break;
            };
            let mut chunk = chunk?;
            let remaining = end + 1 - offset;
            if chunk.len() as u64 > remaining {
                #[allow(clippy::cast_possible_truncation)]
                chunk.truncate(remaining as usize);
            }
            if chunk.is_empty() {
                continue;
            }

            let len = chunk.len() as u64;
            write_at(Arc::clone(&self.file), chunk, offset).await?;
            offset += len;

            let downloaded = self.counters.advance(offset - self.range.start, len);
            self.persist(downloaded, ceiling).await;
        }

        let received = offset - start;
        let expected = end - start + 1;
        if received < expected {
            return Err(Error::ShortBody {
                start,
                end,
                expected,
                received,
            });
        }
        Ok(())
    }
}

/// Writes `data` at absolute `offset` without touching any shared cursor.
async fn write_at(file: Arc<File>, data: Bytes, offset: u64) -> std::io::Result<()> {
    tokio::task::spawn_blocking(move || positioned_write(&file, &data, offset))
        .await
        .map_err(std::io::Error::other)?
}

#[cfg(unix)]
fn positioned_write(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn positioned_write(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut written = 0;
    while written < buf.len() {
        let n = file.seek_write(&buf[written..], offset + written as u64)?;
        if n == 0 {
            return Err(std::io::ErrorKind::WriteZero.into());
        }
        written += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::{NoProgress, build_client};
    use crate::test_support::{Fault, RangeServer, sample_data};
    use tempfile::TempDir;

    const SUB: u64 = 4096;

    struct Fixture {
        _dir: TempDir,
        dest: std::path::PathBuf,
        store: ProgressStore,
        server: RangeServer,
        data: Vec<u8>,
    }

    async fn fixture(len: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("file.bin");
        let store = ProgressStore::new(dir.path().join("progress"));
        std::fs::create_dir_all(store.dir()).unwrap();
        let data = sample_data(len);
        let server = RangeServer::start(data.clone()).await;
        Fixture {
            _dir: dir,
            dest,
            store,
            server,
            data,
        }
    }

    fn worker(fx: &Fixture, range: BlockRange, max_attempts: u32) -> (BlockWorker, Arc<BlockCounters>) {
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&fx.dest)
            .unwrap();
        let counters = Arc::new(BlockCounters::new());
        let worker = BlockWorker {
            client: build_client(&DownloadConfig::default()).unwrap(),
            url: Url::parse(&fx.server.url()).unwrap(),
            range,
            file: Arc::new(file),
            store: fx.store.clone(),
            counters: Arc::clone(&counters),
            policy: RetryPolicy {
                max_attempts,
                backoff_min_ms: 1,
                backoff_jitter_ms: 2,
            },
            sub_block_size: SUB,
            name: Arc::from("file.bin"),
            progress: Arc::new(NoProgress),
            cancel: CancellationToken::new(),
        };
        (worker, counters)
    }

    fn on_disk(fx: &Fixture, range: BlockRange) -> Vec<u8> {
        let contents = std::fs::read(&fx.dest).unwrap();
        contents[range.start as usize..=range.end as usize].to_vec()
    }

    fn expected(fx: &Fixture, range: BlockRange) -> Vec<u8> {
        fx.data[range.start as usize..=range.end as usize].to_vec()
    }

    #[tokio::test]
    async fn downloads_block_and_removes_record() {
        let fx = fixture(40_000).await;
        let range = BlockRange { index: 1, start: 10_000, end: 29_999 };
        let (worker, counters) = worker(&fx, range, 3);

        let outcome = worker.run().await;

        assert!(outcome.failed.is_empty());
        assert!(!outcome.cancelled);
        assert_eq!(on_disk(&fx, range), expected(&fx, range));
        assert_eq!(counters.downloaded(), range.len());
        assert_eq!(counters.transferred(), range.len());
        assert!(!fx.store.record_path(1).exists());

        let requests = fx.server.requests();
        assert_eq!(requests.first(), Some(&(10_000, 10_000 + SUB - 1)));
        assert_eq!(requests.last().map(|r| r.1), Some(29_999));
        assert!(requests.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[tokio::test]
    async fn resume_skips_recorded_bytes() {
        let fx = fixture(40_000).await;
        let range = BlockRange { index: 0, start: 0, end: 19_999 };
        fx.store.write(0, 5_000).await.unwrap();
        let (worker, counters) = worker(&fx, range, 3);

        let outcome = worker.run().await;

        assert_eq!(outcome.resumed, 5_000);
        let requests = fx.server.requests();
        assert_eq!(requests[0].0, 5_000);
        assert!(requests.iter().all(|(start, _)| *start >= 5_000));
        assert_eq!(counters.downloaded(), range.len());
        assert_eq!(counters.transferred(), range.len() - 5_000);

        let written = std::fs::read(&fx.dest).unwrap();
        assert_eq!(&written[5_000..20_000], &fx.data[5_000..20_000]);
    }

    #[tokio::test]
    async fn oversized_record_restarts_block() {
        let fx = fixture(10_000).await;
        let range = BlockRange { index: 0, start: 0, end: 9_999 };
        fx.store.write(0, 50_000).await.unwrap();
        let (worker, _) = worker(&fx, range, 3);

        let outcome = worker.run().await;

        assert_eq!(outcome.resumed, 0);
        assert_eq!(fx.server.requests()[0].0, 0);
        assert_eq!(on_disk(&fx, range), expected(&fx, range));
    }

    #[tokio::test]
    async fn full_body_200_is_retried_not_accepted() {
        let fx = fixture(20_000).await;
        let range = BlockRange { index: 0, start: 0, end: 19_999 };
        fx.server.fail(SUB, Fault::IgnoreRange, 1);
        let (worker, _) = worker(&fx, range, 3);

        let outcome = worker.run().await;

        assert!(outcome.failed.is_empty());
        assert_eq!(fx.server.requests_at(SUB), 2);
        assert_eq!(on_disk(&fx, range), expected(&fx, range));
    }

    #[tokio::test]
    async fn server_error_is_retried() {
        let fx = fixture(20_000).await;
        let range = BlockRange { index: 0, start: 0, end: 19_999 };
        fx.server.fail(2 * SUB, Fault::Status(503), 2);
        let (worker, _) = worker(&fx, range, 5);

        let outcome = worker.run().await;

        assert!(outcome.failed.is_empty());
        assert_eq!(fx.server.requests_at(2 * SUB), 3);
        assert_eq!(on_disk(&fx, range), expected(&fx, range));
    }

    #[tokio::test]
    async fn short_body_is_retried() {
        let fx = fixture(20_000).await;
        let range = BlockRange { index: 0, start: 0, end: 19_999 };
        fx.server.fail(0, Fault::Short, 1);
        let (worker, counters) = worker(&fx, range, 3);

        let outcome = worker.run().await;

        assert!(outcome.failed.is_empty());
        assert_eq!(fx.server.requests_at(0), 2);
        assert_eq!(on_disk(&fx, range), expected(&fx, range));
        // The half-sub-block of the failed attempt is not counted twice.
        assert_eq!(counters.downloaded(), range.len());
        assert!(counters.transferred() > range.len());
    }

    #[tokio::test]
    async fn exhausted_sub_block_is_skipped_and_block_continues() {
        let fx = fixture(20_000).await;
        let range = BlockRange { index: 0, start: 0, end: 19_999 };
        fx.server.fail(SUB, Fault::Status(500), usize::MAX);
        let (worker, _) = worker(&fx, range, 3);

        let outcome = worker.run().await;

        assert_eq!(
            outcome.failed,
            vec![FailedRange {
                block: 0,
                start: SUB,
                end: 2 * SUB - 1,
                attempts: 3,
                error: "unexpected status 500 for range 4096-8191".to_string(),
            }]
        );
        assert_eq!(fx.server.requests_at(SUB), 3);
        // Later sub-blocks were still fetched and the block was closed out.
        assert_eq!(fx.server.requests_at(2 * SUB), 1);
        assert_eq!(fx.server.requests_at(4 * SUB), 1);
        assert!(!fx.store.record_path(0).exists());

        let written = std::fs::read(&fx.dest).unwrap();
        assert_eq!(&written[..SUB as usize], &fx.data[..SUB as usize]);
        assert_eq!(&written[2 * SUB as usize..], &fx.data[2 * SUB as usize..20_000]);
    }

    #[tokio::test]
    async fn given_up_sub_block_is_refetched_after_interruption() {
        let fx = fixture(20_000).await;
        let range = BlockRange { index: 0, start: 0, end: 19_999 };
        fx.server.fail(SUB, Fault::Status(500), 2);
        fx.server.fail(3 * SUB, Fault::Status(503), 1);

        let (mut first, _) = worker(&fx, range, 2);
        first.policy.backoff_min_ms = 200;
        first.policy.backoff_jitter_ms = 0;
        let cancel = first.cancel.clone();
        let server = &fx.server;
        let (outcome, ()) = tokio::join!(first.run(), async {
            while server.requests_at(3 * SUB) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            cancel.cancel();
        });

        assert!(outcome.cancelled);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(fx.server.requests_at(2 * SUB), 1);
        // Bytes past the gap were written, but the record stops at the gap.
        assert_eq!(fx.store.read(0).await, SUB);

        let (second, counters) = worker(&fx, range, 3);
        let outcome = second.run().await;

        assert_eq!(outcome.resumed, SUB);
        assert!(outcome.failed.is_empty());
        assert_eq!(fx.server.requests_at(SUB), 3);
        assert_eq!(counters.downloaded(), range.len());
        assert_eq!(on_disk(&fx, range), expected(&fx, range));
        assert!(!fx.store.record_path(0).exists());
    }

    #[tokio::test]
    async fn cancelled_worker_keeps_record() {
        let fx = fixture(20_000).await;
        let range = BlockRange { index: 0, start: 0, end: 19_999 };
        fx.store.write(0, 1_234).await.unwrap();
        let (worker, _) = worker(&fx, range, 3);
        worker.cancel.cancel();

        let outcome = worker.run().await;

        assert!(outcome.cancelled);
        assert!(fx.server.requests().is_empty());
        assert_eq!(fx.store.read(0).await, 1_234);
    }

    #[test]
    fn backoff_stays_in_window() {
        let policy = RetryPolicy {
            max_attempts: 30,
            backoff_min_ms: 300,
            backoff_jitter_ms: 3000,
        };
        for _ in 0..1_000 {
            let delay = policy.backoff();
            assert!(delay >= Duration::from_millis(300));
            assert!(delay < Duration::from_millis(3300));
        }
    }

    #[test]
    fn backoff_without_jitter_is_fixed() {
        let policy = RetryPolicy {
            max_attempts: 1,
            backoff_min_ms: 5,
            backoff_jitter_ms: 0,
        };
        assert_eq!(policy.backoff(), Duration::from_millis(5));
    }

    #[test]
    fn counters_are_high_water_marks() {
        let counters = BlockCounters::new();
        assert_eq!(counters.advance(100, 100), 100);
        // A retry rewriting bytes 50..80 does not move the mark back.
        assert_eq!(counters.advance(80, 30), 100);
        assert_eq!(counters.downloaded(), 100);
        assert_eq!(counters.transferred(), 130);
    }
}
