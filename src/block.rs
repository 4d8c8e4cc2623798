//! Block partitioning and sub-block planning.

use crate::error::{Error, Result};

/// A contiguous byte range of the target file assigned to one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    /// Position of the block in the partition.
    pub index: usize,
    /// First byte of the block.
    pub start: u64,
    /// Last byte of the block (inclusive).
    pub end: u64,
}

impl BlockRange {
    /// Number of bytes in the block. Never zero.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Iterates the sub-block ranges still to fetch after `downloaded` bytes.
    ///
    /// The first sub-block starts at `start + downloaded`; each following one
    /// starts `sub_block_size` bytes after the previous start.
    #[must_use]
    pub const fn sub_blocks(&self, downloaded: u64, sub_block_size: u64) -> SubBlocks {
        SubBlocks {
            next: self.start.saturating_add(downloaded),
            end: self.end,
            step: sub_block_size,
        }
    }
}

/// Iterator over `(start, end)` pairs of a block's remaining sub-blocks.
#[derive(Debug, Clone)]
pub struct SubBlocks {
    next: u64,
    end: u64,
    step: u64,
}

impl Iterator for SubBlocks {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.end || self.step == 0 {
            return None;
        }
        let start = self.next;
        let end = start.saturating_add(self.step - 1).min(self.end);
        self.next = start.saturating_add(self.step);
        Some((start, end))
    }
}

/// Splits `[0, total_size)` into `workers` contiguous blocks.
///
/// Every block but the last spans `total_size / workers` bytes; the last one
/// absorbs the remainder and ends at `total_size - 1`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `total_size` is zero or `workers` is not
/// in `1..=total_size`.
pub fn partition(total_size: u64, workers: usize) -> Result<Vec<BlockRange>> {
    let count = workers as u64;
    if total_size == 0 || count == 0 || count > total_size {
        return Err(Error::InvalidInput(format!(
            "cannot split {total_size} bytes into {workers} blocks"
        )));
    }

    let chunk = total_size / count;
    let ranges = (0..workers)
        .map(|index| {
            let i = index as u64;
            let start = i * chunk;
            let end = if index == workers - 1 {
                total_size - 1
            } else {
                (i + 1) * chunk - 1
            };
            BlockRange { index, start, end }
        })
        .collect();
    Ok(ranges)
}
