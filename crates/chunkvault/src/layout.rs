// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Partitioning of a logical file into ordered, contiguous chunks.

use std::ops::Range;

use snafu::ensure;

use crate::{
    error::{ConfigurationSnafu, EmptyListingSnafu, LayoutCorruptedSnafu, Result},
    types::Chunk,
};

/// Per-chunk size used by default, a safety margin under the backend's 5 GiB
/// object ceiling.
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 4_831_838_208;

/// Inputs of this size or larger are chunked by default.
pub const DEFAULT_CHUNK_THRESHOLD: u64 = 5 * 1024 * 1024 * 1024;

/// Whether an input of `size` bytes must be split.
#[must_use]
pub const fn requires_chunking(size: u64, threshold: u64) -> bool { size >= threshold }

/// Bounds of one planned chunk, `[start, end)` in logical offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBounds {
    pub index: usize,
    pub start: u64,
    pub end:   u64,
}

impl ChunkBounds {
    #[must_use]
    pub const fn len(&self) -> u64 { self.end - self.start }

    #[must_use]
    pub const fn is_empty(&self) -> bool { self.start == self.end }

    #[must_use]
    pub const fn range(&self) -> Range<u64> { self.start..self.end }
}

/// How a file of `total_size` bytes is cut into chunks of at most
/// `max_chunk_size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    total_size:     u64,
    max_chunk_size: u64,
}

impl ChunkLayout {
    pub fn new(total_size: u64, max_chunk_size: u64) -> Result<Self> {
        ensure!(
            max_chunk_size > 0,
            ConfigurationSnafu {
                message: "max chunk size must be positive",
            }
        );
        Ok(Self {
            total_size,
            max_chunk_size,
        })
    }

    #[must_use]
    pub const fn total_size(&self) -> u64 { self.total_size }

    #[must_use]
    pub const fn max_chunk_size(&self) -> u64 { self.max_chunk_size }

    #[must_use]
    pub const fn chunk_count(&self) -> usize {
        #[allow(clippy::cast_possible_truncation)]
        let count = self.total_size.div_ceil(self.max_chunk_size) as usize;
        count
    }

    pub fn bounds(&self) -> impl ExactSizeIterator<Item = ChunkBounds> + '_ {
        (0..self.chunk_count()).map(move |index| self.bounds_unchecked(index))
    }

    fn bounds_unchecked(&self, index: usize) -> ChunkBounds {
        let start = index as u64 * self.max_chunk_size;
        let end = start.saturating_add(self.max_chunk_size).min(self.total_size);
        ChunkBounds { index, start, end }
    }
}

/// Plan the chunk bounds of a file. A zero-length file has no chunks.
pub fn plan(total_size: u64, max_chunk_size: u64) -> Result<Vec<ChunkBounds>> {
    Ok(ChunkLayout::new(total_size, max_chunk_size)?.bounds().collect())
}

/// Check a stored chunk listing against the layout invariants: dense indices
/// from 0, contiguous offsets covering `[0, total_size)`, every chunk but the
/// last exactly as long as the first, and the last no longer than that.
pub fn verify_chunks(chunks: &[Chunk], total_size: u64) -> Result<()> {
    ensure!(!chunks.is_empty(), EmptyListingSnafu);

    let nominal = chunks[0].len();
    ensure!(
        nominal > 0 || chunks.len() == 1,
        LayoutCorruptedSnafu {
            message: format!("first of {} chunks is empty", chunks.len()),
        }
    );
    let last = chunks.len() - 1;
    let mut expected_start = 0;
    for (position, chunk) in chunks.iter().enumerate() {
        ensure!(
            chunk.index == position,
            LayoutCorruptedSnafu {
                message: format!("chunk at position {position} has index {}", chunk.index),
            }
        );
        ensure!(
            chunk.start_offset == expected_start && chunk.end_offset >= chunk.start_offset,
            LayoutCorruptedSnafu {
                message: format!(
                    "chunk {} spans {}..{}, expected start {expected_start}",
                    chunk.index, chunk.start_offset, chunk.end_offset
                ),
            }
        );
        ensure!(
            position == last || chunk.len() == nominal,
            LayoutCorruptedSnafu {
                message: format!(
                    "chunk {} holds {} bytes, only the last chunk may differ from {nominal}",
                    chunk.index,
                    chunk.len()
                ),
            }
        );
        ensure!(
            chunk.len() <= nominal,
            LayoutCorruptedSnafu {
                message: format!(
                    "chunk {} holds {} bytes, more than the chunk size {nominal}",
                    chunk.index,
                    chunk.len()
                ),
            }
        );
        expected_start = chunk.end_offset;
    }
    ensure!(
        expected_start == total_size,
        LayoutCorruptedSnafu {
            message: format!("chunks end at {expected_start}, file size is {total_size}"),
        }
    );
    Ok(())
}
