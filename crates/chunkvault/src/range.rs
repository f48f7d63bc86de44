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

//! Mapping of a logical byte range onto the chunks that hold it.

use std::{fmt, ops::Range};

use snafu::{OptionExt, ensure};

use crate::{
    error::{InvalidRangeSnafu, NoChunksForRangeSnafu, RangeHeaderSnafu, Result},
    types::Chunk,
};

/// Requested span length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeLength {
    Bytes(i64),
    /// Everything from `start` to the end of the file
    ToEnd,
}

impl fmt::Display for RangeLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(n) => write!(f, "{n}"),
            Self::ToEnd => f.write_str("to-end"),
        }
    }
}

/// A request for a contiguous byte span of a logical file.
///
/// Signed fields mirror what callers hand in; validation happens in
/// [`RangeRequest::resolve`] before any chunk is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    pub start:  i64,
    pub length: RangeLength,
}

impl RangeRequest {
    #[must_use]
    pub const fn new(start: i64, length: i64) -> Self {
        Self {
            start,
            length: RangeLength::Bytes(length),
        }
    }

    #[must_use]
    pub const fn to_end(start: i64) -> Self {
        Self {
            start,
            length: RangeLength::ToEnd,
        }
    }

    /// Parse a single-range HTTP `Range` header value: `bytes=a-b`, `bytes=a-`
    /// or the suffix form `bytes=-n`. The suffix form needs `total_size` to
    /// find its start.
    pub fn from_header(header: &str, total_size: u64) -> Result<Self> {
        let malformed = || RangeHeaderSnafu { header }.build();

        let spec = header
            .trim()
            .strip_prefix("bytes=")
            .context(RangeHeaderSnafu { header })?;
        ensure!(!spec.contains(','), RangeHeaderSnafu { header });
        let (first, last) = spec.split_once('-').context(RangeHeaderSnafu { header })?;
        let (first, last) = (first.trim(), last.trim());

        if first.is_empty() {
            let suffix: u64 = last.parse().map_err(|_| malformed())?;
            let start = total_size.saturating_sub(suffix);
            return Ok(Self::to_end(i64::try_from(start).map_err(|_| malformed())?));
        }

        let start: i64 = first.parse().map_err(|_| malformed())?;
        if last.is_empty() {
            return Ok(Self::to_end(start));
        }
        let end: i64 = last.parse().map_err(|_| malformed())?;
        ensure!(end >= start, RangeHeaderSnafu { header });
        // `resolve` clamps to the file size, so saturating is lossless
        Ok(Self::new(start, (end - start).saturating_add(1)))
    }

    /// Validate against a file of `total_size` bytes and return the clamped
    /// logical range `[start, end)`.
    pub fn resolve(&self, total_size: u64) -> Result<Range<u64>> {
        let invalid = || {
            InvalidRangeSnafu {
                start:      self.start,
                length:     self.length.to_string(),
                total_size,
            }
            .build()
        };

        let start = u64::try_from(self.start).map_err(|_| invalid())?;
        if start >= total_size {
            return Err(invalid());
        }
        let end = match self.length {
            RangeLength::ToEnd => total_size,
            RangeLength::Bytes(length) => {
                let length = u64::try_from(length).map_err(|_| invalid())?;
                start.saturating_add(length).min(total_size)
            }
        };
        Ok(start..end)
    }
}

impl fmt::Display for RangeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "start={} length={}", self.start, self.length)
    }
}

/// The part of one chunk a range read needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSlice {
    /// Position within the overlap set
    pub position:      usize,
    /// Chunk index within the file
    pub index:         usize,
    /// Logical offset of the chunk's first byte
    pub logical_start: u64,
    /// Sub-range to fetch, relative to the chunk's first byte
    pub range:         Range<u64>,
}

impl ChunkSlice {
    #[must_use]
    pub const fn len(&self) -> u64 { self.range.end - self.range.start }

    #[must_use]
    pub const fn is_empty(&self) -> bool { self.range.start == self.range.end }

    /// The logical span this slice covers.
    #[must_use]
    pub const fn logical_range(&self) -> Range<u64> {
        self.logical_start + self.range.start..self.logical_start + self.range.end
    }
}

/// Compute the ordered chunk slices that together hold the requested range.
///
/// `chunks` must be sorted by index. Fails when the request is out of bounds
/// or when no chunk overlaps a range that passed the bounds check, which
/// means the listing does not cover the file.
pub fn map_range(
    chunks: &[Chunk],
    total_size: u64,
    request: &RangeRequest,
) -> Result<Vec<ChunkSlice>> {
    let wanted = request.resolve(total_size)?;

    let slices: Vec<ChunkSlice> = chunks
        .iter()
        .filter(|chunk| chunk.start_offset < wanted.end && chunk.end_offset > wanted.start)
        .enumerate()
        .map(|(position, chunk)| ChunkSlice {
            position,
            index: chunk.index,
            logical_start: chunk.start_offset,
            range: wanted.start.max(chunk.start_offset) - chunk.start_offset
                ..wanted.end.min(chunk.end_offset) - chunk.start_offset,
        })
        .collect();

    ensure!(
        !slices.is_empty(),
        NoChunksForRangeSnafu {
            start: wanted.start,
            end: wanted.end,
            total_size,
            chunk_count: chunks.len(),
        }
    );
    Ok(slices)
}
