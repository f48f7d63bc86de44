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

//! Sources of bounded byte reads.
//!
//! Every variant delivers exactly the byte span it was opened for and then
//! signals completion with `Ok(None)`. Running out of data early is an error,
//! never a clean completion.

use std::{io::SeekFrom, ops::Range, path::Path};

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use snafu::{OptionExt, ResultExt, ensure};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};

use crate::error::{IoSnafu, NetworkSnafu, TransportError, TruncatedSnafu};

/// "Read the next bytes from here" capability shared by upload sources and
/// remote downloads.
#[async_trait]
pub trait BoundedRead: Send {
    /// Read at most `max` bytes. `Ok(None)` once the whole span has been
    /// delivered.
    async fn bounded_read(&mut self, max: usize) -> Result<Option<Bytes>, TransportError>;

    /// Bytes of the span not yet delivered.
    fn remaining(&self) -> u64;

    /// Release the underlying resource. Reads after `close` fail.
    async fn close(&mut self) {}
}

#[allow(clippy::cast_possible_truncation)]
const fn clamp_len(max: usize, remaining: u64) -> usize {
    if remaining < max as u64 { remaining as usize } else { max }
}

/// A `[start, end)` window of a local file.
#[derive(Debug)]
pub struct FileRange {
    file:      Option<File>,
    expected:  u64,
    remaining: u64,
}

impl FileRange {
    pub async fn open(path: &Path, range: Range<u64>) -> std::io::Result<Self> {
        let mut file = File::open(path).await?;
        file.seek(SeekFrom::Start(range.start)).await?;
        let len = range.end.saturating_sub(range.start);
        Ok(Self {
            file:      Some(file),
            expected:  len,
            remaining: len,
        })
    }

    #[must_use]
    pub const fn len(&self) -> u64 { self.expected }

    #[must_use]
    pub const fn is_empty(&self) -> bool { self.expected == 0 }
}

#[async_trait]
impl BoundedRead for FileRange {
    async fn bounded_read(&mut self, max: usize) -> Result<Option<Bytes>, TransportError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let received = self.expected - self.remaining;
        let file = self.file.as_mut().context(TruncatedSnafu {
            received,
            expected: self.expected,
        })?;

        let mut buf = BytesMut::zeroed(clamp_len(max.max(1), self.remaining));
        let n = file.read(&mut buf).await.context(IoSnafu)?;
        ensure!(
            n > 0,
            TruncatedSnafu {
                received,
                expected: self.expected,
            }
        );
        buf.truncate(n);
        self.remaining -= n as u64;
        Ok(Some(buf.freeze()))
    }

    fn remaining(&self) -> u64 { self.remaining }

    async fn close(&mut self) { self.file = None; }
}

/// Body of a ranged HTTP response.
///
/// A full-content (200) response carries the whole object, so the bytes
/// before the requested offset are skipped and the body is capped at the
/// requested length.
#[derive(Debug)]
pub struct HttpBody {
    response:  Option<reqwest::Response>,
    pending:   Bytes,
    skip:      u64,
    expected:  u64,
    remaining: u64,
}

impl HttpBody {
    #[must_use]
    pub const fn new(response: reqwest::Response, skip: u64, len: u64) -> Self {
        Self {
            response: Some(response),
            pending: Bytes::new(),
            skip,
            expected: len,
            remaining: len,
        }
    }

    fn truncated(&self) -> TransportError {
        TransportError::Truncated {
            received: self.expected - self.remaining,
            expected: self.expected,
        }
    }
}

#[async_trait]
impl BoundedRead for HttpBody {
    async fn bounded_read(&mut self, max: usize) -> Result<Option<Bytes>, TransportError> {
        loop {
            if self.remaining == 0 {
                self.response = None;
                return Ok(None);
            }

            if self.pending.is_empty() {
                let next = match self.response.as_mut() {
                    Some(response) => response.chunk().await.context(NetworkSnafu)?,
                    None => return Err(self.truncated()),
                };
                match next {
                    Some(bytes) => self.pending = bytes,
                    None => {
                        self.response = None;
                        return Err(self.truncated());
                    }
                }
                continue;
            }

            if self.skip > 0 {
                let n = clamp_len(self.pending.len(), self.skip);
                self.pending.advance(n);
                self.skip -= n as u64;
                continue;
            }

            let n = clamp_len(max.max(1).min(self.pending.len()), self.remaining);
            self.remaining -= n as u64;
            return Ok(Some(self.pending.split_to(n)));
        }
    }

    fn remaining(&self) -> u64 { self.remaining }

    async fn close(&mut self) {
        self.response = None;
        self.pending = Bytes::new();
    }
}

/// In-memory buffer, delivered in pieces of at most the requested size.
#[derive(Debug, Clone, Default)]
pub struct MemoryBody {
    data: Bytes,
}

impl MemoryBody {
    pub fn new(data: impl Into<Bytes>) -> Self { Self { data: data.into() } }
}

#[async_trait]
impl BoundedRead for MemoryBody {
    async fn bounded_read(&mut self, max: usize) -> Result<Option<Bytes>, TransportError> {
        if self.data.is_empty() {
            return Ok(None);
        }
        let n = max.max(1).min(self.data.len());
        Ok(Some(self.data.split_to(n)))
    }

    fn remaining(&self) -> u64 { self.data.len() as u64 }

    async fn close(&mut self) { self.data = Bytes::new(); }
}
