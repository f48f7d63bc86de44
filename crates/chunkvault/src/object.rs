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

use std::sync::Arc;

use snafu::{OptionExt, ResultExt, ensure};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    error::{ClosedSnafu, FileNotFoundSnafu, MetadataSnafu, Result},
    layout::verify_chunks,
    metadata::MetadataStore,
    range::{RangeRequest, map_range},
    reader::SegmentedReader,
    resolve::LocationResolver,
    retry::RetryPolicy,
    transport::ChunkTransport,
    types::{Chunk, FileId},
};

/// The remote side of a read: where locations come from, how bytes are
/// fetched and how hard to try.
#[derive(Clone)]
pub struct Backend {
    pub resolver:  Arc<dyn LocationResolver>,
    pub transport: Arc<dyn ChunkTransport>,
    pub retry:     RetryPolicy,
}

impl Backend {
    pub fn new(
        resolver: Arc<dyn LocationResolver>,
        transport: Arc<dyn ChunkTransport>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            resolver,
            transport,
            retry,
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Read handle over one stored logical file.
///
/// Holds an immutable snapshot of the chunk listing; every reader it hands
/// out shares that snapshot. Closing the handle closes all of them.
#[derive(Debug)]
pub struct ChunkedObject {
    total_size: u64,
    chunks:     Arc<[Chunk]>,
    backend:    Backend,
    cancel:     CancellationToken,
}

impl ChunkedObject {
    /// Build a handle from a listing; fails on an empty or inconsistent one.
    pub fn new(total_size: u64, chunks: impl Into<Arc<[Chunk]>>, backend: Backend) -> Result<Self> {
        let chunks = chunks.into();
        verify_chunks(&chunks, total_size)?;
        Ok(Self {
            total_size,
            chunks,
            backend,
            cancel: CancellationToken::new(),
        })
    }

    /// Load a file and its listing from the metadata store.
    pub async fn open(metadata: &dyn MetadataStore, id: FileId, backend: Backend) -> Result<Self> {
        let file = metadata
            .get_logical_file(id)
            .await
            .context(MetadataSnafu {
                operation: "get_logical_file",
            })?
            .filter(|file| !file.deleted)
            .context(FileNotFoundSnafu { id })?;
        let chunks = metadata.list_chunks(id).await.context(MetadataSnafu {
            operation: "list_chunks",
        })?;
        Self::new(file.total_size, chunks, backend)
    }

    #[must_use]
    pub const fn total_size(&self) -> u64 { self.total_size }

    #[must_use]
    pub fn chunks(&self) -> &[Chunk] { &self.chunks }

    /// Start reading `request`. Bounds are checked before any chunk is
    /// resolved; a zero-length request yields an already exhausted reader.
    pub fn range_read(&self, request: RangeRequest) -> Result<SegmentedReader> {
        ensure!(!self.cancel.is_cancelled(), ClosedSnafu);

        let range = request.resolve(self.total_size)?;
        let slices = if range.is_empty() {
            Vec::new()
        } else {
            map_range(&self.chunks, self.total_size, &request)?
        };
        info!(
            start = range.start,
            end = range.end,
            chunks = slices.len(),
            "range read"
        );
        Ok(SegmentedReader::new(
            self.chunks.clone(),
            slices,
            range,
            self.backend.clone(),
            self.cancel.child_token(),
        ))
    }

    /// Close the handle and every reader it spawned. Idempotent.
    pub fn close(&self) { self.cancel.cancel(); }

    #[must_use]
    pub fn is_closed(&self) -> bool { self.cancel.is_cancelled() }
}
