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

//! Write path: stage, cut into chunks, store each, record the layout.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use jiff::Timestamp;
use snafu::{ResultExt, ensure};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::{
    body::FileRange,
    config::ChunkingConfig,
    error::{BoxedError, CancelledSnafu, ConfigurationSnafu, MetadataSnafu, Result, StorageSnafu},
    layout::{ChunkBounds, ChunkLayout, requires_chunking},
    metadata::MetadataStore,
    metrics,
    staging::StagedSource,
    types::{Chunk, FileId, LogicalFile, StoredObject, UploadedFile},
};

/// Receives overall upload progress in percent.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Progress reporter handed to the store for one chunk.
#[derive(Clone)]
pub struct ChunkProgress {
    index: usize,
    count: usize,
    sink:  Option<ProgressFn>,
}

impl ChunkProgress {
    #[must_use]
    pub fn new(index: usize, count: usize, sink: Option<ProgressFn>) -> Self {
        Self { index, count, sink }
    }

    /// Overall percentage once `fraction` of this chunk is stored.
    #[must_use]
    pub fn percent(&self, fraction: f64) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let (index, count) = (self.index as f64, self.count.max(1) as f64);
        (index + fraction.clamp(0.0, 1.0)) / count * 100.0
    }

    pub fn report(&self, fraction: f64) {
        if let Some(sink) = &self.sink {
            sink(self.percent(fraction));
        }
    }
}

impl fmt::Debug for ChunkProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkProgress")
            .field("index", &self.index)
            .field("count", &self.count)
            .finish_non_exhaustive()
    }
}

/// One bounded object to store.
#[derive(Debug)]
pub struct ChunkUpload {
    pub index:    usize,
    /// `"{file}.chunk{index}"`, or the bare file name for an unchunked file
    pub name:     String,
    pub len:      u64,
    pub body:     FileRange,
    pub progress: ChunkProgress,
}

/// Uploads one bounded object to the backend.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn store_chunk(&self, upload: ChunkUpload) -> Result<StoredObject, BoxedError>;
}

/// Splits uploads into chunks and records them.
///
/// Chunks are stored one after another; cancellation is honoured between
/// chunks. Nothing is rolled back on failure: objects stored before the
/// failing step stay behind for external cleanup.
pub struct ChunkPlanner {
    store:    Arc<dyn ChunkStore>,
    metadata: Arc<dyn MetadataStore>,
    config:   ChunkingConfig,
    progress: Option<ProgressFn>,
}

impl ChunkPlanner {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        metadata: Arc<dyn MetadataStore>,
        config: ChunkingConfig,
    ) -> Self {
        Self {
            store,
            metadata,
            config,
            progress: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Stage `reader` and store it, chunked when `size` reaches the
    /// configured threshold.
    #[instrument(skip_all, fields(name = name, size = size))]
    pub async fn plan_and_upload<R>(
        &self,
        name: &str,
        reader: R,
        size: u64,
        cancel: &CancellationToken,
    ) -> Result<UploadedFile>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.config.validate()?;
        let started = Timestamp::now();
        #[allow(clippy::cast_possible_truncation)]
        let buffer_size = self.config.stage_buffer_size.as_bytes() as usize;
        let staged =
            StagedSource::stage(reader, size, &self.config.staging_dir, buffer_size).await?;
        self.upload_source(name, &staged, cancel, started).await
    }

    /// Store an already seekable source, picking the chunked or single
    /// object path by size.
    pub async fn upload_staged(
        &self,
        name: &str,
        source: &StagedSource,
        cancel: &CancellationToken,
    ) -> Result<UploadedFile> {
        self.config.validate()?;
        self.upload_source(name, source, cancel, Timestamp::now())
            .await
    }

    async fn upload_source(
        &self,
        name: &str,
        source: &StagedSource,
        cancel: &CancellationToken,
        started: Timestamp,
    ) -> Result<UploadedFile> {
        if requires_chunking(source.len(), self.config.chunk_threshold.as_bytes()) {
            self.chunked(
                name,
                source,
                self.config.max_chunk_size.as_bytes(),
                cancel,
                started,
            )
            .await
        } else {
            self.single(name, source, cancel, started).await
        }
    }

    /// Store `source` as chunks of `max_chunk_size` bytes.
    pub async fn upload_chunked(
        &self,
        name: &str,
        source: &StagedSource,
        max_chunk_size: u64,
        cancel: &CancellationToken,
    ) -> Result<UploadedFile> {
        self.chunked(name, source, max_chunk_size, cancel, Timestamp::now())
            .await
    }

    async fn chunked(
        &self,
        name: &str,
        source: &StagedSource,
        max_chunk_size: u64,
        cancel: &CancellationToken,
        started: Timestamp,
    ) -> Result<UploadedFile> {
        ensure!(
            !source.is_empty(),
            ConfigurationSnafu {
                message: "a zero-length input cannot be chunked",
            }
        );
        let layout = ChunkLayout::new(source.len(), max_chunk_size)?;
        info!(
            name,
            size = source.len(),
            chunks = layout.chunk_count(),
            chunk_size = max_chunk_size,
            "uploading chunked file"
        );

        let bounds: Vec<ChunkBounds> = layout.bounds().collect();
        let chunks = self
            .store_chunks(name, source, &bounds, true, cancel)
            .await?;
        let file = LogicalFile {
            name:       name.to_string(),
            total_size: source.len(),
            chunk_size: max_chunk_size,
            chunked:    true,
            checksum:   source.checksum().map(ToString::to_string),
            deleted:    false,
        };
        self.record(file, chunks, started).await
    }

    /// Store `source` as one object, recorded as a single chunk.
    async fn single(
        &self,
        name: &str,
        source: &StagedSource,
        cancel: &CancellationToken,
        started: Timestamp,
    ) -> Result<UploadedFile> {
        info!(name, size = source.len(), "uploading single-object file");
        let bounds = [ChunkBounds {
            index: 0,
            start: 0,
            end:   source.len(),
        }];
        let chunks = self
            .store_chunks(name, source, &bounds, false, cancel)
            .await?;
        let file = LogicalFile {
            name:       name.to_string(),
            total_size: source.len(),
            chunk_size: source.len(),
            chunked:    false,
            checksum:   source.checksum().map(ToString::to_string),
            deleted:    false,
        };
        self.record(file, chunks, started).await
    }

    async fn store_chunks(
        &self,
        name: &str,
        source: &StagedSource,
        bounds: &[ChunkBounds],
        chunked: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Chunk>> {
        let total = bounds.len();
        let mut chunks = Vec::with_capacity(total);
        for b in bounds {
            ensure!(
                !cancel.is_cancelled(),
                CancelledSnafu {
                    completed: chunks.len(),
                    total,
                }
            );

            let progress = ChunkProgress::new(b.index, total, self.progress.clone());
            progress.report(0.0);
            let upload = ChunkUpload {
                index: b.index,
                name: if chunked {
                    format!("{name}.chunk{}", b.index)
                } else {
                    name.to_string()
                },
                len: b.len(),
                body: source.range(b.range()).await?,
                progress: progress.clone(),
            };
            debug!(chunk.index = b.index, start = b.start, end = b.end, "storing chunk");

            let stored = self
                .store
                .store_chunk(upload)
                .await
                .context(StorageSnafu { index: b.index })?;
            progress.report(1.0);
            metrics::CHUNKS_STORED.inc();
            metrics::BYTES_STORED.inc_by(b.len());
            info!(
                chunk.index = b.index,
                remote_ref = %stored.remote_ref,
                "chunk stored ({}/{total})",
                b.index + 1
            );

            chunks.push(Chunk {
                index:        b.index,
                start_offset: b.start,
                end_offset:   b.end,
                remote_ref:   stored.remote_ref,
                checksum:     stored.checksum,
                deleted:      false,
            });
        }
        Ok(chunks)
    }

    async fn record(
        &self,
        file: LogicalFile,
        chunks: Vec<Chunk>,
        started: Timestamp,
    ) -> Result<UploadedFile> {
        let id = self.insert_records(&file, &chunks).await.inspect_err(|err| {
            error!(
                name = %file.name,
                orphaned = chunks.len(),
                error = %err,
                "stored chunks left unrecorded"
            );
        })?;
        let duration = Timestamp::now() - started;
        info!(name = %file.name, id = %id, chunks = chunks.len(), ?duration, "upload recorded");
        Ok(UploadedFile {
            id,
            file,
            chunks,
            duration,
        })
    }

    async fn insert_records(&self, file: &LogicalFile, chunks: &[Chunk]) -> Result<FileId> {
        let id = self
            .metadata
            .create_logical_file(file)
            .await
            .context(MetadataSnafu {
                operation: "create_logical_file",
            })?;
        self.metadata
            .create_chunks(id, chunks)
            .await
            .context(MetadataSnafu {
                operation: "create_chunks",
            })?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chunkvault_base::readable_size::ReadableSize;

    use super::*;
    use crate::{
        body::BoundedRead,
        error::{Error, ErrorKind},
        metadata::MemoryMetadataStore,
        types::{FileId, RemoteRef},
    };

    /// Keeps stored objects in memory; can fail on one chunk index or
    /// cancel a token once a chunk is stored.
    #[derive(Default)]
    struct RecordingStore {
        objects:      Mutex<Vec<(String, Vec<u8>)>>,
        fail_on:      Option<usize>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    #[async_trait]
    impl ChunkStore for RecordingStore {
        async fn store_chunk(&self, mut upload: ChunkUpload) -> Result<StoredObject, BoxedError> {
            if self.fail_on == Some(upload.index) {
                return Err("backend rejected object".into());
            }
            let mut data = Vec::new();
            while let Some(bytes) = upload.body.bounded_read(3).await? {
                data.extend_from_slice(&bytes);
            }
            assert_eq!(data.len() as u64, upload.len);
            let remote_ref = RemoteRef::new(format!("obj-{}", upload.name));
            self.objects.lock().unwrap().push((upload.name, data));
            if let Some((index, token)) = &self.cancel_after {
                if *index == upload.index {
                    token.cancel();
                }
            }
            Ok(StoredObject {
                checksum: format!("sum-{}", upload.index),
                remote_ref,
            })
        }
    }

    struct FailingMetadata;

    #[async_trait]
    impl MetadataStore for FailingMetadata {
        async fn create_logical_file(&self, _file: &LogicalFile) -> Result<FileId, BoxedError> {
            Ok(FileId(1))
        }

        async fn create_chunks(&self, _id: FileId, _chunks: &[Chunk]) -> Result<(), BoxedError> {
            Err("metadata service unavailable".into())
        }

        async fn get_logical_file(&self, _id: FileId) -> Result<Option<LogicalFile>, BoxedError> {
            Ok(None)
        }

        async fn list_chunks(&self, _id: FileId) -> Result<Vec<Chunk>, BoxedError> {
            Ok(Vec::new())
        }

        async fn soft_delete(&self, _id: FileId) -> Result<(), BoxedError> { Ok(()) }
    }

    fn config(dir: &std::path::Path, max: u64, threshold: u64) -> ChunkingConfig {
        ChunkingConfig {
            max_chunk_size: ReadableSize(max),
            chunk_threshold: ReadableSize(threshold),
            staging_dir: dir.to_path_buf(),
            stage_buffer_size: ReadableSize(4),
        }
    }

    fn data(len: u8) -> Vec<u8> { (0..len).collect() }

    #[test]
    fn test_progress_percent() {
        let progress = ChunkProgress::new(1, 4, None);
        assert!((progress.percent(0.0) - 25.0).abs() < 1e-9);
        assert!((progress.percent(0.5) - 37.5).abs() < 1e-9);
        assert!((progress.percent(2.0) - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_chunked_upload_records_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordingStore::default());
        let metadata = Arc::new(MemoryMetadataStore::new());
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        let planner = ChunkPlanner::new(store.clone(), metadata.clone(), config(dir.path(), 4, 10))
            .with_progress(Arc::new(move |pct: f64| sink.lock().unwrap().push(pct)));

        let input = data(10);
        let uploaded = planner
            .plan_and_upload("big.bin", &input[..], 10, &CancellationToken::new())
            .await
            .unwrap();

        assert!(uploaded.file.chunked);
        assert_eq!(uploaded.file.chunk_size, 4);
        assert_eq!(uploaded.file.total_size, 10);
        assert!(uploaded.file.checksum.is_some());
        let ranges: Vec<_> = uploaded.chunks.iter().map(Chunk::logical_range).collect();
        assert_eq!(ranges, vec![0..4, 4..8, 8..10]);
        assert_eq!(uploaded.chunks[2].checksum, "sum-2");

        let objects = store.objects.lock().unwrap();
        let names: Vec<_> = objects.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["big.bin.chunk0", "big.bin.chunk1", "big.bin.chunk2"]);
        let joined: Vec<u8> = objects.iter().flat_map(|(_, d)| d.clone()).collect();
        assert_eq!(joined, input);

        let listed = metadata.list_chunks(uploaded.id).await.unwrap();
        assert_eq!(listed, uploaded.chunks);

        let reported = reported.lock().unwrap();
        assert!(reported.windows(2).all(|w| w[0] <= w[1]));
        assert!((reported.last().copied().unwrap() - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_below_threshold_is_single_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordingStore::default());
        let planner = ChunkPlanner::new(
            store.clone(),
            Arc::new(MemoryMetadataStore::new()),
            config(dir.path(), 4, 11),
        );

        let uploaded = planner
            .plan_and_upload("small.bin", &data(10)[..], 10, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!uploaded.file.chunked);
        assert_eq!(uploaded.file.chunk_size, 10);
        assert_eq!(uploaded.chunks.len(), 1);
        assert_eq!(uploaded.chunks[0].logical_range(), 0..10);
        assert_eq!(store.objects.lock().unwrap()[0].0, "small.bin");
    }

    #[tokio::test]
    async fn test_zero_length_chunked_upload_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let planner = ChunkPlanner::new(
            Arc::new(RecordingStore::default()),
            Arc::new(MemoryMetadataStore::new()),
            config(dir.path(), 4, 0),
        );
        let err = planner
            .plan_and_upload("empty", &b""[..], 0, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_zero_length_single_object() {
        let dir = tempfile::tempdir().unwrap();
        let planner = ChunkPlanner::new(
            Arc::new(RecordingStore::default()),
            Arc::new(MemoryMetadataStore::new()),
            config(dir.path(), 4, 10),
        );
        let uploaded = planner
            .plan_and_upload("empty", &b""[..], 0, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(uploaded.chunks.len(), 1);
        assert!(uploaded.chunks[0].is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordingStore {
            fail_on: Some(1),
            ..Default::default()
        });
        let metadata = Arc::new(MemoryMetadataStore::new());
        let planner = ChunkPlanner::new(store.clone(), metadata.clone(), config(dir.path(), 4, 1));

        let err = planner
            .plan_and_upload("f", &data(10)[..], 10, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage { index: 1, .. }));
        assert_eq!(store.objects.lock().unwrap().len(), 1);
        assert!(metadata.get_logical_file(FileId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_between_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let store = Arc::new(RecordingStore {
            cancel_after: Some((0, token.clone())),
            ..Default::default()
        });
        let planner = ChunkPlanner::new(
            store.clone(),
            Arc::new(MemoryMetadataStore::new()),
            config(dir.path(), 4, 1),
        );

        let err = planner
            .plan_and_upload("f", &data(10)[..], 10, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled {
            completed: 1,
            total:     3,
        }));
        assert_eq!(store.objects.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_metadata_failure_orphans_objects() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordingStore::default());
        let planner = ChunkPlanner::new(store.clone(), Arc::new(FailingMetadata), config(dir.path(), 4, 1));

        let err = planner
            .plan_and_upload("f", &data(10)[..], 10, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Metadata {
            operation: "create_chunks",
            ..
        }));
        assert_eq!(store.objects.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_upload_chunked_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.bin");
        tokio::fs::write(&path, data(9)).await.unwrap();
        let source = StagedSource::from_path(&path).await.unwrap();

        let planner = ChunkPlanner::new(
            Arc::new(RecordingStore::default()),
            Arc::new(MemoryMetadataStore::new()),
            config(dir.path(), 4, 100),
        );
        let uploaded = planner
            .upload_chunked("input.bin", &source, 3, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(uploaded.chunks.len(), 3);
        assert_eq!(uploaded.file.chunk_size, 3);
        assert!(uploaded.file.checksum.is_none());
        assert!(path.exists());
    }
}
