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

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use snafu::{ResultExt, Snafu, ensure};
use tokio::{
    fs::{self, File},
    io::{AsyncWriteExt, BufWriter},
};
use tracing::debug;

use crate::{
    body::BoundedRead,
    error::{BoxedError, TransportError},
    hash::Sha256Hasher,
    planner::{ChunkStore, ChunkUpload},
    resolve::{AccessLocation, LocationResolver},
    types::{RemoteRef, StoredObject},
};

const COPY_SIZE: usize = 512 * 1024;

#[derive(Debug, Snafu)]
pub enum LocalStoreError {
    #[snafu(display("Failed to write object under {}: {source}", root.display()))]
    Write {
        root:   PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to read chunk {index}: {source}"))]
    ReadBody {
        index:  usize,
        source: TransportError,
    },

    #[snafu(display("Chunk {index} delivered {actual} bytes, expected {expected}"))]
    ShortBody {
        index:    usize,
        expected: u64,
        actual:   u64,
    },
}

/// Content-addressed object store on a local directory.
///
/// Each object is named by the SHA-256 of its bytes, which is also its
/// remote reference and checksum. Identical chunks are stored once.
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

    #[must_use]
    pub fn root(&self) -> &Path { &self.root }

    #[must_use]
    pub fn object_path(&self, remote_ref: &RemoteRef) -> PathBuf { self.root.join(remote_ref.as_str()) }

    async fn write_object(&self, mut upload: ChunkUpload) -> Result<StoredObject, LocalStoreError> {
        let root = &self.root;
        fs::create_dir_all(root).await.context(WriteSnafu { root })?;
        let temp = tempfile::Builder::new()
            .prefix(".incoming-")
            .tempfile_in(root)
            .context(WriteSnafu { root })?
            .into_temp_path();

        let file = File::create(&temp).await.context(WriteSnafu { root })?;
        let mut writer = BufWriter::with_capacity(COPY_SIZE, file);
        let mut hasher = Sha256Hasher::new();
        let mut written = 0_u64;
        while let Some(bytes) = upload
            .body
            .bounded_read(COPY_SIZE)
            .await
            .context(ReadBodySnafu {
                index: upload.index,
            })?
        {
            hasher.update(&bytes);
            writer.write_all(&bytes).await.context(WriteSnafu { root })?;
            written += bytes.len() as u64;
            #[allow(clippy::cast_precision_loss)]
            upload
                .progress
                .report(written as f64 / upload.len.max(1) as f64);
        }
        writer.flush().await.context(WriteSnafu { root })?;
        ensure!(
            written == upload.len,
            ShortBodySnafu {
                index:    upload.index,
                expected: upload.len,
                actual:   written,
            }
        );

        let remote_ref = RemoteRef::new(hasher.finalize_hex());
        let target = self.object_path(&remote_ref);
        if fs::try_exists(&target).await.unwrap_or(false) {
            debug!(%remote_ref, name = %upload.name, "object already stored");
        } else {
            temp.persist(&target)
                .map_err(|e| e.error)
                .context(WriteSnafu { root })?;
            debug!(%remote_ref, name = %upload.name, bytes = written, "object stored");
        }
        Ok(StoredObject {
            checksum: remote_ref.as_str().to_string(),
            remote_ref,
        })
    }
}

#[async_trait]
impl ChunkStore for LocalDirStore {
    async fn store_chunk(&self, upload: ChunkUpload) -> Result<StoredObject, BoxedError> {
        Ok(self.write_object(upload).await?)
    }
}

/// Locations are `file://` URLs into the store directory.
#[async_trait]
impl LocationResolver for LocalDirStore {
    async fn resolve(&self, remote_ref: &RemoteRef) -> Result<Option<AccessLocation>, BoxedError> {
        let path = self.object_path(remote_ref);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        Ok(Some(AccessLocation::new(format!("file://{}", path.display()))))
    }
}
