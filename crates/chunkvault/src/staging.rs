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

use std::{
    ops::Range,
    path::{Path, PathBuf},
};

use snafu::{ResultExt, ensure};
use tempfile::TempPath;
use tokio::{
    fs::{self, File},
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter},
};
use tracing::debug;

use crate::{
    body::FileRange,
    error::{Result, SizeMismatchSnafu, StagingSnafu},
    hash::Sha256Hasher,
};

/// Seekable copy of an upload's content.
///
/// Chunks are cut from it by offset, so forward-only inputs are copied here
/// first. A staged temp file is removed when the value is dropped.
#[derive(Debug)]
pub struct StagedSource {
    path:     PathBuf,
    len:      u64,
    checksum: Option<String>,
    _temp:    Option<TempPath>,
}

impl StagedSource {
    /// Copy `reader` into a temp file under `dir`, hashing on the way. The
    /// copy must be exactly `declared_size` bytes long.
    pub async fn stage<R>(
        mut reader: R,
        declared_size: u64,
        dir: &Path,
        buffer_size: usize,
    ) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send,
    {
        fs::create_dir_all(dir).await.context(StagingSnafu)?;
        let (file, temp) = tempfile::Builder::new()
            .prefix("chunkvault-stage-")
            .tempfile_in(dir)
            .context(StagingSnafu)?
            .into_parts();

        let mut writer = BufWriter::with_capacity(buffer_size, File::from_std(file));
        let mut hasher = Sha256Hasher::new();
        let mut buf = vec![0_u8; buffer_size.max(1)];
        let mut len = 0_u64;
        loop {
            let n = reader.read(&mut buf).await.context(StagingSnafu)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            writer.write_all(&buf[..n]).await.context(StagingSnafu)?;
            len += n as u64;
        }
        writer.flush().await.context(StagingSnafu)?;
        writer.get_mut().sync_all().await.context(StagingSnafu)?;

        ensure!(
            len == declared_size,
            SizeMismatchSnafu {
                declared: declared_size,
                actual:   len,
            }
        );

        let checksum = hasher.finalize_hex();
        debug!(path = %temp.display(), len, %checksum, "input staged");
        Ok(Self {
            path: temp.to_path_buf(),
            len,
            checksum: Some(checksum),
            _temp: Some(temp),
        })
    }

    /// Use an existing file in place. It is neither copied nor removed.
    pub async fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let len = fs::metadata(&path).await.context(StagingSnafu)?.len();
        Ok(Self {
            path,
            len,
            checksum: None,
            _temp: None,
        })
    }

    #[must_use]
    pub const fn len(&self) -> u64 { self.len }

    #[must_use]
    pub const fn is_empty(&self) -> bool { self.len == 0 }

    #[must_use]
    pub fn path(&self) -> &Path { &self.path }

    /// SHA-256 of the content, known for staged copies.
    #[must_use]
    pub fn checksum(&self) -> Option<&str> { self.checksum.as_deref() }

    /// Bounded read over `range` of the content.
    pub async fn range(&self, range: Range<u64>) -> Result<FileRange> {
        FileRange::open(&self.path, range).await.context(StagingSnafu)
    }
}
