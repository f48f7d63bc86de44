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

use std::collections::HashMap;

use async_trait::async_trait;
use snafu::{OptionExt, Snafu, ensure};
use tokio::sync::RwLock;

use crate::{
    error::BoxedError,
    types::{Chunk, FileId, LogicalFile},
};

/// Persistence of logical files and their chunk records.
///
/// Inserts are independent of each other and of the chunk transfers; there
/// is no transaction spanning them.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn create_logical_file(&self, file: &LogicalFile) -> Result<FileId, BoxedError>;

    async fn create_chunks(&self, id: FileId, chunks: &[Chunk]) -> Result<(), BoxedError>;

    async fn get_logical_file(&self, id: FileId) -> Result<Option<LogicalFile>, BoxedError>;

    /// Non-deleted chunks of `id`, ordered by index.
    async fn list_chunks(&self, id: FileId) -> Result<Vec<Chunk>, BoxedError>;

    /// Mark the file deleted. Chunk records are left as they are.
    async fn soft_delete(&self, id: FileId) -> Result<(), BoxedError>;
}

#[derive(Debug, Snafu)]
pub enum MemoryStoreError {
    #[snafu(display("logical file {id} does not exist"))]
    UnknownFile { id: FileId },

    #[snafu(display("chunk {index} of file {id} already recorded"))]
    DuplicateChunk { id: FileId, index: usize },
}

#[derive(Debug, Default)]
struct Tables {
    next_id: u64,
    files:   HashMap<FileId, LogicalFile>,
    chunks:  HashMap<FileId, Vec<Chunk>>,
}

/// In-process [`MetadataStore`].
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    tables: RwLock<Tables>,
}

impl MemoryMetadataStore {
    #[must_use]
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn create_logical_file(&self, file: &LogicalFile) -> Result<FileId, BoxedError> {
        let mut tables = self.tables.write().await;
        tables.next_id += 1;
        let id = FileId(tables.next_id);
        tables.files.insert(id, file.clone());
        Ok(id)
    }

    async fn create_chunks(&self, id: FileId, chunks: &[Chunk]) -> Result<(), BoxedError> {
        let mut tables = self.tables.write().await;
        ensure!(tables.files.contains_key(&id), UnknownFileSnafu { id });
        let existing = tables.chunks.entry(id).or_default();
        for chunk in chunks {
            ensure!(
                existing.iter().all(|c| c.index != chunk.index),
                DuplicateChunkSnafu {
                    id,
                    index: chunk.index,
                }
            );
            existing.push(chunk.clone());
        }
        existing.sort_by_key(|c| c.index);
        Ok(())
    }

    async fn get_logical_file(&self, id: FileId) -> Result<Option<LogicalFile>, BoxedError> {
        Ok(self.tables.read().await.files.get(&id).cloned())
    }

    async fn list_chunks(&self, id: FileId) -> Result<Vec<Chunk>, BoxedError> {
        let tables = self.tables.read().await;
        Ok(tables
            .chunks
            .get(&id)
            .map(|chunks| chunks.iter().filter(|c| !c.deleted).cloned().collect())
            .unwrap_or_default())
    }

    async fn soft_delete(&self, id: FileId) -> Result<(), BoxedError> {
        let mut tables = self.tables.write().await;
        let file = tables
            .files
            .get_mut(&id)
            .context(UnknownFileSnafu { id })?;
        file.deleted = true;
        Ok(())
    }
}
