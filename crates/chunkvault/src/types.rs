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

use std::{fmt, ops::Range};

use bon::Builder;
use jiff::Span;
use serde::{Deserialize, Serialize};

/// Identifier assigned to a logical file by the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Opaque handle naming one stored remote object.
///
/// It is not itself fetchable: a `LocationResolver` turns it into a
/// short-lived `AccessLocation` right before each transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteRef(String);

impl RemoteRef {
    pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }

    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// The user-visible file, possibly larger than the backend's object limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct LogicalFile {
    #[builder(into)]
    pub name:       String,
    /// Total size in bytes
    pub total_size: u64,
    /// Nominal size of every chunk but the last; equals `total_size` for an
    /// unchunked file
    pub chunk_size: u64,
    /// `false` when the file is stored as a single remote object
    pub chunked:    bool,
    /// Lowercase hex SHA-256 of the whole content, when known
    pub checksum:   Option<String>,
    #[serde(default)]
    #[builder(default)]
    pub deleted:    bool,
}

/// One stored remote object holding `[start_offset, end_offset)` of a logical
/// file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 0-based, dense position within the file
    pub index:        usize,
    /// First logical byte (inclusive)
    pub start_offset: u64,
    /// Last logical byte (exclusive)
    pub end_offset:   u64,
    pub remote_ref:   RemoteRef,
    /// Content checksum reported by the chunk store
    pub checksum:     String,
    #[serde(default)]
    pub deleted:      bool,
}

impl Chunk {
    #[must_use]
    pub const fn len(&self) -> u64 { self.end_offset - self.start_offset }

    #[must_use]
    pub const fn is_empty(&self) -> bool { self.start_offset == self.end_offset }

    #[must_use]
    pub const fn logical_range(&self) -> Range<u64> { self.start_offset..self.end_offset }
}

/// What the chunk store hands back for one uploaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub remote_ref: RemoteRef,
    pub checksum:   String,
}

/// Outcome of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Id assigned by the metadata store
    pub id:       FileId,
    pub file:     LogicalFile,
    /// Chunk records in index order
    pub chunks:   Vec<Chunk>,
    /// Wall time spent staging and storing
    pub duration: Span,
}

/// A logical file together with its chunk listing, as persisted by the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub file:   LogicalFile,
    pub chunks: Vec<Chunk>,
}
