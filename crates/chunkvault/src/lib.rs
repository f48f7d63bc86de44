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

//! Very large files stored as bounded chunks on a size-capped object
//! backend, and read back through arbitrary byte ranges.
//!
//! The write path stages an input, cuts it into chunks with
//! [`ChunkPlanner`] and records the layout in a [`MetadataStore`]. The read
//! path opens a [`ChunkedObject`] over that layout and streams ranges with a
//! [`SegmentedReader`], resolving each chunk's short-lived location right
//! before it is fetched.

pub mod body;
pub mod config;
pub mod error;
pub mod hash;
pub mod layout;
pub mod metadata;
pub mod metrics;
pub mod object;
pub mod planner;
pub mod range;
pub mod reader;
pub mod resolve;
pub mod retry;
pub mod staging;
pub mod store;
pub mod transport;
pub mod types;

pub use body::{BoundedRead, FileRange, HttpBody, MemoryBody};
pub use config::{ChunkingConfig, RetryConfig, TransportConfig, VaultConfig};
pub use error::{BoxedError, Error, ErrorKind, Result, TransportError};
pub use layout::{ChunkBounds, ChunkLayout, plan, requires_chunking, verify_chunks};
pub use metadata::{MemoryMetadataStore, MetadataStore};
pub use object::{Backend, ChunkedObject};
pub use planner::{ChunkPlanner, ChunkProgress, ChunkStore, ChunkUpload, ProgressFn};
pub use range::{ChunkSlice, RangeLength, RangeRequest, map_range};
pub use reader::SegmentedReader;
pub use resolve::{AccessLocation, LocationResolver, UrlTemplateResolver};
pub use retry::RetryPolicy;
pub use staging::StagedSource;
pub use store::LocalDirStore;
pub use transport::{ChunkTransport, FileTransport, HttpTransport};
pub use types::{Chunk, FileId, LogicalFile, Manifest, RemoteRef, StoredObject, UploadedFile};
