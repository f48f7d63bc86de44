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

use std::any::Any;

use chunkvault_error::{ErrorExt, StatusCode};
use snafu::Snafu;
use strum_macros::Display;

use crate::types::FileId;

/// Error type returned by external collaborators (resolver, stores).
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure of a single remote byte transfer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransportError {
    #[snafu(display("Network error: {source}"))]
    Network { source: reqwest::Error },

    #[snafu(display("HTTP error {status} for URL: {url}"))]
    Status { status: u16, url: String },

    #[snafu(display("Body ended after {received} of {expected} bytes"))]
    Truncated { received: u64, expected: u64 },

    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },
}

/// Broad class of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Resolution,
    Transfer,
    Range,
    Storage,
    Metadata,
    Cancelled,
    Closed,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Invalid configuration: {message}"))]
    Configuration { message: String },

    #[snafu(display("Failed to build HTTP client: {source}"))]
    Client { source: reqwest::Error },

    #[snafu(display("Failed to resolve location of chunk {index} after {attempts} attempts"))]
    Resolution {
        index:    usize,
        attempts: usize,
        source:   BoxedError,
    },

    #[snafu(display("Chunk {index} has no stored object"))]
    MissingObject { index: usize },

    #[snafu(display(
        "Failed to open chunk {index} bytes {start}..{end} after {attempts} attempts"
    ))]
    Open {
        index:    usize,
        attempts: usize,
        start:    u64,
        end:      u64,
        source:   TransportError,
    },

    #[snafu(display(
        "Transfer of chunk {index} interrupted at logical offset {offset} (failure {failures} of \
         {limit})"
    ))]
    Transfer {
        index:    usize,
        offset:   u64,
        failures: usize,
        limit:    usize,
        source:   TransportError,
    },

    #[snafu(display("Invalid range start={start} length={length} for file of {total_size} bytes"))]
    InvalidRange {
        start:      i64,
        length:     String,
        total_size: u64,
    },

    #[snafu(display("Malformed range header {header:?}"))]
    RangeHeader { header: String },

    #[snafu(display(
        "No chunks found for range {start}..{end} (file size: {total_size}, total chunks: \
         {chunk_count})"
    ))]
    NoChunksForRange {
        start:       u64,
        end:         u64,
        total_size:  u64,
        chunk_count: usize,
    },

    #[snafu(display("Chunk listing is empty"))]
    EmptyListing,

    #[snafu(display("Chunk layout corrupted: {message}"))]
    LayoutCorrupted { message: String },

    #[snafu(display("Failed to store chunk {index}"))]
    Storage { index: usize, source: BoxedError },

    #[snafu(display("Metadata operation {operation} failed"))]
    Metadata {
        operation: &'static str,
        source:    BoxedError,
    },

    #[snafu(display("Logical file {id} not found"))]
    FileNotFound { id: FileId },

    #[snafu(display("Failed to stage input: {source}"))]
    Staging { source: std::io::Error },

    #[snafu(display("Input size mismatch: declared {declared} bytes, received {actual}"))]
    SizeMismatch { declared: u64, actual: u64 },

    #[snafu(display("Upload cancelled after {completed} of {total} chunks"))]
    Cancelled { completed: usize, total: usize },

    #[snafu(display("Reader closed"))]
    Closed,

    #[snafu(display("Reader failed permanently on chunk {index}"))]
    ReaderFailed { index: usize },

    #[snafu(display("Failed to write output: {source}"))]
    Output { source: std::io::Error },
}

impl Error {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. }
            | Self::Client { .. }
            | Self::SizeMismatch { .. }
            | Self::Staging { .. } => ErrorKind::Configuration,
            Self::Resolution { .. } | Self::MissingObject { .. } => ErrorKind::Resolution,
            Self::Open { .. }
            | Self::Transfer { .. }
            | Self::ReaderFailed { .. }
            | Self::Output { .. } => ErrorKind::Transfer,
            Self::InvalidRange { .. }
            | Self::RangeHeader { .. }
            | Self::NoChunksForRange { .. }
            | Self::EmptyListing
            | Self::LayoutCorrupted { .. } => ErrorKind::Range,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Metadata { .. } | Self::FileNotFound { .. } => ErrorKind::Metadata,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Closed => ErrorKind::Closed,
        }
    }

    /// A transfer failure the reader will recover from on its next read.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transfer { failures, limit, .. } if *failures < *limit)
    }
}

impl ErrorExt for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::FileNotFound { .. } | Self::MissingObject { .. } => StatusCode::NotFound,
            Self::Staging { .. } | Self::Output { .. } => StatusCode::Internal,
            _ => match self.kind() {
                ErrorKind::Configuration => StatusCode::InvalidArgument,
                ErrorKind::Range => StatusCode::RangeNotSatisfiable,
                ErrorKind::Resolution | ErrorKind::Transfer => StatusCode::Unavailable,
                ErrorKind::Storage | ErrorKind::Metadata => StatusCode::StorageFailure,
                ErrorKind::Cancelled | ErrorKind::Closed => StatusCode::Cancelled,
            },
        }
    }

    fn as_any(&self) -> &dyn Any { self }
}
