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

use std::{any::Any, path::PathBuf};

use chunkvault_error::{ErrorExt, StatusCode};
use snafu::Snafu;

pub type Result<T, E = CliError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("Failed to read {}", path.display()))]
    ReadFile {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to write {}", path.display()))]
    WriteFile {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Invalid JSON in {}", path.display()))]
    Json {
        path:   PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("Failed to encode manifest"))]
    EncodeManifest { source: serde_json::Error },

    #[snafu(display("Interrupted"))]
    Interrupted,

    #[snafu(transparent)]
    Vault { source: chunkvault::Error },
}

impl ErrorExt for CliError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ReadFile { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                StatusCode::NotFound
            }
            Self::Json { .. } => StatusCode::InvalidArgument,
            Self::ReadFile { .. } | Self::WriteFile { .. } | Self::EncodeManifest { .. } => {
                StatusCode::Internal
            }
            Self::Interrupted => StatusCode::Cancelled,
            Self::Vault { source } => source.status_code(),
        }
    }

    fn as_any(&self) -> &dyn Any { self }
}
