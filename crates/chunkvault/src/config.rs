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

use std::{collections::HashMap, path::PathBuf, time::Duration};

use bon::Builder;
use chunkvault_base::readable_size::ReadableSize;
use chunkvault_common_telemetry::LoggingOptions;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::ensure;

use crate::{
    error::{ConfigurationSnafu, Result},
    layout::{DEFAULT_CHUNK_THRESHOLD, DEFAULT_MAX_CHUNK_SIZE},
};

/// Write path configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SmartDefault)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Size of every chunk but the last (default: 4.5GiB)
    #[default(ReadableSize(DEFAULT_MAX_CHUNK_SIZE))]
    pub max_chunk_size:    ReadableSize,
    /// Inputs at or above this size are chunked (default: 5GiB)
    #[default(ReadableSize(DEFAULT_CHUNK_THRESHOLD))]
    pub chunk_threshold:   ReadableSize,
    /// Where incoming streams are staged before planning
    #[default(std::env::temp_dir().join("chunkvault"))]
    pub staging_dir:       PathBuf,
    /// Copy buffer used while staging (default: 512KiB)
    #[default(ReadableSize::kb(512))]
    pub stage_buffer_size: ReadableSize,
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_chunk_size.as_bytes() > 0,
            ConfigurationSnafu {
                message: "max_chunk_size must be positive",
            }
        );
        ensure!(
            self.stage_buffer_size.as_bytes() > 0,
            ConfigurationSnafu {
                message: "stage_buffer_size must be positive",
            }
        );
        Ok(())
    }
}

/// HTTP transport configuration, built once into a shared client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SmartDefault, Builder)]
#[serde(default)]
pub struct TransportConfig {
    /// Ceiling on a single ranged request, body included (default: 30m)
    #[default(Duration::from_secs(30 * 60))]
    #[builder(default = Duration::from_secs(30 * 60))]
    #[serde(with = "humantime_serde")]
    pub timeout:         Duration,
    /// Connection establishment timeout (default: 30s)
    #[default(Duration::from_secs(30))]
    #[builder(default = Duration::from_secs(30))]
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[default(concat!("chunkvault/", env!("CARGO_PKG_VERSION")).to_string())]
    #[builder(default = concat!("chunkvault/", env!("CARGO_PKG_VERSION")).to_string())]
    pub user_agent:      String,
    /// Extra headers sent with every request
    #[builder(default)]
    pub headers:         HashMap<String, String>,
}

/// Bounds on chunk open retries and mid-body transfer failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SmartDefault, Builder)]
#[serde(default)]
pub struct RetryConfig {
    /// Resolve + open attempts per chunk entry (default: 3)
    #[default = 3]
    #[builder(default = 3)]
    pub max_attempts:          usize,
    /// Delay unit; attempt `n` waits `n * base_delay` (default: 1s)
    #[default(Duration::from_secs(1))]
    #[builder(default = Duration::from_secs(1))]
    #[serde(with = "humantime_serde")]
    pub base_delay:            Duration,
    /// Consecutive mid-body failures on one chunk before the read fails
    /// (default: 3)
    #[default = 3]
    #[builder(default = 3)]
    pub max_transfer_failures: usize,
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_attempts > 0,
            ConfigurationSnafu {
                message: "max_attempts must be at least 1",
            }
        );
        ensure!(
            self.max_transfer_failures > 0,
            ConfigurationSnafu {
                message: "max_transfer_failures must be at least 1",
            }
        );
        Ok(())
    }
}

/// Top-level configuration, usually loaded from a JSON file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VaultConfig {
    pub chunking:  ChunkingConfig,
    pub transport: TransportConfig,
    pub retry:     RetryConfig,
    pub logging:   LoggingOptions,
}

impl VaultConfig {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.retry.validate()
    }
}
