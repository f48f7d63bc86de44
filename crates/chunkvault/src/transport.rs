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

use std::{ops::Range, path::Path};

use async_trait::async_trait;
use reqwest::{
    Client, StatusCode,
    header::{ACCEPT, ACCEPT_ENCODING, HeaderMap, HeaderName, HeaderValue, RANGE},
};
use snafu::ResultExt;
use tracing::debug;

use crate::{
    body::{BoundedRead, FileRange, HttpBody, MemoryBody},
    config::TransportConfig,
    error::{ClientSnafu, ConfigurationSnafu, IoSnafu, NetworkSnafu, Result, TransportError},
    resolve::AccessLocation,
};

/// Opens a bounded read of `range` (relative to the object) at a resolved
/// location.
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    async fn open(
        &self,
        location: &AccessLocation,
        range: Range<u64>,
    ) -> Result<Box<dyn BoundedRead>, TransportError>;
}

/// Ranged GETs over a client built once from [`TransportConfig`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                ConfigurationSnafu {
                    message: format!("invalid header name {name:?}: {e}"),
                }
                .build()
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                ConfigurationSnafu {
                    message: format!("invalid value for header {name}: {e}"),
                }
                .build()
            })?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .build()
            .context(ClientSnafu)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ChunkTransport for HttpTransport {
    async fn open(
        &self,
        location: &AccessLocation,
        range: Range<u64>,
    ) -> Result<Box<dyn BoundedRead>, TransportError> {
        if range.is_empty() {
            return Ok(Box::new(MemoryBody::default()));
        }

        let response = self
            .client
            .get(&location.url)
            .header(RANGE, format!("bytes={}-{}", range.start, range.end - 1))
            .send()
            .await
            .context(NetworkSnafu)?;

        let len = range.end - range.start;
        let status = response.status();
        debug!(status = status.as_u16(), start = range.start, end = range.end, "chunk response");
        match status {
            StatusCode::PARTIAL_CONTENT => Ok(Box::new(HttpBody::new(response, 0, len))),
            StatusCode::OK => Ok(Box::new(HttpBody::new(response, range.start, len))),
            _ => Err(TransportError::Status {
                status: status.as_u16(),
                url:    location.url.clone(),
            }),
        }
    }
}

/// Reads `file://` locations straight from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTransport;

#[async_trait]
impl ChunkTransport for FileTransport {
    async fn open(
        &self,
        location: &AccessLocation,
        range: Range<u64>,
    ) -> Result<Box<dyn BoundedRead>, TransportError> {
        let path = location.url.strip_prefix("file://").unwrap_or(&location.url);
        let body = FileRange::open(Path::new(path), range)
            .await
            .context(IoSnafu)?;
        Ok(Box::new(body))
    }
}
