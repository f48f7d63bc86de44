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

//! Bounded retries around "resolve location" and "open remote read".

use std::{
    ops::Range,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use backon::{BackoffBuilder, Retryable};
use jiff::Timestamp;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{instrument, warn};

use crate::{
    body::BoundedRead,
    config::RetryConfig,
    error::{BoxedError, Error, Result, TransportError},
    metrics,
    object::Backend,
    types::Chunk,
};

/// How hard to try before a chunk read is declared failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Resolve + open attempts per chunk entry
    pub max_attempts:          usize,
    /// Attempt `n` is preceded by a delay of `n * base_delay`
    pub base_delay:            Duration,
    /// Consecutive mid-body failures on one chunk before giving up
    pub max_transfer_failures: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self { Self::from(&RetryConfig::default()) }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts:          config.max_attempts.max(1),
            base_delay:            config.base_delay,
            max_transfer_failures: config.max_transfer_failures.max(1),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn backoff(&self) -> LinearBuilder {
        LinearBuilder {
            base:      self.base_delay,
            max_times: self.max_attempts.saturating_sub(1),
        }
    }
}

/// Backoff whose `n`-th delay is `n * base`.
#[derive(Debug, Clone, Copy)]
pub struct LinearBuilder {
    base:      Duration,
    max_times: usize,
}

impl BackoffBuilder for LinearBuilder {
    type Backoff = LinearBackoff;

    fn build(self) -> Self::Backoff {
        LinearBackoff {
            base:      self.base,
            attempt:   0,
            max_times: self.max_times,
        }
    }
}

#[derive(Debug)]
pub struct LinearBackoff {
    base:      Duration,
    attempt:   usize,
    max_times: usize,
}

impl Iterator for LinearBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_times {
            return None;
        }
        self.attempt += 1;
        let factor = u32::try_from(self.attempt).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor))
    }
}

/// Failure of one resolve + open attempt.
#[derive(Debug, Snafu)]
enum AttemptError {
    #[snafu(display("resolve failed: {source}"))]
    Resolve { source: BoxedError },
    #[snafu(display("no object behind the remote reference"))]
    Missing,
    #[snafu(display("open failed: {source}"))]
    Open { source: TransportError },
}

impl AttemptError {
    const fn step(&self) -> &'static str {
        match self {
            Self::Resolve { .. } | Self::Missing => "resolve",
            Self::Open { .. } => "open",
        }
    }
}

/// Resolve a fresh location for `chunk` and open `range` of it, retrying
/// with linear backoff. A chunk whose record holds no object fails at once.
#[instrument(skip_all, fields(chunk.index = chunk.index, start = range.start, end = range.end))]
pub(crate) async fn open_chunk(
    backend: &Backend,
    chunk: &Chunk,
    range: Range<u64>,
) -> Result<Box<dyn BoundedRead>> {
    let attempts = AtomicUsize::new(0);

    let attempt = || async {
        attempts.fetch_add(1, Ordering::Relaxed);
        let location = backend
            .resolver
            .resolve(&chunk.remote_ref)
            .await
            .context(ResolveSnafu)?
            .context(MissingSnafu)?;
        if location.is_expired_at(Timestamp::now()) {
            let source: BoxedError =
                format!("location for {} already expired", chunk.remote_ref).into();
            return Err(source).context(ResolveSnafu);
        }
        backend
            .transport
            .open(&location, range.clone())
            .await
            .context(OpenSnafu)
    };

    let result = attempt
        .retry(backend.retry.backoff())
        .when(|e| !matches!(e, AttemptError::Missing))
        .notify(|err: &AttemptError, delay: Duration| {
            metrics::CHUNK_OPEN_RETRIES
                .with_label_values(&[err.step()])
                .inc();
            warn!(
                attempt = attempts.load(Ordering::Relaxed),
                delay = ?delay,
                error = %err,
                "chunk open failed, retrying"
            );
        })
        .await;

    let attempts = attempts.load(Ordering::Relaxed);
    result.map_err(|err| match err {
        AttemptError::Resolve { source } => Error::Resolution {
            index: chunk.index,
            attempts,
            source,
        },
        AttemptError::Missing => Error::MissingObject { index: chunk.index },
        AttemptError::Open { source } => Error::Open {
            index: chunk.index,
            attempts,
            start: range.start,
            end: range.end,
            source,
        },
    })
}
