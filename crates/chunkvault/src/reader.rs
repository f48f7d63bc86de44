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

//! Sequential reader over the chunks of one range request.

use std::{collections::VecDeque, ops::Range, sync::Arc};

use bytes::Bytes;
use futures::Stream;
use snafu::{IntoError, OptionExt, ResultExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    body::BoundedRead,
    error::{
        ClosedSnafu, Error, LayoutCorruptedSnafu, OutputSnafu, ReaderFailedSnafu, Result,
        TransferSnafu, TransportError,
    },
    metrics,
    object::Backend,
    range::ChunkSlice,
    retry::open_chunk,
    types::Chunk,
};

/// Largest piece handed out by [`SegmentedReader::copy_to`] and
/// [`SegmentedReader::into_stream`].
pub const DEFAULT_READ_SIZE: usize = 256 * 1024;

enum ReaderState {
    /// The front slice has to be resolved and opened
    NeedNextChunk,
    /// The front slice is open
    Streaming(Box<dyn BoundedRead>),
    /// Every requested byte has been delivered
    Exhausted,
    /// Retries for the given chunk ran out
    Failed { index: usize },
    Closed,
}

impl ReaderState {
    const fn name(&self) -> &'static str {
        match self {
            Self::NeedNextChunk => "need_next_chunk",
            Self::Streaming(_) => "streaming",
            Self::Exhausted => "exhausted",
            Self::Failed { .. } => "failed",
            Self::Closed => "closed",
        }
    }
}

/// Delivers one logical byte range as a single ordered stream, opening one
/// chunk at a time.
///
/// A chunk is resolved only once the previous one has been fully delivered.
/// When a transfer breaks mid-chunk the read returns a retryable
/// [`Error::Transfer`]; the next read reopens the same chunk starting right
/// after the last delivered byte, so nothing is repeated or skipped.
///
/// Not meant for concurrent use; each range request gets its own reader.
pub struct SegmentedReader {
    chunks:            Arc<[Chunk]>,
    slices:            VecDeque<ChunkSlice>,
    backend:           Backend,
    cancel:            CancellationToken,
    state:             ReaderState,
    start:             u64,
    requested:         u64,
    delivered:         u64,
    /// Bytes of the front slice already delivered
    chunk_delivered:   u64,
    /// Consecutive failures on the front slice without progress
    transfer_failures: usize,
}

impl std::fmt::Debug for SegmentedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentedReader")
            .field("state", &self.state.name())
            .field("start", &self.start)
            .field("requested", &self.requested)
            .field("delivered", &self.delivered)
            .field("pending_chunks", &self.slices.len())
            .finish_non_exhaustive()
    }
}

impl SegmentedReader {
    pub(crate) fn new(
        chunks: Arc<[Chunk]>,
        slices: Vec<ChunkSlice>,
        range: Range<u64>,
        backend: Backend,
        cancel: CancellationToken,
    ) -> Self {
        let state = if range.is_empty() || slices.is_empty() {
            ReaderState::Exhausted
        } else {
            ReaderState::NeedNextChunk
        };
        Self {
            chunks,
            slices: slices.into(),
            backend,
            cancel,
            state,
            start: range.start,
            requested: range.end - range.start,
            delivered: 0,
            chunk_delivered: 0,
            transfer_failures: 0,
        }
    }

    /// Logical offset of the next byte to be delivered.
    #[must_use]
    pub const fn position(&self) -> u64 { self.start + self.delivered }

    /// Bytes of the request not yet delivered.
    #[must_use]
    pub const fn remaining(&self) -> u64 { self.requested - self.delivered }

    #[must_use]
    pub const fn is_exhausted(&self) -> bool { matches!(self.state, ReaderState::Exhausted) }

    /// Next bytes of the range, at most `max`. `Ok(None)` at the end of the
    /// range, and on every read after that.
    pub async fn next_bytes(&mut self, max: usize) -> Result<Option<Bytes>> {
        loop {
            if self.cancel.is_cancelled() && !self.is_exhausted() {
                self.release().await;
                self.state = ReaderState::Closed;
            }

            match &mut self.state {
                ReaderState::Exhausted => return Ok(None),
                ReaderState::Closed => return ClosedSnafu.fail(),
                ReaderState::Failed { index } => {
                    return ReaderFailedSnafu { index: *index }.fail();
                }
                ReaderState::NeedNextChunk => self.open_front().await?,
                ReaderState::Streaming(body) => {
                    #[allow(clippy::cast_possible_truncation)]
                    let want = (self.requested - self.delivered).min(max.max(1) as u64) as usize;
                    let read = tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => continue,
                        read = body.bounded_read(want) => read,
                    };
                    match read {
                        Ok(Some(bytes)) if bytes.is_empty() => {}
                        Ok(Some(bytes)) => {
                            let n = bytes.len() as u64;
                            self.delivered += n;
                            self.chunk_delivered += n;
                            self.transfer_failures = 0;
                            metrics::READER_BYTES_DELIVERED.inc_by(n);
                            return Ok(Some(bytes));
                        }
                        Ok(None) => {
                            body.close().await;
                            let expected = self.slices.front().map_or(0, ChunkSlice::len);
                            if self.chunk_delivered < expected {
                                return Err(self.transfer_failed(TransportError::Truncated {
                                    received: self.chunk_delivered,
                                    expected,
                                }));
                            }
                            self.advance();
                        }
                        Err(source) => {
                            body.close().await;
                            return Err(self.transfer_failed(source));
                        }
                    }
                }
            }
        }
    }

    /// Fill `buf` with the next bytes of the range; `Ok(0)` at the end.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        Ok(match self.next_bytes(buf.len()).await? {
            Some(bytes) => {
                buf[..bytes.len()].copy_from_slice(&bytes);
                bytes.len()
            }
            None => 0,
        })
    }

    /// Next bytes, riding over retryable transfer failures.
    async fn next_bytes_retrying(&mut self, max: usize) -> Result<Option<Bytes>> {
        loop {
            match self.next_bytes(max).await {
                Err(err) if err.is_retryable() => {
                    warn!(error = %err, position = self.position(), "resuming interrupted transfer");
                }
                other => return other,
            }
        }
    }

    /// Copy the rest of the range into `writer`, returning the number of
    /// bytes written.
    pub async fn copy_to<W>(&mut self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut written = 0;
        while let Some(bytes) = self.next_bytes_retrying(DEFAULT_READ_SIZE).await? {
            writer.write_all(&bytes).await.context(OutputSnafu)?;
            written += bytes.len() as u64;
        }
        writer.flush().await.context(OutputSnafu)?;
        Ok(written)
    }

    /// The rest of the range as a stream of byte pieces. Transient transfer
    /// failures are retried; the stream ends after the first fatal error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes>> + Send {
        futures::stream::try_unfold(self, |mut reader| async move {
            let next = reader.next_bytes_retrying(DEFAULT_READ_SIZE).await?;
            Ok(next.map(|bytes| (bytes, reader)))
        })
    }

    /// Release the open remote read, if any. Safe in every state; reads
    /// after `close` fail with [`Error::Closed`].
    pub async fn close(&mut self) {
        self.release().await;
        self.state = ReaderState::Closed;
    }

    async fn release(&mut self) {
        if let ReaderState::Streaming(body) = &mut self.state {
            body.close().await;
        }
    }

    async fn open_front(&mut self) -> Result<()> {
        let Some(slice) = self.slices.front() else {
            self.state = ReaderState::Exhausted;
            return Ok(());
        };
        let index = slice.index;
        let chunk = self
            .chunks
            .get(index)
            .context(LayoutCorruptedSnafu {
                message: format!("slice refers to missing chunk {index}"),
            })?
            .clone();
        let range = slice.range.start + self.chunk_delivered..slice.range.end;
        debug!(
            chunk.index = index,
            start = range.start,
            end = range.end,
            "opening chunk"
        );

        let opened = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Ok(()),
            opened = open_chunk(&self.backend, &chunk, range) => opened,
        };
        match opened {
            Ok(body) => {
                self.state = ReaderState::Streaming(body);
                Ok(())
            }
            Err(err) => {
                error!(chunk.index = index, error = %err, "chunk could not be opened");
                self.state = ReaderState::Failed { index };
                Err(err)
            }
        }
    }

    /// The front slice was fully delivered.
    fn advance(&mut self) {
        if let Some(done) = self.slices.pop_front() {
            debug!(chunk.index = done.index, "chunk complete");
        }
        self.chunk_delivered = 0;
        self.transfer_failures = 0;
        self.state = if self.slices.is_empty() || self.delivered == self.requested {
            ReaderState::Exhausted
        } else {
            ReaderState::NeedNextChunk
        };
    }

    fn transfer_failed(&mut self, source: TransportError) -> Error {
        metrics::TRANSFER_FAILURES.inc();
        self.transfer_failures += 1;
        let index = self.slices.front().map_or(0, |slice| slice.index);
        let limit = self.backend.retry.max_transfer_failures;
        let err = TransferSnafu {
            index,
            offset: self.position(),
            failures: self.transfer_failures,
            limit,
        }
        .into_error(source);

        if self.transfer_failures >= limit {
            error!(chunk.index = index, error = %err, "giving up on chunk");
            self.state = ReaderState::Failed { index };
        } else {
            warn!(chunk.index = index, error = %err, "chunk transfer interrupted");
            self.state = ReaderState::NeedNextChunk;
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use async_trait::async_trait;
    use futures::TryStreamExt;

    use super::*;
    use crate::{
        body::MemoryBody,
        error::BoxedError,
        object::ChunkedObject,
        range::RangeRequest,
        resolve::{AccessLocation, LocationResolver},
        retry::RetryPolicy,
        transport::ChunkTransport,
        types::RemoteRef,
    };

    const TOTAL: u64 = 20;
    const CHUNK: u64 = 8;

    fn content() -> Vec<u8> { (0..TOTAL).map(|i| u8::try_from(i).unwrap()).collect() }

    #[derive(Debug, Clone, Copy)]
    enum Fault {
        FailOpen,
        BreakAfter(usize),
        /// Ends cleanly after this many bytes
        Short(usize),
    }

    #[derive(Default)]
    struct Resolver {
        resolved: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LocationResolver for Resolver {
        async fn resolve(
            &self,
            remote_ref: &RemoteRef,
        ) -> Result<Option<AccessLocation>, BoxedError> {
            self.resolved.lock().unwrap().push(remote_ref.to_string());
            Ok(Some(AccessLocation::new(remote_ref.as_str())))
        }
    }

    /// Yields `data` up to `fail_after` bytes, then breaks.
    struct BrokenBody {
        data:       Bytes,
        fail_after: usize,
    }

    #[async_trait]
    impl BoundedRead for BrokenBody {
        async fn bounded_read(&mut self, max: usize) -> Result<Option<Bytes>, TransportError> {
            if self.fail_after == 0 {
                return Err(TransportError::Truncated {
                    received: 0,
                    expected: self.data.len() as u64,
                });
            }
            let n = max.min(self.fail_after).min(self.data.len());
            self.fail_after -= n;
            Ok(Some(self.data.split_to(n)))
        }

        fn remaining(&self) -> u64 { self.data.len() as u64 }
    }

    #[derive(Default)]
    struct Transport {
        objects: HashMap<String, Bytes>,
        faults:  Mutex<HashMap<String, Vec<Fault>>>,
        opened:  Mutex<Vec<(String, Range<u64>)>>,
    }

    #[async_trait]
    impl ChunkTransport for Transport {
        async fn open(
            &self,
            location: &AccessLocation,
            range: Range<u64>,
        ) -> Result<Box<dyn BoundedRead>, TransportError> {
            self.opened
                .lock()
                .unwrap()
                .push((location.url.clone(), range.clone()));
            #[allow(clippy::cast_possible_truncation)]
            let data = self.objects[&location.url].slice(range.start as usize..range.end as usize);
            let fault = self
                .faults
                .lock()
                .unwrap()
                .get_mut(&location.url)
                .and_then(|faults| (!faults.is_empty()).then(|| faults.remove(0)));
            match fault {
                None => Ok(Box::new(MemoryBody::new(data))),
                Some(Fault::FailOpen) => Err(TransportError::Status {
                    status: 503,
                    url:    location.url.clone(),
                }),
                Some(Fault::BreakAfter(fail_after)) => {
                    Ok(Box::new(BrokenBody { data, fail_after }))
                }
                Some(Fault::Short(len)) => Ok(Box::new(MemoryBody::new(data.slice(..len)))),
            }
        }
    }

    struct Fixture {
        object:    ChunkedObject,
        resolver:  Arc<Resolver>,
        transport: Arc<Transport>,
    }

    fn fixture(faults: &[(&str, Fault)]) -> Fixture {
        let data = content();
        let mut chunks = Vec::new();
        let mut objects = HashMap::new();
        for b in crate::layout::plan(TOTAL, CHUNK).unwrap() {
            let name = format!("c{}", b.index);
            #[allow(clippy::cast_possible_truncation)]
            objects.insert(
                name.clone(),
                Bytes::copy_from_slice(&data[b.start as usize..b.end as usize]),
            );
            chunks.push(Chunk {
                index:        b.index,
                start_offset: b.start,
                end_offset:   b.end,
                remote_ref:   RemoteRef::new(name),
                checksum:     String::new(),
                deleted:      false,
            });
        }
        let mut fault_map: HashMap<String, Vec<Fault>> = HashMap::new();
        for (name, fault) in faults {
            fault_map.entry((*name).to_string()).or_default().push(*fault);
        }

        let resolver = Arc::new(Resolver::default());
        let transport = Arc::new(Transport {
            objects,
            faults: Mutex::new(fault_map),
            opened: Mutex::default(),
        });
        let backend = Backend::new(resolver.clone(), transport.clone(), RetryPolicy {
            max_attempts:          3,
            base_delay:            Duration::from_millis(1),
            max_transfer_failures: 3,
        });
        Fixture {
            object: ChunkedObject::new(TOTAL, chunks, backend).unwrap(),
            resolver,
            transport,
        }
    }

    async fn read_all(reader: &mut SegmentedReader, max: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(bytes) = reader.next_bytes(max).await? {
            out.extend_from_slice(&bytes);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn test_reads_across_chunks_in_order() {
        let fx = fixture(&[]);
        let mut reader = fx.object.range_read(RangeRequest::new(5, 12)).unwrap();
        assert_eq!(reader.remaining(), 12);

        let first = reader.next_bytes(2).await.unwrap().unwrap();
        assert_eq!(&first[..], &[5, 6]);
        assert_eq!(*fx.resolver.resolved.lock().unwrap(), vec!["c0"]);

        let rest = read_all(&mut reader, 3).await.unwrap();
        assert_eq!(rest, (7..17).collect::<Vec<u8>>());
        assert_eq!(reader.position(), 17);
        assert_eq!(*fx.resolver.resolved.lock().unwrap(), vec!["c0", "c1", "c2"]);
        assert_eq!(fx.transport.opened.lock().unwrap()[2], ("c2".to_string(), 0..1));
    }

    #[tokio::test]
    async fn test_exhaustion_is_idempotent() {
        let fx = fixture(&[]);
        let mut reader = fx.object.range_read(RangeRequest::to_end(16)).unwrap();
        assert_eq!(read_all(&mut reader, 64).await.unwrap(), vec![16, 17, 18, 19]);
        for _ in 0..3 {
            assert!(reader.next_bytes(64).await.unwrap().is_none());
        }
        assert!(reader.is_exhausted());
        let mut buf = [0_u8; 4];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_zero_length_request() {
        let fx = fixture(&[]);
        let mut reader = fx.object.range_read(RangeRequest::new(3, 0)).unwrap();
        assert!(reader.next_bytes(64).await.unwrap().is_none());
        assert!(fx.resolver.resolved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bounds_checked_before_resolution() {
        let fx = fixture(&[]);
        let err = fx.object.range_read(RangeRequest::new(-1, 100)).unwrap_err();
        assert!(matches!(err, Error::InvalidRange { .. }));
        let err = fx.object.range_read(RangeRequest::new(20, 1)).unwrap_err();
        assert!(matches!(err, Error::InvalidRange { .. }));
        assert!(fx.resolver.resolved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_chunk_resumes_after_delivered_bytes() {
        let fx = fixture(&[("c1", Fault::BreakAfter(3))]);
        let mut reader = fx.object.range_read(RangeRequest::new(6, 8)).unwrap();

        let mut out = Vec::new();
        let mut interruptions = 0;
        loop {
            match reader.next_bytes(2).await {
                Ok(Some(bytes)) => out.extend_from_slice(&bytes),
                Ok(None) => break,
                Err(err) => {
                    assert!(err.is_retryable(), "{err}");
                    interruptions += 1;
                }
            }
        }

        assert_eq!(interruptions, 1);
        assert_eq!(out, (6..14).collect::<Vec<u8>>());
        let opened = fx.transport.opened.lock().unwrap().clone();
        assert_eq!(opened, vec![
            ("c0".to_string(), 6..8),
            ("c1".to_string(), 0..6),
            ("c1".to_string(), 3..6),
        ]);
        let resolved = fx.resolver.resolved.lock().unwrap().clone();
        assert_eq!(resolved, vec!["c0", "c1", "c1"]);
    }

    #[tokio::test]
    async fn test_short_body_is_a_transfer_failure() {
        let fx = fixture(&[("c0", Fault::Short(7))]);
        let mut reader = fx.object.range_read(RangeRequest::new(0, 16)).unwrap();

        let mut out = Vec::new();
        let mut interruptions = 0;
        loop {
            match reader.next_bytes(64).await {
                Ok(Some(bytes)) => out.extend_from_slice(&bytes),
                Ok(None) => break,
                Err(err) => {
                    assert!(
                        matches!(
                            err,
                            Error::Transfer {
                                index: 0,
                                offset: 7,
                                ..
                            }
                        ),
                        "{err}"
                    );
                    interruptions += 1;
                }
            }
        }

        assert_eq!(interruptions, 1);
        assert_eq!(out, (0..16).collect::<Vec<u8>>());
        assert_eq!(fx.transport.opened.lock().unwrap()[1], ("c0".to_string(), 7..8));
    }

    #[tokio::test]
    async fn test_short_bodies_are_bounded() {
        let fx = fixture(&[("c0", Fault::Short(0)); 3]);
        let mut reader = fx.object.range_read(RangeRequest::to_end(0)).unwrap();
        let mut out = Vec::new();
        let err = reader.copy_to(&mut out).await.unwrap_err();
        assert!(matches!(err, Error::Transfer { failures: 3, .. }), "{err}");
        assert!(matches!(
            reader.next_bytes(1).await.unwrap_err(),
            Error::ReaderFailed { index: 0 }
        ));
    }

    #[tokio::test]
    async fn test_transfer_failures_are_bounded() {
        let faults = [
            ("c0", Fault::BreakAfter(0)),
            ("c0", Fault::BreakAfter(0)),
            ("c0", Fault::BreakAfter(0)),
        ];
        let fx = fixture(&faults);
        let mut reader = fx.object.range_read(RangeRequest::new(0, 4)).unwrap();

        for failures in 1..=2 {
            let err = reader.next_bytes(4).await.unwrap_err();
            assert!(err.is_retryable());
            assert!(matches!(err, Error::Transfer { failures: f, .. } if f == failures));
        }
        let err = reader.next_bytes(4).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(matches!(
            reader.next_bytes(4).await.unwrap_err(),
            Error::ReaderFailed { index: 0 }
        ));
    }

    #[tokio::test]
    async fn test_open_failures_use_retry_policy() {
        let fx = fixture(&[("c1", Fault::FailOpen), ("c1", Fault::FailOpen)]);
        let mut reader = fx.object.range_read(RangeRequest::to_end(0)).unwrap();
        assert_eq!(read_all(&mut reader, 7).await.unwrap(), content());
    }

    #[tokio::test]
    async fn test_open_retries_exhausted_is_fatal() {
        let faults = [("c1", Fault::FailOpen); 3];
        let fx = fixture(&faults);
        let mut reader = fx.object.range_read(RangeRequest::to_end(0)).unwrap();

        let err = read_all(&mut reader, 64).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Open {
                index: 1,
                attempts: 3,
                ..
            }
        ));
        assert!(reader.next_bytes(1).await.is_err());
    }

    #[tokio::test]
    async fn test_copy_to_rides_over_interruptions() {
        let fx = fixture(&[("c0", Fault::BreakAfter(5)), ("c2", Fault::BreakAfter(1))]);
        let mut reader = fx.object.range_read(RangeRequest::to_end(0)).unwrap();
        let mut out = Vec::new();
        let written = reader.copy_to(&mut out).await.unwrap();
        assert_eq!(written, TOTAL);
        assert_eq!(out, content());
    }

    #[tokio::test]
    async fn test_into_stream() {
        let fx = fixture(&[("c1", Fault::BreakAfter(2))]);
        let reader = fx.object.range_read(RangeRequest::new(2, 15)).unwrap();
        let pieces: Vec<Bytes> = reader.into_stream().try_collect().await.unwrap();
        let joined: Vec<u8> = pieces.concat();
        assert_eq!(joined, (2..17).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn test_close_mid_stream() {
        let fx = fixture(&[]);
        let mut reader = fx.object.range_read(RangeRequest::to_end(0)).unwrap();
        reader.next_bytes(3).await.unwrap().unwrap();
        reader.close().await;
        reader.close().await;
        assert!(matches!(
            reader.next_bytes(3).await.unwrap_err(),
            Error::Closed
        ));
    }

    #[tokio::test]
    async fn test_handle_close_stops_readers() {
        let fx = fixture(&[]);
        let mut reader = fx.object.range_read(RangeRequest::to_end(0)).unwrap();
        reader.next_bytes(3).await.unwrap().unwrap();

        fx.object.close();
        assert!(fx.object.is_closed());
        assert!(matches!(
            reader.next_bytes(3).await.unwrap_err(),
            Error::Closed
        ));
        assert!(matches!(
            fx.object.range_read(RangeRequest::to_end(0)).unwrap_err(),
            Error::Closed
        ));
    }
}
