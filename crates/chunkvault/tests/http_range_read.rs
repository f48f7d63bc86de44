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
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use axum_test::TestServer;
use chunkvault::{
    Backend, Chunk, ChunkedObject, Error, HttpTransport, RangeRequest, RemoteRef, RetryPolicy,
    TransportConfig, UrlTemplateResolver, plan,
};
use chunkvault_common_telemetry::init_default_ut_logging;

const TOTAL: u64 = 50_000;
const CHUNK: u64 = 16_384;

#[derive(Debug, Clone)]
struct Seen {
    object:          String,
    range:           Option<String>,
    accept_encoding: Option<String>,
}

#[derive(Clone, Default)]
struct AppState {
    objects:      Arc<HashMap<String, Vec<u8>>>,
    /// Objects answered with 200 and the whole body, ignoring Range
    full_content: Arc<HashSet<String>>,
    /// Remaining 503 answers per object
    unavailable:  Arc<Mutex<HashMap<String, usize>>>,
    /// Next ranged answer for the object is cut to this many bytes
    cut:          Arc<Mutex<HashMap<String, usize>>>,
    seen:         Arc<Mutex<Vec<Seen>>>,
}

fn parse_range(value: &str, total: usize) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    let (start, end): (usize, usize) = (start.parse().ok()?, end.parse().ok()?);
    (start <= end && end < total).then_some((start, end))
}

async fn handle_get(
    Path(object): Path<String>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let header_value = |name| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let range = header_value(header::RANGE);
    state.seen.lock().unwrap().push(Seen {
        object:          object.clone(),
        range:           range.clone(),
        accept_encoding: header_value(header::ACCEPT_ENCODING),
    });

    let Some(content) = state.objects.get(&object) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if let Some(left) = state.unavailable.lock().unwrap().get_mut(&object) {
        if *left > 0 {
            *left -= 1;
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    }
    if state.full_content.contains(&object) {
        return (StatusCode::OK, Bytes::copy_from_slice(content)).into_response();
    }
    let Some((start, end)) = range.as_deref().and_then(|v| parse_range(v, content.len())) else {
        return (StatusCode::OK, Bytes::copy_from_slice(content)).into_response();
    };

    let mut body = &content[start..=end];
    if let Some(cut) = state.cut.lock().unwrap().remove(&object) {
        body = &body[..cut.min(body.len())];
    }
    (
        StatusCode::PARTIAL_CONTENT,
        [(
            header::CONTENT_RANGE,
            format!("bytes {start}-{end}/{}", content.len()),
        )],
        Bytes::copy_from_slice(body),
    )
        .into_response()
}

fn content() -> Vec<u8> {
    (0..TOTAL)
        .map(|i| u8::try_from(i % 251).unwrap())
        .collect()
}

struct Harness {
    server: TestServer,
    state:  AppState,
    object: ChunkedObject,
}

impl Harness {
    fn seen(&self) -> Vec<Seen> { self.state.seen.lock().unwrap().clone() }
}

fn harness(configure: impl FnOnce(&mut AppState)) -> Harness {
    init_default_ut_logging();

    let data = content();
    let mut objects = HashMap::new();
    let mut chunks = Vec::new();
    for b in plan(TOTAL, CHUNK).unwrap() {
        let name = format!("obj{}", b.index);
        #[allow(clippy::cast_possible_truncation)]
        objects.insert(name.clone(), data[b.start as usize..b.end as usize].to_vec());
        chunks.push(Chunk {
            index:        b.index,
            start_offset: b.start,
            end_offset:   b.end,
            remote_ref:   RemoteRef::new(name),
            checksum:     String::new(),
            deleted:      false,
        });
    }

    let mut state = AppState {
        objects: Arc::new(objects),
        ..AppState::default()
    };
    configure(&mut state);

    let app = Router::new()
        .route("/objects/{object}", get(handle_get))
        .with_state(state.clone());
    let server = TestServer::builder()
        .http_transport()
        .build(app)
        .expect("failed to create test server");

    let base = server
        .server_address()
        .expect("server should have HTTP address")
        .to_string();
    let template = format!("{}/objects/{{ref}}", base.trim_end_matches('/'));
    let backend = Backend::new(
        Arc::new(UrlTemplateResolver::new(template).unwrap()),
        Arc::new(HttpTransport::new(&TransportConfig::default()).unwrap()),
        RetryPolicy {
            max_attempts:          3,
            base_delay:            Duration::from_millis(5),
            max_transfer_failures: 3,
        },
    );

    Harness {
        server,
        state,
        object: ChunkedObject::new(TOTAL, chunks, backend).unwrap(),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn expected(start: u64, end: u64) -> Vec<u8> { content()[start as usize..end as usize].to_vec() }

#[tokio::test]
async fn range_across_chunk_boundaries() {
    let h = harness(|_| {});
    let mut reader = h
        .object
        .range_read(RangeRequest::new(16_000, 20_000))
        .unwrap();
    let mut out = Vec::new();
    reader.copy_to(&mut out).await.unwrap();
    assert_eq!(out, expected(16_000, 36_000));

    let seen = h.seen();
    let ranges: Vec<_> = seen
        .iter()
        .map(|s| (s.object.as_str(), s.range.as_deref().unwrap()))
        .collect();
    assert_eq!(ranges, vec![
        ("obj0", "bytes=16000-16383"),
        ("obj1", "bytes=0-16383"),
        ("obj2", "bytes=0-3231"),
    ]);
    assert!(seen
        .iter()
        .all(|s| s.accept_encoding.as_deref() == Some("identity")));
    drop(h.server);
}

#[tokio::test]
async fn whole_file_through_read() {
    let h = harness(|_| {});
    let mut reader = h.object.range_read(RangeRequest::to_end(0)).unwrap();
    let mut out = Vec::new();
    let mut buf = vec![0_u8; 7_000];
    loop {
        let n = reader.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    assert_eq!(out, content());
    assert_eq!(reader.position(), TOTAL);
}

#[tokio::test]
async fn full_content_response_is_sliced() {
    let h = harness(|state| {
        state.full_content = Arc::new(HashSet::from(["obj1".to_string()]));
    });
    let mut reader = h
        .object
        .range_read(RangeRequest::new(20_000, 5_000))
        .unwrap();
    let mut out = Vec::new();
    reader.copy_to(&mut out).await.unwrap();
    assert_eq!(out, expected(20_000, 25_000));
}

#[tokio::test]
async fn unavailable_twice_then_delivered() {
    let h = harness(|state| {
        state
            .unavailable
            .lock()
            .unwrap()
            .insert("obj1".to_string(), 2);
    });
    let mut reader = h.object.range_read(RangeRequest::to_end(10_000)).unwrap();
    let mut out = Vec::new();
    reader.copy_to(&mut out).await.unwrap();
    assert_eq!(out, expected(10_000, TOTAL));

    let obj1_requests = h.seen().iter().filter(|s| s.object == "obj1").count();
    assert_eq!(obj1_requests, 3);
}

#[tokio::test]
async fn missing_object_fails_after_three_attempts() {
    let h = harness(|state| {
        let mut objects = (*state.objects).clone();
        objects.remove("obj2");
        state.objects = Arc::new(objects);
    });
    let mut reader = h.object.range_read(RangeRequest::to_end(30_000)).unwrap();
    let mut out = Vec::new();
    let err = reader.copy_to(&mut out).await.unwrap_err();

    assert!(matches!(
        err,
        Error::Open {
            index: 2,
            attempts: 3,
            ..
        }
    ));
    assert!(err.to_string().contains("chunk 2"));
    assert_eq!(out, expected(30_000, 32_768));
}

#[tokio::test]
async fn truncated_body_resumes_without_duplicates() {
    let h = harness(|state| {
        state.cut.lock().unwrap().insert("obj1".to_string(), 1_000);
    });
    let mut reader = h
        .object
        .range_read(RangeRequest::new(16_000, 20_000))
        .unwrap();

    let mut out = Vec::new();
    let mut interruptions = 0;
    loop {
        match reader.next_bytes(4_096).await {
            Ok(Some(bytes)) => out.extend_from_slice(&bytes),
            Ok(None) => break,
            Err(err) => {
                assert!(err.is_retryable(), "{err}");
                interruptions += 1;
            }
        }
    }
    assert_eq!(interruptions, 1);
    assert_eq!(out, expected(16_000, 36_000));

    let obj1: Vec<_> = h
        .seen()
        .into_iter()
        .filter(|s| s.object == "obj1")
        .filter_map(|s| s.range)
        .collect();
    assert_eq!(obj1, vec!["bytes=0-16383", "bytes=1000-16383"]);
}
