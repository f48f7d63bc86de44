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

use std::sync::LazyLock;

use prometheus::{IntCounter, IntCounterVec, register_int_counter, register_int_counter_vec};

/// Bytes handed to callers by segmented readers.
pub static READER_BYTES_DELIVERED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "chunkvault_reader_bytes_delivered_total",
        "bytes delivered by segmented range readers"
    )
    .expect("metric can be registered")
});

/// Chunk open attempts that failed and were retried, by failing step.
pub static CHUNK_OPEN_RETRIES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "chunkvault_chunk_open_retries_total",
        "retried chunk resolve/open attempts",
        &["step"]
    )
    .expect("metric can be registered")
});

/// Remote reads that failed after the chunk was opened.
pub static TRANSFER_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "chunkvault_transfer_failures_total",
        "chunk transfers interrupted mid-body"
    )
    .expect("metric can be registered")
});

/// Chunks stored by the planner.
pub static CHUNKS_STORED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("chunkvault_chunks_stored_total", "chunks stored by the planner")
        .expect("metric can be registered")
});

/// Bytes stored by the planner.
pub static BYTES_STORED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("chunkvault_bytes_stored_total", "bytes stored by the planner")
        .expect("metric can be registered")
});
