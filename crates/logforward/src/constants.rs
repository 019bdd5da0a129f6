// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Limits and defaults shared by the writers.

use std::time::Duration;

/// Default byte budget of one ordered-stream batch (768 KiB).
///
/// Counted with [`RECORD_OVERHEAD_BYTES`] added per record, the same way the
/// service accounts for `PutLogEvents` payloads.
pub const MAX_BATCH_BYTES: usize = 768 * 1024;

/// Default maximum number of records in one ordered-stream batch.
pub const MAX_BATCH_COUNT: usize = 10_000;

/// Fixed per-record overhead added to the message length.
pub const RECORD_OVERHEAD_BYTES: usize = 26;

/// Hard cap for a single record. Larger writes are rejected synchronously.
pub const MAX_RECORD_BYTES: usize = 256 * 1024;

/// Default flush interval of the ordered-stream writer.
pub const STREAM_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Default time-based rotation interval of the object writer (13 minutes).
pub const OBJECT_FLUSH_INTERVAL: Duration = Duration::from_secs(13 * 60);

/// Default logical chunk size that triggers an object rotation.
pub const OBJECT_BUFFER_SIZE: usize = 10 * 1000 * 1000;

/// Capacity of the producer-to-engine queue. Writers wait when it is full.
pub const INBOUND_QUEUE_CAPACITY: usize = 100;

/// Capacity of the sealed-chunk queue feeding the upload task.
pub const READY_QUEUE_CAPACITY: usize = 1;

/// Default strftime pattern of the time part of object keys.
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Extension appended to every object key.
pub const OBJECT_KEY_EXTENSION: &str = ".log";

/// Timeout of a single HTTP request to either remote.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
