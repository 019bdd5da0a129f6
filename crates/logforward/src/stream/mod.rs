// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ordered log stream sink.
//!
//! Batches are appended to one stream of a log group. Every append must carry
//! the sequence token returned by the previous one; a stale token is corrected
//! from the conflict error and used on the next flush.

pub mod client;
pub mod token;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, error, info, info_span, warn, Span};

use crate::batch::Batch;
use crate::constants;
use crate::engine::{self, EngineConfig, Stage};
use crate::errors::{FlushError, WriteError};
use crate::event::LogEvent;
use crate::writer::{LogWriter, WriterHandle};

pub use client::CloudWatchLogsClient;

/// One entry of a stream listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamInfo {
    pub name: String,
    pub upload_sequence_token: Option<String>,
}

/// Answer to an accepted append.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Token the next append must carry.
    pub next_token: Option<String>,
    /// Records the service refused. Those are lost; the stream still advanced.
    pub rejected: Option<RejectedEvents>,
}

/// Indices of records the service refused within an accepted append.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RejectedEvents {
    pub too_new_start_index: Option<usize>,
    pub too_old_end_index: Option<usize>,
    pub expired_end_index: Option<usize>,
}

impl fmt::Display for RejectedEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(i) = self.too_new_start_index {
            parts.push(format!("too new from index {i}"));
        }
        if let Some(i) = self.too_old_end_index {
            parts.push(format!("too old up to index {i}"));
        }
        if let Some(i) = self.expired_end_index {
            parts.push(format!("expired up to index {i}"));
        }
        if parts.is_empty() {
            write!(f, "unspecified")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// Remote log stream service.
#[async_trait]
pub trait LogStreamApi: Send + Sync + 'static {
    /// Lists the streams of `group` whose name starts with `prefix`.
    async fn list_streams(&self, group: &str, prefix: &str)
        -> Result<Vec<StreamInfo>, FlushError>;

    async fn create_stream(&self, group: &str, stream: &str) -> Result<(), FlushError>;

    /// Appends `events` in order and returns the token for the next append.
    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        events: &[LogEvent],
        token: Option<&str>,
    ) -> Result<AppendOutcome, FlushError>;
}

#[async_trait]
impl<T: LogStreamApi + ?Sized> LogStreamApi for Arc<T> {
    async fn list_streams(
        &self,
        group: &str,
        prefix: &str,
    ) -> Result<Vec<StreamInfo>, FlushError> {
        (**self).list_streams(group, prefix).await
    }

    async fn create_stream(&self, group: &str, stream: &str) -> Result<(), FlushError> {
        (**self).create_stream(group, stream).await
    }

    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        events: &[LogEvent],
        token: Option<&str>,
    ) -> Result<AppendOutcome, FlushError> {
        (**self).put_log_events(group, stream, events, token).await
    }
}

/// Finds the current upload token of `stream`, creating the stream when it
/// does not exist yet. A new stream starts without a token.
pub async fn resolve_sequence_token<C: LogStreamApi + ?Sized>(
    client: &C,
    group: &str,
    stream: &str,
) -> Result<Option<String>, FlushError> {
    let streams = client.list_streams(group, stream).await?;
    if let Some(found) = streams.into_iter().find(|s| s.name == stream) {
        debug!(
            group,
            stream,
            token = found.upload_sequence_token.as_deref().unwrap_or(""),
            "log stream exists"
        );
        return Ok(found.upload_sequence_token);
    }

    info!(group, stream, "creating log stream");
    client.create_stream(group, stream).await?;
    Ok(None)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamWriterConfig {
    pub group: String,
    pub stream: String,
    pub interval: Duration,
    pub batch_bytes: usize,
    pub batch_count: usize,
    pub max_record_bytes: usize,
}

impl Default for StreamWriterConfig {
    fn default() -> Self {
        StreamWriterConfig {
            group: String::new(),
            stream: String::new(),
            interval: constants::STREAM_FLUSH_INTERVAL,
            batch_bytes: constants::MAX_BATCH_BYTES,
            batch_count: constants::MAX_BATCH_COUNT,
            max_record_bytes: constants::MAX_RECORD_BYTES,
        }
    }
}

/// Writer shipping records to an ordered log stream.
#[derive(Debug)]
pub struct StreamWriter {
    handle: WriterHandle,
}

impl StreamWriter {
    /// Resolves the stream's sequence token, then starts the control loop.
    pub async fn connect<C: LogStreamApi>(
        client: C,
        config: StreamWriterConfig,
    ) -> Result<Self, FlushError> {
        let span = info_span!("stream_writer", group = %config.group, stream = %config.stream);
        let token = resolve_sequence_token(&client, &config.group, &config.stream).await?;
        Ok(Self::spawn(client, config, token, span))
    }

    /// Starts the control loop with a known token, inside `span`.
    pub fn spawn<C: LogStreamApi>(
        client: C,
        config: StreamWriterConfig,
        token: Option<String>,
        span: Span,
    ) -> Self {
        let engine_config = EngineConfig {
            interval: config.interval,
            max_record_bytes: config.max_record_bytes,
            ..EngineConfig::default()
        };
        let stage = StreamStage {
            client,
            batch: Batch::new(config.batch_bytes, config.batch_count),
            group: config.group,
            stream: config.stream,
            token,
        };
        StreamWriter {
            handle: engine::spawn(stage, engine_config, span),
        }
    }

    pub fn blocking_write(&self, message: impl Into<Bytes>) -> Result<(), WriteError> {
        self.handle.blocking_write(message)
    }
}

#[async_trait]
impl LogWriter for StreamWriter {
    async fn write(&self, message: Bytes) -> Result<(), WriteError> {
        self.handle.write(message).await
    }

    async fn close(&self) -> Result<(), WriteError> {
        self.handle.close().await
    }
}

struct StreamStage<C> {
    client: C,
    batch: Batch,
    group: String,
    stream: String,
    token: Option<String>,
}

impl<C: LogStreamApi> StreamStage<C> {
    /// Appends the oldest events that fit in one call. Returns false when the
    /// append failed and the events went back to the front of the batch.
    async fn flush_once(&mut self) -> bool {
        let (events, size) = self.batch.drain_ready();

        let result = self
            .client
            .put_log_events(&self.group, &self.stream, &events, self.token.as_deref())
            .await;
        match result {
            Ok(AppendOutcome {
                next_token,
                rejected: None,
            }) => {
                info!(
                    "put {} events {} bytes, next sequence token {}",
                    events.len(),
                    size,
                    next_token.as_deref().unwrap_or("none")
                );
                self.token = next_token;
                true
            }
            Ok(AppendOutcome {
                next_token,
                rejected: Some(rejected),
            }) => {
                warn!("{} events sent, some were rejected: {rejected}", events.len());
                if next_token.is_some() {
                    self.token = next_token;
                }
                true
            }
            Err(e @ FlushError::AlreadyAccepted(_)) => {
                warn!("{} events already accepted, not resending: {e}", events.len());
                if let Some(token) = e.expected_token() {
                    self.token = Some(token);
                }
                true
            }
            Err(e) => {
                error!("failed to put {} events: {e}", events.len());
                if let Some(token) = e.expected_token() {
                    info!(
                        "retrying {} events {} bytes with sequence token {token}",
                        events.len(),
                        size
                    );
                    self.token = Some(token);
                }
                self.batch.requeue(events);
                false
            }
        }
    }

    /// Appends the whole batch one call at a time. Stops at the first failure;
    /// the rest waits for the next flush.
    async fn flush(&mut self) {
        while !self.batch.is_empty() {
            if !self.flush_once().await {
                break;
            }
        }
    }
}

#[async_trait]
impl<C: LogStreamApi> Stage for StreamStage<C> {
    async fn accept(&mut self, event: LogEvent) -> bool {
        let mut flushed = false;
        while self.batch.ready() {
            flushed = true;
            if !self.flush_once().await {
                break;
            }
        }
        self.batch.add(event);
        flushed
    }

    async fn tick(&mut self) {
        self.flush().await;
    }

    async fn finish(&mut self) {
        self.flush().await;
    }
}
