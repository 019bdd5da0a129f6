// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Chunk rotation and the upload task.
//!
//! The controller owns the chunk being written. Rotating seals it into the
//! ready queue, whose single slot makes writers wait while an upload is in
//! flight, and opens the next one under a fresh key. The upload task is the
//! only consumer of that queue and retries a failed chunk in place, so a
//! sealed chunk never travels back towards the writers.

use std::fmt::Write as _;
use std::io;
use std::sync::Arc;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, Instrument, Span};

use crate::constants;
use crate::errors::SetupError;

use super::chunk::Chunk;
use super::ObjectStoreApi;

/// How object keys are built: `path + time + ["_" + hostname] + ".log"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFormat {
    path: String,
    time_format: String,
    hostname: Option<String>,
}

impl KeyFormat {
    /// Fails when `time_format` holds an unknown strftime directive.
    pub fn new(
        path: impl Into<String>,
        time_format: impl Into<String>,
        hostname: Option<String>,
    ) -> Result<Self, SetupError> {
        let time_format = time_format.into();
        if time_format.is_empty()
            || StrftimeItems::new(&time_format).any(|item| matches!(item, Item::Error))
        {
            return Err(SetupError::TimeFormat(time_format));
        }
        Ok(KeyFormat {
            path: path.into(),
            time_format,
            hostname: hostname.filter(|h| !h.is_empty()),
        })
    }

    /// Key of the chunk opened at `seconds` since the epoch, formatted in UTC.
    #[must_use]
    pub fn key(&self, seconds: i64) -> String {
        let time = DateTime::<Utc>::from_timestamp(seconds, 0).unwrap_or_default();
        let mut key = self.path.clone();
        // the pattern was validated in `new`
        let _ = write!(key, "{}", time.format(&self.time_format));
        if let Some(hostname) = &self.hostname {
            key.push('_');
            key.push_str(hostname);
        }
        key.push_str(constants::OBJECT_KEY_EXTENSION);
        key
    }
}

impl Default for KeyFormat {
    fn default() -> Self {
        KeyFormat {
            path: String::new(),
            time_format: constants::DEFAULT_TIME_FORMAT.to_string(),
            hostname: None,
        }
    }
}

/// Next chunk sequence: the current second, or one past the previous value
/// when the clock has not moved ahead of it.
#[must_use]
pub fn next_sequence(previous: i64, now: i64) -> i64 {
    if previous < now {
        now
    } else {
        previous + 1
    }
}

struct State<S> {
    current: Option<Chunk<S>>,
    sequence: i64,
    ready: Option<mpsc::Sender<Chunk<S>>>,
    closed: bool,
}

pub struct RotationController<S> {
    store: Arc<S>,
    keys: KeyFormat,
    buffer_size: usize,
    state: Mutex<State<S>>,
    uploader: Mutex<Option<JoinHandle<()>>>,
}

impl<S> std::fmt::Debug for RotationController<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationController")
            .field("keys", &self.keys)
            .field("buffer_size", &self.buffer_size)
            .finish_non_exhaustive()
    }
}

impl<S: ObjectStoreApi> RotationController<S> {
    /// Creates the controller and starts its upload task inside `span`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(store: Arc<S>, keys: KeyFormat, buffer_size: usize, span: Span) -> Self {
        let (tx, rx) = mpsc::channel(constants::READY_QUEUE_CAPACITY);
        let uploader = tokio::spawn(upload_loop(rx).instrument(span));
        RotationController {
            store,
            keys,
            buffer_size,
            state: Mutex::new(State {
                current: None,
                sequence: 0,
                ready: Some(tx),
                closed: false,
            }),
            uploader: Mutex::new(Some(uploader)),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Appends `data` to the current chunk, opening one if needed. Once the
    /// chunk has grown past the buffer size it is rotated, so the write that
    /// crosses the threshold is the last one it receives.
    pub async fn write(&self, data: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "rotation controller closed",
            ));
        }

        if state.current.is_none() {
            self.open_next(&mut state);
        }
        let Some(current) = state.current.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::Other, "no chunk to write to"));
        };
        let n = current.write(data)?;

        if current.len() > self.buffer_size {
            info!("rotate by buffer size");
            self.rotate_locked(&mut state, true).await;
        }
        Ok(n)
    }

    /// Seals the current chunk for upload if it holds data and, when
    /// `open_next` is set, opens a new one. Does nothing once shut down.
    pub async fn rotate(&self, open_next: bool) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        self.rotate_locked(&mut state, open_next).await;
    }

    /// Key of the chunk currently written to.
    pub async fn current_key(&self) -> Option<String> {
        let state = self.state.lock().await;
        state.current.as_ref().map(|c| c.key().to_string())
    }

    /// Seals the last chunk, closes the ready queue and waits until the upload
    /// task has delivered everything.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return;
            }
            self.rotate_locked(&mut state, false).await;
            state.closed = true;
            state.ready = None;
        }

        if let Some(uploader) = self.uploader.lock().await.take() {
            if let Err(e) = uploader.await {
                error!("upload task ended abnormally: {e}");
            }
        }
        debug!("rotation controller closed");
    }

    async fn rotate_locked(&self, state: &mut State<S>, open_next: bool) {
        if let Some(chunk) = state.current.take() {
            if !chunk.is_empty() {
                match &state.ready {
                    Some(ready) => {
                        debug!("enqueue {} ({} bytes)", chunk.key(), chunk.len());
                        if let Err(e) = ready.send(chunk).await {
                            error!("upload task is gone, dropping {}", e.0.key());
                        }
                    }
                    None => error!("ready queue closed, dropping {}", chunk.key()),
                }
            }
        }

        if open_next {
            self.open_next(state);
        }
    }

    fn open_next(&self, state: &mut State<S>) {
        state.sequence = next_sequence(state.sequence, Utc::now().timestamp());
        let key = self.keys.key(state.sequence);
        debug!("new chunk {key}");
        state.current = Some(Chunk::new(Arc::clone(&self.store), key));
    }
}

async fn upload_loop<S: ObjectStoreApi>(mut ready: mpsc::Receiver<Chunk<S>>) {
    debug!("upload task started");
    while let Some(mut chunk) = ready.recv().await {
        let mut attempts: u64 = 0;
        while let Err(e) = chunk.flush().await {
            attempts += 1;
            error!(
                "failed to upload {} (attempt {attempts}), retrying: {e}",
                chunk.key()
            );
            tokio::task::yield_now().await;
        }
    }
    debug!("upload task stopped");
}
