// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io::{self, Write};
use std::sync::Arc;

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info};

use crate::errors::UploadError;

use super::ObjectStoreApi;

enum State {
    Empty,
    Open(GzEncoder<Vec<u8>>),
    Sealed(Bytes),
}

/// One object being assembled: a gzip stream bound to its destination key.
pub struct Chunk<S> {
    store: Arc<S>,
    key: String,
    state: State,
    logical_len: usize,
}

impl<S> std::fmt::Debug for Chunk<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            State::Empty => "empty",
            State::Open(_) => "open",
            State::Sealed(_) => "sealed",
        };
        f.debug_struct("Chunk")
            .field("key", &self.key)
            .field("state", &state)
            .field("logical_len", &self.logical_len)
            .finish_non_exhaustive()
    }
}

impl<S: ObjectStoreApi> Chunk<S> {
    #[must_use]
    pub fn new(store: Arc<S>, key: impl Into<String>) -> Self {
        Chunk {
            store,
            key: key.into(),
            state: State::Empty,
            logical_len: 0,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Uncompressed bytes written since the chunk was opened.
    #[must_use]
    pub fn len(&self) -> usize {
        self.logical_len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.logical_len == 0
    }

    /// Appends `data`, starting a gzip stream if none is active.
    pub fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match &mut self.state {
            State::Sealed(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("chunk {} is sealed", self.key),
                ));
            }
            State::Open(encoder) => encoder.write_all(data)?,
            State::Empty => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data)?;
                self.state = State::Open(encoder);
            }
        }
        self.logical_len += data.len();
        debug!("write {} bytes to {}", data.len(), self.key);
        Ok(data.len())
    }

    /// Finishes the gzip stream and uploads it as one object.
    ///
    /// The stream is finished once: a chunk whose upload failed keeps its
    /// compressed body and can be flushed again. On success the chunk is empty.
    pub async fn flush(&mut self) -> Result<(), UploadError> {
        let body = match std::mem::replace(&mut self.state, State::Empty) {
            State::Empty => return Ok(()),
            State::Open(encoder) => Bytes::from(encoder.finish()?),
            State::Sealed(body) => body,
        };
        self.state = State::Sealed(body.clone());

        let compressed = body.len();
        self.store.put_object(&self.key, body).await?;
        info!(
            "put {} bytes ({} uncompressed) to {}",
            compressed, self.logical_len, self.key
        );
        self.state = State::Empty;
        self.logical_len = 0;
        Ok(())
    }
}
