// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Producer-facing side of a writer.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::errors::WriteError;
use crate::event::LogEvent;

/// Common surface of the sink writers.
#[async_trait]
pub trait LogWriter: Send + Sync {
    /// Queues one record. Waits only while the inbound queue is full.
    async fn write(&self, message: Bytes) -> Result<(), WriteError>;

    /// Rejects further writes and waits until every accepted record was
    /// handed to the remote.
    async fn close(&self) -> Result<(), WriteError>;
}

/// Sending half of the inbound queue plus the control loop it feeds.
///
/// Safe to share between tasks: `write` only clones the sender, so concurrent
/// producers never contend on anything but the queue itself.
#[derive(Debug)]
pub struct WriterHandle {
    tx: Mutex<Option<mpsc::Sender<LogEvent>>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    max_record_bytes: usize,
}

impl WriterHandle {
    pub(crate) fn new(
        tx: mpsc::Sender<LogEvent>,
        task: JoinHandle<()>,
        max_record_bytes: usize,
    ) -> Self {
        WriterHandle {
            tx: Mutex::new(Some(tx)),
            task: tokio::sync::Mutex::new(Some(task)),
            max_record_bytes,
        }
    }

    fn event(&self, message: Bytes) -> Result<(LogEvent, mpsc::Sender<LogEvent>), WriteError> {
        if message.len() > self.max_record_bytes {
            return Err(WriteError::TooLarge {
                size: message.len(),
                max: self.max_record_bytes,
            });
        }
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(WriteError::Closed)?;
        Ok((LogEvent::new(message), tx))
    }

    pub async fn write(&self, message: impl Into<Bytes>) -> Result<(), WriteError> {
        let (event, tx) = self.event(message.into())?;
        debug!(bytes = event.len(), "queueing log event");
        tx.send(event).await.map_err(|_| WriteError::Closed)
    }

    /// Same as [`write`](Self::write) for producers on plain threads.
    ///
    /// Must not be called from within an async context.
    pub fn blocking_write(&self, message: impl Into<Bytes>) -> Result<(), WriteError> {
        let (event, tx) = self.event(message.into())?;
        tx.blocking_send(event).map_err(|_| WriteError::Closed)
    }

    /// Closes the queue and waits for the control loop to drain it. A close
    /// racing an earlier one returns `Closed` only once that drain is over.
    pub async fn close(&self) -> Result<(), WriteError> {
        let mut task = self.task.lock().await;
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(WriteError::Closed)?;
        drop(tx);

        if let Some(task) = task.take() {
            if let Err(e) = task.await {
                error!("control loop ended abnormally: {e}");
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
