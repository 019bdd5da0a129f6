// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Chunked object sink.
//!
//! Records are gzip-compressed into a chunk that is sealed and uploaded as
//! one object once it grows past the size threshold or the rotation interval
//! elapses:
//!
//! ```text
//!   control loop ──write──► RotationController ──sealed chunk──► ready queue (1)
//!        │ tick                 (current Chunk)                      │
//!        └────rotate───────────────►                         upload task ──► store
//! ```

pub mod chunk;
pub mod client;
pub mod rotation;
pub mod writer;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::UploadError;

pub use chunk::Chunk;
pub use client::{S3Client, S3ClientConfig};
pub use rotation::{KeyFormat, RotationController};
pub use writer::{ObjectWriter, ObjectWriterConfig};

/// Remote object store.
#[async_trait]
pub trait ObjectStoreApi: Send + Sync + 'static {
    /// Stores `body` (a complete gzip stream) under `key`.
    async fn put_object(&self, key: &str, body: Bytes) -> Result<(), UploadError>;

    /// Succeeds when an object exists under `key`.
    async fn head_object(&self, key: &str) -> Result<(), UploadError>;
}

#[async_trait]
impl<T: ObjectStoreApi + ?Sized> ObjectStoreApi for Arc<T> {
    async fn put_object(&self, key: &str, body: Bytes) -> Result<(), UploadError> {
        (**self).put_object(key, body).await
    }

    async fn head_object(&self, key: &str) -> Result<(), UploadError> {
        (**self).head_object(key).await
    }
}

/// Tells whether `key` exists. A 403 or 404 answer means it does not.
pub async fn exists<S: ObjectStoreApi + ?Sized>(store: &S, key: &str) -> Result<bool, UploadError> {
    match store.head_object(key).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}
