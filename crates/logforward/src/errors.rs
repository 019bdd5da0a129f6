// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types.
//!
//! [`WriteError`] is the only error a producer ever sees. [`FlushError`] and
//! [`UploadError`] stay inside the control loop and the upload task, where they
//! drive the retry policy and are reported through `tracing`.

use crate::stream::token::parse_expected_token;

/// Errors returned synchronously by `write` and `close`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    #[error("writer closed")]
    Closed,

    #[error("record too large: {size} bytes exceeds the {max} bytes limit")]
    TooLarge { size: usize, max: usize },
}

/// Outcome of a failed call to the ordered log stream service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlushError {
    /// The sequence token sent with the append was stale. The text usually
    /// embeds the token the service expects next.
    #[error("{0}")]
    TokenConflict(String),

    /// The batch was already appended by an earlier call whose answer got
    /// lost. The text usually embeds the token of the next append.
    #[error("{0}")]
    AlreadyAccepted(String),

    /// The service answered with an error other than a token conflict.
    #[error("{code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// The request never produced a service answer.
    #[error("transport error: {0}")]
    Transport(String),
}

impl FlushError {
    /// Returns the sequence token embedded in the error text, if the error is
    /// a token conflict or an already accepted batch that carries one.
    #[must_use]
    pub fn expected_token(&self) -> Option<String> {
        parse_expected_token(&self.to_string())
    }
}

/// Errors raised while sealing or uploading an object chunk.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("object store answered {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),
}

impl UploadError {
    /// True for the statuses a HEAD request returns for a missing object.
    /// S3 answers 403 instead of 404 when the caller may not list the bucket.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, UploadError::Status { status: 403 | 404, .. })
    }
}

/// Errors raised while building a writer.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("invalid time format {0:?}")]
    TimeFormat(String),

    #[error("invalid endpoint {endpoint:?}: {reason}")]
    Endpoint { endpoint: String, reason: String },

    #[error("failed to resolve hostname: {0}")]
    Hostname(#[source] std::io::Error),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error(transparent)]
    Stream(#[from] FlushError),
}
