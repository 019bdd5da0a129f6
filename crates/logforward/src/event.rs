// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use chrono::Utc;

/// One log record as accepted by a writer.
///
/// The timestamp is taken when the record is written, in milliseconds since
/// the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    message: Bytes,
    timestamp: i64,
}

impl LogEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(message: impl Into<Bytes>) -> Self {
        Self::with_timestamp(message, Utc::now().timestamp_millis())
    }

    #[must_use]
    pub fn with_timestamp(message: impl Into<Bytes>, timestamp: i64) -> Self {
        LogEvent {
            message: message.into(),
            timestamp,
        }
    }

    #[must_use]
    pub fn message(&self) -> &Bytes {
        &self.message
    }

    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.message.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.message.is_empty()
    }
}
