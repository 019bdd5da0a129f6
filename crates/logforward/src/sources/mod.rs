// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Upstream readers producing the raw log byte stream.

pub mod tail;
pub mod tcp;

use std::io;

use async_trait::async_trait;
use tokio::io::AsyncRead;

pub use tail::TailReader;
pub use tcp::TcpReader;

/// A byte stream of log lines that can be shut down from its owner.
#[async_trait]
pub trait LineSource: AsyncRead + Send + Unpin {
    /// Stops producing data. Pending reads then see end of stream.
    async fn close(&mut self) -> io::Result<()>;
}
