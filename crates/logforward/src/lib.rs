// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log forwarding core.
//!
//! Producers hand log lines to a writer; a dedicated control loop per writer
//! batches them and ships them to a remote sink:
//!
//! ```text
//!   producers ──write()──► bounded queue (100) ──► control loop ──► sink
//!                                                    │   ▲
//!                                              timer ┘   └ retry / requeue
//! ```
//!
//! Two sinks are provided:
//! - [`stream`]: an ordered append-only log stream guarded by sequence tokens
//!   (CloudWatch Logs).
//! - [`object`]: gzip chunks rotated by size or time and uploaded as objects
//!   (S3).
//!
//! [`sources`] holds the upstream readers (file tail, TCP listener).

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batch;
pub mod constants;
pub mod engine;
pub mod errors;
pub mod event;
pub mod hostname;
pub(crate) mod http;
pub mod object;
pub mod sigv4;
pub mod sources;
pub mod stream;
pub mod writer;

pub use errors::{FlushError, UploadError, WriteError};
pub use event::LogEvent;
pub use object::{ObjectWriter, ObjectWriterConfig};
pub use sigv4::Credentials;
pub use stream::{StreamWriter, StreamWriterConfig};
pub use writer::{LogWriter, WriterHandle};
