// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TCP listener exposing the bytes of its connections as one stream.
//!
//! Connections are served one at a time, in accept order. A connection that
//! ends in the middle of a line gets a newline appended, so its last line is
//! never glued to the first line of the next connection.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument, Span};

use super::LineSource;

const READ_BUFFER_SIZE: usize = 8 * 1024;
const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug)]
pub struct TcpReader {
    rx: mpsc::Receiver<Bytes>,
    pending: Bytes,
    local_addr: SocketAddr,
    cancel_token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TcpReader {
    /// Binds the listener and starts accepting connections.
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .inspect_err(|e| warn!("listen error {e}"))?;
        let local_addr = listener.local_addr()?;
        info!("listening on {local_addr}");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel_token = CancellationToken::new();
        let task = tokio::spawn(
            accept_loop(listener, tx, cancel_token.clone()).instrument(Span::current()),
        );

        Ok(TcpReader {
            rx,
            pending: Bytes::new(),
            local_addr,
            cancel_token,
            task: Some(task),
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl LineSource for TcpReader {
    /// Stops accepting, drops the connection being served and waits for the
    /// accept task to end.
    async fn close(&mut self) -> io::Result<()> {
        self.cancel_token.cancel();
        if let Some(task) = self.task.take() {
            task.await.map_err(io::Error::other)?;
        }
        debug!("listener closed");
        Ok(())
    }
}

impl AsyncRead for TcpReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.pending.is_empty() {
                let n = this.pending.len().min(buf.remaining());
                buf.put_slice(&this.pending.split_to(n));
                return Poll::Ready(Ok(()));
            }
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(data)) => this.pending = data,
                // the accept task is gone: end of stream
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<Bytes>,
    cancel_token: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel_token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("accept error {e}");
                break;
            }
        };
        debug!("accept {peer}");
        if !forward_connection(stream, &tx, &cancel_token).await {
            break;
        }
        debug!("connection from {peer} closed");
    }
    debug!("accept loop stopped");
}

/// Forwards one connection until its end. Returns false when the listener
/// should stop, either cancelled or because nobody reads anymore.
async fn forward_connection(
    mut stream: TcpStream,
    tx: &mpsc::Sender<Bytes>,
    cancel_token: &CancellationToken,
) -> bool {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    let mut last = b'\n';
    loop {
        buf.reserve(READ_BUFFER_SIZE);
        let read = tokio::select! {
            _ = cancel_token.cancelled() => return false,
            read = stream.read_buf(&mut buf) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {
                last = buf.last().copied().unwrap_or(last);
                if !send(tx, buf.split().freeze(), cancel_token).await {
                    return false;
                }
            }
            Err(e) => {
                warn!("read error {e}");
                break;
            }
        }
    }

    last == b'\n' || send(tx, Bytes::from_static(b"\n"), cancel_token).await
}

/// Hands data to the reader unless the listener is being closed.
async fn send(tx: &mpsc::Sender<Bytes>, data: Bytes, cancel_token: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel_token.cancelled() => false,
        sent = tx.send(data) => sent.is_ok(),
    }
}
