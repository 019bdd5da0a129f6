// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! File follower backed by `tail -n 0 -F`.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument, Span};

use super::LineSource;

/// Follows a file by name through rotations, starting at its current end.
#[derive(Debug)]
pub struct TailReader {
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<()>>,
}

impl TailReader {
    pub fn open(file: impl AsRef<Path>) -> io::Result<Self> {
        Self::open_with("tail", file)
    }

    /// Same as [`open`](Self::open) with another `tail` compatible program.
    pub fn open_with(program: &str, file: impl AsRef<Path>) -> io::Result<Self> {
        let file = file.as_ref();
        let mut child = Command::new(program)
            .args(["-n", "0", "-F"])
            .arg(file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .inspect_err(|e| warn!("failed to start {program}: {e}"))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("tail stdout is not piped"))?;
        let stderr = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(log_stderr(stderr).instrument(Span::current())));

        info!("{program} -n 0 -F {}", file.display());
        Ok(TailReader {
            child,
            stdout,
            stderr,
        })
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

#[async_trait]
impl LineSource for TailReader {
    /// Kills the follower and reaps it.
    async fn close(&mut self) -> io::Result<()> {
        if let Some(pid) = self.child.id() {
            self.child.kill().await?;
            debug!("killed tail {pid}");
        }
        if let Some(stderr) = self.stderr.take() {
            let _ = stderr.await;
        }
        info!("tail closed");
        Ok(())
    }
}

impl AsyncRead for TailReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdout).poll_read(cx, buf)
    }
}

/// Reports every line the follower prints on stderr, e.g. a file that became
/// inaccessible or was replaced.
async fn log_stderr<R: AsyncRead + Unpin>(stderr: R) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => warn!("{line}"),
            Ok(None) => break,
            Err(e) => {
                warn!("failed to read tail stderr: {e}");
                break;
            }
        }
    }
    debug!("tail stderr closed");
}
