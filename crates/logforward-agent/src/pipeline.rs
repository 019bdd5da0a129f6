// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logforward::{LogWriter, WriteError};

/// Reads `reader` line by line and hands every non-empty line to `writer`,
/// without its line terminator. Returns the number of forwarded lines once
/// the reader ends, the token is cancelled or the writer is closed.
///
/// A line longer than `max_record_bytes` is never buffered whole: it is read
/// up to the limit, the rest is skipped up to the next newline and the line
/// is dropped.
pub async fn forward_lines<R>(
    reader: R,
    writer: &dyn LogWriter,
    max_record_bytes: usize,
    cancel_token: &CancellationToken,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    // room for the record plus its CRLF
    let limit = max_record_bytes.saturating_add(2);
    let mut buf = Vec::new();
    let mut forwarded = 0;
    loop {
        buf.clear();
        let read = tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("read loop cancelled");
                break;
            }
            read = read_line(&mut reader, &mut buf, limit) => read?,
        };
        match read {
            ReadLine::End => {
                debug!("source ended");
                break;
            }
            ReadLine::Skipped(size) => {
                warn!("dropping line of {size} bytes, longer than {max_record_bytes} bytes");
                continue;
            }
            ReadLine::Line => {}
        }

        let line = trim_line_end(&buf);
        if line.is_empty() {
            continue;
        }
        match writer.write(Bytes::copy_from_slice(line)).await {
            Ok(()) => forwarded += 1,
            Err(e @ WriteError::TooLarge { .. }) => warn!("dropping line: {e}"),
            Err(WriteError::Closed) => {
                warn!("writer closed, stop reading");
                break;
            }
        }
    }
    info!("forwarded {forwarded} lines");
    Ok(forwarded)
}

enum ReadLine {
    /// The reader is exhausted.
    End,
    /// `buf` holds one line, terminator included when there was one.
    Line,
    /// The line exceeded the limit and was consumed without being kept.
    Skipped(usize),
}

async fn read_line<R>(
    reader: &mut BufReader<R>,
    buf: &mut Vec<u8>,
    limit: usize,
) -> io::Result<ReadLine>
where
    R: AsyncRead + Unpin,
{
    let read = (&mut *reader)
        .take(limit as u64)
        .read_until(b'\n', buf)
        .await?;
    if read == 0 {
        return Ok(ReadLine::End);
    }
    if read < limit || buf.ends_with(b"\n") {
        return Ok(ReadLine::Line);
    }

    let mut size = read;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                size += end + 1;
                break;
            }
            None => {
                let n = available.len();
                reader.consume(n);
                size += n;
            }
        }
    }
    Ok(ReadLine::Skipped(size))
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const MAX: usize = 10;

    #[derive(Default)]
    struct RecordingWriter {
        lines: Mutex<Vec<String>>,
        capacity: Option<usize>,
        largest: AtomicUsize,
    }

    #[async_trait]
    impl LogWriter for RecordingWriter {
        async fn write(&self, message: Bytes) -> Result<(), WriteError> {
            self.largest.fetch_max(message.len(), Ordering::SeqCst);
            let mut lines = self.lines.lock().unwrap();
            if self.capacity.is_some_and(|c| lines.len() >= c) {
                return Err(WriteError::Closed);
            }
            if message.len() > MAX {
                return Err(WriteError::TooLarge {
                    size: message.len(),
                    max: MAX,
                });
            }
            lines.push(String::from_utf8(message.to_vec()).unwrap());
            Ok(())
        }

        async fn close(&self) -> Result<(), WriteError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_lines_are_split_and_trimmed() {
        let writer = RecordingWriter::default();
        let input = &b"one\r\ntwo\n\n\r\nthree"[..];
        let n = forward_lines(input, &writer, MAX, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(*writer.lines.lock().unwrap(), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_too_large_lines_are_skipped() {
        let writer = RecordingWriter::default();
        let input = &b"short\nthis line is too long\nend\n"[..];
        let n = forward_lines(input, &writer, MAX, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(*writer.lines.lock().unwrap(), vec!["short", "end"]);
    }

    #[tokio::test]
    async fn test_overlong_line_is_skipped_without_buffering() {
        let writer = RecordingWriter::default();
        let mut input = b"ok\n".to_vec();
        input.extend(std::iter::repeat(b'x').take(1 << 20));
        input.extend_from_slice(b"\nafter\r\n");
        let n = forward_lines(&input[..], &writer, MAX, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(*writer.lines.lock().unwrap(), vec!["ok", "after"]);
        assert!(writer.largest.load(Ordering::SeqCst) <= MAX);
    }

    #[tokio::test]
    async fn test_line_at_the_limit_is_forwarded() {
        let writer = RecordingWriter::default();
        let input = &b"0123456789\r\n0123456789\nend"[..];
        let n = forward_lines(input, &writer, MAX, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(
            *writer.lines.lock().unwrap(),
            vec!["0123456789", "0123456789", "end"]
        );
    }

    #[tokio::test]
    async fn test_overlong_last_line_without_newline() {
        let writer = RecordingWriter::default();
        let input = &b"ok\nthis one never ends"[..];
        let n = forward_lines(input, &writer, MAX, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(writer.largest.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stops_when_writer_closed() {
        let writer = RecordingWriter {
            capacity: Some(1),
            ..RecordingWriter::default()
        };
        let n = forward_lines(&b"a\nb\nc\n"[..], &writer, MAX, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_pending_read() {
        let (client, server) = tokio::io::duplex(64);
        let writer = RecordingWriter::default();
        let cancel_token = CancellationToken::new();
        let cancel = cancel_token.clone();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancel.cancel();
        });
        // nothing is ever written, only the cancellation ends the loop
        let n = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            forward_lines(server, &writer, MAX, &cancel_token),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(n, 0);
        canceller.await.unwrap();
        drop(client);
    }
}
