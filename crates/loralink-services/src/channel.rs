//! Line channel — line-at-a-time I/O over the two halves of a byte transport.
//!
//! The transport is a serial port in production and an in-memory pipe in
//! tests. Reads wait at most one timeout per call and keep any partially
//! received line between calls, so a line that straddles a timeout (or a
//! cancelled read) is never lost.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use loralink_core::Record;

/// Result of one timed read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// One line, terminator removed, invalid UTF-8 replaced.
    Line(String),
    /// Nothing complete arrived within the timeout.
    Timeout,
    /// The peer closed the transport.
    Closed,
}

pub struct LineReader<R> {
    inner: BufReader<R>,
    pending: Vec<u8>,
    max_line_bytes: usize,
    /// Set while skipping the rest of an over-long line.
    discarding: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R, max_line_bytes: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            pending: Vec::new(),
            max_line_bytes,
            discarding: false,
        }
    }

    pub async fn read_line(&mut self, timeout: Duration) -> io::Result<ReadOutcome> {
        match tokio::time::timeout(timeout, self.next_line()).await {
            Err(_) => Ok(ReadOutcome::Timeout),
            Ok(Ok(Some(line))) => Ok(ReadOutcome::Line(line)),
            Ok(Ok(None)) => Ok(ReadOutcome::Closed),
            Ok(Err(e)) => Err(e),
        }
    }

    // Cancel-safe: bytes only leave the BufReader after they are copied
    // into `pending`, and `fill_buf` consumes nothing.
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if self.discarding || self.pending.is_empty() {
                    self.pending.clear();
                    self.discarding = false;
                    return Ok(None);
                }
                return Ok(Some(self.take_line()));
            }

            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    let keep = !self.discarding && self.pending.len() + pos <= self.max_line_bytes;
                    if keep {
                        self.pending.extend_from_slice(&available[..pos]);
                    }
                    self.inner.consume(pos + 1);
                    if keep {
                        return Ok(Some(self.take_line()));
                    }
                    tracing::debug!(limit = self.max_line_bytes, "discarded over-long line");
                    self.pending.clear();
                    self.discarding = false;
                }
                None => {
                    let len = available.len();
                    if !self.discarding && self.pending.len() + len <= self.max_line_bytes {
                        self.pending.extend_from_slice(available);
                    } else {
                        self.pending.clear();
                        self.discarding = true;
                    }
                    self.inner.consume(len);
                }
            }
        }
    }

    fn take_line(&mut self) -> String {
        let raw = std::mem::take(&mut self.pending);
        let raw = raw.strip_suffix(b"\r").unwrap_or(&raw);
        String::from_utf8_lossy(raw).into_owned()
    }
}

pub struct LineWriter<W> {
    inner: W,
    lines_written: u64,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: writer,
            lines_written: 0,
        }
    }

    /// Lines fully written and flushed since creation.
    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    /// Write `line` plus a `\n` terminator and flush.
    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.inner.write_all(&buf).await?;
        self.inner.flush().await?;
        self.lines_written += 1;
        Ok(())
    }

    pub async fn write_record(&mut self, record: &Record) -> io::Result<()> {
        self.write_line(&record.to_string()).await
    }
}
