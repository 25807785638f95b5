//! Payload dispatcher — routes completed payloads to display sinks or disk.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::io::AsyncWriteExt;

use loralink_core::classify::sanitize_file_name;
use loralink_core::{classify, Classification, FileKind, LinkError, LinkMetrics, MessageRecord};

use crate::reassembly::CompletedTransfer;

/// Suffixes tried before giving up on a free file name.
const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// A text message ready for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceivedMessage {
    pub origin: String,
    pub sequence: u32,
    pub signal_quality: Option<f64>,
    pub distance: Option<f64>,
    pub text: String,
    pub received_at_ms: u64,
}

impl ReceivedMessage {
    fn new(origin: String, sequence: u32, metrics: LinkMetrics, text: String) -> Self {
        Self {
            origin,
            sequence,
            signal_quality: metrics.signal_quality,
            distance: metrics.distance,
            text,
            received_at_ms: unix_millis(),
        }
    }
}

/// A payload written to the output directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedFile {
    pub origin: String,
    pub sequence: u32,
    pub path: PathBuf,
    pub bytes: usize,
    pub kind: FileKind,
    /// BLAKE3 of the stored content, hex.
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    Message(ReceivedMessage),
    File(SavedFile),
}

/// Receives every text message the dispatcher classifies.
///
/// Called from the receive worker; implementations must not block.
pub trait DisplaySink: Send + Sync {
    fn display(&self, message: &ReceivedMessage);
}

#[derive(Clone)]
pub struct PayloadDispatcher {
    output_dir: PathBuf,
    sinks: Vec<Arc<dyn DisplaySink>>,
}

impl PayloadDispatcher {
    /// The directory is created lazily, on the first file.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DisplaySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn add_sink(&mut self, sink: Arc<dyn DisplaySink>) {
        self.sinks.push(sink);
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Single-record messages skip classification: they are text by construction.
    pub fn dispatch_message(&self, record: MessageRecord) -> ReceivedMessage {
        let message = ReceivedMessage::new(record.origin, record.sequence, record.metrics, record.text);
        self.show(&message);
        message
    }

    pub async fn dispatch_completed(
        &self,
        done: CompletedTransfer,
    ) -> Result<Dispatched, LinkError> {
        let CompletedTransfer { key, metrics, payload, .. } = done;

        match classify(&payload) {
            Classification::Message(text) => {
                let message = ReceivedMessage::new(key.origin, key.sequence, metrics, text.to_owned());
                self.show(&message);
                Ok(Dispatched::Message(message))
            }
            Classification::File {
                kind,
                embedded_name,
                content,
            } => {
                let name = embedded_name
                    .and_then(sanitize_file_name)
                    .unwrap_or_else(|| {
                        format!(
                            "{}_{}_{}.{}",
                            origin_for_file_name(&key.origin),
                            key.sequence,
                            unix_millis(),
                            kind.extension()
                        )
                    });
                let path = self.write_new_file(&name, content).await?;
                let saved = SavedFile {
                    origin: key.origin,
                    sequence: key.sequence,
                    path,
                    bytes: content.len(),
                    kind,
                    content_hash: hex::encode(blake3::hash(content).as_bytes()),
                };
                tracing::info!(
                    origin = %saved.origin,
                    sequence = saved.sequence,
                    bytes = saved.bytes,
                    path = %saved.path.display(),
                    "file received"
                );
                Ok(Dispatched::File(saved))
            }
        }
    }

    fn show(&self, message: &ReceivedMessage) {
        tracing::info!(
            origin = %message.origin,
            sequence = message.sequence,
            bytes = message.text.len(),
            "message received"
        );
        for sink in &self.sinks {
            sink.display(message);
        }
    }

    /// Write `content` under `name`, adding `-1`, `-2`, … before the
    /// extension until the name is free. Never overwrites.
    async fn write_new_file(&self, name: &str, content: &[u8]) -> Result<PathBuf, LinkError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| LinkError::WriteFailed(self.output_dir.clone(), e))?;

        let (stem, ext) = split_extension(name);
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = match (attempt, ext) {
                (0, _) => name.to_owned(),
                (n, Some(ext)) => format!("{stem}-{n}.{ext}"),
                (n, None) => format!("{stem}-{n}"),
            };
            let path = self.output_dir.join(candidate);
            if path.parent() != Some(self.output_dir.as_path()) {
                return Err(LinkError::WriteFailed(
                    path,
                    io::Error::new(io::ErrorKind::InvalidInput, "file name leaves the output directory"),
                ));
            }

            let mut file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(LinkError::WriteFailed(path, e)),
            };

            let written = async {
                file.write_all(content).await?;
                file.flush().await
            }
            .await;
            return match written {
                Ok(()) => Ok(path),
                Err(e) => {
                    let _ = tokio::fs::remove_file(&path).await;
                    Err(LinkError::WriteFailed(path, e))
                }
            };
        }

        let path = self.output_dir.join(name);
        Err(LinkError::WriteFailed(
            path,
            io::Error::new(io::ErrorKind::AlreadyExists, "no free file name"),
        ))
    }
}

/// Origins come off the wire; only `[A-Za-z0-9._-]` survives into a file name.
fn origin_for_file_name(origin: &str) -> String {
    let kept: String = origin
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let kept = kept.trim_matches('.');
    if kept.is_empty() {
        "peer".to_owned()
    } else {
        kept.to_owned()
    }
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

pub(crate) fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
