//! Transfer encoder — the transmit path.
//!
//! Small single-line texts go out as one MSG record. Everything else is
//! base64-encoded, cut into FRAG records of bounded width and written in
//! index order with a pause between records so the radio's duty cycle is
//! respected. There are no acknowledgements: a failed write aborts the
//! transfer and the caller retries it as a whole.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWrite;

use loralink_core::config::TransferConfig;
use loralink_core::{codec, FragmentRecord, LinkError, LinkMetrics, MessageRecord, Record};

use crate::channel::LineWriter;

/// Per-session sequence numbers. Wraps to 0 after `u32::MAX`.
#[derive(Debug)]
pub struct SequenceCounter(AtomicU32);

impl SequenceCounter {
    pub fn new(start: u32) -> Self {
        Self(AtomicU32::new(start))
    }

    /// Start somewhere random so a restarted sender does not reuse the keys
    /// receivers still remember from its previous run.
    pub fn random() -> Self {
        Self::new(rand::random())
    }

    pub fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub origin: String,
    pub max_chunk_chars: usize,
    pub max_message_bytes: usize,
    pub inter_record_delay: Duration,
}

impl From<&TransferConfig> for TransferSettings {
    fn from(config: &TransferConfig) -> Self {
        Self {
            origin: config.origin.clone(),
            max_chunk_chars: config.max_chunk_chars,
            max_message_bytes: config.max_message_bytes,
            inter_record_delay: config.inter_record_delay(),
        }
    }
}

/// What one completed transfer put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    pub sequence: u32,
    pub records: usize,
    /// Payload bytes, before encoding.
    pub bytes: usize,
}

/// True when `text` can travel as a single MSG record.
///
/// Receivers trim each line, so text with surrounding whitespace goes
/// through the fragment path to arrive unchanged.
pub fn fits_single_record(text: &str, max_message_bytes: usize) -> bool {
    text.len() <= max_message_bytes
        && text.trim() == text
        && !text.contains(|c: char| c == '\n' || c == '\r')
}

/// Build the ordered FRAG records for one payload.
pub fn fragment_records(
    payload: &[u8],
    origin: &str,
    sequence: u32,
    max_chunk_chars: usize,
) -> Result<Vec<Record>, LinkError> {
    let chunks = codec::encode(payload, max_chunk_chars)?;
    let total = u32::try_from(chunks.len()).map_err(|_| {
        LinkError::InvalidConfiguration(format!(
            "payload of {} bytes needs more than u32::MAX fragments",
            payload.len()
        ))
    })?;

    Ok(chunks
        .into_iter()
        .zip(0u32..)
        .map(|(chunk, index)| {
            Record::Fragment(FragmentRecord {
                origin: origin.to_owned(),
                sequence,
                index,
                total,
                metrics: LinkMetrics::OUTGOING,
                chunk,
            })
        })
        .collect())
}

/// Send a text, as one MSG record when it fits and as fragments otherwise.
pub async fn send_text<W: AsyncWrite + Unpin>(
    text: &str,
    writer: &mut LineWriter<W>,
    sequences: &SequenceCounter,
    settings: &TransferSettings,
) -> Result<TransferReport, LinkError> {
    let sequence = sequences.next();

    if !fits_single_record(text, settings.max_message_bytes) {
        return send_bytes(
            text.as_bytes(),
            writer,
            &settings.origin,
            sequence,
            settings.max_chunk_chars,
            settings.inter_record_delay,
        )
        .await;
    }

    let record = Record::Message(MessageRecord {
        origin: settings.origin.clone(),
        sequence,
        metrics: LinkMetrics::OUTGOING,
        text: text.to_owned(),
    });
    writer
        .write_record(&record)
        .await
        .map_err(|e| LinkError::TransmitFailed {
            sent: 0,
            total: 1,
            reason: e.to_string(),
        })?;

    tracing::info!(origin = %settings.origin, sequence, bytes = text.len(), "message sent");
    Ok(TransferReport {
        sequence,
        records: 1,
        bytes: text.len(),
    })
}

/// Send a payload as FRAG records, in index order, pausing between records.
pub async fn send_bytes<W: AsyncWrite + Unpin>(
    payload: &[u8],
    writer: &mut LineWriter<W>,
    origin: &str,
    sequence: u32,
    max_chunk_chars: usize,
    inter_record_delay: Duration,
) -> Result<TransferReport, LinkError> {
    let records = fragment_records(payload, origin, sequence, max_chunk_chars)?;
    let total = records.len();

    tracing::info!(
        origin,
        sequence,
        bytes = payload.len(),
        fragments = total,
        "transfer started"
    );

    for (i, record) in records.iter().enumerate() {
        if i > 0 && !inter_record_delay.is_zero() {
            tokio::time::sleep(inter_record_delay).await;
        }
        if let Err(e) = writer.write_record(record).await {
            tracing::warn!(origin, sequence, sent = i, total, error = %e, "transfer aborted");
            return Err(LinkError::TransmitFailed {
                sent: i,
                total,
                reason: e.to_string(),
            });
        }
        tracing::debug!(origin, sequence, index = i, total, "fragment sent");
    }

    tracing::info!(origin, sequence, fragments = total, "transfer sent");
    Ok(TransferReport {
        sequence,
        records: total,
        bytes: payload.len(),
    })
}
