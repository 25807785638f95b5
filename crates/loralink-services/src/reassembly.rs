//! Reassembly engine — collects FRAG records per transfer key until every
//! index has arrived, then decodes the payload.
//!
//! The engine is owned by the receive worker and never shared, so it takes
//! `&mut self` and the current time as an argument instead of locking and
//! reading the clock itself.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;

use loralink_core::config::ReassemblyConfig;
use loralink_core::{codec, FragmentRecord, LinkError, LinkMetrics};

/// Identifies one transfer: the sender plus its sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TransferKey {
    pub origin: String,
    pub sequence: u32,
}

impl fmt::Display for TransferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.origin, self.sequence)
    }
}

#[derive(Debug, Clone)]
pub struct ReassemblySettings {
    pub chunk_timeout: Duration,
    pub tombstone_ttl: Duration,
    pub max_pending_transfers: usize,
    pub max_fragments_per_transfer: u32,
}

impl From<&ReassemblyConfig> for ReassemblySettings {
    fn from(config: &ReassemblyConfig) -> Self {
        Self {
            chunk_timeout: config.chunk_timeout(),
            tombstone_ttl: config.tombstone_ttl(),
            max_pending_transfers: config.max_pending_transfers,
            max_fragments_per_transfer: config.max_fragments_per_transfer,
        }
    }
}

impl Default for ReassemblySettings {
    fn default() -> Self {
        Self::from(&ReassemblyConfig::default())
    }
}

struct PartialTransfer {
    total: u32,
    /// Ordered by index so completion is a straight concatenation.
    received: BTreeMap<u32, String>,
    first_seen_at: Instant,
    last_seen_at: Instant,
    metrics: LinkMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Expired,
}

/// A finished or evicted key, kept for a while so late duplicates are dropped
/// instead of opening a transfer that can never complete.
struct Tombstone {
    total: u32,
    recorded_at: Instant,
    outcome: Outcome,
}

/// A fully received and decoded payload.
#[derive(Debug, Clone)]
pub struct CompletedTransfer {
    pub key: TransferKey,
    /// Metrics of the last fragment received.
    pub metrics: LinkMetrics,
    pub payload: Bytes,
    pub fragments: u32,
    pub elapsed: Duration,
}

/// A transfer evicted by the sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredTransfer {
    pub key: TransferKey,
    pub received: usize,
    pub total: u32,
}

impl ExpiredTransfer {
    pub fn into_error(self) -> LinkError {
        LinkError::IncompleteTransferExpired {
            origin: self.key.origin,
            sequence: self.key.sequence,
            received: self.received,
            total: self.total,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The key finished recently with the same total.
    StaleLate,
    /// Index outside the total recorded for the key.
    IndexOutOfRange,
    TooManyFragments,
    TooManyPending,
}

/// What happened to one ingested fragment.
#[derive(Debug)]
pub enum Ingest {
    Pending { received: usize, total: u32 },
    Complete(CompletedTransfer),
    /// Every index arrived but the concatenated text is not valid base64.
    Corrupt { key: TransferKey, error: LinkError },
    Dropped(DropReason),
}

/// Snapshot of one transfer still being collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferProgress {
    pub key: TransferKey,
    pub received: usize,
    pub total: u32,
    pub age_ms: u64,
}

pub struct Reassembler {
    settings: ReassemblySettings,
    pending: HashMap<TransferKey, PartialTransfer>,
    tombstones: HashMap<TransferKey, Tombstone>,
}

impl Reassembler {
    pub fn new(settings: ReassemblySettings) -> Self {
        Self {
            settings,
            pending: HashMap::new(),
            tombstones: HashMap::new(),
        }
    }

    pub fn ingest(&mut self, fragment: FragmentRecord, now: Instant) -> Ingest {
        let key = TransferKey {
            origin: fragment.origin,
            sequence: fragment.sequence,
        };

        let Some(partial) = self.pending.get_mut(&key) else {
            return self.start(key, fragment.index, fragment.total, fragment.metrics, fragment.chunk, now);
        };

        if fragment.total != partial.total {
            tracing::warn!(
                %key,
                expected = partial.total,
                got = fragment.total,
                "fragment total disagrees with transfer, keeping first total"
            );
            if fragment.index >= partial.total {
                return Ingest::Dropped(DropReason::IndexOutOfRange);
            }
        }

        if partial.received.insert(fragment.index, fragment.chunk).is_some() {
            tracing::trace!(%key, index = fragment.index, "duplicate fragment");
        }
        partial.last_seen_at = now;
        partial.metrics = fragment.metrics;

        self.check_complete(key, now)
    }

    fn start(
        &mut self,
        key: TransferKey,
        index: u32,
        total: u32,
        metrics: LinkMetrics,
        chunk: String,
        now: Instant,
    ) -> Ingest {
        if let Some(tombstone) = self.tombstones.get(&key) {
            if tombstone.total == total {
                tracing::debug!(%key, outcome = ?tombstone.outcome, "late fragment for finished transfer");
                return Ingest::Dropped(DropReason::StaleLate);
            }
            tracing::debug!(%key, "sequence reused with a new total");
            self.tombstones.remove(&key);
        }

        if total > self.settings.max_fragments_per_transfer {
            tracing::warn!(
                %key,
                total,
                limit = self.settings.max_fragments_per_transfer,
                "transfer rejected: too many fragments"
            );
            return Ingest::Dropped(DropReason::TooManyFragments);
        }
        if self.pending.len() >= self.settings.max_pending_transfers {
            tracing::warn!(
                %key,
                limit = self.settings.max_pending_transfers,
                "transfer rejected: too many transfers in progress"
            );
            return Ingest::Dropped(DropReason::TooManyPending);
        }

        tracing::debug!(%key, total, "transfer started");
        let mut received = BTreeMap::new();
        received.insert(index, chunk);
        self.pending.insert(
            key.clone(),
            PartialTransfer {
                total,
                received,
                first_seen_at: now,
                last_seen_at: now,
                metrics,
            },
        );
        self.check_complete(key, now)
    }

    fn check_complete(&mut self, key: TransferKey, now: Instant) -> Ingest {
        let (received, total) = match self.pending.get(&key) {
            Some(p) => (p.received.len(), p.total),
            None => return Ingest::Dropped(DropReason::StaleLate),
        };
        // indices are unique and below total, so the count is coverage
        if received < total as usize {
            tracing::debug!(%key, received, total, "fragment stored");
            return Ingest::Pending { received, total };
        }

        let Some(partial) = self.pending.remove(&key) else {
            return Ingest::Dropped(DropReason::StaleLate);
        };
        self.tombstones.insert(
            key.clone(),
            Tombstone {
                total,
                recorded_at: now,
                outcome: Outcome::Completed,
            },
        );

        match codec::decode(partial.received.values()) {
            Ok(payload) => {
                let elapsed = now.saturating_duration_since(partial.first_seen_at);
                tracing::info!(
                    %key,
                    fragments = total,
                    bytes = payload.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "transfer complete"
                );
                Ingest::Complete(CompletedTransfer {
                    key,
                    metrics: partial.metrics,
                    payload: Bytes::from(payload),
                    fragments: total,
                    elapsed,
                })
            }
            Err(error) => {
                tracing::warn!(%key, %error, "transfer discarded: payload does not decode");
                Ingest::Corrupt { key, error }
            }
        }
    }

    /// Evict transfers idle longer than the chunk timeout and forget old
    /// tombstones.
    pub fn sweep(&mut self, now: Instant) -> Vec<ExpiredTransfer> {
        let timeout = self.settings.chunk_timeout;
        let mut expired = Vec::new();

        self.pending.retain(|key, partial| {
            let idle = now.saturating_duration_since(partial.last_seen_at);
            if idle <= timeout {
                return true;
            }
            tracing::warn!(
                %key,
                received = partial.received.len(),
                total = partial.total,
                idle_secs = idle.as_secs(),
                "removing stale transfer (timed out)"
            );
            expired.push(ExpiredTransfer {
                key: key.clone(),
                received: partial.received.len(),
                total: partial.total,
            });
            false
        });

        for e in &expired {
            self.tombstones.insert(
                e.key.clone(),
                Tombstone {
                    total: e.total,
                    recorded_at: now,
                    outcome: Outcome::Expired,
                },
            );
        }

        let ttl = self.settings.tombstone_ttl;
        self.tombstones
            .retain(|_, t| now.saturating_duration_since(t.recorded_at) <= ttl);

        expired
    }

    pub fn in_progress(&self, now: Instant) -> Vec<TransferProgress> {
        let mut out: Vec<_> = self
            .pending
            .iter()
            .map(|(key, p)| TransferProgress {
                key: key.clone(),
                received: p.received.len(),
                total: p.total,
                age_ms: now.saturating_duration_since(p.first_seen_at).as_millis() as u64,
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop every partial transfer and tombstone without emitting anything.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.tombstones.clear();
    }
}
