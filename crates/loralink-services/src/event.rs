//! Events published by a running session.

use serde::Serialize;

use crate::dispatch::{ReceivedMessage, SavedFile};
use crate::reassembly::ExpiredTransfer;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    MessageReceived(ReceivedMessage),
    FileReceived(SavedFile),
    /// The sweep evicted an incomplete transfer; `error` is the
    /// `IncompleteTransferExpired` message.
    TransferExpired {
        origin: String,
        sequence: u32,
        received: usize,
        total: u32,
        error: String,
    },
    /// Every fragment arrived but the payload was not valid base64.
    DecodeFailed {
        origin: String,
        sequence: u32,
        error: String,
    },
    DispatchFailed {
        origin: String,
        sequence: u32,
        error: String,
    },
    /// The transport ended or failed; the session is closed.
    ChannelClosed { reason: String },
}

impl From<ExpiredTransfer> for SessionEvent {
    fn from(e: ExpiredTransfer) -> Self {
        let (origin, sequence) = (e.key.origin.clone(), e.key.sequence);
        let (received, total) = (e.received, e.total);
        Self::TransferExpired {
            origin,
            sequence,
            received,
            total,
            error: e.into_error().to_string(),
        }
    }
}
