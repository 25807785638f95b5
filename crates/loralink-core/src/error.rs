//! Errors surfaced by the transfer protocol.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("corrupt fragment encoding: {0}")]
    CorruptEncoding(#[from] base64::DecodeError),

    /// The whole transfer must be retried; nothing resumes a partial send.
    #[error("transmit failed after {sent} of {total} records: {reason}")]
    TransmitFailed {
        sent: usize,
        total: usize,
        reason: String,
    },

    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),

    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),

    #[error("transfer {origin}/{sequence} expired with {received} of {total} fragments")]
    IncompleteTransferExpired {
        origin: String,
        sequence: u32,
        received: usize,
        total: u32,
    },

    #[error("session is already open")]
    AlreadyOpen,

    #[error("session is not open")]
    NotOpen,

    #[error("failed to open {port}: {reason}")]
    ConnectFailed { port: String, reason: String },
}

impl LinkError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }
}
