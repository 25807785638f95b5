//! loralink-services — the transfer protocol on top of a line channel.
//!
//! [`Session`] ties the pieces together: a receive worker feeding the
//! [`Reassembler`] and [`PayloadDispatcher`], and serialised sends through
//! the transfer encoder.

pub mod channel;
pub mod dispatch;
pub mod event;
pub mod message_store;
pub mod reassembly;
pub mod session;
pub mod transfer;

pub use channel::{LineReader, LineWriter, ReadOutcome};
pub use dispatch::{DisplaySink, Dispatched, PayloadDispatcher, ReceivedMessage, SavedFile};
pub use event::SessionEvent;
pub use message_store::MessageInbox;
pub use reassembly::{
    CompletedTransfer, DropReason, ExpiredTransfer, Ingest, ReassemblySettings, Reassembler,
    TransferKey, TransferProgress,
};
pub use session::Session;
pub use transfer::{SequenceCounter, TransferReport, TransferSettings};
