//! loralink-core — wire records, fragment codec, payload classification
//! and configuration. Every other LoRaLink crate depends on this one.

pub mod classify;
pub mod codec;
pub mod config;
pub mod error;
pub mod record;

pub use classify::{classify, Classification, FileKind};
pub use config::LinkConfig;
pub use error::LinkError;
pub use record::{FragmentRecord, LinkMetrics, MessageRecord, Record};
