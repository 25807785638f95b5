//! Configuration system for LoRaLink.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $LORALINK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/loralink/config.toml
//!   3. ~/.config/loralink/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::LinkError;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub serial: SerialConfig,
    pub transfer: TransferConfig,
    pub reassembly: ReassemblyConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial device the modem is attached to.
    pub port: String,
    pub baud: u32,
    /// How long one line read waits before the receive loop wakes up.
    pub read_timeout_ms: u64,
    /// Pause after opening the port; many modem boards reset on open.
    pub settle_ms: u64,
    /// Lines longer than this are discarded unread.
    pub max_line_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Identifier written into every outgoing record. No commas or line breaks.
    pub origin: String,
    /// Maximum base64 characters per FRAG record.
    pub max_chunk_chars: usize,
    /// Largest text (UTF-8 bytes) sent as a single MSG record.
    pub max_message_bytes: usize,
    /// Pause between consecutive records of one transfer.
    pub inter_record_delay_ms: u64,
    /// First sequence number. Unset = random.
    pub initial_sequence: Option<u32>,
    /// Prefix file payloads with their name so the receiver can keep it.
    pub embed_file_name: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReassemblyConfig {
    /// Max gap between fragments of one transfer before it is discarded.
    pub chunk_timeout_secs: u64,
    /// How often the receive loop sweeps for stale transfers.
    pub sweep_interval_ms: u64,
    /// How long completed or expired keys are remembered to drop late fragments.
    pub tombstone_ttl_secs: u64,
    pub max_pending_transfers: usize,
    pub max_fragments_per_transfer: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Where received files are written. Created on demand.
    pub dir: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            transfer: TransferConfig::default(),
            reassembly: ReassemblyConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud: 115_200,
            read_timeout_ms: 1_000,
            settle_ms: 2_000,
            max_line_bytes: 64 * 1024,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            origin: "node".to_string(),
            max_chunk_chars: 200,
            max_message_bytes: 200,
            inter_record_delay_ms: 250,
            initial_sequence: None,
            embed_file_name: false,
        }
    }
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            chunk_timeout_secs: 60,
            sweep_interval_ms: 1_000,
            tombstone_ttl_secs: 600,
            max_pending_transfers: 64,
            max_fragments_per_transfer: 10_000,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: data_dir().join("received"),
        }
    }
}

// ── Durations ─────────────────────────────────────────────────────────────────

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl TransferConfig {
    pub fn inter_record_delay(&self) -> Duration {
        Duration::from_millis(self.inter_record_delay_ms)
    }
}

impl ReassemblyConfig {
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn tombstone_ttl(&self) -> Duration {
        Duration::from_secs(self.tombstone_ttl_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("loralink")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("loralink")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl LinkConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            LinkConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("LORALINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&LinkConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply LORALINK_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LORALINK_SERIAL__PORT") {
            self.serial.port = v;
        }
        if let Some(v) = env_parse("LORALINK_SERIAL__BAUD") {
            self.serial.baud = v;
        }
        if let Ok(v) = std::env::var("LORALINK_TRANSFER__ORIGIN") {
            self.transfer.origin = v;
        }
        if let Some(v) = env_parse("LORALINK_TRANSFER__MAX_CHUNK_CHARS") {
            self.transfer.max_chunk_chars = v;
        }
        if let Some(v) = env_parse("LORALINK_TRANSFER__INTER_RECORD_DELAY_MS") {
            self.transfer.inter_record_delay_ms = v;
        }
        if let Some(v) = env_parse("LORALINK_REASSEMBLY__CHUNK_TIMEOUT_SECS") {
            self.reassembly.chunk_timeout_secs = v;
        }
        if let Ok(v) = std::env::var("LORALINK_OUTPUT__DIR") {
            self.output.dir = PathBuf::from(v);
        }
    }

    /// Reject settings the protocol cannot run with.
    pub fn validate(&self) -> Result<(), LinkError> {
        let origin = &self.transfer.origin;
        if origin.is_empty() {
            return Err(LinkError::invalid("transfer.origin must not be empty"));
        }
        if origin.contains(|c: char| matches!(c, ',' | '\r' | '\n')) {
            return Err(LinkError::invalid(
                "transfer.origin must not contain commas or line breaks",
            ));
        }
        if self.transfer.max_chunk_chars == 0 {
            return Err(LinkError::invalid("transfer.max_chunk_chars must be at least 1"));
        }
        if self.transfer.max_message_bytes == 0 {
            return Err(LinkError::invalid("transfer.max_message_bytes must be at least 1"));
        }
        if self.serial.read_timeout_ms == 0 {
            return Err(LinkError::invalid("serial.read_timeout_ms must be at least 1"));
        }
        if self.serial.max_line_bytes == 0 {
            return Err(LinkError::invalid("serial.max_line_bytes must be at least 1"));
        }
        if self.reassembly.chunk_timeout_secs == 0 {
            return Err(LinkError::invalid("reassembly.chunk_timeout_secs must be at least 1"));
        }
        if self.reassembly.max_pending_transfers == 0 {
            return Err(LinkError::invalid(
                "reassembly.max_pending_transfers must be at least 1",
            ));
        }
        if self.reassembly.max_fragments_per_transfer == 0 {
            return Err(LinkError::invalid(
                "reassembly.max_fragments_per_transfer must be at least 1",
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
