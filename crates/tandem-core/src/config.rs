//! Configuration system for Tandem.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $TANDEM_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/tandem/config.toml
//!   3. ~/.config/tandem/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::message::{max_chunk_data, WireProfile};
use crate::wire::{DEFAULT_MAX_FRAME_LEN, DEFAULT_PORT};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TandemConfig {
    pub network: NetworkConfig,
    pub protocol: ProtocolConfig,
    pub relay: RelayPolicy,
    pub transfer: TransferSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the relay listens on.
    pub bind_addr: String,
    /// TCP port. 0 = OS-assigned.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Encoding of file metadata, chunk and progress bodies.
    pub profile: WireProfile,
    /// Largest frame body a connection may declare.
    pub max_frame_len: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayPolicy {
    /// Overwrite the sender field of file and progress bodies with the
    /// registered name instead of forwarding them verbatim.
    pub stamp_file_sender: bool,
    /// Tell remaining peers when someone leaves.
    pub announce_departures: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Where received files are written.
    pub download_dir: PathBuf,
    /// Bytes per outgoing file chunk.
    pub chunk_size: usize,
    /// Emit a progress report every N chunks (and always on the last one).
    pub progress_every: u32,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            profile: WireProfile::Legacy,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./downloads"),
            chunk_size: 4096,
            progress_every: 10,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("tandem")
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
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TandemConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            TandemConfig::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reject settings under which a file chunk could never be relayed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let room = max_chunk_data(self.protocol.max_frame_len);
        if room == 0 {
            return Err(ConfigError::Invalid {
                field: "protocol.max_frame_len",
                reason: format!(
                    "{} leaves no room for file chunk data",
                    self.protocol.max_frame_len
                ),
            });
        }
        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > room {
            return Err(ConfigError::Invalid {
                field: "transfer.chunk_size",
                reason: format!(
                    "{} must be between 1 and {room} for max_frame_len {}",
                    self.transfer.chunk_size, self.protocol.max_frame_len
                ),
            });
        }
        Ok(())
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TANDEM_CONFIG")
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
            let text = toml::to_string_pretty(&TandemConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply TANDEM_* overrides. `lookup` is `std::env::var` outside tests.
    /// Unparseable values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("TANDEM_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Some(p) = lookup("TANDEM_NETWORK__PORT").and_then(|v| v.parse().ok()) {
            self.network.port = p;
        }
        if let Some(p) = lookup("TANDEM_PROTOCOL__PROFILE").and_then(|v| v.parse().ok()) {
            self.protocol.profile = p;
        }
        if let Some(n) = lookup("TANDEM_PROTOCOL__MAX_FRAME_LEN").and_then(|v| v.parse().ok()) {
            self.protocol.max_frame_len = n;
        }
        if let Some(v) = lookup("TANDEM_RELAY__STAMP_FILE_SENDER") {
            self.relay.stamp_file_sender = v == "true" || v == "1";
        }
        if let Some(v) = lookup("TANDEM_RELAY__ANNOUNCE_DEPARTURES") {
            self.relay.announce_departures = v == "true" || v == "1";
        }
        if let Some(v) = lookup("TANDEM_TRANSFER__DOWNLOAD_DIR") {
            self.transfer.download_dir = PathBuf::from(v);
        }
        if let Some(n) = lookup("TANDEM_TRANSFER__CHUNK_SIZE").and_then(|v| v.parse().ok()) {
            self.transfer.chunk_size = n;
        }
    }
}
