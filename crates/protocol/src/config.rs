//! Client configuration.
//!
//! Stored as TOML with a `[pipeline]` and a `[pool]` table:
//! - Linux: `$XDG_CONFIG_HOME/gridlink/client.toml` (or `~/.config/...`)
//! - Windows: `%APPDATA%/gridlink/client.toml`
//!
//! Every field has a default, so a partial file is valid.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::negotiation::SslNegotiationPolicy;

/// Largest buffer a single data frame may carry.
pub const MAX_STREAM_BUFFER_SIZE: usize = 32 * 1024 * 1024;

/// Errors from loading, saving or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Cipher selector. Only the AES-CBC family is implemented; any other name
/// read from configuration or chosen by a server is kept verbatim so the
/// codec factory can reject it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EncryptionAlgorithm {
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
    Unsupported(String),
}

impl EncryptionAlgorithm {
    pub fn name(&self) -> &str {
        match self {
            EncryptionAlgorithm::Aes128Cbc => "AES-128-CBC",
            EncryptionAlgorithm::Aes192Cbc => "AES-192-CBC",
            EncryptionAlgorithm::Aes256Cbc => "AES-256-CBC",
            EncryptionAlgorithm::Unsupported(name) => name,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, EncryptionAlgorithm::Unsupported(_))
    }

    /// Key length in bits implied by the algorithm name.
    pub fn key_bits(&self) -> Option<u32> {
        match self {
            EncryptionAlgorithm::Aes128Cbc => Some(128),
            EncryptionAlgorithm::Aes192Cbc => Some(192),
            EncryptionAlgorithm::Aes256Cbc => Some(256),
            EncryptionAlgorithm::Unsupported(_) => None,
        }
    }
}

impl Default for EncryptionAlgorithm {
    fn default() -> Self {
        EncryptionAlgorithm::Aes256Cbc
    }
}

impl From<String> for EncryptionAlgorithm {
    fn from(name: String) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "AES-128-CBC" => EncryptionAlgorithm::Aes128Cbc,
            "AES-192-CBC" => EncryptionAlgorithm::Aes192Cbc,
            "AES-256-CBC" => EncryptionAlgorithm::Aes256Cbc,
            _ => EncryptionAlgorithm::Unsupported(name),
        }
    }
}

impl From<&str> for EncryptionAlgorithm {
    fn from(name: &str) -> Self {
        EncryptionAlgorithm::from(name.to_string())
    }
}

impl From<EncryptionAlgorithm> for String {
    fn from(algorithm: EncryptionAlgorithm) -> Self {
        algorithm.name().to_string()
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tuning parameters for one session. Taken as a read-only snapshot when a
/// connection is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfiguration {
    /// Buffer size for the control channel reader/writer.
    pub control_buffer_size: usize,
    /// Bytes moved per data frame on a transfer stream. Cancellation is
    /// observed at these boundaries.
    pub stream_buffer_size: usize,
    pub encryption_algorithm: EncryptionAlgorithm,
    /// Key size in bits.
    pub encryption_key_size: u32,
    /// Salt size in bytes.
    pub encryption_salt_size: u32,
    pub encryption_hash_rounds: u32,
    pub ssl_policy: SslNegotiationPolicy,
    /// Upper bound on streams per transfer, before the server's own limit.
    pub max_parallel_streams: u32,
    /// Objects smaller than this are moved over a single stream.
    pub parallel_threshold: u64,
    /// Compare a whole-object checksum with the server after transfer.
    pub verify_checksum: bool,
    pub status_interval_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for PipelineConfiguration {
    fn default() -> Self {
        Self {
            control_buffer_size: 64 * 1024,
            stream_buffer_size: 4 * 1024 * 1024,
            encryption_algorithm: EncryptionAlgorithm::Aes256Cbc,
            encryption_key_size: 256,
            encryption_salt_size: 8,
            encryption_hash_rounds: 16,
            ssl_policy: SslNegotiationPolicy::Refuse,
            max_parallel_streams: 4,
            parallel_threshold: 32 * 1024 * 1024,
            verify_checksum: false,
            status_interval_ms: 500,
            connect_timeout_ms: 30_000,
        }
    }
}

impl PipelineConfiguration {
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Returns a copy carrying the encryption parameters a server chose
    /// during negotiation.
    pub fn with_encryption_params(
        &self,
        algorithm: EncryptionAlgorithm,
        key_size: u32,
        salt_size: u32,
        hash_rounds: u32,
    ) -> Self {
        Self {
            encryption_algorithm: algorithm,
            encryption_key_size: key_size,
            encryption_salt_size: salt_size,
            encryption_hash_rounds: hash_rounds,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.control_buffer_size == 0 {
            return Err(ConfigError::Invalid("control_buffer_size must be > 0".into()));
        }
        if self.stream_buffer_size == 0 || self.stream_buffer_size > MAX_STREAM_BUFFER_SIZE {
            return Err(ConfigError::Invalid(format!(
                "stream_buffer_size must be in 1..={MAX_STREAM_BUFFER_SIZE}, got {}",
                self.stream_buffer_size
            )));
        }
        if !matches!(self.encryption_key_size, 128 | 192 | 256) {
            return Err(ConfigError::Invalid(format!(
                "encryption_key_size must be 128, 192 or 256 bits, got {}",
                self.encryption_key_size
            )));
        }
        if self.encryption_salt_size == 0 {
            return Err(ConfigError::Invalid("encryption_salt_size must be > 0".into()));
        }
        if self.encryption_hash_rounds == 0 {
            return Err(ConfigError::Invalid("encryption_hash_rounds must be > 0".into()));
        }
        if self.max_parallel_streams == 0 {
            return Err(ConfigError::Invalid("max_parallel_streams must be > 0".into()));
        }
        Ok(())
    }
}

/// Pool sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum simultaneously borrowed plus idle connections per account.
    pub max_per_account: usize,
    /// Wait for a free slot instead of failing immediately.
    pub block_when_exhausted: bool,
    /// Give up waiting after this long. `None` waits forever.
    pub borrow_timeout_ms: Option<u64>,
    /// Validate idle connections before handing them out.
    pub test_on_borrow: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_per_account: 8,
            block_when_exhausted: true,
            borrow_timeout_ms: None,
            test_on_borrow: false,
        }
    }
}

impl PoolSettings {
    pub fn borrow_timeout(&self) -> Option<Duration> {
        self.borrow_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_per_account == 0 {
            return Err(ConfigError::Invalid("max_per_account must be > 0".into()));
        }
        Ok(())
    }
}

/// Complete client configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub pipeline: PipelineConfiguration,
    pub pool: PoolSettings,
}

impl ClientConfig {
    /// Loads and validates configuration from `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        config.validate()?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Loads from the default location, falling back to defaults when the
    /// file does not exist.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Writes the configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline.validate()?;
        self.pool.validate()
    }
}

/// Returns the platform-specific configuration file path.
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("gridlink").join("client.toml"))
}

fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}
