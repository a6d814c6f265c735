use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{SecsendError, SecsendResult};

/// Default plaintext chunk size (1 MiB)
pub const DEFAULT_CHUNK_SIZE: u32 = 1024 * 1024;

/// Top-level configuration (loaded from secsend.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecsendConfig {
    pub log: LogConfig,
    pub storage: StorageConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local, lost on exit. Tests and dry runs.
    Memory,
    Fs,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Filesystem root for `fs`, key prefix for `s3`
    pub root: String,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Reject plaintext http:// S3 endpoints
    pub enforce_tls: bool,
    /// Maximum stored ciphertext per transfer in bytes (0 = unlimited)
    pub filesize_limit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Plaintext chunk size for new uploads
    pub chunk_size: u32,
    /// Per-chunk transport timeout in seconds
    pub push_timeout_secs: u64,
    /// Accepted expiry durations in seconds (0 = never expires)
    pub valid_expiries: Vec<u64>,
    /// Expiry used when an upload does not ask for one
    pub default_expiry: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            root: "~/.local/share/secsend/store".into(),
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "secsend".into(),
            enforce_tls: false,
            filesize_limit: 0,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            push_timeout_secs: 30,
            valid_expiries: vec![0],
            default_expiry: 0,
        }
    }
}

impl TransferConfig {
    pub fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_timeout_secs)
    }
}

impl SecsendConfig {
    /// Read and validate a TOML config file.
    pub fn from_file(path: &Path) -> SecsendResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SecsendConfig = toml::from_str(&content)
            .map_err(|e| SecsendError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`from_file`](Self::from_file), but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> SecsendResult<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> SecsendResult<()> {
        if self.transfer.chunk_size == 0 {
            return Err(SecsendError::Config("transfer.chunk_size must be > 0".into()));
        }
        if self.transfer.valid_expiries.is_empty() {
            return Err(SecsendError::Config(
                "transfer.valid_expiries must not be empty".into(),
            ));
        }
        if !self
            .transfer
            .valid_expiries
            .contains(&self.transfer.default_expiry)
        {
            return Err(SecsendError::Config(format!(
                "transfer.default_expiry {} is not in valid_expiries",
                self.transfer.default_expiry
            )));
        }
        if !matches!(self.log.format.as_str(), "text" | "json") {
            return Err(SecsendError::Config(format!(
                "log.format must be \"text\" or \"json\", got {:?}",
                self.log.format
            )));
        }
        Ok(())
    }
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[log]
level = "debug"
format = "json"

[storage]
backend = "s3"
root = "transfers"
endpoint = "https://s3.example.com:8333"
region = "eu-west-1"
bucket = "my-bucket"
enforce_tls = true
filesize_limit = 1073741824

[transfer]
chunk_size = 65536
push_timeout_secs = 10
valid_expiries = [0, 3600, 86400]
default_expiry = 3600
"#;
        let config: SecsendConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "json");
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert_eq!(config.storage.root, "transfers");
        assert!(config.storage.enforce_tls);
        assert_eq!(config.storage.filesize_limit, 1 << 30);
        assert_eq!(config.transfer.chunk_size, 65536);
        assert_eq!(config.transfer.push_timeout(), Duration::from_secs(10));
        assert_eq!(config.transfer.valid_expiries, vec![0, 3600, 86400]);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_defaults() {
        let config: SecsendConfig = toml::from_str("").unwrap();

        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, "text");
        assert_eq!(config.storage.backend, StorageBackend::Fs);
        assert_eq!(config.storage.bucket, "secsend");
        assert!(!config.storage.enforce_tls);
        assert_eq!(config.storage.filesize_limit, 0);
        assert_eq!(config.transfer.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.transfer.push_timeout_secs, 30);
        assert_eq!(config.transfer.valid_expiries, vec![0]);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[storage]
backend = "memory"
"#;
        let config: SecsendConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        // Defaults
        assert_eq!(config.storage.region, "us-east-1");
        assert_eq!(config.transfer.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = SecsendConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: SecsendConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.storage.backend, parsed.storage.backend);
        assert_eq!(config.storage.root, parsed.storage.root);
        assert_eq!(config.transfer.chunk_size, parsed.transfer.chunk_size);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SecsendConfig::default();
        config.transfer.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = SecsendConfig::default();
        config.transfer.default_expiry = 60;
        assert!(config.validate().is_err());

        let mut config = SecsendConfig::default();
        config.log.format = "yaml".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_and_missing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[transfer]\nchunk_size = 4096").unwrap();

        let config = SecsendConfig::from_file(file.path()).unwrap();
        assert_eq!(config.transfer.chunk_size, 4096);

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let config = SecsendConfig::load_or_default(&missing).unwrap();
        assert_eq!(config.transfer.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[transfer\nchunk_size = ").unwrap();
        let err = SecsendConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, SecsendError::Config(_)));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(expand_home("~/x"), PathBuf::from(home).join("x"));
        }
    }
}
