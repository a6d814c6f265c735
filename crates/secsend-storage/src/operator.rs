//! OpenDAL Operator factory for the configured storage backend

use std::fmt;

use anyhow::{Context, Result};
use opendal::Operator;

use secsend_core::config::{expand_home, StorageBackend, StorageConfig};

/// Static S3 credentials
#[derive(Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

impl S3Credentials {
    /// `SECSEND_ACCESS_KEY_ID`/`SECSEND_SECRET_ACCESS_KEY`, then the AWS variables.
    pub fn from_env() -> Option<Self> {
        let pick = |ours: &str, aws: &str| {
            std::env::var(ours)
                .or_else(|_| std::env::var(aws))
                .ok()
                .filter(|v| !v.is_empty())
        };
        Some(Self {
            access_key_id: pick("SECSEND_ACCESS_KEY_ID", "AWS_ACCESS_KEY_ID")?,
            secret_access_key: pick("SECSEND_SECRET_ACCESS_KEY", "AWS_SECRET_ACCESS_KEY")?,
        })
    }
}

/// Build an Operator for `storage.backend`, with logging and retry layers.
///
/// For S3 with `enforce_tls` set, a plaintext `http://` endpoint is an error;
/// without it a warning is logged. Missing credentials leave OpenDAL to its
/// own environment lookup.
pub fn build_operator(storage: &StorageConfig, creds: Option<&S3Credentials>) -> Result<Operator> {
    let op = match storage.backend {
        StorageBackend::Memory => Operator::new(opendal::services::Memory::default())
            .context("creating OpenDAL memory operator")?
            .finish(),
        StorageBackend::Fs => {
            let root = expand_home(&storage.root);
            let builder = opendal::services::Fs::default().root(&root.to_string_lossy());
            Operator::new(builder)
                .with_context(|| format!("creating OpenDAL fs operator at {}", root.display()))?
                .finish()
        }
        StorageBackend::S3 => build_s3(storage, creds)?,
    };

    Ok(op
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        ))
}

fn build_s3(storage: &StorageConfig, creds: Option<&S3Credentials>) -> Result<Operator> {
    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                storage.endpoint
            );
        }
        tracing::warn!(
            endpoint = %storage.endpoint,
            "S3 endpoint uses plaintext HTTP; set storage.enforce_tls = true and use HTTPS in production"
        );
    }

    // path-style addressing is the default, which SeaweedFS and MinIO need
    let mut builder = opendal::services::S3::default()
        .endpoint(&storage.endpoint)
        .region(&storage.region)
        .bucket(&storage.bucket)
        .root(&storage.root);
    if let Some(creds) = creds {
        builder = builder
            .access_key_id(&creds.access_key_id)
            .secret_access_key(&creds.secret_access_key);
    }

    Ok(Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> S3Credentials {
        S3Credentials {
            access_key_id: "test-key".into(),
            secret_access_key: "test-secret".into(),
        }
    }

    #[test]
    fn test_build_memory_operator() {
        let storage = StorageConfig {
            backend: StorageBackend::Memory,
            ..Default::default()
        };
        assert!(build_operator(&storage, None).is_ok());
    }

    #[test]
    fn test_build_fs_operator() {
        let storage = StorageConfig {
            backend: StorageBackend::Fs,
            root: std::env::temp_dir().to_string_lossy().into_owned(),
            ..Default::default()
        };
        assert!(build_operator(&storage, None).is_ok());
    }

    #[test]
    fn test_s3_http_allowed_without_enforce_tls() {
        let storage = StorageConfig {
            backend: StorageBackend::S3,
            endpoint: "http://localhost:8333".into(),
            root: "/transfers".into(),
            enforce_tls: false,
            ..Default::default()
        };
        assert!(build_operator(&storage, Some(&creds())).is_ok());
    }

    #[test]
    fn test_s3_http_rejected_with_enforce_tls() {
        let storage = StorageConfig {
            backend: StorageBackend::S3,
            endpoint: "http://insecure:8333".into(),
            enforce_tls: true,
            ..Default::default()
        };
        let err = build_operator(&storage, Some(&creds())).unwrap_err();
        assert!(err.to_string().contains("enforce_tls"));
    }

    #[test]
    fn test_s3_https_with_enforce_tls() {
        let storage = StorageConfig {
            backend: StorageBackend::S3,
            endpoint: "https://s3.example.com".into(),
            root: "/transfers".into(),
            enforce_tls: true,
            ..Default::default()
        };
        assert!(build_operator(&storage, Some(&creds())).is_ok());
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let dbg = format!("{:?}", creds());
        assert!(dbg.contains("test-key"));
        assert!(!dbg.contains("test-secret"));
        assert!(dbg.contains("[REDACTED]"));
    }
}
