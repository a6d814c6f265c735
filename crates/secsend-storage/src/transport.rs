//! What an upload or download session needs from the server side.

use async_trait::async_trait;
use bytes::Bytes;

use secsend_core::{FileId, RootId, SecsendResult};
use secsend_crypto::EncryptedMetadata;
use secsend_stream::ByteStream;

/// Server-side limits a client must respect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Accepted expiry durations in seconds (0 = never)
    pub valid_expiries: Vec<u64>,
    /// Maximum stored ciphertext per transfer in bytes (0 = unlimited)
    pub filesize_limit: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            valid_expiries: vec![0],
            filesize_limit: 0,
        }
    }
}

/// Blob store for sealed transfers.
///
/// Owner operations take the [`RootId`]; reads only need the derived
/// [`FileId`]. Failures are `SecsendError::Transport` with a status kind.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Store sealed metadata for a new transfer and hand back its owner id.
    async fn register(&self, metadata: &EncryptedMetadata) -> SecsendResult<RootId>;

    /// Sealed metadata plus the number of ciphertext bytes stored so far.
    async fn get_metadata(&self, id: &FileId) -> SecsendResult<(EncryptedMetadata, u64)>;

    /// Append ciphertext. Conflict once complete, LimitExceeded past the size limit.
    async fn append_blob(&self, id: &RootId, data: Bytes) -> SecsendResult<()>;

    /// Mark the transfer complete and start its expiry clock.
    async fn finalize(&self, id: &RootId) -> SecsendResult<()>;

    async fn delete(&self, id: &RootId) -> SecsendResult<()>;

    /// Stream stored ciphertext, optionally limited to an inclusive byte range.
    async fn pull(&self, id: &FileId, range: Option<(u64, u64)>) -> SecsendResult<ByteStream>;

    fn config(&self) -> TransportConfig;
}
