//! Owner and reader operations outside a streaming session.

use secsend_core::{FileId, RootId, SecsendResult};
use secsend_crypto::{decrypted_size, BaseKey, TransferMetadata};
use secsend_storage::Transport;
use tracing::info;

/// What a key holder can learn about a transfer without downloading it.
#[derive(Debug, Clone)]
pub struct TransferInfo {
    pub file_id: FileId,
    pub metadata: TransferMetadata,
    /// Ciphertext bytes stored
    pub stored: u64,
    /// Plaintext bytes those decrypt to
    pub plain_size: u64,
    /// Unix time the transfer disappears, once complete
    pub expires_at: Option<u64>,
}

pub async fn transfer_info(
    transport: &dyn Transport,
    file_id: FileId,
    key: BaseKey,
) -> SecsendResult<TransferInfo> {
    let (sealed, stored) = transport.get_metadata(&file_id).await?;
    let (_, metadata) = sealed.unlock(key)?;
    Ok(TransferInfo {
        file_id,
        plain_size: decrypted_size(stored, metadata.chunk_size as u64),
        stored,
        expires_at: sealed.timeout_ts,
        metadata,
    })
}

pub async fn delete_transfer(transport: &dyn Transport, root_id: &RootId) -> SecsendResult<()> {
    transport.delete(root_id).await?;
    info!(file_id = %root_id.file_id(), "transfer deleted");
    Ok(())
}
