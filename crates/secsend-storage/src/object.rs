//! Transfers stored as plain objects behind an OpenDAL Operator.
//!
//! Layout under `prefix`, keyed by the hex file id:
//! ```text
//! {prefix}/{file}.metadata          sealed metadata, JSON wire form
//! {prefix}/{file}.segments          JSON array of segment sizes, in order
//! {prefix}/{file}/{seq:020}         ciphertext, one object per append
//! {prefix}/{file}.lock              held by the writer of an append or finalize
//! ```
//! Object stores have no append, so each pushed blob becomes its own segment.
//! A segment written without its index update is simply overwritten by the
//! next append.
//!
//! Appends and finalize hold the transfer's lock object; a second writer gets
//! `Conflict`. Backends with conditional writes take it atomically. A lock left
//! by a crashed writer is broken once it is older than [`LOCK_STALE_SECS`].

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use opendal::Operator;
use tracing::{debug, info, warn};

use secsend_core::{FileId, RootId, SecsendError, SecsendResult, TransportError, TransportErrorKind};
use secsend_crypto::{EncryptedMetadata, NONCE_LEN};
use secsend_stream::ByteStream;

use crate::transport::{Transport, TransportConfig};

/// Fresh ids tried before `register` gives up.
const REGISTER_ATTEMPTS: usize = 8;

/// Age after which a lock object is considered abandoned.
pub const LOCK_STALE_SECS: u64 = 300;

pub struct ObjectTransport {
    op: Operator,
    prefix: String,
    config: TransportConfig,
}

/// A transfer's metadata and segment index as loaded from storage.
struct StoredTransfer {
    metadata: EncryptedMetadata,
    segments: Vec<u64>,
}

impl StoredTransfer {
    fn stored_len(&self) -> u64 {
        self.segments.iter().sum()
    }

    fn is_expired(&self, now: u64) -> bool {
        self.metadata.complete && self.metadata.timeout_ts.is_some_and(|ts| now >= ts)
    }
}

fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

fn locked() -> SecsendError {
    TransportError::conflict("transfer is locked").into()
}

/// Exclusive write access to one transfer, released with [`release`](Self::release).
///
/// A guard dropped without release (its future was cancelled) removes the
/// lock object in the background.
struct WriteLock {
    op: Operator,
    path: String,
    held: bool,
}

impl WriteLock {
    async fn release(mut self) {
        self.held = false;
        if let Err(e) = self.op.delete(&self.path).await {
            warn!(path = %self.path, "failed to release lock: {e}");
        }
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        let op = self.op.clone();
        let path = std::mem::take(&mut self.path);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = op.delete(&path).await {
                    warn!(path = %path, "failed to release abandoned lock: {e}");
                }
            });
        }
    }
}

fn storage_err(err: opendal::Error, path: &str) -> SecsendError {
    let kind = match err.kind() {
        opendal::ErrorKind::NotFound => TransportErrorKind::NotFound,
        _ => TransportErrorKind::Unavailable,
    };
    TransportError::new(kind, format!("{path}: {err}")).into()
}

impl ObjectTransport {
    pub fn new(op: Operator, prefix: impl Into<String>, config: TransportConfig) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self { op, prefix, config }
    }

    fn key(&self, rest: &str) -> String {
        if self.prefix.is_empty() {
            rest.to_string()
        } else {
            format!("{}/{rest}", self.prefix)
        }
    }

    fn metadata_path(&self, id: &FileId) -> String {
        self.key(&format!("{}.metadata", id.to_hex()))
    }

    fn index_path(&self, id: &FileId) -> String {
        self.key(&format!("{}.segments", id.to_hex()))
    }

    fn segment_path(&self, id: &FileId, seq: usize) -> String {
        self.key(&format!("{}/{seq:020}", id.to_hex()))
    }

    fn lock_path(&self, id: &FileId) -> String {
        self.key(&format!("{}.lock", id.to_hex()))
    }

    /// Take the transfer's lock object, or fail with `Conflict`.
    async fn lock(&self, id: &FileId) -> SecsendResult<WriteLock> {
        let path = self.lock_path(id);
        for _ in 0..2 {
            match self.try_create_lock(&path).await {
                Ok(()) => {
                    return Ok(WriteLock {
                        op: self.op.clone(),
                        path,
                        held: true,
                    })
                }
                Err(e) if e.kind() == opendal::ErrorKind::ConditionNotMatch => {
                    if !self.lock_is_stale(&path).await? {
                        debug!(file_id = %id, "transfer locked by another writer");
                        return Err(locked());
                    }
                    warn!(file_id = %id, "breaking stale lock");
                    self.op
                        .delete(&path)
                        .await
                        .map_err(|e| storage_err(e, &path))?;
                }
                Err(e) => return Err(storage_err(e, &path)),
            }
        }
        Err(locked())
    }

    /// Create `path` only if absent; an existing object is `ConditionNotMatch`.
    async fn try_create_lock(&self, path: &str) -> opendal::Result<()> {
        let stamp = unix_now().to_string();
        if self.op.info().full_capability().write_with_if_not_exists {
            self.op.write_with(path, stamp).if_not_exists(true).await?;
            return Ok(());
        }
        if self.op.exists(path).await? {
            return Err(opendal::Error::new(
                opendal::ErrorKind::ConditionNotMatch,
                "lock object exists",
            ));
        }
        self.op.write(path, stamp).await?;
        Ok(())
    }

    async fn lock_is_stale(&self, path: &str) -> SecsendResult<bool> {
        let taken_at = match self.op.read(path).await {
            Ok(buf) => String::from_utf8_lossy(&buf.to_vec()).trim().parse::<u64>().ok(),
            // released in the meantime
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(storage_err(e, path)),
        };
        Ok(match taken_at {
            Some(ts) => unix_now().saturating_sub(ts) >= LOCK_STALE_SECS,
            None => true,
        })
    }

    async fn load(&self, id: &FileId) -> SecsendResult<StoredTransfer> {
        let path = self.metadata_path(id);
        let raw = match self.op.read(&path).await {
            Ok(buf) => buf.to_vec(),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => {
                return Err(TransportError::not_found("no such transfer").into());
            }
            Err(e) => return Err(storage_err(e, &path)),
        };
        let metadata = EncryptedMetadata::from_json(&raw)?;

        let path = self.index_path(id);
        let segments = match self.op.read(&path).await {
            Ok(buf) => serde_json::from_slice(&buf.to_vec())
                .map_err(|e| anyhow::anyhow!("corrupt segment index {path}: {e}"))?,
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(storage_err(e, &path)),
        };

        let transfer = StoredTransfer { metadata, segments };
        if transfer.is_expired(unix_now()) {
            info!(file_id = %id, "transfer expired, removing");
            self.purge(id, &transfer).await?;
            return Err(TransportError::not_found("transfer expired").into());
        }
        Ok(transfer)
    }

    async fn save_metadata(&self, id: &FileId, metadata: &EncryptedMetadata) -> SecsendResult<()> {
        let path = self.metadata_path(id);
        self.op
            .write(&path, metadata.to_json()?)
            .await
            .map_err(|e| storage_err(e, &path))?;
        Ok(())
    }

    async fn save_index(&self, id: &FileId, segments: &[u64]) -> SecsendResult<()> {
        let path = self.index_path(id);
        let raw = serde_json::to_vec(segments).map_err(anyhow::Error::from)?;
        self.op
            .write(&path, raw)
            .await
            .map_err(|e| storage_err(e, &path))?;
        Ok(())
    }

    async fn append_locked(&self, file_id: &FileId, data: Bytes) -> SecsendResult<()> {
        let mut transfer = self.load(file_id).await?;
        if transfer.metadata.complete {
            return Err(TransportError::conflict("transfer is complete").into());
        }

        let new_len = transfer.stored_len() + data.len() as u64;
        let limit = self.config.filesize_limit;
        if limit > 0 && new_len > limit {
            warn!(file_id = %file_id, new_len, limit, "size limit exceeded, removing transfer");
            self.purge(file_id, &transfer).await?;
            return Err(
                TransportError::new(TransportErrorKind::LimitExceeded, "file limit exceeded").into(),
            );
        }
        if data.is_empty() {
            return Ok(());
        }

        let seq = transfer.segments.len();
        let path = self.segment_path(file_id, seq);
        let len = data.len() as u64;
        self.op
            .write(&path, data)
            .await
            .map_err(|e| storage_err(e, &path))?;
        transfer.segments.push(len);
        self.save_index(file_id, &transfer.segments).await?;
        debug!(file_id = %file_id, seq, len, total = new_len, "segment appended");
        Ok(())
    }

    async fn finalize_locked(&self, file_id: &FileId) -> SecsendResult<()> {
        let mut transfer = self.load(file_id).await?;
        if transfer.metadata.complete {
            return Ok(());
        }
        transfer.metadata.complete = true;
        transfer.metadata.timeout_ts = match transfer.metadata.timeout_s {
            0 => None,
            secs => Some(unix_now() + secs),
        };
        self.save_metadata(file_id, &transfer.metadata).await?;
        info!(
            file_id = %file_id,
            bytes = transfer.stored_len(),
            expires = ?transfer.metadata.timeout_ts,
            "transfer finalized"
        );
        Ok(())
    }

    async fn purge(&self, id: &FileId, transfer: &StoredTransfer) -> SecsendResult<()> {
        let mut paths: Vec<String> = (0..transfer.segments.len())
            .map(|seq| self.segment_path(id, seq))
            .collect();
        paths.push(self.index_path(id));
        paths.push(self.metadata_path(id));
        for path in paths {
            self.op
                .delete(&path)
                .await
                .map_err(|e| storage_err(e, &path))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for ObjectTransport {
    async fn register(&self, metadata: &EncryptedMetadata) -> SecsendResult<RootId> {
        if metadata.iv.len() != NONCE_LEN {
            return Err(TransportError::invalid("invalid iv").into());
        }
        metadata.validate()?;
        if !self.config.valid_expiries.contains(&metadata.timeout_s) {
            return Err(TransportError::invalid(format!(
                "invalid expiry {}s",
                metadata.timeout_s
            ))
            .into());
        }

        let mut stored = metadata.clone();
        stored.complete = false;
        stored.timeout_ts = None;

        for _ in 0..REGISTER_ATTEMPTS {
            let root = RootId::generate(&mut rand::thread_rng());
            let file_id = root.file_id();
            let path = self.metadata_path(&file_id);
            if self.op.exists(&path).await.map_err(|e| storage_err(e, &path))? {
                debug!(file_id = %file_id, "id collision, retrying");
                continue;
            }
            self.save_metadata(&file_id, &stored).await?;
            self.save_index(&file_id, &[]).await?;
            info!(file_id = %file_id, timeout_s = stored.timeout_s, "transfer registered");
            return Ok(root);
        }
        Err(TransportError::unavailable("could not allocate a transfer id").into())
    }

    async fn get_metadata(&self, id: &FileId) -> SecsendResult<(EncryptedMetadata, u64)> {
        let transfer = self.load(id).await?;
        let len = transfer.stored_len();
        Ok((transfer.metadata, len))
    }

    async fn append_blob(&self, id: &RootId, data: Bytes) -> SecsendResult<()> {
        let file_id = id.file_id();
        let lock = self.lock(&file_id).await?;
        let res = self.append_locked(&file_id, data).await;
        lock.release().await;
        res
    }

    /// Idempotent: finalizing a complete transfer leaves its expiry alone.
    async fn finalize(&self, id: &RootId) -> SecsendResult<()> {
        let file_id = id.file_id();
        let lock = self.lock(&file_id).await?;
        let res = self.finalize_locked(&file_id).await;
        lock.release().await;
        res
    }

    async fn delete(&self, id: &RootId) -> SecsendResult<()> {
        let file_id = id.file_id();
        let transfer = self.load(&file_id).await?;
        self.purge(&file_id, &transfer).await?;
        info!(file_id = %file_id, "transfer deleted");
        Ok(())
    }

    async fn pull(&self, id: &FileId, range: Option<(u64, u64)>) -> SecsendResult<ByteStream> {
        let transfer = self.load(id).await?;
        if !transfer.metadata.complete {
            return Err(TransportError::conflict("transfer is not complete").into());
        }

        let total = transfer.stored_len();
        let (start, end) = match range {
            None => (0, total),
            Some((start, last)) => {
                if start > last || start >= total {
                    return Err(TransportError::new(
                        TransportErrorKind::Invalid,
                        format!("range {start}-{last} not satisfiable for {total} bytes"),
                    )
                    .into());
                }
                (start, last.saturating_add(1).min(total))
            }
        };

        let mut reads = Vec::new();
        let mut offset = 0u64;
        for (seq, len) in transfer.segments.iter().enumerate() {
            let (lo, hi) = (start.max(offset), end.min(offset + len));
            if lo < hi {
                reads.push((self.segment_path(id, seq), (lo - offset)..(hi - offset)));
            }
            offset += len;
        }
        debug!(file_id = %id, start, end, segments = reads.len(), "pull");

        let op = self.op.clone();
        let stream = stream::iter(reads)
            .then(move |(path, range)| {
                let op = op.clone();
                async move {
                    op.read_with(&path)
                        .range(range)
                        .await
                        .map(|buf| buf.to_bytes())
                        .map_err(|e| storage_err(e, &path))
                }
            })
            .boxed();
        Ok(stream)
    }

    fn config(&self) -> TransportConfig {
        self.config.clone()
    }
}
