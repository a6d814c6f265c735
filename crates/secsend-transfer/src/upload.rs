//! Upload sessions: new, resumed, and the push loop.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use secsend_core::{FileId, RootId, SecsendError, SecsendResult, TransportError, TransportErrorKind};
use secsend_crypto::{encrypted_size, out_chunk_size, BaseKey, ChunkCipherContext, TransferMetadata};
use secsend_storage::Transport;
use secsend_stream::{apply, ByteStream, ByteStreamExt, StreamRange};

use crate::source::UploadSource;
use crate::ProgressFn;

#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Display name; defaults to the source's name
    pub name: Option<String>,
    /// MIME type; defaults to the source's type
    pub mime_type: Option<String>,
    /// Plaintext chunk size
    pub chunk_size: u32,
    /// Lifetime after completion in seconds (0 = never)
    pub expiry: u64,
    /// Bound on a single push; `None` waits forever
    pub push_timeout: Option<Duration>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            name: None,
            mime_type: None,
            chunk_size: secsend_core::config::DEFAULT_CHUNK_SIZE,
            expiry: 0,
            push_timeout: Some(Duration::from_secs(30)),
        }
    }
}

pub struct UploadSession {
    transport: Arc<dyn Transport>,
    root_id: RootId,
    ctx: Arc<ChunkCipherContext>,
    metadata: TransferMetadata,
    stream: ByteStream,
    total: u64,
    sent: u64,
    push_timeout: Option<Duration>,
    /// Set while a run is in flight and kept after a failed one: the buffer
    /// in flight is gone from the pipeline, so only a fresh resume can continue.
    spent: bool,
}

impl UploadSession {
    /// Generate a key, register sealed metadata, and build the pipeline from
    /// the start of `source`.
    pub async fn new_upload(
        transport: Arc<dyn Transport>,
        source: UploadSource,
        opts: UploadOptions,
    ) -> SecsendResult<Self> {
        if opts.chunk_size == 0 {
            return Err(SecsendError::Config("chunk_size must be > 0".into()));
        }
        let valid = transport.config().valid_expiries;
        if !valid.contains(&opts.expiry) {
            return Err(SecsendError::Config(format!(
                "unsupported expiry {}s; supported: {valid:?}",
                opts.expiry
            )));
        }

        let ctx = Arc::new(ChunkCipherContext::generate(&mut rand::rngs::OsRng));
        let name = opts.name.unwrap_or_else(|| source.default_name());
        let mime = opts
            .mime_type
            .unwrap_or_else(|| source.default_mime().to_string());
        let metadata = TransferMetadata::new(&ctx, name, mime, opts.chunk_size, opts.expiry);
        let sealed = metadata.seal(&ctx)?;

        // an unreadable source must not leave an empty transfer behind
        let chunk = opts.chunk_size as usize;
        let total = encrypted_size(source.len(), chunk as u64);
        let stream = source
            .open(0)
            .await?
            .rechunk(chunk)
            .encrypt_chunks(ctx.clone(), 0);

        let root_id = transport.register(&sealed).await?;

        info!(
            file_id = %root_id.file_id(),
            name = %metadata.name,
            bytes = total,
            "upload registered"
        );
        Ok(Self {
            transport,
            root_id,
            ctx,
            metadata,
            stream,
            total,
            sent: 0,
            push_timeout: opts.push_timeout,
            spent: false,
        })
    }

    /// Continue an interrupted upload from whatever the transport already holds.
    ///
    /// `source` must produce the same plaintext as the original attempt.
    pub async fn resume(
        transport: Arc<dyn Transport>,
        root_id: RootId,
        key: BaseKey,
        source: UploadSource,
        push_timeout: Option<Duration>,
    ) -> SecsendResult<Self> {
        let (sealed, stored) = transport.get_metadata(&root_id.file_id()).await?;
        if sealed.complete {
            return Err(TransportError::conflict("transfer is already complete").into());
        }
        let (ctx, metadata) = sealed.unlock(key)?;
        let ctx = Arc::new(ctx);

        let chunk = metadata.chunk_size as u64;
        let total = encrypted_size(source.len(), chunk);
        if stored > total {
            return Err(SecsendError::InvalidRange(format!(
                "{stored} bytes stored but the source encrypts to {total}"
            )));
        }

        let range = StreamRange::compute(chunk, out_chunk_size(chunk), Some(stored), None);
        let seekable = source.is_seekable();
        let stream = source
            .open(range.in_seek)
            .await?
            .rechunk(chunk as usize)
            .encrypt_chunks(ctx.clone(), range.chunk_idx);
        let stream = apply(stream, range.truncator());

        info!(
            file_id = %root_id.file_id(),
            stored,
            total,
            chunk_idx = range.chunk_idx,
            seekable,
            "upload resumed"
        );
        Ok(Self {
            transport,
            root_id,
            ctx,
            metadata,
            stream,
            total,
            sent: stored,
            push_timeout,
            spent: false,
        })
    }

    pub fn root_id(&self) -> &RootId {
        &self.root_id
    }

    pub fn file_id(&self) -> FileId {
        self.root_id.file_id()
    }

    pub fn key(&self) -> &BaseKey {
        self.ctx.key()
    }

    pub fn metadata(&self) -> &TransferMetadata {
        &self.metadata
    }

    /// Total ciphertext length once complete.
    pub fn total_len(&self) -> u64 {
        self.total
    }

    /// Ciphertext bytes confirmed by the transport so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Push every remaining buffer, then finalize.
    ///
    /// Cancellation is checked before each push and raced against the push in
    /// flight; it ends the run with `Canceled`. Any other error leaves the
    /// transfer resumable from [`sent`](Self::sent).
    ///
    /// After an error (or a dropped run) this session refuses to run again
    /// with `Conflict`; continue with [`UploadSession::resume`].
    pub async fn run(
        &mut self,
        progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> SecsendResult<u64> {
        if self.spent {
            return Err(TransportError::conflict(
                "upload session was interrupted; continue with UploadSession::resume",
            )
            .into());
        }
        self.spent = true;
        let pushed = self.push_all(progress, cancel).await?;
        self.spent = false;
        Ok(pushed)
    }

    async fn push_all(
        &mut self,
        progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> SecsendResult<u64> {
        if let Some(cb) = progress {
            cb(self.sent, self.total, &self.metadata.name);
        }

        loop {
            if cancel.is_cancelled() {
                return Err(self.canceled());
            }
            let buf = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.canceled()),
                next = self.stream.next() => match next {
                    Some(buf) => buf?,
                    None => break,
                },
            };

            let len = buf.len() as u64;
            let push = push_once(self.transport.as_ref(), &self.root_id, buf, self.push_timeout);
            let pushed = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                res = push => Some(res),
            };
            match pushed {
                None => return Err(self.canceled()),
                Some(Err(e)) => {
                    warn!(
                        file_id = %self.root_id.file_id(),
                        sent = self.sent,
                        retryable = e.is_retryable(),
                        "push failed: {e}"
                    );
                    return Err(e);
                }
                Some(Ok(())) => {}
            }

            self.sent += len;
            debug!(file_id = %self.root_id.file_id(), len, sent = self.sent, "pushed");
            if let Some(cb) = progress {
                cb(self.sent, self.total, &self.metadata.name);
            }
        }

        self.transport.finalize(&self.root_id).await?;
        info!(file_id = %self.root_id.file_id(), bytes = self.sent, "upload complete");
        Ok(self.sent)
    }

    fn canceled(&self) -> SecsendError {
        info!(file_id = %self.root_id.file_id(), sent = self.sent, "upload paused");
        SecsendError::Canceled
    }
}

async fn push_once(
    transport: &dyn Transport,
    root_id: &RootId,
    buf: Bytes,
    timeout: Option<Duration>,
) -> SecsendResult<()> {
    let push = transport.append_blob(root_id, buf);
    match timeout {
        None => push.await,
        Some(limit) => tokio::time::timeout(limit, push).await.map_err(|_| {
            SecsendError::from(TransportError::new(
                TransportErrorKind::Timeout,
                format!("push timed out after {}s", limit.as_secs_f64()),
            ))
        })?,
    }
}
