//! Download sessions: pull ciphertext, decrypt, trim to the requested window.

use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use secsend_core::{FileId, SecsendError, SecsendResult, TransportError};
use secsend_crypto::{decrypted_size, out_chunk_size, BaseKey, TransferMetadata};
use secsend_storage::Transport;
use secsend_stream::{apply, ByteStream, ByteStreamExt, StreamRange};

use crate::range::{ByteRange, ByteRangeSpec};
use crate::response::ResponseHeaders;
use crate::ProgressFn;

pub struct DownloadSession {
    file_id: FileId,
    metadata: TransferMetadata,
    plain_size: u64,
    range: Option<ByteRange>,
    stream: ByteStream,
}

impl DownloadSession {
    /// Check the key against the stored commitment, then set up the pipeline
    /// for `range` (or the whole file).
    ///
    /// A range covering the whole body is served without range arithmetic but
    /// still reported as partial content.
    pub async fn open(
        transport: &dyn Transport,
        file_id: FileId,
        key: BaseKey,
        range: Option<ByteRangeSpec>,
    ) -> SecsendResult<Self> {
        let (sealed, stored) = transport.get_metadata(&file_id).await?;
        if !sealed.complete {
            return Err(TransportError::conflict("transfer is not complete").into());
        }
        let (ctx, metadata) = sealed.unlock(key)?;
        let ctx = Arc::new(ctx);

        let chunk = metadata.chunk_size as u64;
        let cipher_chunk = out_chunk_size(chunk);
        let plain_size = decrypted_size(stored, chunk);
        let range = range.map(|spec| spec.resolve(plain_size)).transpose()?;

        let stream = match range {
            Some(r) if !r.is_full(plain_size) => {
                let window = StreamRange::compute(cipher_chunk, chunk, Some(r.start), Some(r.len()));
                let pull_end = window.in_range_end().unwrap_or(window.in_seek);
                debug!(file_id = %file_id, ?r, ?window, "ranged download");
                let pulled = transport
                    .pull(&file_id, Some((window.in_seek, pull_end)))
                    .await?;
                let decrypted = pulled
                    .rechunk(cipher_chunk as usize)
                    .decrypt_chunks(ctx, window.chunk_idx);
                apply(decrypted, window.truncator())
            }
            _ => transport
                .pull(&file_id, None)
                .await?
                .rechunk(cipher_chunk as usize)
                .decrypt_chunks(ctx, 0),
        };

        info!(file_id = %file_id, plain_size, ?range, "download opened");
        Ok(Self {
            file_id,
            metadata,
            plain_size,
            range,
            stream,
        })
    }

    pub fn file_id(&self) -> &FileId {
        &self.file_id
    }

    pub fn metadata(&self) -> &TransferMetadata {
        &self.metadata
    }

    /// Decrypted size of the whole transfer.
    pub fn plain_size(&self) -> u64 {
        self.plain_size
    }

    pub fn range(&self) -> Option<ByteRange> {
        self.range
    }

    /// Bytes this session will produce.
    pub fn content_length(&self) -> u64 {
        self.range.map_or(self.plain_size, |r| r.len())
    }

    pub fn response(&self, inline: bool) -> ResponseHeaders {
        ResponseHeaders::new(&self.metadata, self.plain_size, self.range, inline)
    }

    pub fn into_stream(self) -> ByteStream {
        self.stream
    }

    /// Drain the decrypted stream into `writer`. Returns the bytes written.
    pub async fn write_to<W: AsyncWrite + Unpin>(
        mut self,
        writer: &mut W,
        progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> SecsendResult<u64> {
        let total = self.content_length();
        let mut written = 0u64;
        loop {
            let buf = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SecsendError::Canceled),
                next = self.stream.next() => match next {
                    Some(buf) => buf?,
                    None => break,
                },
            };
            writer.write_all(&buf).await?;
            written += buf.len() as u64;
            if let Some(cb) = progress {
                cb(written, total, &self.metadata.name);
            }
        }
        writer.flush().await?;
        info!(file_id = %self.file_id, bytes = written, "download complete");
        Ok(written)
    }
}
