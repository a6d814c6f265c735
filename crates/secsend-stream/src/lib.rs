//! secsend-stream: the byte-stream pipeline between a source and the transport
//!
//! Upload:   source → [archive] → [skip_prefix] → rechunk(c) → encrypt_chunks(i) → [truncate_edges]
//! Download: pull → rechunk(c + 16) → decrypt_chunks(i) → truncate_edges(skip, last)
//!
//! Every stage is demand-driven: nothing is read from upstream until the
//! consumer asks for the next buffer, and chunks of one stream are processed
//! strictly in order.

pub mod archive;
pub mod cipher;
pub mod range;
pub mod rechunk;
pub mod skip;
pub mod transform;
pub mod truncate;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use secsend_core::SecsendResult;

pub use archive::{Archive, ArchiveEntry, EntrySource};
pub use cipher::{CipherApplier, Direction};
pub use range::StreamRange;
pub use rechunk::Rechunker;
pub use skip::PrefixSkipper;
pub use transform::{apply, ByteStreamExt, ChunkTransform};
pub use truncate::EdgeTruncator;

/// A lazy, fallible sequence of byte buffers.
pub type ByteStream = BoxStream<'static, SecsendResult<Bytes>>;

pub fn once(buf: Bytes) -> ByteStream {
    stream::once(async move { Ok(buf) }).boxed()
}

pub fn from_buffers(bufs: Vec<Bytes>) -> ByteStream {
    stream::iter(bufs.into_iter().map(Ok)).boxed()
}

/// Drain a stream into one contiguous buffer.
pub async fn collect(stream: ByteStream) -> SecsendResult<Vec<u8>> {
    stream
        .try_fold(Vec::new(), |mut acc, buf| async move {
            acc.extend_from_slice(&buf);
            Ok(acc)
        })
        .await
}

/// Drain a stream, keeping buffer boundaries.
pub async fn collect_buffers(stream: ByteStream) -> SecsendResult<Vec<Bytes>> {
    stream.try_collect().await
}

/// Ten buffers "test 0" .. "test 9".
#[cfg(test)]
pub(crate) fn test_buffers() -> ByteStream {
    from_buffers((0..10).map(|i| Bytes::from(format!("test {i}"))).collect())
}
