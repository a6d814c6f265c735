//! Stage plumbing: a synchronous per-buffer state machine driven over an async stream.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use secsend_core::SecsendResult;
use secsend_crypto::ChunkCipherContext;

use crate::cipher::{CipherApplier, Direction};
use crate::rechunk::Rechunker;
use crate::skip::PrefixSkipper;
use crate::truncate::EdgeTruncator;
use crate::ByteStream;

/// One pipeline stage.
///
/// `transform` is called for every upstream buffer in order and `flush` once
/// at upstream end. Both push zero or more output buffers into `out`.
pub trait ChunkTransform: Send + 'static {
    fn transform(&mut self, buf: Bytes, out: &mut VecDeque<Bytes>) -> SecsendResult<()>;

    fn flush(&mut self, _out: &mut VecDeque<Bytes>) -> SecsendResult<()> {
        Ok(())
    }
}

struct Driver<T> {
    input: ByteStream,
    stage: T,
    ready: VecDeque<Bytes>,
    done: bool,
}

/// Drive `stage` over `input`.
///
/// Pull-based: upstream is only polled once every buffer already produced has
/// been taken. The first error (from upstream or from the stage) ends the
/// stream; buffers still queued at that point are dropped.
pub fn apply<T: ChunkTransform>(input: ByteStream, stage: T) -> ByteStream {
    let driver = Driver {
        input,
        stage,
        ready: VecDeque::new(),
        done: false,
    };
    stream::unfold(driver, |mut d| async move {
        loop {
            if let Some(buf) = d.ready.pop_front() {
                return Some((Ok(buf), d));
            }
            if d.done {
                return None;
            }
            let step = match d.input.next().await {
                Some(Ok(buf)) => d.stage.transform(buf, &mut d.ready),
                Some(Err(e)) => Err(e),
                None => {
                    d.done = true;
                    d.stage.flush(&mut d.ready)
                }
            };
            if let Err(e) = step {
                d.done = true;
                d.ready.clear();
                return Some((Err(e), d));
            }
        }
    })
    .boxed()
}

/// Builder-style access to the standard stages.
pub trait ByteStreamExt {
    fn rechunk(self, chunk_size: usize) -> ByteStream;
    fn encrypt_chunks(self, ctx: Arc<ChunkCipherContext>, start_index: u64) -> ByteStream;
    fn decrypt_chunks(self, ctx: Arc<ChunkCipherContext>, start_index: u64) -> ByteStream;
    fn skip_prefix(self, n: u64) -> ByteStream;
    fn truncate_edges(self, first_skip: usize, last_size: Option<usize>) -> ByteStream;
}

impl ByteStreamExt for ByteStream {
    fn rechunk(self, chunk_size: usize) -> ByteStream {
        apply(self, Rechunker::new(chunk_size))
    }

    fn encrypt_chunks(self, ctx: Arc<ChunkCipherContext>, start_index: u64) -> ByteStream {
        apply(self, CipherApplier::new(ctx, Direction::Encrypt, start_index))
    }

    fn decrypt_chunks(self, ctx: Arc<ChunkCipherContext>, start_index: u64) -> ByteStream {
        apply(self, CipherApplier::new(ctx, Direction::Decrypt, start_index))
    }

    fn skip_prefix(self, n: u64) -> ByteStream {
        if n == 0 {
            return self;
        }
        apply(self, PrefixSkipper::new(n))
    }

    fn truncate_edges(self, first_skip: usize, last_size: Option<usize>) -> ByteStream {
        apply(self, EdgeTruncator::new(first_skip, last_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{collect, from_buffers};
    use secsend_core::SecsendError;

    struct Doubler;

    impl ChunkTransform for Doubler {
        fn transform(&mut self, buf: Bytes, out: &mut VecDeque<Bytes>) -> SecsendResult<()> {
            out.push_back(buf.clone());
            out.push_back(buf);
            Ok(())
        }

        fn flush(&mut self, out: &mut VecDeque<Bytes>) -> SecsendResult<()> {
            out.push_back(Bytes::from_static(b"!"));
            Ok(())
        }
    }

    struct FailOnSecond(usize);

    impl ChunkTransform for FailOnSecond {
        fn transform(&mut self, buf: Bytes, out: &mut VecDeque<Bytes>) -> SecsendResult<()> {
            self.0 += 1;
            if self.0 == 2 {
                return Err(SecsendError::AuthenticationFailure);
            }
            out.push_back(buf);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_apply_emits_all_outputs_and_flush() {
        let input = from_buffers(vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        let out = collect(apply(input, Doubler)).await.unwrap();
        assert_eq!(out, b"aabb!");
    }

    #[tokio::test]
    async fn test_stage_error_ends_stream() {
        let input = from_buffers(vec![
            Bytes::from_static(b"a"),
            Bytes::from_static(b"b"),
            Bytes::from_static(b"c"),
        ]);
        let mut s = apply(input, FailOnSecond(0));
        assert_eq!(s.next().await.unwrap().unwrap(), Bytes::from_static(b"a"));
        assert!(matches!(
            s.next().await,
            Some(Err(SecsendError::AuthenticationFailure))
        ));
        assert!(s.next().await.is_none());
    }

    #[tokio::test]
    async fn test_upstream_error_propagates() {
        let input: ByteStream = stream::iter(vec![
            Ok(Bytes::from_static(b"a")),
            Err(SecsendError::Canceled),
        ])
        .boxed();
        let mut s = apply(input, Doubler);
        let mut got = Vec::new();
        while let Some(item) = s.next().await {
            got.push(item);
        }
        assert_eq!(got.len(), 3);
        assert!(matches!(got[2], Err(SecsendError::Canceled)));
    }
}
