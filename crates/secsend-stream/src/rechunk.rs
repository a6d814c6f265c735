//! Regroup arbitrarily sized buffers into fixed-size chunks.
//!
//! Input buffers can be very large. Whole chunks are sliced out of the input
//! without copying; only a chunk straddling two input buffers is assembled
//! in the carry buffer.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use secsend_core::SecsendResult;

use crate::transform::ChunkTransform;

#[derive(Debug)]
pub struct Rechunker {
    chunk_size: usize,
    carry: BytesMut,
}

impl Rechunker {
    /// Panics if `chunk_size` is zero.
    pub fn new(chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        Self {
            chunk_size,
            carry: BytesMut::new(),
        }
    }
}

impl ChunkTransform for Rechunker {
    fn transform(&mut self, mut buf: Bytes, out: &mut VecDeque<Bytes>) -> SecsendResult<()> {
        if !self.carry.is_empty() {
            let take = buf.len().min(self.chunk_size - self.carry.len());
            self.carry.extend_from_slice(&buf.split_to(take));
            if self.carry.len() == self.chunk_size {
                out.push_back(self.carry.split().freeze());
            }
        }
        while buf.len() >= self.chunk_size {
            out.push_back(buf.split_to(self.chunk_size));
        }
        if !buf.is_empty() {
            self.carry.reserve(self.chunk_size);
            self.carry.extend_from_slice(&buf);
        }
        Ok(())
    }

    fn flush(&mut self, out: &mut VecDeque<Bytes>) -> SecsendResult<()> {
        if !self.carry.is_empty() {
            out.push_back(self.carry.split().freeze());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::ByteStreamExt;
    use crate::{collect_buffers, from_buffers, test_buffers};
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_chunker_small_chunks() {
        let out = collect_buffers(test_buffers().rechunk(2)).await.unwrap();
        assert_eq!(out.len(), 30);
        for i in 0..10 {
            assert_eq!(out[3 * i], Bytes::from_static(b"te"));
            assert_eq!(out[3 * i + 1], Bytes::from_static(b"st"));
            assert_eq!(out[3 * i + 2], Bytes::from(format!(" {i}")));
        }
    }

    #[tokio::test]
    async fn test_chunker_flush() {
        let input = from_buffers(vec![Bytes::from_static(b"0123456789")]);
        let out = collect_buffers(input.rechunk(6)).await.unwrap();
        assert_eq!(
            out,
            vec![Bytes::from_static(b"012345"), Bytes::from_static(b"6789")]
        );
    }

    #[tokio::test]
    async fn test_chunker_exact_multiple_has_no_tail() {
        let input = from_buffers(vec![Bytes::from_static(b"abcd"), Bytes::from_static(b"efgh")]);
        let out = collect_buffers(input.rechunk(4)).await.unwrap();
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn test_chunker_empty_input() {
        let out = collect_buffers(from_buffers(vec![]).rechunk(4)).await.unwrap();
        assert!(out.is_empty());
    }

    fn split_points(data: &[u8], cuts: &[usize]) -> Vec<Bytes> {
        let mut cuts: Vec<usize> = cuts.iter().map(|c| c % (data.len() + 1)).collect();
        cuts.sort_unstable();
        let mut out = Vec::new();
        let mut prev = 0;
        for c in cuts {
            out.push(Bytes::copy_from_slice(&data[prev..c]));
            prev = c;
        }
        out.push(Bytes::copy_from_slice(&data[prev..]));
        out
    }

    proptest! {
        /// Output chunking depends only on the byte content, not on how input is split.
        #[test]
        fn rechunk_is_split_invariant(
            data in proptest::collection::vec(any::<u8>(), 0..2000),
            cuts in proptest::collection::vec(any::<usize>(), 0..8),
            chunk in 1usize..300,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let out = rt.block_on(collect_buffers(from_buffers(split_points(&data, &cuts)).rechunk(chunk))).unwrap();

            let joined: Vec<u8> = out.iter().flat_map(|b| b.iter().copied()).collect();
            prop_assert_eq!(&joined, &data);
            for (i, b) in out.iter().enumerate() {
                if i + 1 < out.len() {
                    prop_assert_eq!(b.len(), chunk);
                } else {
                    prop_assert!(!b.is_empty() && b.len() <= chunk);
                }
            }
        }
    }
}
