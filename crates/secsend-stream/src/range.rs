//! Offset arithmetic between two chunked streams.
//!
//! An "in" stream of `in_chunk_size` chunks maps 1:1 (chunk for chunk) onto an
//! "out" stream of `out_chunk_size` chunks. Given a window of the out stream,
//! [`StreamRange::compute`] says where to start reading the in stream, which
//! chunk index that start corresponds to, and how to trim the produced output
//! back down to the window.
//!
//! Used both ways round:
//! - upload resume: out = ciphertext already stored, in = plaintext source
//! - range download: out = requested plaintext window, in = stored ciphertext

use crate::truncate::EdgeTruncator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRange {
    /// Index of the first chunk touched by the window
    pub chunk_idx: u64,
    /// In-stream byte offset of that chunk
    pub in_seek: u64,
    /// Leading bytes of the first out chunk outside the window
    pub out_skip: u64,
    /// In-stream bytes covering the window, when a length was given
    pub in_length: Option<u64>,
    /// Bytes to keep of the last out chunk; 0 keeps the whole chunk
    pub out_last_size: Option<u64>,
    pub out_seek: Option<u64>,
    pub out_length: Option<u64>,
}

impl StreamRange {
    /// Both chunk sizes must be non-zero.
    ///
    /// Length arithmetic is measured from the first chunk boundary, so a
    /// window starting mid-chunk still covers every chunk it overlaps.
    pub fn compute(
        in_chunk_size: u64,
        out_chunk_size: u64,
        out_seek: Option<u64>,
        out_length: Option<u64>,
    ) -> Self {
        let (chunk_idx, in_seek, out_skip) = match out_seek {
            Some(seek) => {
                let idx = seek / out_chunk_size;
                (idx, idx * in_chunk_size, seek % out_chunk_size)
            }
            None => (0, 0, 0),
        };

        let (in_length, out_last_size) = match out_length {
            Some(len) => {
                let end = out_skip + len;
                let n_chunks = end.div_ceil(out_chunk_size);
                (Some(n_chunks * in_chunk_size), Some(end % out_chunk_size))
            }
            None => (None, None),
        };

        let range = Self {
            chunk_idx,
            in_seek,
            out_skip,
            in_length,
            out_last_size,
            out_seek,
            out_length,
        };
        tracing::debug!(?range, in_chunk_size, out_chunk_size, "stream range");
        range
    }

    /// Inclusive last in-stream byte, when a length was given.
    pub fn in_range_end(&self) -> Option<u64> {
        self.in_length
            .filter(|len| *len > 0)
            .map(|len| self.in_seek + len - 1)
    }

    /// Truncator that trims produced out chunks back to the window.
    pub fn truncator(&self) -> EdgeTruncator {
        EdgeTruncator::new(
            self.out_skip as usize,
            self.out_last_size.map(|n| n as usize),
        )
    }
}
