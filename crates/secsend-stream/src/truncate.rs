//! Trim the outer edges of a stream: a prefix of the first buffer and the
//! tail of the last one.
//!
//! The last buffer is only known once upstream ends, so exactly one buffer is
//! held back at all times.

use std::collections::VecDeque;

use bytes::Bytes;
use secsend_core::SecsendResult;

use crate::transform::ChunkTransform;

/// A buffer held back until the next one (or the end of input) arrives.
#[derive(Debug)]
struct Pending {
    buf: Bytes,
    /// Bytes to drop from the front; non-zero only for the first buffer.
    skip: usize,
}

#[derive(Debug)]
pub struct EdgeTruncator {
    first_skip: usize,
    /// Keep this many bytes of the last buffer, counted from the start of the
    /// buffer as received. `None` or `Some(0)` keeps the whole buffer.
    last_size: Option<usize>,
    pending: Option<Pending>,
    started: bool,
}

impl EdgeTruncator {
    pub fn new(first_skip: usize, last_size: Option<usize>) -> Self {
        Self {
            first_skip,
            last_size,
            pending: None,
            started: false,
        }
    }
}

fn push_nonempty(out: &mut VecDeque<Bytes>, buf: Bytes) {
    if !buf.is_empty() {
        out.push_back(buf);
    }
}

impl ChunkTransform for EdgeTruncator {
    fn transform(&mut self, buf: Bytes, out: &mut VecDeque<Bytes>) -> SecsendResult<()> {
        let skip = if self.started { 0 } else { self.first_skip };
        self.started = true;
        if let Some(prev) = self.pending.replace(Pending { buf, skip }) {
            let start = prev.skip.min(prev.buf.len());
            push_nonempty(out, prev.buf.slice(start..));
        }
        Ok(())
    }

    fn flush(&mut self, out: &mut VecDeque<Bytes>) -> SecsendResult<()> {
        let Some(last) = self.pending.take() else {
            return Ok(());
        };
        let end = match self.last_size {
            Some(n) if n > 0 => n.min(last.buf.len()),
            _ => last.buf.len(),
        };
        let start = last.skip.min(end);
        push_nonempty(out, last.buf.slice(start..end));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::ByteStreamExt;
    use crate::{collect_buffers, from_buffers, test_buffers};

    #[tokio::test]
    async fn test_truncate_edges() {
        let out = collect_buffers(test_buffers().truncate_edges(1, Some(1)))
            .await
            .unwrap();
        assert_eq!(out.len(), 10);
        assert_eq!(out[0], Bytes::from_static(b"est 0"));
        for i in 1..9 {
            assert_eq!(out[i], Bytes::from(format!("test {i}")));
        }
        assert_eq!(out[9], Bytes::from_static(b"t"));
    }

    #[tokio::test]
    async fn test_zero_last_size_keeps_full_chunk() {
        let out = collect_buffers(test_buffers().truncate_edges(0, Some(0)))
            .await
            .unwrap();
        assert_eq!(out[9], Bytes::from_static(b"test 9"));

        let out = collect_buffers(test_buffers().truncate_edges(2, None))
            .await
            .unwrap();
        assert_eq!(out[0], Bytes::from_static(b"st 0"));
        assert_eq!(out[9], Bytes::from_static(b"test 9"));
    }

    #[tokio::test]
    async fn test_single_buffer_window() {
        let input = from_buffers(vec![Bytes::from_static(b"0123456789")]);
        let out = collect_buffers(input.truncate_edges(3, Some(7))).await.unwrap();
        assert_eq!(out, vec![Bytes::from_static(b"3456")]);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let out = collect_buffers(from_buffers(vec![]).truncate_edges(3, Some(1)))
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_skip_larger_than_first_buffer() {
        let input = from_buffers(vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")]);
        let out = collect_buffers(input.truncate_edges(5, None)).await.unwrap();
        assert_eq!(out, vec![Bytes::from_static(b"cd")]);
    }

    #[test]
    fn test_holds_exactly_one_buffer() {
        let mut t = EdgeTruncator::new(0, None);
        let mut out = VecDeque::new();
        t.transform(Bytes::from_static(b"a"), &mut out).unwrap();
        assert!(out.is_empty());
        t.transform(Bytes::from_static(b"b"), &mut out).unwrap();
        assert_eq!(out.len(), 1);
        t.flush(&mut out).unwrap();
        assert_eq!(out.len(), 2);
    }
}
