//! Drop the first `n` bytes of a stream.
//!
//! Seeks inside sources that cannot seek natively, such as a regenerated
//! archive stream on upload resume.

use std::collections::VecDeque;

use bytes::{Buf, Bytes};
use secsend_core::SecsendResult;

use crate::transform::ChunkTransform;

#[derive(Debug)]
pub struct PrefixSkipper {
    remaining: u64,
}

impl PrefixSkipper {
    pub fn new(n: u64) -> Self {
        Self { remaining: n }
    }
}

impl ChunkTransform for PrefixSkipper {
    fn transform(&mut self, mut buf: Bytes, out: &mut VecDeque<Bytes>) -> SecsendResult<()> {
        if self.remaining > 0 {
            let n = self.remaining.min(buf.len() as u64);
            buf.advance(n as usize);
            self.remaining -= n;
        }
        if !buf.is_empty() {
            out.push_back(buf);
        }
        Ok(())
    }
}
