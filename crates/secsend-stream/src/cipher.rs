//! Apply the chunk cipher to each fixed-size buffer, counting chunk indices.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use secsend_core::{SecsendError, SecsendResult};
use secsend_crypto::ChunkCipherContext;

use crate::transform::ChunkTransform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// Expects its input already cut to chunk boundaries (see [`Rechunker`](crate::rechunk::Rechunker)).
#[derive(Debug)]
pub struct CipherApplier {
    ctx: Arc<ChunkCipherContext>,
    direction: Direction,
    /// `None` once index `u64::MAX` has been used
    next_index: Option<u64>,
}

impl CipherApplier {
    pub fn new(ctx: Arc<ChunkCipherContext>, direction: Direction, start_index: u64) -> Self {
        Self {
            ctx,
            direction,
            next_index: Some(start_index),
        }
    }

    pub fn next_index(&self) -> Option<u64> {
        self.next_index
    }
}

impl ChunkTransform for CipherApplier {
    fn transform(&mut self, buf: Bytes, out: &mut VecDeque<Bytes>) -> SecsendResult<()> {
        // a nonce must never repeat under one key
        let index = self.next_index.ok_or_else(|| {
            SecsendError::Other(anyhow::anyhow!("chunk index space exhausted"))
        })?;
        self.next_index = index.checked_add(1);
        let processed = match self.direction {
            Direction::Encrypt => self.ctx.encrypt(index, &buf)?,
            Direction::Decrypt => self.ctx.decrypt(index, &buf)?,
        };
        out.push_back(Bytes::from(processed));
        Ok(())
    }
}
