//! Recycling pool of block records.
//!
//! The pool exists strictly to avoid allocator churn: a freed record's token
//! buffer keeps its capacity and is rewritten in place on the next
//! `init_block`. Pool identity is invisible above the allocator.

use std::collections::VecDeque;

use crate::block::{Block, BlockId, BlockKind, PoolId, TokenId};
use crate::error::CacheError;

#[derive(Debug)]
pub struct BlockPool {
    block_size: usize,
    kind: BlockKind,
    blocks: Vec<Block>,
    free_ids: VecDeque<PoolId>,
}

impl BlockPool {
    /// Pre-create `pool_size` records with stable pool ids `0..pool_size`.
    pub fn new(block_size: usize, kind: BlockKind, pool_size: usize) -> Self {
        Self {
            block_size,
            kind,
            blocks: (0..pool_size).map(Block::unbound).collect(),
            free_ids: (0..pool_size).collect(),
        }
    }

    /// Take a free record, rebind it to `physical_id`, and fill it with
    /// `token_ids`. Doubles the pool first if no record is free.
    ///
    /// `block_size` is per-call so the zero-capacity null sentinel can share
    /// the pool with normal blocks.
    pub fn init_block(
        &mut self,
        prev: Option<PoolId>,
        token_ids: &[TokenId],
        block_size: usize,
        physical_id: Option<BlockId>,
    ) -> Result<PoolId, CacheError> {
        if self.free_ids.is_empty() {
            self.grow();
        }
        let pool_id = self
            .free_ids
            .pop_front()
            .expect("pool grew but has no free slot");
        let block = &mut self.blocks[pool_id];
        block.reinit(prev, block_size, physical_id, self.kind);
        if let Err(e) = block.append_token_ids_no_cow(token_ids) {
            self.free_ids.push_front(pool_id);
            return Err(e);
        }
        Ok(pool_id)
    }

    /// Return a record's slot to the free deque.
    ///
    /// The record stays addressable; the allocator guarantees the slot is
    /// not rebound while any sequence still references it, by always pairing
    /// pool release with physical-id release.
    pub fn free_block(&mut self, pool_id: PoolId) {
        self.free_ids.push_back(pool_id);
    }

    pub fn get(&self, pool_id: PoolId) -> &Block {
        &self.blocks[pool_id]
    }

    pub(crate) fn get_mut(&mut self, pool_id: PoolId) -> &mut Block {
        &mut self.blocks[pool_id]
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn num_free_slots(&self) -> usize {
        self.free_ids.len()
    }

    fn grow(&mut self) {
        let additional = self.blocks.len().max(1);
        let start = self.blocks.len();
        for pool_id in start..start + additional {
            self.blocks.push(Block::unbound(pool_id));
            self.free_ids.push_back(pool_id);
        }
    }
}
