//! Ordered block sequence with a mirrored id list.
//!
//! The mirror exists so `physical_block_ids()` is a cheap slice read on the
//! hot scheduling path. Appends may rebind a block to a new id via
//! copy-on-write, so the mirror is refreshed from the record after every
//! append; this is the only place outside the allocator that observes a COW.

use crate::block::{BlockId, PoolId, TokenId, NULL_BLOCK};
use crate::device_allocator::CpuGpuBlockAllocator;
use crate::error::CacheError;

#[derive(Debug, Default)]
pub struct BlockList {
    blocks: Vec<PoolId>,
    block_ids: Vec<BlockId>,
}

impl BlockList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents with freshly allocated blocks.
    pub fn update(
        &mut self,
        allocator: &CpuGpuBlockAllocator,
        blocks: Vec<PoolId>,
    ) -> Result<(), CacheError> {
        self.block_ids.clear();
        for &block in &blocks {
            let id = allocator
                .block(block)
                .block_id()
                .ok_or(CacheError::DetachedBlock)?;
            self.block_ids.push(id);
        }
        self.blocks = blocks;
        Ok(())
    }

    pub fn append(
        &mut self,
        allocator: &CpuGpuBlockAllocator,
        block: PoolId,
    ) -> Result<(), CacheError> {
        let id = allocator
            .block(block)
            .block_id()
            .ok_or(CacheError::DetachedBlock)?;
        self.blocks.push(block);
        self.block_ids.push(id);
        Ok(())
    }

    /// Append tokens to the block at `index`, then re-read its id: the
    /// append may have diverged the block onto a fresh id.
    pub fn append_token_ids(
        &mut self,
        allocator: &mut CpuGpuBlockAllocator,
        index: usize,
        token_ids: &[TokenId],
    ) -> Result<(), CacheError> {
        let block = self.blocks[index];
        allocator.append_token_ids(block, token_ids)?;
        self.block_ids[index] = allocator.block(block).block_id().unwrap_or(NULL_BLOCK);
        Ok(())
    }

    /// Re-read every block's id into the mirror. Needed after a swap, which
    /// rebinds records to the other device's ids without going through an
    /// append.
    pub fn refresh_ids(&mut self, allocator: &CpuGpuBlockAllocator) {
        for (i, &block) in self.blocks.iter().enumerate() {
            self.block_ids[i] = allocator.block(block).block_id().unwrap_or(NULL_BLOCK);
        }
    }

    /// Overwrite a position, recording `block_id` in the mirror. Used by
    /// sliding-window eviction to install the null sentinel.
    pub fn set(&mut self, index: usize, block: PoolId, block_id: BlockId) {
        self.blocks[index] = block;
        self.block_ids[index] = block_id;
    }

    pub fn get(&self, index: usize) -> PoolId {
        self.blocks[index]
    }

    pub fn last(&self) -> Option<PoolId> {
        self.blocks.last().copied()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn list(&self) -> &[PoolId] {
        &self.blocks
    }

    pub fn ids(&self) -> &[BlockId] {
        &self.block_ids
    }

    pub fn reset(&mut self) {
        self.blocks.clear();
        self.block_ids.clear();
    }
}
