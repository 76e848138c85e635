//! Single-device block allocator.
//!
//! Owns the id bookkeeping for one device: the free-id deque, the universe
//! of ids, the reference counter, and the copy-on-write tracker. Block
//! records live in a [`BlockPool`] slab owned by the caller (the device
//! facade shares one slab across devices so records never move on swap);
//! every operation that touches records borrows the pool.
//!
//! Id lifecycle: free -> in use (refcount 1) -> possibly shared
//! (refcount > 1) -> back to free when the count reaches zero. Freed ids are
//! pushed to the front of the deque so the most recently used physical
//! storage is reused first.

use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::block::{BlockId, PoolId, TokenId};
use crate::block_pool::BlockPool;
use crate::cow_tracker::{CopyOnWriteTracker, CowPair};
use crate::error::CacheError;
use crate::ref_counter::RefCounter;

#[derive(Debug)]
pub struct NaiveBlockAllocator {
    block_size: usize,
    free_block_ids: VecDeque<BlockId>,
    all_block_ids: BTreeSet<BlockId>,
    ref_counter: RefCounter,
    cow_tracker: CopyOnWriteTracker,
}

impl NaiveBlockAllocator {
    /// Create an allocator managing exactly the given physical ids.
    ///
    /// The facade hands each device a disjoint contiguous range; tests may
    /// pass any id set.
    pub fn new(block_size: usize, block_ids: impl IntoIterator<Item = BlockId>) -> Self {
        let all_block_ids: BTreeSet<BlockId> = block_ids.into_iter().collect();
        Self {
            block_size,
            free_block_ids: all_block_ids.iter().copied().collect(),
            ref_counter: RefCounter::new(all_block_ids.iter().copied()),
            all_block_ids,
            cow_tracker: CopyOnWriteTracker::new(),
        }
    }

    /// Pop a free id and take the first reference on it.
    pub fn allocate_block_id(&mut self) -> Result<BlockId, CacheError> {
        let id = self
            .free_block_ids
            .pop_front()
            .ok_or(CacheError::NoFreeBlocks {
                requested: 1,
                available: 0,
            })?;
        self.ref_counter.incr(id)?;
        Ok(id)
    }

    /// Drop one reference; an id whose count reaches zero returns to the
    /// front of the free deque.
    pub fn free_block_id(&mut self, block_id: BlockId) -> Result<usize, CacheError> {
        let count = self.ref_counter.decr(block_id)?;
        if count == 0 {
            self.free_block_ids.push_front(block_id);
        }
        Ok(count)
    }

    /// Release a block: its physical id always, its pool slot unless
    /// `keep_object` is set (swap-out keeps the record for later rebinding).
    pub fn free(
        &mut self,
        pool: &mut BlockPool,
        block: PoolId,
        keep_object: bool,
    ) -> Result<(), CacheError> {
        let block_id = pool
            .get_mut(block)
            .take_block_id()
            .ok_or(CacheError::DetachedBlock)?;
        self.free_block_id(block_id)?;
        if !keep_object {
            pool.free_block(block);
        }
        Ok(())
    }

    /// Allocate an empty, writable block chained to `prev`.
    pub fn allocate_mutable_block(
        &mut self,
        pool: &mut BlockPool,
        prev: Option<PoolId>,
    ) -> Result<PoolId, CacheError> {
        let block_id = self.allocate_block_id()?;
        match pool.init_block(prev, &[], self.block_size, Some(block_id)) {
            Ok(pool_id) => Ok(pool_id),
            Err(e) => {
                self.free_block_id(block_id)?;
                Err(e)
            }
        }
    }

    /// Allocate a block pre-filled with `token_ids`, typically a full chunk.
    pub fn allocate_immutable_block(
        &mut self,
        pool: &mut BlockPool,
        prev: Option<PoolId>,
        token_ids: &[TokenId],
    ) -> Result<PoolId, CacheError> {
        let block_id = self.allocate_block_id()?;
        match pool.init_block(prev, token_ids, self.block_size, Some(block_id)) {
            Ok(pool_id) => Ok(pool_id),
            Err(e) => {
                self.free_block_id(block_id)?;
                Err(e)
            }
        }
    }

    /// Batch form of [`allocate_immutable_block`]: all ids are reserved up
    /// front, so an id shortage fails atomically with nothing consumed, and
    /// the new blocks chain `prev` through each other in order.
    pub fn allocate_immutable_blocks(
        &mut self,
        pool: &mut BlockPool,
        mut prev: Option<PoolId>,
        token_id_chunks: &[&[TokenId]],
    ) -> Result<Vec<PoolId>, CacheError> {
        if self.free_block_ids.len() < token_id_chunks.len() {
            return Err(CacheError::NoFreeBlocks {
                requested: token_id_chunks.len(),
                available: self.free_block_ids.len(),
            });
        }
        if let Some(chunk) = token_id_chunks.iter().find(|c| c.len() > self.block_size) {
            return Err(CacheError::NotEnoughEmptySlots {
                requested: chunk.len(),
                available: self.block_size,
            });
        }

        let mut blocks = Vec::with_capacity(token_id_chunks.len());
        for chunk in token_id_chunks {
            let block_id = self.allocate_block_id()?;
            let pool_id = pool.init_block(prev, chunk, self.block_size, Some(block_id))?;
            prev = Some(pool_id);
            blocks.push(pool_id);
        }
        Ok(blocks)
    }

    /// Append to a block, performing copy-on-write first when the block is
    /// shared. This is the exclusive point at which COW occurs.
    pub fn append_token_ids(
        &mut self,
        pool: &mut BlockPool,
        block: PoolId,
        token_ids: &[TokenId],
    ) -> Result<(), CacheError> {
        if token_ids.is_empty() {
            return Ok(());
        }
        let record = pool.get(block);
        if token_ids.len() > record.num_empty_slots() {
            return Err(CacheError::NotEnoughEmptySlots {
                requested: token_ids.len(),
                available: record.num_empty_slots(),
            });
        }
        if record.block_id().is_some() {
            self.cow_block_if_not_appendable(pool, block)?;
        }
        pool.get_mut(block).append_token_ids_no_cow(token_ids)
    }

    /// If `block` is shared, rebind it to a fresh id and log the
    /// `src -> tgt` copy; otherwise return its id unchanged. The old id keeps
    /// serving the sequences that still reference it.
    pub fn cow_block_if_not_appendable(
        &mut self,
        pool: &mut BlockPool,
        block: PoolId,
    ) -> Result<BlockId, CacheError> {
        let src = pool.get(block).block_id().ok_or(CacheError::DetachedBlock)?;
        if self
            .cow_tracker
            .is_appendable(&self.ref_counter.as_read_only(), Some(src))?
        {
            return Ok(src);
        }
        // Shared block: refcount >= 2, so dropping our reference cannot free
        // an id. Check availability first so a failed COW leaves the counts
        // untouched.
        if self.free_block_ids.is_empty() {
            return Err(CacheError::NoFreeBlocks {
                requested: 1,
                available: 0,
            });
        }
        self.free_block_id(src)?;
        let tgt = self.allocate_block_id()?;
        self.cow_tracker.record_cow(src, tgt);
        pool.get_mut(block).set_block_id(Some(tgt));
        Ok(tgt)
    }

    /// Share the chain ending at `last_block` with a new sequence.
    ///
    /// Walks the `prev` chain back to the root, takes one extra reference on
    /// every physical id, and builds fresh records that alias the same ids.
    /// The sequences diverge only when one of them next appends to a shared
    /// block.
    pub fn fork(
        &mut self,
        pool: &mut BlockPool,
        last_block: PoolId,
    ) -> Result<Vec<PoolId>, CacheError> {
        let mut chain = Vec::new();
        let mut cursor = Some(last_block);
        while let Some(pool_id) = cursor {
            chain.push(pool_id);
            cursor = pool.get(pool_id).prev();
        }
        chain.reverse();

        let mut forked = Vec::with_capacity(chain.len());
        let mut prev = None;
        for source in chain {
            let record = pool.get(source);
            let block_id = record.block_id().ok_or(CacheError::DetachedBlock)?;
            if self.ref_counter.get(block_id)? == 0 {
                return Err(CacheError::ForkOfFreeBlock { block_id });
            }
            let token_ids = record.token_ids().to_vec();
            self.ref_counter.incr(block_id)?;
            let pool_id = pool.init_block(prev, &token_ids, self.block_size, Some(block_id))?;
            prev = Some(pool_id);
            forked.push(pool_id);
        }
        Ok(forked)
    }

    /// Release the physical ids of `blocks` while keeping the records (and
    /// their tokens) for a later swap-in on another device.
    pub fn swap_out(&mut self, pool: &mut BlockPool, blocks: &[PoolId]) -> Result<(), CacheError> {
        for &block in blocks {
            let block_id = pool
                .get_mut(block)
                .take_block_id()
                .ok_or(CacheError::DetachedBlock)?;
            self.free_block_id(block_id)?;
        }
        Ok(())
    }

    /// Bind fresh ids from this allocator onto previously swapped-out
    /// records. Token contents are untouched.
    pub fn swap_in(&mut self, pool: &mut BlockPool, blocks: &[PoolId]) -> Result<(), CacheError> {
        for &block in blocks {
            let block_id = self.allocate_block_id()?;
            pool.get_mut(block).set_block_id(Some(block_id));
        }
        Ok(())
    }

    pub fn get_num_free_blocks(&self) -> usize {
        self.free_block_ids.len()
    }

    pub fn get_num_total_blocks(&self) -> usize {
        self.all_block_ids.len()
    }

    /// Rank of `absolute_id` within the sorted id universe: the dense index
    /// downstream kernels use for this device's physical storage.
    pub fn get_physical_block_id(&self, absolute_id: BlockId) -> Result<usize, CacheError> {
        self.all_block_ids
            .iter()
            .position(|&id| id == absolute_id)
            .ok_or(CacheError::UnknownBlockId {
                block_id: absolute_id,
            })
    }

    pub fn all_block_ids(&self) -> &BTreeSet<BlockId> {
        &self.all_block_ids
    }

    /// Number of distinct physical ids held by full blocks; the count of
    /// physical copies a swap of `blocks` would touch.
    pub fn get_num_full_blocks_touched(&self, pool: &BlockPool, blocks: &[PoolId]) -> usize {
        let touched: HashSet<BlockId> = blocks
            .iter()
            .filter(|&&b| pool.get(b).is_full())
            .filter_map(|&b| pool.get(b).block_id())
            .collect();
        touched.len()
    }

    /// Drain the copy-on-write log in insertion order.
    pub fn clear_copy_on_writes(&mut self) -> Vec<CowPair> {
        self.cow_tracker.clear_cows()
    }

    pub fn refcount(&self, block_id: BlockId) -> Result<usize, CacheError> {
        self.ref_counter.get(block_id)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    // Prefix-caching surface. Declared so the prefix-caching allocator is a
    // drop-in replacement; the naive allocator has nothing to track.

    pub fn mark_blocks_as_accessed(&mut self, _block_ids: &[BlockId], _now: f64) {}

    pub fn mark_blocks_as_computed(&mut self, _block_ids: &[BlockId]) {}

    pub fn get_common_computed_block_ids(
        &self,
        _computed_seq_block_ids: &[Vec<BlockId>],
    ) -> Vec<BlockId> {
        Vec::new()
    }

    pub fn find_cached_blocks_prefix(&self, _block_hashes: &[u64]) -> Vec<BlockId> {
        Vec::new()
    }

    pub fn promote_to_immutable_block(&mut self, _block: PoolId) -> Result<BlockId, CacheError> {
        Err(CacheError::Unsupported {
            op: "promote_to_immutable_block",
        })
    }

    pub fn reset_prefix_cache(&mut self) -> bool {
        true
    }

    pub fn get_prefix_cache_hit_rate(&self) -> f32 {
        0.0
    }
}
