//! Per-sequence block table.
//!
//! Translates a sequence's token stream into blocks: chunks incoming tokens,
//! asks the allocator for blocks, tracks how many slots are filled, and
//! exposes the physical ids downstream attention kernels consume. Forking
//! and sliding-window eviction both live here because they are per-sequence
//! policies; the allocator only sees the resulting block operations.

use crate::block::{BlockId, Device, PoolId, TokenId, NULL_BLOCK};
use crate::block_list::BlockList;
use crate::device_allocator::CpuGpuBlockAllocator;
use crate::error::CacheError;

#[derive(Debug)]
pub struct BlockTable {
    block_size: usize,
    blocks: BlockList,
    /// Total tokens stored across all blocks. Positions evicted by the
    /// sliding window keep counting: the table's index arithmetic depends on
    /// it.
    num_full_slots: usize,
    /// Sliding-window horizon in blocks; `None` disables eviction.
    max_block_sliding_window: Option<usize>,
}

impl BlockTable {
    pub fn new(block_size: usize, max_block_sliding_window: Option<usize>) -> Self {
        Self {
            block_size,
            blocks: BlockList::new(),
            num_full_slots: 0,
            max_block_sliding_window,
        }
    }

    /// Wrap existing blocks (e.g. the result of a fork) in a new table.
    /// The fill level is recomputed from the blocks' token counts.
    pub fn with_blocks(
        block_size: usize,
        allocator: &CpuGpuBlockAllocator,
        blocks: Vec<PoolId>,
        max_block_sliding_window: Option<usize>,
    ) -> Result<Self, CacheError> {
        let mut table = Self::new(block_size, max_block_sliding_window);
        table.num_full_slots = blocks
            .iter()
            .map(|&b| allocator.block(b).num_tokens())
            .sum();
        table.blocks.update(allocator, blocks)?;
        Ok(table)
    }

    /// Blocks needed to hold `token_ids` plus `num_lookahead_slots` yet-to-be
    /// generated tokens.
    pub fn get_num_required_blocks(
        token_ids: &[TokenId],
        block_size: usize,
        num_lookahead_slots: usize,
    ) -> usize {
        (token_ids.len() + num_lookahead_slots).div_ceil(block_size)
    }

    /// Allocate blocks for the sequence's initial tokens on `device`.
    ///
    /// Full chunks become immutable blocks in one atomic batch; a partial
    /// tail becomes a single mutable block. If the tail allocation fails
    /// after the batch succeeded, the batch is freed before the error is
    /// returned, leaving the allocator untouched.
    pub fn allocate(
        &mut self,
        allocator: &mut CpuGpuBlockAllocator,
        token_ids: &[TokenId],
        device: Device,
    ) -> Result<(), CacheError> {
        if self.is_allocated() {
            return Err(CacheError::AlreadyAllocated);
        }
        if token_ids.is_empty() {
            return Err(CacheError::EmptyTokenIds);
        }

        let (full_chunks, tail) = split_into_chunks(token_ids, self.block_size);
        let mut blocks = allocator.allocate_immutable_blocks(None, &full_chunks, device)?;

        if !tail.is_empty() {
            let prev = blocks.last().copied();
            match allocator.allocate_mutable_block(prev, device) {
                Ok(block) => {
                    allocator.append_token_ids(block, tail)?;
                    blocks.push(block);
                }
                Err(e) => {
                    for &block in &blocks {
                        let _ = allocator.free(block);
                    }
                    return Err(e);
                }
            }
        }

        self.blocks.update(allocator, blocks)?;
        self.num_full_slots = token_ids.len();
        Ok(())
    }

    /// Append `token_ids` to the sequence.
    ///
    /// Runs sliding-window eviction first (when configured), grows the table
    /// to fit `token_ids` plus `num_lookahead_slots`, then appends chunk by
    /// chunk: the first chunk tops up the open last block, the rest land in
    /// the freshly allocated blocks. An empty `token_ids` still performs
    /// eviction.
    pub fn append_token_ids(
        &mut self,
        allocator: &mut CpuGpuBlockAllocator,
        token_ids: &[TokenId],
        num_lookahead_slots: usize,
        num_computed_slots: Option<usize>,
    ) -> Result<(), CacheError> {
        if !self.is_allocated() {
            return Err(CacheError::NotAllocated);
        }

        if let Some(window) = self.max_block_sliding_window {
            let computed = num_computed_slots.ok_or(CacheError::MissingComputedSlots)?;
            self.evict_outside_window(allocator, computed, window)?;
        }

        self.ensure_num_empty_slots(allocator, token_ids.len() + num_lookahead_slots)?;

        let first_block_idx = self.num_full_slots / self.block_size;
        let chunks = chunk_for_append(token_ids, self.num_full_slots, self.block_size);
        for (i, chunk) in chunks.into_iter().enumerate() {
            self.blocks
                .append_token_ids(allocator, first_block_idx + i, chunk)?;
        }
        self.num_full_slots += token_ids.len();
        Ok(())
    }

    /// Free every block strictly older than the window and install the null
    /// sentinel in its place. Positions and `num_full_slots` are preserved so
    /// the append index arithmetic is unaffected.
    fn evict_outside_window(
        &mut self,
        allocator: &mut CpuGpuBlockAllocator,
        num_computed_slots: usize,
        window: usize,
    ) -> Result<(), CacheError> {
        let null_block = allocator.allocate_or_get_null_block()?;
        let end_block_idx = (num_computed_slots / self.block_size)
            .saturating_sub(window)
            .min(self.blocks.len());
        for idx in 0..end_block_idx {
            let block = self.blocks.get(idx);
            if block == null_block {
                continue;
            }
            allocator.free(block)?;
            // the successor must not chain into the freed record
            if idx + 1 < self.blocks.len() {
                allocator.detach_prev(self.blocks.get(idx + 1));
            }
            self.blocks.set(idx, null_block, NULL_BLOCK);
        }
        Ok(())
    }

    /// Grow the table until at least `num_empty_slots` slots are writable.
    ///
    /// New mutable blocks chain off the current last block. On an id
    /// shortage every block allocated so far is freed, so a failed growth
    /// leaves the table unchanged.
    pub fn ensure_num_empty_slots(
        &mut self,
        allocator: &mut CpuGpuBlockAllocator,
        num_empty_slots: usize,
    ) -> Result<(), CacheError> {
        if !self.is_allocated() {
            return Err(CacheError::NotAllocated);
        }
        let current = self.num_empty_slots();
        if current >= num_empty_slots {
            return Ok(());
        }

        // growth happens on the device holding the active sequence
        let device = Device::Gpu;
        let blocks_to_allocate = (num_empty_slots - current).div_ceil(self.block_size);
        let mut created = Vec::with_capacity(blocks_to_allocate);
        let mut prev = self.blocks.last();
        for _ in 0..blocks_to_allocate {
            match allocator.allocate_mutable_block(prev, device) {
                Ok(block) => {
                    prev = Some(block);
                    created.push(block);
                }
                Err(e) => {
                    for &block in &created {
                        let _ = allocator.free(block);
                    }
                    return Err(e);
                }
            }
        }
        for block in created {
            self.blocks.append(allocator, block)?;
        }
        Ok(())
    }

    /// Create a sibling table sharing this sequence's chain by reference
    /// counting. The new table owns its own block list; only physical ids
    /// are shared, and they diverge on the next shared append.
    pub fn fork(
        &self,
        allocator: &mut CpuGpuBlockAllocator,
    ) -> Result<BlockTable, CacheError> {
        let last_block = self.blocks.last().ok_or(CacheError::NotAllocated)?;
        let forked_blocks = allocator.fork(last_block)?;
        Self::with_blocks(
            self.block_size,
            allocator,
            forked_blocks,
            self.max_block_sliding_window,
        )
    }

    /// Free every block and reset. Calling `free` on an already-freed table
    /// is a no-op.
    pub fn free(&mut self, allocator: &mut CpuGpuBlockAllocator) -> Result<(), CacheError> {
        let null_block = allocator.null_block();
        for &block in self.blocks.list() {
            if Some(block) == null_block {
                continue;
            }
            allocator.free(block)?;
        }
        self.blocks.reset();
        self.num_full_slots = 0;
        Ok(())
    }

    /// Physical ids in sequence order; evicted positions report
    /// [`NULL_BLOCK`].
    pub fn physical_block_ids(&self) -> &[BlockId] {
        self.blocks.ids()
    }

    /// Re-sync the id mirror with the block records after a swap rebound
    /// them to another device.
    pub fn refresh_physical_block_ids(&mut self, allocator: &CpuGpuBlockAllocator) {
        self.blocks.refresh_ids(allocator);
    }

    /// Pool handles in sequence order, e.g. for a swap.
    pub fn blocks(&self) -> &[PoolId] {
        self.blocks.list()
    }

    pub fn num_full_slots(&self) -> usize {
        self.num_full_slots
    }

    /// The suffix of `sequence_token_ids` not yet appended to this table.
    pub fn get_unseen_token_ids<'a>(&self, sequence_token_ids: &'a [TokenId]) -> &'a [TokenId] {
        &sequence_token_ids[self.num_full_slots.min(sequence_token_ids.len())..]
    }

    /// All stored tokens in sequence order.
    pub fn get_all_token_ids(&self, allocator: &CpuGpuBlockAllocator) -> Vec<TokenId> {
        self.blocks
            .list()
            .iter()
            .flat_map(|&b| allocator.block(b).token_ids().to_vec())
            .collect()
    }

    /// How many blocks an append of `token_ids` plus lookahead would write
    /// into, given the current fill level.
    pub fn get_num_blocks_touched_by_append_slots(
        &self,
        token_ids: &[TokenId],
        num_lookahead_slots: usize,
    ) -> usize {
        let num_token_ids = token_ids.len() + num_lookahead_slots;
        let remainder = self.num_full_slots % self.block_size;
        let first_chunk_size = self.block_size - remainder;
        if num_token_ids <= first_chunk_size {
            1
        } else {
            1 + (num_token_ids - first_chunk_size).div_ceil(self.block_size)
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn is_allocated(&self) -> bool {
        !self.blocks.is_empty()
    }

    fn num_empty_slots(&self) -> usize {
        self.blocks.len() * self.block_size - self.num_full_slots
    }
}

/// Split initial tokens into full block-sized chunks plus a partial tail.
fn split_into_chunks(token_ids: &[TokenId], block_size: usize) -> (Vec<&[TokenId]>, &[TokenId]) {
    let full = token_ids.len() / block_size * block_size;
    let chunks = token_ids[..full].chunks(block_size).collect();
    (chunks, &token_ids[full..])
}

/// Chunk an append so the first piece fills the open block's remaining
/// capacity and the rest split on block boundaries.
fn chunk_for_append(
    token_ids: &[TokenId],
    num_full_slots: usize,
    block_size: usize,
) -> Vec<&[TokenId]> {
    if token_ids.is_empty() {
        return Vec::new();
    }
    let remainder = num_full_slots % block_size;
    let first_chunk_size = (block_size - remainder).min(token_ids.len());
    let mut chunks = vec![&token_ids[..first_chunk_size]];
    chunks.extend(token_ids[first_chunk_size..].chunks(block_size));
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    fn facade(num_blocks: usize, block_size: usize) -> CpuGpuBlockAllocator {
        CpuGpuBlockAllocator::new(&CacheConfig::new(block_size, num_blocks, 0)).unwrap()
    }

    #[test]
    fn required_blocks_rounds_up() {
        assert_eq!(BlockTable::get_num_required_blocks(&[1, 2, 3], 4, 0), 1);
        assert_eq!(BlockTable::get_num_required_blocks(&[1, 2, 3, 4], 4, 0), 1);
        assert_eq!(BlockTable::get_num_required_blocks(&[1, 2, 3, 4], 4, 1), 2);
        assert_eq!(BlockTable::get_num_required_blocks(&[], 4, 0), 0);
    }

    #[test]
    fn allocate_splits_full_chunks_and_tail() {
        let mut alloc = facade(8, 4);
        let mut table = BlockTable::new(4, None);
        table
            .allocate(&mut alloc, &[1, 2, 3, 4, 5, 6], Device::Gpu)
            .unwrap();

        assert_eq!(table.num_full_slots(), 6);
        assert_eq!(table.physical_block_ids().len(), 2);
        assert_eq!(alloc.block(table.blocks()[0]).token_ids(), &[1, 2, 3, 4]);
        assert_eq!(alloc.block(table.blocks()[1]).token_ids(), &[5, 6]);
        assert!(alloc.block(table.blocks()[0]).is_full());
        assert!(!alloc.block(table.blocks()[1]).is_full());
    }

    #[test]
    fn allocate_exact_multiple_has_no_tail() {
        let mut alloc = facade(8, 2);
        let mut table = BlockTable::new(2, None);
        table.allocate(&mut alloc, &[1, 2, 3, 4], Device::Gpu).unwrap();
        assert_eq!(table.physical_block_ids().len(), 2);
        assert!(alloc.block(table.blocks()[1]).is_full());
    }

    #[test]
    fn allocate_twice_fails() {
        let mut alloc = facade(8, 2);
        let mut table = BlockTable::new(2, None);
        table.allocate(&mut alloc, &[1], Device::Gpu).unwrap();
        assert!(matches!(
            table.allocate(&mut alloc, &[2], Device::Gpu).unwrap_err(),
            CacheError::AlreadyAllocated
        ));
    }

    #[test]
    fn allocate_empty_fails() {
        let mut alloc = facade(8, 2);
        let mut table = BlockTable::new(2, None);
        assert!(matches!(
            table.allocate(&mut alloc, &[], Device::Gpu).unwrap_err(),
            CacheError::EmptyTokenIds
        ));
    }

    #[test]
    fn allocate_shortage_leaks_nothing() {
        let mut alloc = facade(2, 2);
        let mut table = BlockTable::new(2, None);
        let err = table
            .allocate(&mut alloc, &[1, 2, 3, 4, 5], Device::Gpu)
            .unwrap_err();
        assert!(err.is_no_free_blocks());
        assert_eq!(alloc.get_num_free_blocks(Device::Gpu), 2);
        assert_eq!(table.num_full_slots(), 0);
        assert!(table.physical_block_ids().is_empty());
    }

    #[test]
    fn append_fills_open_block_then_allocates() {
        let mut alloc = facade(8, 4);
        let mut table = BlockTable::new(4, None);
        table.allocate(&mut alloc, &[1, 2], Device::Gpu).unwrap();

        table
            .append_token_ids(&mut alloc, &[3, 4, 5, 6], 0, None)
            .unwrap();
        assert_eq!(table.num_full_slots(), 6);
        assert_eq!(table.physical_block_ids().len(), 2);
        assert_eq!(alloc.block(table.blocks()[0]).token_ids(), &[1, 2, 3, 4]);
        assert_eq!(alloc.block(table.blocks()[1]).token_ids(), &[5, 6]);
    }

    #[test]
    fn append_exact_boundary_chunk() {
        let mut alloc = facade(8, 4);
        let mut table = BlockTable::new(4, None);
        table.allocate(&mut alloc, &[1, 2, 3, 4], Device::Gpu).unwrap();

        table
            .append_token_ids(&mut alloc, &[5, 6, 7, 8], 0, None)
            .unwrap();
        assert_eq!(table.physical_block_ids().len(), 2);
        assert!(alloc.block(table.blocks()[1]).is_full());
    }

    #[test]
    fn append_before_allocate_fails() {
        let mut alloc = facade(8, 4);
        let mut table = BlockTable::new(4, None);
        assert!(matches!(
            table
                .append_token_ids(&mut alloc, &[1], 0, None)
                .unwrap_err(),
            CacheError::NotAllocated
        ));
    }

    #[test]
    fn append_with_lookahead_preallocates() {
        let mut alloc = facade(8, 2);
        let mut table = BlockTable::new(2, None);
        table.allocate(&mut alloc, &[1, 2], Device::Gpu).unwrap();

        table.append_token_ids(&mut alloc, &[3], 3, None).unwrap();
        // 1 appended + 3 lookahead slots need two extra blocks
        assert_eq!(table.physical_block_ids().len(), 3);
        assert_eq!(table.num_full_slots(), 3);
    }

    #[test]
    fn append_shortage_leaves_table_unchanged() {
        let mut alloc = facade(2, 1);
        let mut table = BlockTable::new(1, None);
        table.allocate(&mut alloc, &[9], Device::Gpu).unwrap();

        let err = table
            .append_token_ids(&mut alloc, &[10, 11], 0, None)
            .unwrap_err();
        assert!(err.is_no_free_blocks());
        assert_eq!(table.num_full_slots(), 1);
        assert_eq!(table.physical_block_ids().len(), 1);
        assert_eq!(alloc.get_num_free_blocks(Device::Gpu), 1);
    }

    #[test]
    fn empty_append_is_token_noop() {
        let mut alloc = facade(8, 2);
        let mut table = BlockTable::new(2, None);
        table.allocate(&mut alloc, &[1, 2], Device::Gpu).unwrap();
        table.append_token_ids(&mut alloc, &[], 0, None).unwrap();
        assert_eq!(table.num_full_slots(), 2);
        assert_eq!(table.physical_block_ids().len(), 1);
    }

    #[test]
    fn fork_shares_ids_with_independent_lists() {
        let mut alloc = facade(4, 2);
        let mut table_a = BlockTable::new(2, None);
        table_a
            .allocate(&mut alloc, &[1, 2, 3, 4], Device::Gpu)
            .unwrap();

        let table_b = table_a.fork(&mut alloc).unwrap();
        assert_eq!(table_b.num_full_slots(), 4);
        assert_eq!(table_b.physical_block_ids(), table_a.physical_block_ids());
        // same ids, distinct records
        assert_ne!(table_b.blocks(), table_a.blocks());
        for &id in table_a.physical_block_ids() {
            assert_eq!(alloc.refcount(id).unwrap(), 2);
        }
    }

    #[test]
    fn append_to_fork_cows_partial_last_block() {
        let mut alloc = facade(4, 2);
        let mut table_a = BlockTable::new(2, None);
        table_a
            .allocate(&mut alloc, &[1, 2, 3], Device::Gpu)
            .unwrap();
        let a_ids = table_a.physical_block_ids().to_vec();

        let mut table_b = table_a.fork(&mut alloc).unwrap();
        table_b
            .append_token_ids(&mut alloc, &[5], 0, None)
            .unwrap();

        let b_ids = table_b.physical_block_ids().to_vec();
        assert_eq!(b_ids[0], a_ids[0]);
        assert_ne!(b_ids[1], a_ids[1]);
        assert_eq!(alloc.refcount(a_ids[1]).unwrap(), 1);
        assert_eq!(alloc.refcount(b_ids[1]).unwrap(), 1);
        assert_eq!(alloc.clear_copy_on_writes(), vec![(a_ids[1], b_ids[1])]);
        assert_eq!(table_a.num_full_slots(), 3);
        assert_eq!(table_b.num_full_slots(), 4);
        assert_eq!(alloc.block(table_a.blocks()[1]).token_ids(), &[3]);
        assert_eq!(alloc.block(table_b.blocks()[1]).token_ids(), &[3, 5]);
    }

    #[test]
    fn append_to_fork_with_full_blocks_allocates_new_block() {
        let mut alloc = facade(4, 2);
        let mut table_a = BlockTable::new(2, None);
        table_a
            .allocate(&mut alloc, &[1, 2, 3, 4], Device::Gpu)
            .unwrap();
        let a_ids = table_a.physical_block_ids().to_vec();

        let mut table_b = table_a.fork(&mut alloc).unwrap();
        table_b
            .append_token_ids(&mut alloc, &[5], 0, None)
            .unwrap();

        // both shared blocks were full, so the new token lands in a third
        // block and no copy-on-write occurs
        let b_ids = table_b.physical_block_ids().to_vec();
        assert_eq!(&b_ids[..2], &a_ids[..]);
        assert_eq!(b_ids.len(), 3);
        assert!(alloc.clear_copy_on_writes().is_empty());
        assert_eq!(alloc.refcount(a_ids[1]).unwrap(), 2);
    }

    #[test]
    fn with_blocks_recomputes_fill_level() {
        let mut alloc = facade(4, 2);
        let blocks = alloc
            .allocate_immutable_blocks(None, &[&[1, 2], &[3, 4]], Device::Gpu)
            .unwrap();
        let table = BlockTable::with_blocks(2, &alloc, blocks, None).unwrap();
        assert_eq!(table.num_full_slots(), 4);
        assert_eq!(table.physical_block_ids().len(), 2);
    }

    #[test]
    fn refresh_ids_tracks_swap_rebinding() {
        let mut alloc =
            CpuGpuBlockAllocator::new(&CacheConfig::new(2, 2, 2)).unwrap();
        let mut table = BlockTable::new(2, None);
        table.allocate(&mut alloc, &[1, 2], Device::Gpu).unwrap();
        let old_ids = table.physical_block_ids().to_vec();

        alloc.swap(table.blocks(), Device::Gpu, Device::Cpu).unwrap();
        // mirror is stale until refreshed
        assert_eq!(table.physical_block_ids(), &old_ids[..]);
        table.refresh_physical_block_ids(&alloc);
        assert_ne!(table.physical_block_ids(), &old_ids[..]);
        assert!(table.physical_block_ids()[0] >= 2);
    }

    #[test]
    fn fork_unallocated_fails() {
        let mut alloc = facade(4, 2);
        let table = BlockTable::new(2, None);
        assert!(matches!(
            table.fork(&mut alloc).unwrap_err(),
            CacheError::NotAllocated
        ));
    }

    #[test]
    fn free_returns_blocks_and_is_idempotent() {
        let mut alloc = facade(8, 4);
        let mut table = BlockTable::new(4, None);
        table
            .allocate(&mut alloc, &[1, 2, 3, 4, 5, 6], Device::Gpu)
            .unwrap();
        assert_eq!(alloc.get_num_free_blocks(Device::Gpu), 6);

        table.free(&mut alloc).unwrap();
        assert_eq!(alloc.get_num_free_blocks(Device::Gpu), 8);
        assert_eq!(table.num_full_slots(), 0);
        assert!(table.physical_block_ids().is_empty());

        // second free finds an empty list and does nothing
        table.free(&mut alloc).unwrap();
        assert_eq!(alloc.get_num_free_blocks(Device::Gpu), 8);
    }

    #[test]
    fn sliding_window_evicts_and_installs_null() {
        let mut alloc = facade(8, 2);
        let mut table = BlockTable::new(2, Some(2));
        table
            .allocate(&mut alloc, &[1, 2, 3, 4, 5, 6], Device::Gpu)
            .unwrap();
        assert_eq!(alloc.get_num_free_blocks(Device::Gpu), 5);

        table
            .append_token_ids(&mut alloc, &[7, 8], 0, Some(6))
            .unwrap();
        // boundary = 6/2 - 2 = 1: block 0 evicted
        assert_eq!(table.physical_block_ids()[0], NULL_BLOCK);
        assert_ne!(table.physical_block_ids()[1], NULL_BLOCK);
        assert_eq!(table.physical_block_ids().len(), 4);
        // one freed, one allocated for the append
        assert_eq!(alloc.get_num_free_blocks(Device::Gpu), 5);
        assert_eq!(table.num_full_slots(), 8);
    }

    #[test]
    fn sliding_window_requires_computed_slots() {
        let mut alloc = facade(8, 2);
        let mut table = BlockTable::new(2, Some(1));
        table.allocate(&mut alloc, &[1, 2], Device::Gpu).unwrap();
        assert!(matches!(
            table
                .append_token_ids(&mut alloc, &[3], 0, None)
                .unwrap_err(),
            CacheError::MissingComputedSlots
        ));
    }

    #[test]
    fn sliding_window_eviction_is_idempotent() {
        let mut alloc = facade(8, 2);
        let mut table = BlockTable::new(2, Some(1));
        table
            .allocate(&mut alloc, &[1, 2, 3, 4, 5, 6], Device::Gpu)
            .unwrap();

        table
            .append_token_ids(&mut alloc, &[7], 0, Some(6))
            .unwrap();
        let free_after_first = alloc.get_num_free_blocks(Device::Gpu);
        // same boundary again: already-null positions are skipped
        table
            .append_token_ids(&mut alloc, &[], 0, Some(6))
            .unwrap();
        assert_eq!(alloc.get_num_free_blocks(Device::Gpu), free_after_first);
        assert_eq!(table.physical_block_ids()[0], NULL_BLOCK);
        assert_eq!(table.physical_block_ids()[1], NULL_BLOCK);
    }

    #[test]
    fn sliding_window_boundary_before_window_fills_is_noop() {
        let mut alloc = facade(8, 2);
        let mut table = BlockTable::new(2, Some(4));
        table.allocate(&mut alloc, &[1, 2, 3], Device::Gpu).unwrap();
        table
            .append_token_ids(&mut alloc, &[4], 0, Some(3))
            .unwrap();
        // 3/2 - 4 saturates to 0: nothing evicted
        assert!(table
            .physical_block_ids()
            .iter()
            .all(|&id| id != NULL_BLOCK));
    }

    #[test]
    fn freeing_evicted_table_skips_null_blocks() {
        let mut alloc = facade(8, 2);
        let mut table = BlockTable::new(2, Some(1));
        table
            .allocate(&mut alloc, &[1, 2, 3, 4, 5, 6], Device::Gpu)
            .unwrap();
        table
            .append_token_ids(&mut alloc, &[7], 0, Some(6))
            .unwrap();

        table.free(&mut alloc).unwrap();
        assert_eq!(alloc.get_num_free_blocks(Device::Gpu), 8);
        // the sentinel survives for other tables
        assert!(alloc.null_block().is_some());
    }

    #[test]
    fn unseen_token_ids_is_the_suffix() {
        let mut alloc = facade(8, 2);
        let mut table = BlockTable::new(2, None);
        let seq = [1, 2, 3, 4, 5];
        table.allocate(&mut alloc, &seq[..3], Device::Gpu).unwrap();
        assert_eq!(table.get_unseen_token_ids(&seq), &[4, 5]);
        assert_eq!(table.get_unseen_token_ids(&seq[..3]), &[] as &[TokenId]);
    }

    #[test]
    fn all_token_ids_concatenates_blocks() {
        let mut alloc = facade(8, 2);
        let mut table = BlockTable::new(2, None);
        table
            .allocate(&mut alloc, &[1, 2, 3, 4, 5], Device::Gpu)
            .unwrap();
        assert_eq!(table.get_all_token_ids(&alloc), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn blocks_touched_by_append_slots() {
        let mut alloc = facade(8, 4);
        let mut table = BlockTable::new(4, None);
        table.allocate(&mut alloc, &[1, 2], Device::Gpu).unwrap();

        // 2 slots open in the last block
        assert_eq!(table.get_num_blocks_touched_by_append_slots(&[3], 0), 1);
        assert_eq!(table.get_num_blocks_touched_by_append_slots(&[3, 4], 0), 1);
        assert_eq!(
            table.get_num_blocks_touched_by_append_slots(&[3, 4, 5], 0),
            2
        );
        assert_eq!(
            table.get_num_blocks_touched_by_append_slots(&[3, 4, 5, 6, 7, 8, 9], 0),
            3
        );
        assert_eq!(table.get_num_blocks_touched_by_append_slots(&[3], 5), 2);
    }

    #[test]
    fn chunk_for_append_respects_open_block() {
        let chunks = chunk_for_append(&[1, 2, 3, 4, 5, 6, 7], 2, 4);
        assert_eq!(chunks, vec![&[1, 2][..], &[3, 4, 5, 6][..], &[7][..]]);
    }

    #[test]
    fn chunk_for_append_on_block_boundary() {
        let chunks = chunk_for_append(&[1, 2, 3, 4, 5], 4, 4);
        assert_eq!(chunks, vec![&[1, 2, 3, 4][..], &[5][..]]);
    }

    #[test]
    fn split_into_chunks_full_and_tail() {
        let (full, tail) = split_into_chunks(&[1, 2, 3, 4, 5], 2);
        assert_eq!(full, vec![&[1, 2][..], &[3, 4][..]]);
        assert_eq!(tail, &[5]);

        let (full, tail) = split_into_chunks(&[1, 2, 3, 4], 2);
        assert_eq!(full.len(), 2);
        assert!(tail.is_empty());
    }
}
