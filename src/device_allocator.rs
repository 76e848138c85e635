//! Device-aware allocator facade.
//!
//! Multiplexes one [`NaiveBlockAllocator`] per device behind a single
//! interface. Physical ids are globally unique: the GPU allocator owns
//! `[0, num_gpu_blocks)` and the CPU allocator
//! `[num_gpu_blocks, num_gpu_blocks + num_cpu_blocks)`, so any operation on
//! an existing block routes by id range. The facade owns the one
//! [`BlockPool`] slab both allocators draw records from, which is what lets
//! a swap rebind a record to the other device without moving it.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::allocator::NaiveBlockAllocator;
use crate::block::{Block, BlockId, Device, PoolId, TokenId};
use crate::block_pool::BlockPool;
use crate::config::CacheConfig;
use crate::cow_tracker::CowPair;
use crate::error::CacheError;
use crate::metrics::CacheMetrics;

#[derive(Debug)]
pub struct CpuGpuBlockAllocator {
    pool: BlockPool,
    gpu: NaiveBlockAllocator,
    cpu: NaiveBlockAllocator,
    num_gpu_blocks: usize,
    num_cpu_blocks: usize,
    null_block: Option<PoolId>,
    metrics: Arc<CacheMetrics>,
}

impl CpuGpuBlockAllocator {
    pub fn new(config: &CacheConfig) -> Result<Self, CacheError> {
        Self::with_metrics(config, Arc::new(CacheMetrics::new()))
    }

    pub fn with_metrics(
        config: &CacheConfig,
        metrics: Arc<CacheMetrics>,
    ) -> Result<Self, CacheError> {
        if config.block_size == 0 {
            return Err(CacheError::InvalidConfig {
                reason: "block_size must be positive",
            });
        }
        let num_gpu = config.num_gpu_blocks;
        let num_cpu = config.num_cpu_blocks;
        Ok(Self {
            // Pool records recycle across both devices; start with one slot
            // per physical block.
            pool: BlockPool::new(config.block_size, config.block_kind, num_gpu + num_cpu),
            gpu: NaiveBlockAllocator::new(config.block_size, 0..num_gpu),
            cpu: NaiveBlockAllocator::new(config.block_size, num_gpu..num_gpu + num_cpu),
            num_gpu_blocks: num_gpu,
            num_cpu_blocks: num_cpu,
            null_block: None,
            metrics,
        })
    }

    fn allocator(&self, device: Device) -> &NaiveBlockAllocator {
        match device {
            Device::Gpu => &self.gpu,
            Device::Cpu => &self.cpu,
        }
    }

    /// Split-borrow helper: one device's allocator plus the shared pool.
    fn parts(&mut self, device: Device) -> (&mut NaiveBlockAllocator, &mut BlockPool) {
        match device {
            Device::Gpu => (&mut self.gpu, &mut self.pool),
            Device::Cpu => (&mut self.cpu, &mut self.pool),
        }
    }

    /// Which device's allocator owns a physical id.
    fn device_of_id(&self, block_id: BlockId) -> Result<Device, CacheError> {
        if block_id < self.num_gpu_blocks {
            Ok(Device::Gpu)
        } else if block_id < self.num_gpu_blocks + self.num_cpu_blocks {
            Ok(Device::Cpu)
        } else {
            Err(CacheError::UnknownBlockId { block_id })
        }
    }

    pub fn allocate_mutable_block(
        &mut self,
        prev: Option<PoolId>,
        device: Device,
    ) -> Result<PoolId, CacheError> {
        let (alloc, pool) = self.parts(device);
        let block = alloc.allocate_mutable_block(pool, prev)?;
        self.metrics.record_allocation(1);
        Ok(block)
    }

    pub fn allocate_immutable_block(
        &mut self,
        prev: Option<PoolId>,
        token_ids: &[TokenId],
        device: Device,
    ) -> Result<PoolId, CacheError> {
        let (alloc, pool) = self.parts(device);
        let block = alloc.allocate_immutable_block(pool, prev, token_ids)?;
        self.metrics.record_allocation(1);
        Ok(block)
    }

    pub fn allocate_immutable_blocks(
        &mut self,
        prev: Option<PoolId>,
        token_id_chunks: &[&[TokenId]],
        device: Device,
    ) -> Result<Vec<PoolId>, CacheError> {
        let (alloc, pool) = self.parts(device);
        let blocks = alloc.allocate_immutable_blocks(pool, prev, token_id_chunks)?;
        self.metrics.record_allocation(blocks.len());
        Ok(blocks)
    }

    /// Free a block through whichever allocator owns its current id.
    pub fn free(&mut self, block: PoolId) -> Result<(), CacheError> {
        let block_id = self
            .pool
            .get(block)
            .block_id()
            .ok_or(CacheError::DetachedBlock)?;
        let device = self.device_of_id(block_id)?;
        let (alloc, pool) = self.parts(device);
        alloc.free(pool, block, false)?;
        self.metrics.record_free(1);
        Ok(())
    }

    /// Append to a block, routing any copy-on-write to the allocator that
    /// owns the block's id. Detached blocks append in place with no COW.
    pub fn append_token_ids(
        &mut self,
        block: PoolId,
        token_ids: &[TokenId],
    ) -> Result<(), CacheError> {
        match self.pool.get(block).block_id() {
            Some(block_id) => {
                let device = self.device_of_id(block_id)?;
                let (alloc, pool) = self.parts(device);
                alloc.append_token_ids(pool, block, token_ids)?;
                if self.pool.get(block).block_id() != Some(block_id) {
                    self.metrics.record_copy_on_write();
                }
                Ok(())
            }
            None => self.pool.get_mut(block).append_token_ids_no_cow(token_ids),
        }
    }

    /// Fork the chain ending at `last_block` on its own device.
    pub fn fork(&mut self, last_block: PoolId) -> Result<Vec<PoolId>, CacheError> {
        let block_id = self
            .pool
            .get(last_block)
            .block_id()
            .ok_or(CacheError::DetachedBlock)?;
        let device = self.device_of_id(block_id)?;
        let (alloc, pool) = self.parts(device);
        alloc.fork(pool, last_block)
    }

    /// Move `blocks` from `src_device` to `dst_device`, returning the
    /// old-id -> new-id mapping the caller uses to orchestrate the actual
    /// memory transfer.
    ///
    /// The destination's capacity is checked up front so a shortage fails
    /// with nothing moved.
    pub fn swap(
        &mut self,
        blocks: &[PoolId],
        src_device: Device,
        dst_device: Device,
    ) -> Result<HashMap<BlockId, BlockId>, CacheError> {
        let mut src_ids = Vec::with_capacity(blocks.len());
        for &block in blocks {
            src_ids.push(
                self.pool
                    .get(block)
                    .block_id()
                    .ok_or(CacheError::DetachedBlock)?,
            );
        }
        let available = self.allocator(dst_device).get_num_free_blocks();
        if available < blocks.len() {
            return Err(CacheError::NoFreeBlocks {
                requested: blocks.len(),
                available,
            });
        }

        {
            let (alloc, pool) = self.parts(src_device);
            alloc.swap_out(pool, blocks)?;
        }
        {
            let (alloc, pool) = self.parts(dst_device);
            alloc.swap_in(pool, blocks)?;
        }

        let mut mapping = HashMap::with_capacity(blocks.len());
        for (&block, src_id) in blocks.iter().zip(src_ids) {
            let dst_id = self
                .pool
                .get(block)
                .block_id()
                .ok_or(CacheError::DetachedBlock)?;
            mapping.insert(src_id, dst_id);
        }
        self.metrics.record_swap(blocks.len());
        tracing::debug!(
            num_blocks = blocks.len(),
            ?src_device,
            ?dst_device,
            "swapped blocks between devices"
        );
        Ok(mapping)
    }

    /// The process-wide sentinel standing in for sliding-window-evicted
    /// positions. Zero capacity, zero tokens, and no physical id; created on
    /// first use and shared by every block table.
    pub fn allocate_or_get_null_block(&mut self) -> Result<PoolId, CacheError> {
        if let Some(block) = self.null_block {
            return Ok(block);
        }
        let block = self.pool.init_block(None, &[], 0, None)?;
        tracing::debug!(pool_id = block, "created null block sentinel");
        self.null_block = Some(block);
        Ok(block)
    }

    /// The null block, if it has been created.
    pub fn null_block(&self) -> Option<PoolId> {
        self.null_block
    }

    pub fn get_num_free_blocks(&self, device: Device) -> usize {
        self.allocator(device).get_num_free_blocks()
    }

    pub fn get_num_total_blocks(&self, device: Device) -> usize {
        self.allocator(device).get_num_total_blocks()
    }

    /// Translate a global id to the dense per-device index (its offset
    /// within the device's id range).
    pub fn get_physical_block_id(
        &self,
        device: Device,
        absolute_id: BlockId,
    ) -> Result<usize, CacheError> {
        self.allocator(device).get_physical_block_id(absolute_id)
    }

    pub fn all_block_ids(&self) -> BTreeSet<BlockId> {
        self.gpu
            .all_block_ids()
            .iter()
            .chain(self.cpu.all_block_ids().iter())
            .copied()
            .collect()
    }

    /// Drain both devices' copy-on-write logs, GPU first, each in insertion
    /// order.
    pub fn clear_copy_on_writes(&mut self) -> Vec<CowPair> {
        let mut cows = self.gpu.clear_copy_on_writes();
        cows.extend(self.cpu.clear_copy_on_writes());
        cows
    }

    pub fn get_num_full_blocks_touched(&self, blocks: &[PoolId], device: Device) -> usize {
        self.allocator(device)
            .get_num_full_blocks_touched(&self.pool, blocks)
    }

    pub fn mark_blocks_as_accessed(&mut self, block_ids: &[BlockId], now: f64) {
        self.gpu.mark_blocks_as_accessed(block_ids, now);
    }

    pub fn mark_blocks_as_computed(&mut self, block_ids: &[BlockId]) {
        self.gpu.mark_blocks_as_computed(block_ids);
    }

    pub fn get_common_computed_block_ids(
        &self,
        computed_seq_block_ids: &[Vec<BlockId>],
    ) -> Vec<BlockId> {
        self.gpu
            .get_common_computed_block_ids(computed_seq_block_ids)
    }

    pub fn find_cached_blocks_prefix(
        &self,
        block_hashes: &[u64],
        device: Device,
    ) -> Vec<BlockId> {
        self.allocator(device).find_cached_blocks_prefix(block_hashes)
    }

    pub fn get_prefix_cache_hit_rate(&self, device: Device) -> f32 {
        self.allocator(device).get_prefix_cache_hit_rate()
    }

    pub fn reset_prefix_cache(&mut self) -> bool {
        self.gpu.reset_prefix_cache() && self.cpu.reset_prefix_cache()
    }

    /// Read access to a block record.
    pub fn block(&self, block: PoolId) -> &Block {
        self.pool.get(block)
    }

    /// Detach a block's `prev` link. The block table uses this when the
    /// predecessor is evicted by the sliding window, so later forks walk
    /// only the live suffix.
    pub(crate) fn detach_prev(&mut self, block: PoolId) {
        self.pool.get_mut(block).set_prev(None);
    }

    pub fn refcount(&self, block_id: BlockId) -> Result<usize, CacheError> {
        let device = self.device_of_id(block_id)?;
        self.allocator(device).refcount(block_id)
    }

    pub fn block_size(&self) -> usize {
        self.pool.block_size()
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }
}
