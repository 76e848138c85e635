use crate::block::BlockKind;

/// Sizing and policy knobs for the block allocator stack.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Tokens per block.
    pub block_size: usize,
    /// Physical blocks backed by device memory.
    pub num_gpu_blocks: usize,
    /// Physical blocks backed by host swap space.
    pub num_cpu_blocks: usize,
    /// Block variant the allocators hand out.
    pub block_kind: BlockKind,
    /// Sliding-window horizon in blocks; `None` disables eviction.
    pub max_block_sliding_window: Option<usize>,
}

impl CacheConfig {
    pub fn new(block_size: usize, num_gpu_blocks: usize, num_cpu_blocks: usize) -> Self {
        Self {
            block_size,
            num_gpu_blocks,
            num_cpu_blocks,
            block_kind: BlockKind::Naive,
            max_block_sliding_window: None,
        }
    }

    pub fn with_sliding_window(mut self, num_blocks: usize) -> Self {
        self.max_block_sliding_window = Some(num_blocks);
        self
    }

    pub fn with_block_kind(mut self, kind: BlockKind) -> Self {
        self.block_kind = kind;
        self
    }

    /// Size the GPU pool from a memory budget.
    ///
    /// bytes_per_block = 2(K+V) * num_kv_heads * block_size * head_dim
    ///                   * elem_size * num_layers
    ///
    /// `elem_size` is the storage element width in bytes (2 for BF16/F16,
    /// 1 for a quantized cache).
    pub fn from_memory_budget(
        budget_bytes: usize,
        num_layers: usize,
        num_kv_heads: usize,
        head_dim: usize,
        block_size: usize,
        elem_size: usize,
    ) -> Self {
        let bytes_per_block = 2 * num_kv_heads * block_size * head_dim * elem_size * num_layers;
        let num_gpu_blocks = if bytes_per_block > 0 {
            budget_bytes / bytes_per_block
        } else {
            0
        };
        Self::new(block_size, num_gpu_blocks, 0)
    }
}
