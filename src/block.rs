//! The block record: a fixed-capacity token buffer chained to its logical
//! predecessor.
//!
//! Records live in the [`BlockPool`](crate::block_pool::BlockPool) slab and
//! are addressed by `PoolId` everywhere above it. The physical `block_id` is
//! a separate identity: it indexes the underlying KV storage and may change
//! over the record's life (copy-on-write, swap), while the `pool_id` is
//! stamped at birth and never moves.

use crate::error::CacheError;

/// Token identifier. The cache treats tokens as opaque.
pub type TokenId = u32;

/// Index into the physical KV storage.
pub type BlockId = usize;

/// Stable slot in the block record pool.
pub type PoolId = usize;

/// Sentinel reported in id lists for positions whose block was evicted by
/// the sliding window. Never a valid physical id.
pub const NULL_BLOCK: BlockId = usize::MAX;

/// Which backing store a block's KV data lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Gpu,
    Cpu,
}

/// Selects the block variant an allocator hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockKind {
    /// Plain token buffer; the common case.
    #[default]
    Naive,
    /// Adds the bookkeeping the prefix-caching allocator needs: a computed
    /// flag, an access timestamp, and a content hash.
    PrefixCaching,
}

#[derive(Debug, Clone)]
enum BlockVariant {
    Naive,
    PrefixCaching {
        computed: bool,
        last_accessed: f64,
        content_hash: Option<u64>,
    },
}

impl BlockVariant {
    fn new(kind: BlockKind) -> Self {
        match kind {
            BlockKind::Naive => BlockVariant::Naive,
            BlockKind::PrefixCaching => BlockVariant::PrefixCaching {
                computed: false,
                last_accessed: 0.0,
                content_hash: None,
            },
        }
    }
}

/// A fixed-capacity token buffer, the unit of KV cache allocation.
#[derive(Debug, Clone)]
pub struct Block {
    block_size: usize,
    token_ids: Vec<TokenId>,
    prev: Option<PoolId>,
    block_id: Option<BlockId>,
    pool_id: PoolId,
    variant: BlockVariant,
}

impl Block {
    /// A fresh, detached record for a pool slot. The pool re-initializes it
    /// through [`reinit`](Block::reinit) before handing it to a caller.
    pub(crate) fn unbound(pool_id: PoolId) -> Self {
        Self {
            block_size: 0,
            token_ids: Vec::new(),
            prev: None,
            block_id: None,
            pool_id,
            variant: BlockVariant::Naive,
        }
    }

    /// Rebind a recycled record. Keeps the token buffer's capacity.
    pub(crate) fn reinit(
        &mut self,
        prev: Option<PoolId>,
        block_size: usize,
        block_id: Option<BlockId>,
        kind: BlockKind,
    ) {
        self.block_size = block_size;
        self.token_ids.clear();
        self.prev = prev;
        self.block_id = block_id;
        self.variant = BlockVariant::new(kind);
    }

    /// Extend the token buffer without consulting the allocator.
    ///
    /// Copy-on-write is the allocator's job; this only enforces capacity.
    pub(crate) fn append_token_ids_no_cow(
        &mut self,
        token_ids: &[TokenId],
    ) -> Result<(), CacheError> {
        if token_ids.is_empty() {
            return Ok(());
        }
        if token_ids.len() > self.num_empty_slots() {
            return Err(CacheError::NotEnoughEmptySlots {
                requested: token_ids.len(),
                available: self.num_empty_slots(),
            });
        }
        self.token_ids.extend_from_slice(token_ids);
        Ok(())
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn token_ids(&self) -> &[TokenId] {
        &self.token_ids
    }

    pub fn num_tokens(&self) -> usize {
        self.token_ids.len()
    }

    pub fn num_empty_slots(&self) -> usize {
        self.block_size - self.token_ids.len()
    }

    /// A full block is logically immutable: appends must go to a successor.
    pub fn is_full(&self) -> bool {
        self.token_ids.len() == self.block_size
    }

    pub fn prev(&self) -> Option<PoolId> {
        self.prev
    }

    pub(crate) fn set_prev(&mut self, prev: Option<PoolId>) {
        self.prev = prev;
    }

    /// Physical id, or `None` while detached (not owned by any allocator slot).
    pub fn block_id(&self) -> Option<BlockId> {
        self.block_id
    }

    pub(crate) fn set_block_id(&mut self, block_id: Option<BlockId>) {
        self.block_id = block_id;
    }

    pub(crate) fn take_block_id(&mut self) -> Option<BlockId> {
        self.block_id.take()
    }

    pub fn pool_id(&self) -> PoolId {
        self.pool_id
    }

    /// Whether this block's KV data has been computed. Always false for the
    /// naive variant.
    pub fn is_computed(&self) -> bool {
        match self.variant {
            BlockVariant::Naive => false,
            BlockVariant::PrefixCaching { computed, .. } => computed,
        }
    }

    /// No-op on the naive variant.
    pub fn set_computed(&mut self, value: bool) {
        if let BlockVariant::PrefixCaching { computed, .. } = &mut self.variant {
            *computed = value;
        }
    }

    pub fn last_accessed(&self) -> Option<f64> {
        match self.variant {
            BlockVariant::Naive => None,
            BlockVariant::PrefixCaching { last_accessed, .. } => Some(last_accessed),
        }
    }

    /// No-op on the naive variant.
    pub fn set_last_accessed(&mut self, timestamp: f64) {
        if let BlockVariant::PrefixCaching { last_accessed, .. } = &mut self.variant {
            *last_accessed = timestamp;
        }
    }

    /// Content hash over the prefix up to and including this block. `None`
    /// for the naive variant and for blocks that are not yet full.
    pub fn content_hash(&self) -> Option<u64> {
        match self.variant {
            BlockVariant::Naive => None,
            BlockVariant::PrefixCaching { content_hash, .. } => content_hash,
        }
    }
}
