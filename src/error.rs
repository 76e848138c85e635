use thiserror::Error;

use crate::block::BlockId;

/// Errors surfaced by the block allocator stack.
///
/// `NoFreeBlocks` is the one recoverable condition: the scheduler reacts to
/// it by preempting or swapping out a sequence. Every other variant is a
/// precondition violation in the caller and is not recoverable.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("no free blocks: requested {requested}, available {available}")]
    NoFreeBlocks { requested: usize, available: usize },

    #[error("unknown block id {block_id}")]
    UnknownBlockId { block_id: BlockId },

    #[error("refcount for block {block_id} is already zero")]
    ZeroRefCount { block_id: BlockId },

    #[error("not enough empty slots: appending {requested}, only {available} left")]
    NotEnoughEmptySlots { requested: usize, available: usize },

    #[error("block table already has blocks allocated")]
    AlreadyAllocated,

    #[error("no blocks have been allocated")]
    NotAllocated,

    #[error("token ids must not be empty")]
    EmptyTokenIds,

    #[error("block is not bound to a physical id")]
    DetachedBlock,

    #[error("cannot fork block {block_id}: refcount is zero")]
    ForkOfFreeBlock { block_id: BlockId },

    #[error("num_computed_slots is required when a sliding window is configured")]
    MissingComputedSlots,

    #[error("invalid cache config: {reason}")]
    InvalidConfig { reason: &'static str },

    #[error("{op} is not supported by the naive allocator")]
    Unsupported { op: &'static str },
}

impl CacheError {
    /// True for resource exhaustion, the only condition a scheduler should
    /// catch and react to (by preempting or swapping out a sequence).
    pub fn is_no_free_blocks(&self) -> bool {
        matches!(self, CacheError::NoFreeBlocks { .. })
    }
}
