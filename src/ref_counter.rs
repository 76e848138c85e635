//! Reference counts for physical block ids.
//!
//! The counter is the single authority on sharing: a block id with count > 1
//! is shared between sequences and must go through copy-on-write before any
//! append. Free-list membership elsewhere in the allocator is always paired
//! with a count of zero here.

use std::collections::HashMap;

use crate::block::BlockId;
use crate::error::CacheError;

/// Dense map from block id to a non-negative reference count.
///
/// The id domain is fixed at construction; touching an id outside it is a
/// caller bug and fails with `UnknownBlockId`.
#[derive(Debug)]
pub struct RefCounter {
    refcounts: HashMap<BlockId, usize>,
}

impl RefCounter {
    pub fn new(all_block_ids: impl IntoIterator<Item = BlockId>) -> Self {
        Self {
            refcounts: all_block_ids.into_iter().map(|id| (id, 0)).collect(),
        }
    }

    /// Increment the count for `block_id`, returning the new count.
    pub fn incr(&mut self, block_id: BlockId) -> Result<usize, CacheError> {
        let count = self
            .refcounts
            .get_mut(&block_id)
            .ok_or(CacheError::UnknownBlockId { block_id })?;
        *count += 1;
        Ok(*count)
    }

    /// Decrement the count for `block_id`, returning the new count.
    ///
    /// Reaching zero is the signal to return the id to the free list.
    /// Decrementing an already-zero count fails with `ZeroRefCount`.
    pub fn decr(&mut self, block_id: BlockId) -> Result<usize, CacheError> {
        let count = self
            .refcounts
            .get_mut(&block_id)
            .ok_or(CacheError::UnknownBlockId { block_id })?;
        if *count == 0 {
            return Err(CacheError::ZeroRefCount { block_id });
        }
        *count -= 1;
        Ok(*count)
    }

    pub fn get(&self, block_id: BlockId) -> Result<usize, CacheError> {
        self.refcounts
            .get(&block_id)
            .copied()
            .ok_or(CacheError::UnknownBlockId { block_id })
    }

    /// A view that exposes only `get`.
    pub fn as_read_only(&self) -> ReadOnlyRefCounter<'_> {
        ReadOnlyRefCounter { inner: self }
    }
}

/// Read-only view of a [`RefCounter`], handed to code that must observe
/// sharing but never change it (the copy-on-write tracker).
pub struct ReadOnlyRefCounter<'a> {
    inner: &'a RefCounter,
}

impl ReadOnlyRefCounter<'_> {
    pub fn get(&self, block_id: BlockId) -> Result<usize, CacheError> {
        self.inner.get(block_id)
    }
}
