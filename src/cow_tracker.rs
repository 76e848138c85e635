//! Copy-on-write tracking.
//!
//! The tracker owns the ordered log of `(src, tgt)` copy events. Downstream
//! attention code drains the log and issues the physical block copies before
//! the next step, so insertion order must be preserved.

use crate::block::BlockId;
use crate::error::CacheError;
use crate::ref_counter::ReadOnlyRefCounter;

/// A recorded copy-on-write: data must be copied from `src` to `tgt`.
pub type CowPair = (BlockId, BlockId);

#[derive(Debug, Default)]
pub struct CopyOnWriteTracker {
    copy_on_writes: Vec<CowPair>,
}

impl CopyOnWriteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a block may be appended to in place.
    ///
    /// A detached block (`block_id` of `None`) is always appendable; a bound
    /// block is appendable iff its refcount is at most one (sole owner).
    pub fn is_appendable(
        &self,
        refcounts: &ReadOnlyRefCounter<'_>,
        block_id: Option<BlockId>,
    ) -> Result<bool, CacheError> {
        match block_id {
            None => Ok(true),
            Some(id) => Ok(refcounts.get(id)? <= 1),
        }
    }

    pub fn record_cow(&mut self, src: BlockId, tgt: BlockId) {
        self.copy_on_writes.push((src, tgt));
    }

    /// Return the recorded copies in insertion order and clear the log.
    pub fn clear_cows(&mut self) -> Vec<CowPair> {
        std::mem::take(&mut self.copy_on_writes)
    }
}
