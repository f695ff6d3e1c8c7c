//! Sliding-window container of the blocks resident for one object transfer.
//!
//! Blocks are indexed by a hash of their sequence id (power-of-two table,
//! insertion-ordered collision chains) and bounded to a `range_max` span of
//! the id space. Lookup is O(1) amortized; removing a block at a window edge
//! recomputes the boundary by linear id scan, which is the cheap choice
//! because edge removals are rare next to lookups.
//!
//! The buffer owns its resident blocks. `insert` moves a block in and hands
//! it straight back on refusal, `remove` moves it out, and `drain_into`
//! evicts everything through the pools at teardown so their accounting stays
//! truthful.

use std::fmt;

use tracing::debug;

use crate::block::{Block, BlockId};
use crate::error::InsertError;
use crate::pool::{BlockPool, SegmentPool};

/// An insert that was refused, handing the block back to the caller.
pub struct RejectedBlock {
    /// Why the block was refused.
    pub reason: InsertError,
    /// The block, returned untouched.
    pub block: Box<Block>,
}

impl fmt::Debug for RejectedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RejectedBlock")
            .field("reason", &self.reason)
            .field("id", &self.block.id())
            .finish()
    }
}

/// Hashed, range-bounded sliding window of [`Block`]s keyed by sequence id.
pub struct BlockBuffer {
    table: Box<[Vec<Box<Block>>]>,
    hash_mask: usize,
    range_max: u32,
    range: u32,
    count: usize,
    range_lo: BlockId,
    range_hi: BlockId,
}

impl BlockBuffer {
    /// Create a window bounded to `range_max` ids with `table_size` hash
    /// buckets (rounded up to a power of two).
    #[must_use]
    pub fn new(range_max: u32, table_size: usize) -> Self {
        let table_size = table_size.max(1).next_power_of_two();
        Self {
            table: (0..table_size).map(|_| Vec::new()).collect(),
            hash_mask: table_size - 1,
            range_max,
            range: 0,
            count: 0,
            range_lo: BlockId::default(),
            range_hi: BlockId::default(),
        }
    }

    fn bucket(&self, id: BlockId) -> usize {
        id.0 as usize & self.hash_mask
    }

    /// Maximum id span this window admits.
    #[must_use]
    pub const fn range_max(&self) -> u32 {
        self.range_max
    }

    /// Current id span, zero when empty.
    #[must_use]
    pub const fn range(&self) -> u32 {
        self.range
    }

    /// Lowest resident id. Meaningful only when non-empty.
    #[must_use]
    pub const fn range_lo(&self) -> BlockId {
        self.range_lo
    }

    /// Highest resident id. Meaningful only when non-empty.
    #[must_use]
    pub const fn range_hi(&self) -> BlockId {
        self.range_hi
    }

    /// Number of resident blocks.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// True when no block is resident.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// True when a block with id `id` could be admitted right now.
    ///
    /// Exactly predicts [`insert`](Self::insert) success for an id not
    /// already resident: admission fails only when the stretched window
    /// `[min(range_lo, id), max(range_hi, id)]` would exceed `range_max`.
    #[must_use]
    pub fn can_insert(&self, id: BlockId) -> bool {
        if self.count == 0 {
            return self.range_max > 0;
        }
        let lo = if id.precedes(self.range_lo) {
            id
        } else {
            self.range_lo
        };
        let hi = if self.range_hi.precedes(id) {
            id
        } else {
            self.range_hi
        };
        i64::from(hi.delta(lo)) + 1 <= i64::from(self.range_max)
    }

    /// Admit a block into the window.
    ///
    /// # Errors
    ///
    /// Returns [`RejectedBlock`] carrying the block back when its id is
    /// already resident or the window span would exceed `range_max`.
    pub fn insert(&mut self, block: Box<Block>) -> Result<(), RejectedBlock> {
        let id = block.id();
        if self.find(id).is_some() {
            return Err(RejectedBlock {
                reason: InsertError::Duplicate { id },
                block,
            });
        }
        if !self.can_insert(id) {
            return Err(RejectedBlock {
                reason: InsertError::OutOfWindow {
                    id,
                    lo: self.range_lo,
                    hi: self.range_hi,
                    range_max: self.range_max,
                },
                block,
            });
        }
        if self.count == 0 {
            self.range_lo = id;
            self.range_hi = id;
        } else {
            if id.precedes(self.range_lo) {
                self.range_lo = id;
            }
            if self.range_hi.precedes(id) {
                self.range_hi = id;
            }
        }
        self.count += 1;
        self.update_range();
        let bucket = self.bucket(id);
        self.table[bucket].push(block);
        Ok(())
    }

    /// Look up a resident block by id.
    #[must_use]
    pub fn find(&self, id: BlockId) -> Option<&Block> {
        self.table[self.bucket(id)]
            .iter()
            .map(AsRef::as_ref)
            .find(|block| block.id() == id)
    }

    /// Look up a resident block by id, mutably.
    pub fn find_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        let bucket = self.bucket(id);
        self.table[bucket]
            .iter_mut()
            .map(AsMut::as_mut)
            .find(|block| block.id() == id)
    }

    /// Evict a block from the window, returning ownership to the caller.
    ///
    /// When the removed block sat at a window edge the boundary is
    /// recomputed by scanning through the occupied id range.
    pub fn remove(&mut self, id: BlockId) -> Option<Box<Block>> {
        let bucket = self.bucket(id);
        let position = self.table[bucket]
            .iter()
            .position(|block| block.id() == id)?;
        let block = self.table[bucket].remove(position);
        self.count -= 1;
        if self.count == 0 {
            self.range = 0;
        } else {
            if id == self.range_lo {
                let mut probe = id.next();
                while self.find(probe).is_none() {
                    probe = probe.next();
                }
                self.range_lo = probe;
            }
            if id == self.range_hi {
                let mut probe = id.prev();
                while self.find(probe).is_none() {
                    probe = probe.prev();
                }
                self.range_hi = probe;
            }
            self.update_range();
        }
        Some(block)
    }

    fn update_range(&mut self) {
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        {
            self.range = (i64::from(self.range_hi.delta(self.range_lo)) + 1) as u32;
        }
    }

    /// Ascending-by-id iteration over the resident blocks.
    #[must_use]
    pub fn iter(&self) -> BlockIter<'_> {
        BlockIter {
            buffer: self,
            cursor: None,
            exhausted: false,
        }
    }

    /// Evict every resident block: segments back to `segments`, shells back
    /// to `blocks`. The sanctioned teardown/cancellation path.
    pub fn drain_into(&mut self, blocks: &mut BlockPool, segments: &mut SegmentPool) {
        let drained = self.count;
        for bucket in &mut self.table {
            for mut block in bucket.drain(..) {
                block.empty_to_pool(segments);
                blocks.put(block);
            }
        }
        self.count = 0;
        self.range = 0;
        debug!(drained, "drained block buffer");
    }
}

impl<'a> IntoIterator for &'a BlockBuffer {
    type Item = &'a Block;
    type IntoIter = BlockIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy, restartable ascending iterator over a [`BlockBuffer`].
///
/// The shared borrow of the buffer statically rules out mutation while an
/// iteration is in progress.
pub struct BlockIter<'a> {
    buffer: &'a BlockBuffer,
    cursor: Option<BlockId>,
    exhausted: bool,
}

impl<'a> BlockIter<'a> {
    /// Rewind to the start of the current range.
    pub fn reset(&mut self) {
        self.cursor = None;
        self.exhausted = false;
    }

    /// Next resident block in ascending id order, if any.
    pub fn next_block(&mut self) -> Option<&'a Block> {
        if self.exhausted || self.buffer.is_empty() {
            return None;
        }
        let mut probe = match self.cursor {
            None => self.buffer.range_lo,
            Some(previous) => previous.next(),
        };
        // probe <= range_hi in sequence order
        while !self.buffer.range_hi.precedes(probe) {
            if let Some(block) = self.buffer.find(probe) {
                self.cursor = Some(probe);
                return Some(block);
            }
            probe = probe.next();
        }
        self.exhausted = true;
        None
    }
}

impl<'a> Iterator for BlockIter<'a> {
    type Item = &'a Block;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_block()
    }
}
