//! Bounded free-list pools for segments and block shells.
//!
//! Both pools are sized once at session start and never grow. Exhaustion is
//! a soft condition: `get` returns `None` and the caller retries on a later
//! event (next NACK cycle, next window slide), never by blocking. Shortage
//! statistics are sticky - the overrun counter advances once per contiguous
//! empty streak, not once per failed call, so it counts distinct shortage
//! episodes rather than raw failed-call volume.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::block::Block;

/// A fixed-size payload buffer owned by exactly one holder at a time.
///
/// Only a [`SegmentPool`] can create a `Segment`, and the type is move-only:
/// a segment lives in the pool's free list, in a block slot, or in caller
/// hands, never in two places. Returning a foreign or already-freed segment
/// is therefore unrepresentable.
#[derive(Debug)]
pub struct Segment {
    data: Box<[u8]>,
}

impl Segment {
    fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Buffer length in bytes (the pool's segment size).
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for zero-length segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Payload bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable payload bytes.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl AsRef<[u8]> for Segment {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl AsMut<[u8]> for Segment {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Snapshot of a segment pool's accounting, for diagnostics export.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentPoolStats {
    /// Segments owned by the pool in total.
    pub total: usize,
    /// Segments currently handed out.
    pub in_use: usize,
    /// Highest `in_use` observed since creation.
    pub peak_usage: usize,
    /// Distinct shortage episodes since creation.
    pub overruns: u64,
}

/// Preallocated free-list allocator of fixed-size [`Segment`] buffers.
pub struct SegmentPool {
    segment_size: usize,
    total: usize,
    free: Vec<Segment>,
    peak_usage: usize,
    overruns: u64,
    overrun_flag: bool,
}

impl SegmentPool {
    /// Preallocate `count` segments of `segment_size` bytes.
    #[must_use]
    pub fn new(count: usize, segment_size: usize) -> Self {
        Self {
            segment_size,
            total: count,
            free: (0..count).map(|_| Segment::new(segment_size)).collect(),
            peak_usage: 0,
            overruns: 0,
            overrun_flag: false,
        }
    }

    /// Take a segment from the free list.
    ///
    /// Returns `None` when the pool is exhausted; the first failure of each
    /// empty streak bumps the overrun counter and logs a warning.
    pub fn get(&mut self) -> Option<Segment> {
        match self.free.pop() {
            Some(segment) => {
                self.overrun_flag = false;
                let in_use = self.in_use();
                if in_use > self.peak_usage {
                    self.peak_usage = in_use;
                }
                Some(segment)
            }
            None => {
                if !self.overrun_flag {
                    self.overruns += 1;
                    self.overrun_flag = true;
                    warn!(
                        total = self.total,
                        overruns = self.overruns,
                        "segment pool exhausted"
                    );
                }
                None
            }
        }
    }

    /// Return a segment to the free list.
    ///
    /// # Panics
    ///
    /// Panics if the segment's size does not match this pool or if the pool
    /// is already full - either means the segment came from somewhere else,
    /// which would corrupt the accounting.
    pub fn put(&mut self, segment: Segment) {
        assert_eq!(
            segment.len(),
            self.segment_size,
            "segment size does not match this pool"
        );
        assert!(
            self.free.len() < self.total,
            "put into a full segment pool"
        );
        self.free.push(segment);
    }

    /// True when no segment is available.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.free.is_empty()
    }

    /// Byte size of every segment in this pool.
    #[must_use]
    pub const fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Segments owned by the pool in total.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }

    /// Segments currently handed out.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.total - self.free.len()
    }

    /// Highest `in_use` observed since creation.
    #[must_use]
    pub const fn peak_usage(&self) -> usize {
        self.peak_usage
    }

    /// Distinct shortage episodes since creation.
    #[must_use]
    pub const fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Accounting snapshot.
    #[must_use]
    pub fn stats(&self) -> SegmentPoolStats {
        SegmentPoolStats {
            total: self.total,
            in_use: self.in_use(),
            peak_usage: self.peak_usage,
            overruns: self.overruns,
        }
    }
}

/// Preallocated free-list allocator of [`Block`] shells.
///
/// Shells carry structure only (slot table and masks), no segments. Unlike
/// [`SegmentPool`] there is no peak-usage tracking: blocks in use are exactly
/// the blocks resident in a buffer, so occupancy is read there.
pub struct BlockPool {
    block_size: u16,
    total: usize,
    free: Vec<Box<Block>>,
    overruns: u64,
    overrun_flag: bool,
}

impl BlockPool {
    /// Preallocate `count` block shells, each sized for `block_size` slots.
    #[must_use]
    pub fn new(count: usize, block_size: u16) -> Self {
        Self {
            block_size,
            total: count,
            free: (0..count).map(|_| Box::new(Block::new(block_size))).collect(),
            overruns: 0,
            overrun_flag: false,
        }
    }

    /// Take a block shell from the free list.
    ///
    /// Returns `None` when exhausted, with the same once-per-streak overrun
    /// accounting as [`SegmentPool::get`].
    pub fn get(&mut self) -> Option<Box<Block>> {
        match self.free.pop() {
            Some(block) => {
                self.overrun_flag = false;
                Some(block)
            }
            None => {
                if !self.overrun_flag {
                    self.overruns += 1;
                    self.overrun_flag = true;
                    warn!(
                        total = self.total,
                        overruns = self.overruns,
                        "block pool exhausted"
                    );
                }
                None
            }
        }
    }

    /// Return a block shell to the free list.
    ///
    /// # Panics
    ///
    /// Panics if the block still holds segments (callers drain through
    /// [`Block::empty_to_pool`] first) or if the pool is already full.
    pub fn put(&mut self, block: Box<Block>) {
        assert!(
            block.is_empty(),
            "block {} returned to pool still holding segments",
            block.id()
        );
        assert!(self.free.len() < self.total, "put into a full block pool");
        self.free.push(block);
    }

    /// True when no block shell is available.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.free.is_empty()
    }

    /// Blocks owned by the pool in total.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }

    /// Blocks currently on the free list.
    #[must_use]
    pub fn free(&self) -> usize {
        self.free.len()
    }

    /// Slot capacity of every block in this pool.
    #[must_use]
    pub const fn block_size(&self) -> u16 {
        self.block_size
    }

    /// Distinct shortage episodes since creation.
    #[must_use]
    pub const fn overruns(&self) -> u64 {
        self.overruns
    }
}
