//! Buffer sizing configuration.
//!
//! All memory bounds of the subsystem are fixed here once, at session start:
//! the pools never resize and the window never stretches past `range_max`.

use serde::{Deserialize, Serialize};

use crate::buffer::BlockBuffer;
use crate::error::ConfigError;
use crate::pool::{BlockPool, SegmentPool};

/// Sizing knobs for one object-transfer buffering context.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Segment payload size in bytes.
    ///
    /// Default: 1024
    pub segment_size: usize,

    /// Segments preallocated in the segment pool.
    ///
    /// Default: 4096
    pub segment_count: usize,

    /// Block shells preallocated in the block pool.
    ///
    /// Default: 64
    pub block_count: usize,

    /// Segment slots per block (source plus parity capacity).
    ///
    /// Default: 64
    pub block_size: u16,

    /// Maximum id span of the resident block window.
    ///
    /// Default: 32
    pub range_max: u32,

    /// Hash table buckets in the block buffer (rounded up to a power of
    /// two).
    ///
    /// Default: 256
    pub table_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            segment_size: 1024,
            segment_count: 4096,
            block_count: 64,
            block_size: 64,
            range_max: 32,
            table_size: 256,
        }
    }
}

impl BufferConfig {
    /// Check every sizing knob is non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroField`] naming the first zero field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("segment_size", self.segment_size == 0),
            ("segment_count", self.segment_count == 0),
            ("block_count", self.block_count == 0),
            ("block_size", self.block_size == 0),
            ("range_max", self.range_max == 0),
            ("table_size", self.table_size == 0),
        ];
        for (field, zero) in fields {
            if zero {
                return Err(ConfigError::ZeroField { field });
            }
        }
        Ok(())
    }

    /// Build the segment pool this configuration describes.
    #[must_use]
    pub fn segment_pool(&self) -> SegmentPool {
        SegmentPool::new(self.segment_count, self.segment_size)
    }

    /// Build the block pool this configuration describes.
    #[must_use]
    pub fn block_pool(&self) -> BlockPool {
        BlockPool::new(self.block_count, self.block_size)
    }

    /// Build the block buffer this configuration describes.
    #[must_use]
    pub fn block_buffer(&self) -> BlockBuffer {
        BlockBuffer::new(self.range_max, self.table_size)
    }

    /// Worst-case bytes held by the segment arena.
    #[must_use]
    pub const fn segment_arena_bytes(&self) -> usize {
        self.segment_count * self.segment_size
    }
}
