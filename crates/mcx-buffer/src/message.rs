//! Outbound repair-message contract.
//!
//! Blocks translate their sparse per-segment state into compact contiguous
//! ranges and append them into a message under assembly through the
//! [`RepairSink`] trait. The sink reports `false` when the message has no
//! remaining capacity, at which point the appending block operation stops
//! and propagates `false` so the caller can flush and retry.
//!
//! [`RepairRanges`] is the in-crate sink used by the session layer to stage
//! NACK and repair-advertisement payloads before wire encoding.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::block::{BlockId, SegmentId};

/// Identifier of one object transfer within a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u16);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sink for a repair request or repair advertisement under assembly.
///
/// Every append reports whether it fit; `false` means the message is out of
/// capacity and nothing was added.
pub trait RepairSink {
    /// Append an inclusive run of segment slot indices for one block.
    fn append_range(
        &mut self,
        object_id: ObjectId,
        block_id: BlockId,
        first: SegmentId,
        last: SegmentId,
    ) -> bool;

    /// Flag that the block's info segment is needed (request) or being
    /// advertised (advertisement).
    fn append_block_info(&mut self, object_id: ObjectId, block_id: BlockId) -> bool;
}

/// One entry of a staged repair message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairEntry {
    /// The block's info segment.
    Info {
        /// Transfer the block belongs to.
        object_id: ObjectId,
        /// Block in question.
        block_id: BlockId,
    },
    /// An inclusive run of segment slots.
    Range {
        /// Transfer the block belongs to.
        object_id: ObjectId,
        /// Block in question.
        block_id: BlockId,
        /// First slot of the run.
        first: SegmentId,
        /// Last slot of the run.
        last: SegmentId,
    },
}

/// Entry-bounded in-memory [`RepairSink`].
#[derive(Debug)]
pub struct RepairRanges {
    entries: Vec<RepairEntry>,
    max_entries: usize,
}

impl RepairRanges {
    /// Create a sink that accepts at most `max_entries` entries.
    #[must_use]
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: Vec::with_capacity(max_entries),
            max_entries,
        }
    }

    /// Entries staged so far.
    #[must_use]
    pub fn entries(&self) -> &[RepairEntry] {
        &self.entries
    }

    /// Number of entries staged so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when no further entry fits.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_entries
    }

    /// Discard staged entries, keeping the capacity.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Consume the sink, yielding the staged entries.
    #[must_use]
    pub fn into_entries(self) -> Vec<RepairEntry> {
        self.entries
    }
}

impl RepairSink for RepairRanges {
    fn append_range(
        &mut self,
        object_id: ObjectId,
        block_id: BlockId,
        first: SegmentId,
        last: SegmentId,
    ) -> bool {
        if self.is_full() {
            return false;
        }
        self.entries.push(RepairEntry::Range {
            object_id,
            block_id,
            first,
            last,
        });
        true
    }

    fn append_block_info(&mut self, object_id: ObjectId, block_id: BlockId) -> bool {
        if self.is_full() {
            return false;
        }
        self.entries.push(RepairEntry::Info {
            object_id,
            block_id,
        });
        true
    }
}
