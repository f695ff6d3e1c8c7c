//! Block and segment buffering for the MCX reliable multicast transport.
//!
//! MCX moves bulk objects by splitting them into fixed-size segments,
//! grouping segments into FEC coding blocks, and repairing loss with
//! NACK-driven selective retransmission instead of per-packet ACKs, so one
//! sender scales to large receiver groups. This crate is the bounded-memory
//! core of that pipeline:
//!
//! - [`SegmentPool`] / [`BlockPool`] - pre-sized free-list allocators with
//!   sticky shortage accounting
//! - [`Block`] - per-coding-block transmission and repair state for the
//!   sender and receiver roles
//! - [`BlockBuffer`] - hashed sliding window over the block-id space
//! - [`Bitset`] - the fixed-capacity mask type behind pending/repair
//!   tracking
//! - [`RepairSink`] - the contract for appending coalesced repair ranges
//!   into outbound NACK and repair-advertisement messages
//!
//! The crate performs no I/O and takes no locks: a buffer and its pools are
//! confined to one owner (one object-transfer context), every operation runs
//! to completion, and pool exhaustion is a soft failure the caller retries
//! on a later event - never a wait.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod bitset;
mod block;
mod buffer;
mod config;
mod error;
mod message;
mod pool;

pub use bitset::Bitset;
pub use block::{Block, BlockId, SegmentId};
pub use buffer::{BlockBuffer, BlockIter, RejectedBlock};
pub use config::BufferConfig;
pub use error::{ConfigError, InsertError};
pub use message::{ObjectId, RepairEntry, RepairRanges, RepairSink};
pub use pool::{BlockPool, Segment, SegmentPool, SegmentPoolStats};
