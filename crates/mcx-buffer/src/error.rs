//! Error types for configuration validation and window admission.

use thiserror::Error;

use crate::block::BlockId;

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A sizing knob was zero.
    #[error("{field} must be non-zero")]
    ZeroField {
        /// Name of the offending field.
        field: &'static str,
    },
}

/// Why a block was refused admission into a [`crate::BlockBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InsertError {
    /// A block with the same id is already resident.
    #[error("block {id} is already resident")]
    Duplicate {
        /// The colliding id.
        id: BlockId,
    },

    /// Admitting the block would stretch the window past its bound.
    #[error("block {id} would stretch window [{lo}, {hi}] past range_max {range_max}")]
    OutOfWindow {
        /// The refused id.
        id: BlockId,
        /// Current low edge of the window.
        lo: BlockId,
        /// Current high edge of the window.
        hi: BlockId,
        /// Maximum window span.
        range_max: u32,
    },
}
