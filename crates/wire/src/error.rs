// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Errors raised by the codec layer.
///
/// `Truncated` and `Corrupt` are structural: the byte stream can no longer
/// be framed and the connection that produced it must be torn down.
/// `Conversion` is a property-access error and is recoverable.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Ran out of bytes mid-structure.
    #[error("truncated frame: needed {needed} more byte(s) while reading {context}")]
    Truncated { context: &'static str, needed: usize },

    /// Structurally invalid data (bad tag, bad length, bad UTF-8).
    #[error("corrupt frame: {0}")]
    Corrupt(String),

    /// A data structure type id outside the closed OpenWire set.
    #[error("unknown data structure type {0}")]
    UnknownType(u8),

    /// Frame larger than the negotiated maximum.
    #[error("frame of {size} bytes exceeds max frame size {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// A typed property getter could not coerce the stored value.
    #[error("cannot convert property value {from} to {to}")]
    Conversion { from: &'static str, to: &'static str },
}

impl WireError {
    pub fn corrupt(msg: impl fmt::Display) -> Self {
        Self::Corrupt(msg.to_string())
    }

    /// True when the stream framing is lost and the connection is dead.
    pub fn is_structural(&self) -> bool {
        !matches!(self, Self::Conversion { .. })
    }
}
