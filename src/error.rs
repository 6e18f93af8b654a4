//! Error type shared by every search component.

use std::fmt;

/// Which side of a [`Pattern`](crate::Pattern) an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternSide {
    Prefix,
    Suffix,
}

impl fmt::Display for PatternSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternSide::Prefix => write!(f, "prefix"),
            PatternSide::Suffix => write!(f, "suffix"),
        }
    }
}

/// Errors that can occur while building a pattern or running a search.
#[derive(Debug, thiserror::Error)]
pub enum VanityError {
    #[error("{side} is {len} nibbles long (max {})", crate::matcher::MAX_PATTERN_NIBBLES)]
    InvalidPatternLength { side: PatternSide, len: usize },

    #[error("Invalid hex digit {0:?} in pattern")]
    InvalidPatternDigit(char),

    #[error("Invalid nibble value {0} (expected 0..=15)")]
    InvalidNibble(u8),

    #[error("Invalid batch size: {0}")]
    InvalidBatchSize(String),

    #[error("GPU backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Matcher destroyed")]
    MatcherDestroyed,

    #[error("Entropy source unavailable: {0}")]
    EntropySourceUnavailable(String),

    #[error("Device operation failed: {0}")]
    Device(String),

    #[error("All search workers disconnected")]
    WorkersDisconnected,

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl VanityError {
    /// Returns true for input validation errors raised before any work is dispatched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            VanityError::InvalidPatternLength { .. }
                | VanityError::InvalidPatternDigit(_)
                | VanityError::InvalidNibble(_)
                | VanityError::InvalidBatchSize(_)
        )
    }
}
