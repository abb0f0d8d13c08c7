//! Error types for searcher construction and game history updates.

use std::fmt;

use crate::moves::Move;

/// Error type for invalid searcher configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    /// Thread count outside `1..=max`
    InvalidThreadCount { requested: usize, max: usize },
    /// Hash table size exponent outside the supported range
    InvalidHashExp { exp: u32, min: u32, max: u32 },
    /// Requested depth beyond what the node pools can hold
    DepthTooLarge { depth: i32, max: i32 },
    /// A move could not be replayed onto the game history
    IllegalHistoryMove { turn: usize, mv: Move },
    /// Turn number is outside the recorded history
    TurnOutOfRange { turn: usize, min: usize, max: usize },
}

impl fmt::Display for SearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchError::InvalidThreadCount { requested, max } => {
                write!(f, "Thread count must be between 1 and {max}, got {requested}")
            }
            SearchError::InvalidHashExp { exp, min, max } => {
                write!(f, "Hash exponent {exp} outside supported range {min}..={max}")
            }
            SearchError::DepthTooLarge { depth, max } => {
                write!(f, "Search depth {depth} exceeds maximum {max}")
            }
            SearchError::IllegalHistoryMove { turn, mv } => {
                write!(f, "Illegal move {mv} at turn {turn}")
            }
            SearchError::TurnOutOfRange { turn, min, max } => {
                write!(f, "Turn {turn} outside recorded history {min}..={max}")
            }
        }
    }
}

impl std::error::Error for SearchError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = SearchError::InvalidThreadCount { requested: 0, max: 16 };
        assert_eq!(e.to_string(), "Thread count must be between 1 and 16, got 0");

        let e = SearchError::IllegalHistoryMove {
            turn: 3,
            mv: Move::PASS,
        };
        assert_eq!(e.to_string(), "Illegal move ffffff00 at turn 3");
    }
}
