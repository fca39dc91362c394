//! Error types for Horizon Datasource core structures.

/// A specialized Result type for indexed map operations.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors raised by [`IndexedMap`](crate::IndexedMap) and its range views.
///
/// Positions are never clamped: a position outside `[0, len)` is reported
/// to the caller as [`IndexError::OutOfRange`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    /// A positional access was outside `[0, len)`.
    #[error("index {index} out of range for length {len}")]
    OutOfRange {
        /// The requested position.
        index: usize,
        /// The number of entries at the time of the request.
        len: usize,
    },

    /// A key was inserted through a range view outside of the view's bounds.
    #[error("key outside of range view bounds")]
    OutOfBounds,
}

impl IndexError {
    /// Create an out-of-range error.
    pub fn out_of_range(index: usize, len: usize) -> Self {
        Self::OutOfRange { index, len }
    }
}
