//! Error types for canopy operations.

use thiserror::Error;

/// Result type alias using canopy's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during canopy operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Vector dimension mismatch between index and input.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Item id outside the range of assigned ids.
    #[error("item id out of range: {id} (index holds {len} items)")]
    IndexOutOfRange { id: u32, len: usize },

    /// Query or save attempted before the forest was built.
    #[error("index has not been built")]
    NotBuilt,

    /// Insert or rebuild attempted after the forest was built.
    #[error("index is already built")]
    AlreadyBuilt,

    /// Operation attempted after unload without a reload.
    #[error("index data is not loaded")]
    NotLoaded,

    /// Index file header disagrees with this index's configuration.
    #[error("format mismatch: {0}")]
    FormatMismatch(String),

    /// IO error during save or load.
    #[error("io error: {0}")]
    IoError(String),
}
