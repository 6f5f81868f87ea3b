//! # canopy Core
//!
//! Core library for canopy — a forest-of-trees approximate nearest-neighbor
//! index in pure Rust.
//!
//! The index partitions the item set with randomized hyperplane trees; many
//! decorrelated trees searched best-first give good recall at a fraction of
//! brute-force cost. A built index serializes to one flat file that loads
//! back as a read-only memory mapping, so any number of processes can share
//! the same on-disk index without private copies.
//!
//! ## Core Types
//!
//! - [`ForestIndex`] - The index: add items, build once, query forever
//! - [`Metric`] - Angular (cosine-like) or Euclidean distance
//! - [`Neighbor`] - One ranked search result (id + exact distance)
//! - [`VectorStore`] - Dense vector storage indexed by [`ItemId`]
//! - [`NodeArena`] - Append-only tree-node storage addressed by [`NodeRef`]
//!
//! ## Example
//!
//! ```rust
//! use canopy_core::prelude::*;
//!
//! let mut index = ForestIndex::with_seed(3, Metric::Euclidean, 7);
//! index.add(&[1.0, 0.0, 0.0]).unwrap();
//! index.add(&[0.0, 1.0, 0.0]).unwrap();
//! index.add(&[0.9, 0.1, 0.0]).unwrap();
//! index.build(10).unwrap();
//!
//! let neighbors = index.search_by_vector(&[1.0, 0.0, 0.0], 2, None).unwrap();
//! assert_eq!(neighbors[0].id, 0);
//! ```

pub mod arena;
mod build;
pub mod distance;
pub mod error;
pub mod index;
pub mod search;
pub mod storage;
pub mod vector;

// Re-exports for convenient access
pub use arena::{Node, NodeArena, NodeRef};
pub use distance::Metric;
pub use error::{Error, Result};
pub use index::ForestIndex;
pub use search::Neighbor;
pub use vector::{ItemId, VectorStore};

/// Re-export commonly used types for convenience.
///
/// # Example
///
/// ```rust
/// use canopy_core::prelude::*;
///
/// let mut index = ForestIndex::new(2, Metric::Angular);
/// index.add(&[0.6, 0.8]).unwrap();
/// ```
pub mod prelude {
    pub use crate::{Error, ForestIndex, ItemId, Metric, Neighbor, NodeRef, Result};
}
