//! # canopy
//!
//! **A pure-Rust forest-of-trees index for approximate nearest-neighbor search.**
//!
//! canopy builds a forest of randomized hyperplane-partition trees over a
//! set of fixed-dimension vectors and answers k-nearest-neighbor queries by
//! best-first search across the forest. It is optimized for:
//!
//! - **Embedding retrieval** — Semantic lookup over text/image embeddings
//! - **Recommendations** — "Items similar to this one" at interactive latency
//! - **Shared read-only serving** — One index file memory-mapped by many processes
//!
//! ## Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | **Forest index** | Randomized partition trees, best-first search |
//! | **Distance Metrics** | Angular (cosine-like) and Euclidean |
//! | **Tunable recall** | `search_k` trades latency for recall per query |
//! | **Parallel build** | Trees built on worker threads, published atomically |
//! | **Persistence** | Single-file format, loaded as a read-only memory map |
//!
//! ## Quick Start
//!
//! ```rust
//! use canopy::prelude::*;
//!
//! fn main() -> Result<()> {
//!     // Create an index for 64-dimensional vectors
//!     let mut index = ForestIndex::new(64, Metric::Angular);
//!
//!     // Add items; ids are assigned densely starting at 0
//!     for i in 0..1000u32 {
//!         let v: Vec<f32> = (0..64).map(|j| ((i * 64 + j) as f32).sin()).collect();
//!         index.add(&v)?;
//!     }
//!
//!     // Build the forest once; more trees = better recall, larger index
//!     index.build(10)?;
//!
//!     // Query by stored item or by arbitrary vector
//!     let neighbors = index.search_by_item(0, 10, None)?;
//!     assert_eq!(neighbors[0].id, 0);
//!
//!     let query: Vec<f32> = (0..64).map(|j| (j as f32).cos()).collect();
//!     let neighbors = index.search_by_vector(&query, 10, None)?;
//!     assert!(!neighbors.is_empty());
//!     Ok(())
//! }
//! ```
//!
//! ## Persistence
//!
//! A built forest saves to one flat file and loads back as a read-only
//! memory mapping — loading computes offsets instead of re-parsing, so many
//! processes can serve queries from the same file:
//!
//! ```no_run
//! use canopy::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let mut index = ForestIndex::new(64, Metric::Angular);
//!     // ... add items ...
//!     index.build(10)?;
//!     index.save("./embeddings.cnpy")?;
//!
//!     // Elsewhere (another thread, another process):
//!     let mut reader = ForestIndex::new(64, Metric::Angular);
//!     reader.load("./embeddings.cnpy")?;
//!     let neighbors = reader.search_by_item(42, 10, None)?;
//!     # let _ = neighbors;
//!     Ok(())
//! }
//! ```
//!
//! ## Tuning
//!
//! Two knobs control the recall/latency trade:
//!
//! - `n_trees` (build time): more trees decorrelate the partitions and
//!   raise recall at the cost of build time and file size.
//! - `search_k` (query time): how many candidates are gathered before the
//!   exact ranking pass. `None` defaults to `n * n_trees`.
//!
//! ## Lifecycle & Errors
//!
//! Items are added strictly before [`build`](ForestIndex::build); adding
//! after the forest exists fails with [`Error::AlreadyBuilt`], as does a
//! second `build` — create a fresh index to rebuild. Queries before build
//! fail with [`Error::NotBuilt`], and everything after
//! [`unload`](ForestIndex::unload) fails with [`Error::NotLoaded`] until a
//! [`load`](ForestIndex::load). All fallible operations return
//! [`Result`].
//!
//! ## Thread Safety
//!
//! A built or loaded [`ForestIndex`] serves `&self` queries from any number
//! of threads without locking: nothing is mutated after build. Mutating
//! operations (`add`, `build`, `load`, `unload`) take `&mut self`, so the
//! borrow checker enforces their exclusivity.
//!
//! ## Architecture
//!
//! canopy is organized into two crates:
//!
//! - **`canopy-core`** — the index, search and storage implementation
//! - **`canopy`** — main crate that re-exports everything

// Re-export everything from core
pub use canopy_core::*;
