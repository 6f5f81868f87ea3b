//! The forest index: lifecycle, build orchestration and public operations.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use parking_lot::Mutex;
use rand::Rng;

use crate::arena::{NodeArena, NodeRef, NodeView};
use crate::build::TreeBuilder;
use crate::distance::Metric;
use crate::error::{Error, Result};
use crate::search::{self, ForestRead, Neighbor};
use crate::storage::file::{self, MappedIndex};
use crate::vector::{ItemId, VectorStore};

/// A forest built in memory: vectors, shared node arena, one root per tree.
struct BuiltForest {
    metric: Metric,
    store: VectorStore,
    arena: NodeArena,
    roots: Vec<NodeRef>,
}

impl ForestRead for BuiltForest {
    fn metric(&self) -> Metric {
        self.metric
    }

    fn vector(&self, id: ItemId) -> &[f32] {
        self.store.vector(id)
    }

    fn node(&self, node_ref: NodeRef) -> NodeView<'_> {
        self.arena.view(node_ref)
    }

    fn roots(&self) -> &[NodeRef] {
        &self.roots
    }
}

enum State {
    /// Accepting items; not yet searchable.
    Inserting { store: VectorStore },
    /// Forest built in memory; searchable.
    Built(BuiltForest),
    /// Backed by a read-only file mapping; searchable.
    Mapped(MappedIndex),
    /// After `unload`; data operations fail until `load`.
    Unloaded,
}

/// An approximate nearest-neighbor index over fixed-dimension vectors.
///
/// The index is a forest of randomized partition trees. Items are added
/// while the index is mutable, the forest is built exactly once, and the
/// built structure is immutable thereafter: queries never lock, and a
/// saved index can be memory-mapped read-only by any number of processes.
///
/// # Lifecycle
///
/// create -> [`add`](Self::add)* -> [`build`](Self::build) -> queries ->
/// optionally [`save`](Self::save) / [`load`](Self::load) /
/// [`unload`](Self::unload).
///
/// Adding after `build`, or building twice, fails with
/// [`Error::AlreadyBuilt`]; rebuilding means creating a new index.
///
/// # Example
///
/// ```
/// use canopy_core::{ForestIndex, Metric};
///
/// let mut index = ForestIndex::with_seed(2, Metric::Euclidean, 42);
/// index.add(&[0.0, 0.0]).unwrap();
/// index.add(&[1.0, 0.0]).unwrap();
/// index.add(&[0.0, 1.0]).unwrap();
/// index.add(&[10.0, 10.0]).unwrap();
/// index.build(5).unwrap();
///
/// let neighbors = index.search_by_item(0, 2, None).unwrap();
/// assert_eq!(neighbors[0].id, 0); // the item itself, at distance 0
/// assert!(neighbors[1].id == 1 || neighbors[1].id == 2);
/// ```
pub struct ForestIndex {
    dimension: usize,
    metric: Metric,
    seed: u64,
    state: State,
}

impl ForestIndex {
    /// Creates an empty index for vectors of `dimension` components.
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self::with_seed(dimension, metric, rand::thread_rng().gen())
    }

    /// Creates an empty index with an explicit random seed.
    ///
    /// Two indexes created with the same seed, fed the same items and built
    /// with the same tree count produce identical forests, which makes
    /// results reproducible in tests.
    pub fn with_seed(dimension: usize, metric: Metric, seed: u64) -> Self {
        Self {
            dimension,
            metric,
            seed,
            state: State::Inserting {
                store: VectorStore::new(dimension),
            },
        }
    }

    /// Returns the dimension of vectors in this index.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Returns the distance metric used by this index.
    #[inline]
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Returns the number of items.
    ///
    /// Defined in every state (0 after [`unload`](Self::unload)) so status
    /// displays never have to handle an error.
    pub fn len(&self) -> usize {
        match &self.state {
            State::Inserting { store } => store.len(),
            State::Built(built) => built.store.len(),
            State::Mapped(mapped) => mapped.item_count(),
            State::Unloaded => 0,
        }
    }

    /// Returns true if the index holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true once a forest is built or loaded.
    pub fn is_built(&self) -> bool {
        matches!(&self.state, State::Built(_) | State::Mapped(_))
    }

    /// Returns the number of trees in the forest (0 before build).
    pub fn n_trees(&self) -> usize {
        match &self.state {
            State::Built(built) => built.roots.len(),
            State::Mapped(mapped) => mapped.tree_count(),
            _ => 0,
        }
    }

    /// Appends a vector, assigning the next dense id (first item is 0).
    ///
    /// # Errors
    ///
    /// [`Error::DimensionMismatch`] for a wrong-length vector,
    /// [`Error::AlreadyBuilt`] once the forest exists (items are immutable
    /// after build), [`Error::NotLoaded`] after `unload`.
    pub fn add(&mut self, vector: &[f32]) -> Result<ItemId> {
        match &mut self.state {
            State::Inserting { store } => store.add(vector),
            State::Built(_) | State::Mapped(_) => Err(Error::AlreadyBuilt),
            State::Unloaded => Err(Error::NotLoaded),
        }
    }

    /// Builds a forest of `n_trees` partition trees over the added items.
    ///
    /// Trees are constructed on parallel worker threads, each from its own
    /// seeded random stream so the forest is decorrelated; workers merge
    /// finished trees into the shared arena under a lock. No tree is
    /// visible to queries until the whole build completes.
    ///
    /// Building with zero items (or zero trees) produces an empty forest:
    /// searches return empty results rather than an error.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyBuilt`] if a forest already exists,
    /// [`Error::NotLoaded`] after `unload`.
    pub fn build(&mut self, n_trees: usize) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Unloaded) {
            State::Inserting { store } => {
                let (arena, roots) = if store.is_empty() || n_trees == 0 {
                    (NodeArena::new(), Vec::new())
                } else {
                    build_forest(&store, self.metric, self.seed, n_trees)
                };
                tracing::debug!(
                    items = store.len(),
                    trees = roots.len(),
                    nodes = arena.len(),
                    "forest built"
                );
                self.state = State::Built(BuiltForest {
                    metric: self.metric,
                    store,
                    arena,
                    roots,
                });
                Ok(())
            }
            other => {
                let err = match other {
                    State::Unloaded => Error::NotLoaded,
                    _ => Error::AlreadyBuilt,
                };
                self.state = other;
                Err(err)
            }
        }
    }

    /// Returns the `n` approximate nearest neighbors of `query`, closest
    /// first, ties broken by ascending id.
    ///
    /// `search_k` bounds how many distinct candidates are gathered before
    /// exact ranking; `None` means `n * n_trees`, the standard trade
    /// between recall and latency. Fewer than `n` results are returned
    /// when the index holds fewer items.
    ///
    /// # Errors
    ///
    /// [`Error::DimensionMismatch`] for a wrong-length query,
    /// [`Error::NotBuilt`] before build, [`Error::NotLoaded`] after unload.
    pub fn search_by_vector(
        &self,
        query: &[f32],
        n: usize,
        search_k: Option<usize>,
    ) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                got: query.len(),
            });
        }
        let reader = self.reader()?;
        Ok(search::search(reader, query, n, search_k))
    }

    /// Returns the `n` approximate nearest neighbors of a stored item.
    ///
    /// The item is not filtered from its own results: under Euclidean it
    /// ranks first at distance 0.
    ///
    /// # Errors
    ///
    /// [`Error::IndexOutOfRange`] for an unknown id, plus the same state
    /// errors as [`search_by_vector`](Self::search_by_vector).
    pub fn search_by_item(
        &self,
        id: ItemId,
        n: usize,
        search_k: Option<usize>,
    ) -> Result<Vec<Neighbor>> {
        let reader = self.reader()?;
        let query = self.stored_vector(id)?;
        Ok(search::search(reader, query, n, search_k))
    }

    /// Returns the metric distance between two stored items.
    ///
    /// Available in every data-bearing state, including before build.
    pub fn get_distance(&self, i: ItemId, j: ItemId) -> Result<f32> {
        let a = self.stored_vector(i)?;
        let b = self.stored_vector(j)?;
        Ok(self.metric.distance(a, b))
    }

    /// Returns a copy of the vector stored under `id`.
    pub fn get_item(&self, id: ItemId) -> Result<Vec<f32>> {
        Ok(self.stored_vector(id)?.to_vec())
    }

    /// Serializes the built forest to a single file at `path`.
    ///
    /// The write goes through a sibling temp file renamed into place, so a
    /// failed save leaves no file that a later [`load`](Self::load) could
    /// silently accept.
    ///
    /// # Errors
    ///
    /// [`Error::NotBuilt`] before build, [`Error::NotLoaded`] after unload,
    /// [`Error::IoError`] on filesystem failure.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        match &self.state {
            State::Built(built) => {
                file::write_index(path, self.metric, &built.store, &built.arena, &built.roots)?
            }
            State::Mapped(mapped) => file::write_raw(path, mapped.as_bytes())?,
            State::Inserting { .. } => return Err(Error::NotBuilt),
            State::Unloaded => return Err(Error::NotLoaded),
        }
        tracing::debug!(path = %path.display(), "index saved");
        Ok(())
    }

    /// Maps an index file previously produced by [`save`](Self::save).
    ///
    /// The file is validated against this index's dimension and metric and
    /// then served read-only straight from the mapping: loading walks no
    /// pointer structures and copies nothing, and multiple processes can
    /// map the same file concurrently. Any previous contents of this index
    /// (items added, a built forest, an earlier mapping) are replaced.
    ///
    /// # Errors
    ///
    /// [`Error::FormatMismatch`] when the file is not a canopy index, has
    /// the wrong version, disagrees on dimension or metric, or fails
    /// validation; [`Error::IoError`] when it cannot be opened or mapped.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mapped = MappedIndex::open(path, self.dimension, self.metric)?;
        tracing::debug!(
            path = %path.display(),
            items = mapped.item_count(),
            trees = mapped.tree_count(),
            "index mapped"
        );
        self.state = State::Mapped(mapped);
        Ok(())
    }

    /// Releases the mapping or in-memory forest without touching the file.
    ///
    /// Subsequent data operations fail [`Error::NotLoaded`] until
    /// [`load`](Self::load) is called.
    pub fn unload(&mut self) {
        self.state = State::Unloaded;
        tracing::debug!("index unloaded");
    }

    fn reader(&self) -> Result<&dyn ForestRead> {
        match &self.state {
            State::Built(built) => Ok(built),
            State::Mapped(mapped) => Ok(mapped),
            State::Inserting { .. } => Err(Error::NotBuilt),
            State::Unloaded => Err(Error::NotLoaded),
        }
    }

    fn stored_vector(&self, id: ItemId) -> Result<&[f32]> {
        match &self.state {
            State::Inserting { store } => store.get(id),
            State::Built(built) => built.store.get(id),
            State::Mapped(mapped) => mapped.get(id),
            State::Unloaded => Err(Error::NotLoaded),
        }
    }
}

/// Builds `n_trees` independent trees over the full item set.
///
/// Worker threads pull tree ordinals from an atomic cursor and build into
/// private scratch arenas; each finished tree is merged into the shared
/// arena under the mutex. Roots are reordered by ordinal afterwards so the
/// forest iterates deterministically regardless of completion order.
fn build_forest(
    store: &VectorStore,
    metric: Metric,
    seed: u64,
    n_trees: usize,
) -> (NodeArena, Vec<NodeRef>) {
    let ids: Vec<ItemId> = (0..store.len() as ItemId).collect();
    let workers = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(n_trees);
    let cursor = AtomicUsize::new(0);
    let merged: Mutex<(NodeArena, Vec<(usize, NodeRef)>)> =
        Mutex::new((NodeArena::new(), Vec::with_capacity(n_trees)));

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let tree = cursor.fetch_add(1, Ordering::Relaxed);
                if tree >= n_trees {
                    break;
                }
                let builder = TreeBuilder::new(store, metric, seed.wrapping_add(tree as u64));
                let (scratch, root) = builder.build(ids.clone());

                let mut guard = merged.lock();
                let (arena, roots) = &mut *guard;
                let rebased = arena.absorb(scratch, root);
                roots.push((tree, rebased));
            });
        }
    });

    let (arena, mut tagged) = merged.into_inner();
    tagged.sort_unstable_by_key(|&(tree, _)| tree);
    (arena, tagged.into_iter().map(|(_, root)| root).collect())
}
