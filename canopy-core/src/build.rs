//! Randomized partition-tree construction.
//!
//! One [`TreeBuilder`] produces one tree: it recursively splits a set of
//! item ids with hyperplanes through two randomly sampled member points,
//! until a subset fits in a leaf. Splits are not optimal and do not need to
//! be; forest recall comes from building many decorrelated trees, so each
//! builder gets its own seeded random stream.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::arena::{leaf_capacity, NodeArena, NodeRef};
use crate::distance::{margin, Metric};
use crate::vector::{ItemId, VectorStore};

/// Bounded resampling attempts before giving up on random hyperplanes.
const SPLIT_ATTEMPTS: usize = 3;

/// Builds a single partition tree into a local scratch arena.
pub(crate) struct TreeBuilder<'a> {
    store: &'a VectorStore,
    metric: Metric,
    leaf_capacity: usize,
    rng: StdRng,
    arena: NodeArena,
}

impl<'a> TreeBuilder<'a> {
    pub(crate) fn new(store: &'a VectorStore, metric: Metric, seed: u64) -> Self {
        Self {
            store,
            metric,
            leaf_capacity: leaf_capacity(store.dimension()),
            rng: StdRng::seed_from_u64(seed),
            arena: NodeArena::new(),
        }
    }

    /// Consumes the builder, returning the scratch arena and the tree root.
    pub(crate) fn build(mut self, ids: Vec<ItemId>) -> (NodeArena, NodeRef) {
        let root = self.build_subtree(ids);
        tracing::trace!(nodes = self.arena.len(), "partition tree built");
        (self.arena, root)
    }

    fn build_subtree(&mut self, ids: Vec<ItemId>) -> NodeRef {
        if ids.len() <= self.leaf_capacity {
            return self.arena.alloc_leaf(ids);
        }

        let (normal, offset, left_ids, right_ids) = self.partition(ids);
        let left = self.build_subtree(left_ids);
        let right = self.build_subtree(right_ids);
        self.arena.alloc_split(normal, offset, left, right)
    }

    /// Chooses a hyperplane and partitions `ids` across it.
    ///
    /// Degenerate sample pairs are retried a bounded number of times, then a
    /// fixed-axis plane is tried. If every plane leaves one side empty the
    /// items are alternated between the children, which guarantees progress
    /// and therefore bounded depth even for pathological inputs (e.g. all
    /// points identical).
    fn partition(&mut self, ids: Vec<ItemId>) -> (Vec<f32>, f32, Vec<ItemId>, Vec<ItemId>) {
        let mut last_plane: Option<(Vec<f32>, f32)> = None;

        for _ in 0..SPLIT_ATTEMPTS {
            if let Some((normal, offset)) = self.sample_hyperplane(&ids) {
                let (left, right) = split_by_plane(self.store, &ids, &normal, offset);
                if !left.is_empty() && !right.is_empty() {
                    return (normal, offset, left, right);
                }
                last_plane = Some((normal, offset));
            }
        }

        let (normal, offset) = last_plane.unwrap_or_else(|| {
            let reference = self.store.vector(ids[0]);
            self.metric
                .fallback_hyperplane(self.store.dimension(), reference)
        });

        let (left, right) = split_by_plane(self.store, &ids, &normal, offset);
        if !left.is_empty() && !right.is_empty() {
            return (normal, offset, left, right);
        }

        // Forced even split: alternate assignment ignoring geometry.
        let mut left = Vec::with_capacity(ids.len() / 2 + 1);
        let mut right = Vec::with_capacity(ids.len() / 2);
        for (i, id) in ids.into_iter().enumerate() {
            if i % 2 == 0 {
                left.push(id);
            } else {
                right.push(id);
            }
        }
        (normal, offset, left, right)
    }

    /// Samples two distinct member points and builds a hyperplane through
    /// them. Returns None for a degenerate pair.
    fn sample_hyperplane(&mut self, ids: &[ItemId]) -> Option<(Vec<f32>, f32)> {
        let i = self.rng.gen_range(0..ids.len());
        let mut j = self.rng.gen_range(0..ids.len());
        if j == i {
            j = (j + 1) % ids.len();
        }

        let a = self.store.vector(ids[i]);
        let b = self.store.vector(ids[j]);
        self.metric.hyperplane(a, b)
    }
}

/// Partitions `ids` by the signed margin against a hyperplane.
fn split_by_plane(
    store: &VectorStore,
    ids: &[ItemId],
    normal: &[f32],
    offset: f32,
) -> (Vec<ItemId>, Vec<ItemId>) {
    let mut left = Vec::new();
    let mut right = Vec::new();
    for &id in ids {
        if margin(normal, offset, store.vector(id)) <= 0.0 {
            left.push(id);
        } else {
            right.push(id);
        }
    }
    (left, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Node;

    fn store_of(vectors: &[Vec<f32>]) -> VectorStore {
        let mut store = VectorStore::new(vectors[0].len());
        for v in vectors {
            store.add(v).unwrap();
        }
        store
    }

    /// Collects every item id reachable from `root`, checking structure on
    /// the way down.
    fn collect_items(arena: &NodeArena, root: NodeRef, out: &mut Vec<ItemId>) {
        match arena.get(root) {
            Node::Leaf { items } => out.extend_from_slice(items),
            Node::Split { left, right, .. } => {
                collect_items(arena, *left, out);
                collect_items(arena, *right, out);
            }
        }
    }

    fn assert_partition_of_all(store: &VectorStore, arena: &NodeArena, root: NodeRef) {
        let mut items = Vec::new();
        collect_items(arena, root, &mut items);
        items.sort_unstable();
        let expected: Vec<ItemId> = (0..store.len() as ItemId).collect();
        assert_eq!(items, expected, "every id must appear in exactly one leaf");
    }

    #[test]
    fn test_small_set_becomes_single_leaf() {
        let store = store_of(&[vec![0.0, 1.0], vec![1.0, 0.0]]);
        let builder = TreeBuilder::new(&store, Metric::Euclidean, 42);
        let (arena, root) = builder.build(vec![0, 1]);

        assert_eq!(arena.len(), 1);
        assert_eq!(arena.get(root), &Node::Leaf { items: vec![0, 1] });
    }

    #[test]
    fn test_tree_partitions_all_items() {
        let vectors: Vec<Vec<f32>> = (0..200)
            .map(|i| vec![(i % 17) as f32, (i % 5) as f32, i as f32 * 0.01])
            .collect();
        let store = store_of(&vectors);

        for metric in [Metric::Angular, Metric::Euclidean] {
            let builder = TreeBuilder::new(&store, metric, 7);
            let (arena, root) = builder.build((0..200).collect());
            assert_partition_of_all(&store, &arena, root);
        }
    }

    #[test]
    fn test_identical_points_terminate() {
        // Every pair degenerates, so only the forced alternation makes
        // progress. 100 identical points must still build and keep all ids.
        let vectors: Vec<Vec<f32>> = (0..100).map(|_| vec![1.0, 1.0]).collect();
        let store = store_of(&vectors);

        let builder = TreeBuilder::new(&store, Metric::Euclidean, 3);
        let (arena, root) = builder.build((0..100).collect());
        assert_partition_of_all(&store, &arena, root);
    }

    #[test]
    fn test_zero_vectors_terminate_angular() {
        // Zero-norm vectors have no direction; Angular splits degenerate
        // into the fallback path.
        let vectors: Vec<Vec<f32>> = (0..50).map(|_| vec![0.0, 0.0, 0.0]).collect();
        let store = store_of(&vectors);

        let builder = TreeBuilder::new(&store, Metric::Angular, 11);
        let (arena, root) = builder.build((0..50).collect());
        assert_partition_of_all(&store, &arena, root);
    }

    #[test]
    fn test_same_seed_same_tree() {
        let vectors: Vec<Vec<f32>> = (0..64)
            .map(|i| vec![(i as f32).sin(), (i as f32).cos(), i as f32 * 0.1])
            .collect();
        let store = store_of(&vectors);

        let (arena_a, root_a) =
            TreeBuilder::new(&store, Metric::Euclidean, 99).build((0..64).collect());
        let (arena_b, root_b) =
            TreeBuilder::new(&store, Metric::Euclidean, 99).build((0..64).collect());

        assert_eq!(root_a, root_b);
        assert_eq!(arena_a.len(), arena_b.len());
        assert!(arena_a.iter().eq(arena_b.iter()));
    }

    #[test]
    fn test_leaves_respect_capacity() {
        let vectors: Vec<Vec<f32>> = (0..300)
            .map(|i| vec![(i * 31 % 101) as f32, (i * 17 % 89) as f32])
            .collect();
        let store = store_of(&vectors);

        let builder = TreeBuilder::new(&store, Metric::Euclidean, 1);
        let (arena, _root) = builder.build((0..300).collect());

        let cap = leaf_capacity(store.dimension());
        for node in arena.iter() {
            if let Node::Leaf { items } = node {
                assert!(items.len() <= cap);
            }
        }
    }
}
