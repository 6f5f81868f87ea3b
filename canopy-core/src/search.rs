//! Best-first search across a built forest.
//!
//! The traversal keeps a max-priority queue over nodes, keyed by how close
//! the query is to each subtree. Roots enter at infinite priority; at every
//! split the child on the query's side re-enters at infinite priority while
//! the far child enters at `-|margin|`, so subtrees whose hyperplane the
//! query is far from are deferred. Leaves pour their item ids into a
//! deduplicated candidate set until the `search_k` budget is reached, and
//! the candidates are then ranked by exact distance.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::arena::{NodeRef, NodeView};
use crate::distance::{margin, Metric};
use crate::vector::ItemId;

/// Read-only access to a forest, implemented by both the in-memory index
/// and the memory-mapped file representation.
pub(crate) trait ForestRead {
    fn metric(&self) -> Metric;
    fn vector(&self, id: ItemId) -> &[f32];
    fn node(&self, node_ref: NodeRef) -> NodeView<'_>;
    fn roots(&self) -> &[NodeRef];
}

/// A single ranked search result (lower distance = more similar).
#[derive(Debug, Clone)]
pub struct Neighbor {
    /// The id of the matched item.
    pub id: ItemId,
    /// Exact metric distance from the query.
    pub distance: f32,
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.distance == other.distance
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        // Ascending distance, ties broken by ascending id.
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// A queue entry during traversal, ordered by priority (max-heap).
#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    priority: f32,
    node: NodeRef,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .partial_cmp(&other.priority)
            .unwrap_or(Ordering::Equal)
    }
}

/// Runs a best-first query over `reader`, returning at most `n` neighbors.
///
/// `search_k` bounds the number of distinct candidates gathered before
/// ranking; None means `n * number_of_trees`.
pub(crate) fn search<R: ForestRead + ?Sized>(
    reader: &R,
    query: &[f32],
    n: usize,
    search_k: Option<usize>,
) -> Vec<Neighbor> {
    let roots = reader.roots();
    if roots.is_empty() || n == 0 {
        return Vec::new();
    }
    let budget = search_k.unwrap_or(n * roots.len()).max(n);

    let mut queue: BinaryHeap<QueueEntry> = roots
        .iter()
        .map(|&root| QueueEntry {
            priority: f32::INFINITY,
            node: root,
        })
        .collect();
    let mut candidates: HashSet<ItemId> = HashSet::new();

    while candidates.len() < budget {
        let Some(entry) = queue.pop() else {
            break;
        };
        match reader.node(entry.node) {
            NodeView::Leaf { items } => {
                candidates.extend(items.iter().copied());
            }
            NodeView::Split {
                normal,
                offset,
                left,
                right,
            } => {
                let m = margin(normal, offset, query);
                let (near, far) = if m <= 0.0 { (left, right) } else { (right, left) };
                queue.push(QueueEntry {
                    priority: f32::INFINITY,
                    node: near,
                });
                queue.push(QueueEntry {
                    priority: -m.abs(),
                    node: far,
                });
            }
        }
    }

    tracing::trace!(
        candidates = candidates.len(),
        budget,
        "candidate gathering done"
    );

    let metric = reader.metric();
    let mut neighbors: Vec<Neighbor> = candidates
        .into_iter()
        .map(|id| Neighbor {
            id,
            distance: metric.distance(query, reader.vector(id)),
        })
        .collect();
    neighbors.sort_unstable();
    neighbors.truncate(n);
    neighbors
}
