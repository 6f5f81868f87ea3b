//! Index file writer and memory-mapped reader.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::arena::{NodeArena, NodeRef, NodeView};
use crate::distance::Metric;
use crate::error::{Error, Result};
use crate::search::ForestRead;
use crate::storage::format::{self, Header, HEADER_LEN};
use crate::vector::{ItemId, VectorStore};

/// Serializes a built forest to `path`.
///
/// The bytes go to a sibling `.tmp` file first and are renamed into place
/// only after a successful flush and fsync, so a failed or interrupted save
/// never leaves a file a later load could mistake for a complete index.
pub(crate) fn write_index(
    path: &Path,
    metric: Metric,
    store: &VectorStore,
    arena: &NodeArena,
    roots: &[NodeRef],
) -> Result<()> {
    let tmp = tmp_path(path)?;
    let result = write_index_to(&tmp, metric, store, arena, roots);
    finish_tmp(&tmp, path, result)
}

/// Writes an already-serialized index image (a mapped file's bytes) to
/// `path`, with the same temp-and-rename discipline.
pub(crate) fn write_raw(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(path)?;
    let result = (|| {
        let file = create_tmp(&tmp)?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(bytes)
            .map_err(|e| Error::IoError(format!("write index image failed: {e}")))?;
        sync(writer)
    })();
    finish_tmp(&tmp, path, result)
}

fn write_index_to(
    tmp: &Path,
    metric: Metric,
    store: &VectorStore,
    arena: &NodeArena,
    roots: &[NodeRef],
) -> Result<()> {
    let dimension = store.dimension();
    let roots_bytes: &[u8] = bytemuck::cast_slice(roots);
    let header = Header {
        metric,
        dimension: dimension as u32,
        item_count: store.len() as u64,
        node_count: arena.len() as u64,
        tree_count: roots.len() as u32,
        roots_crc: crc32fast::hash(roots_bytes),
    };

    let file = create_tmp(tmp)?;
    let mut writer = BufWriter::new(file);

    writer
        .write_all(&header.encode())
        .map_err(|e| Error::IoError(format!("write header failed: {e}")))?;
    writer
        .write_all(roots_bytes)
        .map_err(|e| Error::IoError(format!("write roots failed: {e}")))?;
    writer
        .write_all(bytemuck::cast_slice(store.as_flat_slice()))
        .map_err(|e| Error::IoError(format!("write vectors failed: {e}")))?;

    let mut record = Vec::with_capacity(format::node_stride(dimension));
    for node in arena.iter() {
        record.clear();
        format::encode_node(node, dimension, &mut record);
        writer
            .write_all(&record)
            .map_err(|e| Error::IoError(format!("write node failed: {e}")))?;
    }

    sync(writer)
}

fn tmp_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::IoError(format!("invalid index path: {}", path.display())))?;
    let mut tmp_name = name.to_os_string();
    tmp_name.push(".tmp");
    Ok(path.with_file_name(tmp_name))
}

fn create_tmp(tmp: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(tmp)
        .map_err(|e| Error::IoError(format!("failed to create {}: {e}", tmp.display())))
}

fn sync(writer: BufWriter<File>) -> Result<()> {
    let file = writer
        .into_inner()
        .map_err(|e| Error::IoError(format!("flush failed: {e}")))?;
    file.sync_all()
        .map_err(|e| Error::IoError(format!("sync failed: {e}")))
}

fn finish_tmp(tmp: &Path, path: &Path, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => std::fs::rename(tmp, path)
            .map_err(|e| Error::IoError(format!("rename into place failed: {e}"))),
        Err(e) => {
            let _ = std::fs::remove_file(tmp);
            Err(e)
        }
    }
}

/// A read-only, memory-mapped view of an index file.
///
/// All reads are offset arithmetic into the mapping; nothing is copied into
/// private memory, so any number of threads or processes can share one
/// file's pages.
pub(crate) struct MappedIndex {
    mmap: Mmap,
    metric: Metric,
    dimension: usize,
    item_count: usize,
    tree_count: usize,
    vectors_offset: usize,
    nodes_offset: usize,
    node_stride: usize,
}

impl MappedIndex {
    /// Maps `path` and validates it against the expected configuration.
    pub(crate) fn open(path: &Path, dimension: usize, metric: Metric) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::IoError(format!("failed to open {}: {e}", path.display())))?;
        // Safety: the mapping is read-only and the file is treated as
        // immutable once written; canopy only renames complete files into
        // place.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| Error::IoError(format!("failed to map {}: {e}", path.display())))?;

        let header = Header::decode(&mmap)?;
        if header.dimension as usize != dimension {
            return Err(Error::FormatMismatch(format!(
                "file holds dimension {}, index expects {}",
                header.dimension, dimension
            )));
        }
        if header.metric != metric {
            return Err(Error::FormatMismatch(format!(
                "file holds metric {:?}, index expects {:?}",
                header.metric, metric
            )));
        }

        let item_count = header.item_count as usize;
        let node_count = header.node_count as usize;
        let tree_count = header.tree_count as usize;
        let node_stride = format::node_stride(dimension);

        let roots_len = tree_count
            .checked_mul(4)
            .ok_or_else(|| Error::FormatMismatch("tree count overflows".into()))?;
        let vectors_len = item_count
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| Error::FormatMismatch("item count overflows".into()))?;
        let nodes_len = node_count
            .checked_mul(node_stride)
            .ok_or_else(|| Error::FormatMismatch("node count overflows".into()))?;

        let vectors_offset = HEADER_LEN
            .checked_add(roots_len)
            .ok_or_else(|| Error::FormatMismatch("section sizes overflow".into()))?;
        let nodes_offset = vectors_offset
            .checked_add(vectors_len)
            .ok_or_else(|| Error::FormatMismatch("section sizes overflow".into()))?;
        let total = nodes_offset
            .checked_add(nodes_len)
            .ok_or_else(|| Error::FormatMismatch("section sizes overflow".into()))?;
        if mmap.len() != total {
            return Err(Error::FormatMismatch(format!(
                "file is {} bytes, header describes {total}",
                mmap.len()
            )));
        }

        let roots_bytes = &mmap[HEADER_LEN..vectors_offset];
        if crc32fast::hash(roots_bytes) != header.roots_crc {
            return Err(Error::FormatMismatch("root table checksum mismatch".into()));
        }

        let mapped = Self {
            mmap,
            metric,
            dimension,
            item_count,
            tree_count,
            vectors_offset,
            nodes_offset,
            node_stride,
        };

        for (i, root) in mapped.root_slice().iter().enumerate() {
            if *root as usize >= node_count {
                return Err(Error::FormatMismatch(format!(
                    "root {i} references unknown node {root}"
                )));
            }
        }
        for i in 0..node_count {
            format::validate_node_record(
                mapped.node_record(i),
                i as u64,
                dimension,
                header.item_count,
            )?;
        }

        Ok(mapped)
    }

    #[inline]
    pub(crate) fn item_count(&self) -> usize {
        self.item_count
    }

    #[inline]
    pub(crate) fn tree_count(&self) -> usize {
        self.tree_count
    }

    /// Returns the raw file image, for re-saving a loaded index elsewhere.
    #[inline]
    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }

    /// Range-checked vector access.
    pub(crate) fn get(&self, id: ItemId) -> Result<&[f32]> {
        if id as usize >= self.item_count {
            return Err(Error::IndexOutOfRange {
                id,
                len: self.item_count,
            });
        }
        Ok(self.vector_slice(id))
    }

    #[inline]
    fn root_slice(&self) -> &[NodeRef] {
        bytemuck::cast_slice(&self.mmap[HEADER_LEN..self.vectors_offset])
    }

    #[inline]
    fn vector_slice(&self, id: ItemId) -> &[f32] {
        let start = self.vectors_offset + id as usize * self.dimension * 4;
        bytemuck::cast_slice(&self.mmap[start..start + self.dimension * 4])
    }

    #[inline]
    fn node_record(&self, index: usize) -> &[u8] {
        let start = self.nodes_offset + index * self.node_stride;
        &self.mmap[start..start + self.node_stride]
    }
}

impl ForestRead for MappedIndex {
    fn metric(&self) -> Metric {
        self.metric
    }

    fn vector(&self, id: ItemId) -> &[f32] {
        self.vector_slice(id)
    }

    fn node(&self, node_ref: NodeRef) -> NodeView<'_> {
        format::view_node(self.node_record(node_ref as usize), self.dimension)
    }

    fn roots(&self) -> &[NodeRef] {
        self.root_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_index_path() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join("canopy_test_storage");
        fs::create_dir_all(&dir).unwrap();
        dir.join(format!("test_{}_{}.cnpy", std::process::id(), id))
    }

    fn sample_forest() -> (VectorStore, NodeArena, Vec<NodeRef>) {
        let mut store = VectorStore::new(2);
        store.add(&[0.0, 0.0]).unwrap();
        store.add(&[1.0, 0.0]).unwrap();
        store.add(&[0.0, 1.0]).unwrap();

        let mut arena = NodeArena::new();
        let left = arena.alloc_leaf(vec![0, 2]);
        let right = arena.alloc_leaf(vec![1]);
        let root = arena.alloc_split(vec![1.0, 0.0], -0.5, left, right);

        (store, arena, vec![root])
    }

    #[test]
    fn test_write_then_map_round_trip() {
        let path = temp_index_path();
        let (store, arena, roots) = sample_forest();

        write_index(&path, Metric::Euclidean, &store, &arena, &roots).unwrap();

        let mapped = MappedIndex::open(&path, 2, Metric::Euclidean).unwrap();
        assert_eq!(mapped.item_count(), 3);
        assert_eq!(mapped.tree_count(), 1);
        assert_eq!(mapped.roots(), &[2]);
        assert_eq!(mapped.get(1).unwrap(), &[1.0, 0.0]);

        match mapped.node(2) {
            NodeView::Split {
                normal,
                offset,
                left,
                right,
            } => {
                assert_eq!(normal, &[1.0, 0.0]);
                assert_eq!(offset, -0.5);
                assert_eq!(left, 0);
                assert_eq!(right, 1);
            }
            NodeView::Leaf { .. } => panic!("expected split"),
        }
        match mapped.node(0) {
            NodeView::Leaf { items } => assert_eq!(items, &[0, 2]),
            NodeView::Split { .. } => panic!("expected leaf"),
        }

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_no_tmp_file_left_behind() {
        let path = temp_index_path();
        let (store, arena, roots) = sample_forest();

        write_index(&path, Metric::Angular, &store, &arena, &roots).unwrap();
        assert!(path.exists());
        assert!(!tmp_path(&path).unwrap().exists());

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_open_rejects_dimension_mismatch() {
        let path = temp_index_path();
        let (store, arena, roots) = sample_forest();
        write_index(&path, Metric::Euclidean, &store, &arena, &roots).unwrap();

        let result = MappedIndex::open(&path, 3, Metric::Euclidean);
        assert!(matches!(result, Err(Error::FormatMismatch(_))));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_open_rejects_metric_mismatch() {
        let path = temp_index_path();
        let (store, arena, roots) = sample_forest();
        write_index(&path, Metric::Euclidean, &store, &arena, &roots).unwrap();

        let result = MappedIndex::open(&path, 2, Metric::Angular);
        assert!(matches!(result, Err(Error::FormatMismatch(_))));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_open_rejects_truncated_file() {
        let path = temp_index_path();
        let (store, arena, roots) = sample_forest();
        write_index(&path, Metric::Euclidean, &store, &arena, &roots).unwrap();

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        let result = MappedIndex::open(&path, 2, Metric::Euclidean);
        assert!(matches!(result, Err(Error::FormatMismatch(_))));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_open_rejects_garbage() {
        let path = temp_index_path();
        fs::write(&path, b"definitely not an index file").unwrap();

        let result = MappedIndex::open(&path, 2, Metric::Euclidean);
        assert!(matches!(result, Err(Error::FormatMismatch(_))));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_open_missing_file_is_io_error() {
        let path = temp_index_path();
        let result = MappedIndex::open(&path, 2, Metric::Euclidean);
        assert!(matches!(result, Err(Error::IoError(_))));
    }

    #[test]
    fn test_write_raw_round_trip() {
        let path = temp_index_path();
        let (store, arena, roots) = sample_forest();
        write_index(&path, Metric::Euclidean, &store, &arena, &roots).unwrap();

        let mapped = MappedIndex::open(&path, 2, Metric::Euclidean).unwrap();
        let copy_path = temp_index_path();
        write_raw(&copy_path, mapped.as_bytes()).unwrap();

        let copy = MappedIndex::open(&copy_path, 2, Metric::Euclidean).unwrap();
        assert_eq!(copy.item_count(), 3);
        assert_eq!(copy.as_bytes(), mapped.as_bytes());

        fs::remove_file(&path).unwrap();
        fs::remove_file(&copy_path).unwrap();
    }
}
