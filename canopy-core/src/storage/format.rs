//! On-disk index format.
//!
//! All integers and floats are little-endian. The file is one header
//! followed by three flat arrays:
//!
//! ```text
//! [header: 48 bytes]
//! [roots:   tree_count x u32]
//! [vectors: item_count x dimension x f32]
//! [nodes:   node_count x node_stride]
//! ```
//!
//! Every node record has the same stride so that record `i` lives at
//! `nodes_offset + i * stride`:
//!
//! ```text
//! [tag: u32][a: u32][b: u32][c: f32][payload: max(dimension, 8) x 4 bytes]
//! ```
//!
//! For a leaf, `a` is the item count and the payload holds item ids as u32;
//! for a split, `a`/`b` are the child refs, `c` is the hyperplane offset and
//! the payload holds the normal as f32. Leaves borrow the space a split
//! normal would occupy, which is why the leaf capacity is tied to the
//! dimension.
//!
//! The mapped reader hands out slices straight into the file, so the format
//! assumes a little-endian host (the arrays are written in one pass with the
//! same layout the reader casts to).

use crate::arena::{leaf_capacity, Node, NodeView};
use crate::distance::Metric;
use crate::error::{Error, Result};

pub(crate) const MAGIC: u32 = u32::from_le_bytes(*b"CNPY");
pub(crate) const VERSION: u32 = 1;
pub(crate) const HEADER_LEN: usize = 48;

pub(crate) const TAG_LEAF: u32 = 0;
pub(crate) const TAG_SPLIT: u32 = 1;

/// Fixed-size prefix of every node record: tag, a, b, c.
pub(crate) const NODE_FIXED_LEN: usize = 16;

/// Byte stride of a node record for the given dimension.
#[inline]
pub(crate) fn node_stride(dimension: usize) -> usize {
    NODE_FIXED_LEN + 4 * leaf_capacity(dimension)
}

fn metric_code(metric: Metric) -> u32 {
    match metric {
        Metric::Angular => 0,
        Metric::Euclidean => 1,
    }
}

fn metric_from_code(code: u32) -> Result<Metric> {
    match code {
        0 => Ok(Metric::Angular),
        1 => Ok(Metric::Euclidean),
        other => Err(Error::FormatMismatch(format!(
            "unknown metric code: {other}"
        ))),
    }
}

/// Decoded file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub metric: Metric,
    pub dimension: u32,
    pub item_count: u64,
    pub node_count: u64,
    pub tree_count: u32,
    pub roots_crc: u32,
}

impl Header {
    pub(crate) fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&metric_code(self.metric).to_le_bytes());
        buf[12..16].copy_from_slice(&self.dimension.to_le_bytes());
        buf[16..24].copy_from_slice(&self.item_count.to_le_bytes());
        buf[24..32].copy_from_slice(&self.node_count.to_le_bytes());
        buf[32..36].copy_from_slice(&self.tree_count.to_le_bytes());
        buf[36..40].copy_from_slice(&self.roots_crc.to_le_bytes());
        // buf[40..48] reserved, zero
        buf
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::FormatMismatch("file too small for header".into()));
        }
        let magic = read_u32(bytes, 0);
        if magic != MAGIC {
            return Err(Error::FormatMismatch("bad magic, not a canopy index".into()));
        }
        let version = read_u32(bytes, 4);
        if version != VERSION {
            return Err(Error::FormatMismatch(format!(
                "unsupported format version: {version}"
            )));
        }
        Ok(Self {
            metric: metric_from_code(read_u32(bytes, 8))?,
            dimension: read_u32(bytes, 12),
            item_count: read_u64(bytes, 16),
            node_count: read_u64(bytes, 24),
            tree_count: read_u32(bytes, 32),
            roots_crc: read_u32(bytes, 36),
        })
    }
}

#[inline]
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

#[inline]
fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())
}

/// Appends the fixed-stride record for `node` to `out`.
pub(crate) fn encode_node(node: &Node, dimension: usize, out: &mut Vec<u8>) {
    let slots = leaf_capacity(dimension);
    match node {
        Node::Leaf { items } => {
            debug_assert!(items.len() <= slots);
            out.extend_from_slice(&TAG_LEAF.to_le_bytes());
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&0f32.to_le_bytes());
            for &id in items {
                out.extend_from_slice(&id.to_le_bytes());
            }
            for _ in items.len()..slots {
                out.extend_from_slice(&0u32.to_le_bytes());
            }
        }
        Node::Split {
            normal,
            offset,
            left,
            right,
        } => {
            debug_assert_eq!(normal.len(), dimension);
            out.extend_from_slice(&TAG_SPLIT.to_le_bytes());
            out.extend_from_slice(&left.to_le_bytes());
            out.extend_from_slice(&right.to_le_bytes());
            out.extend_from_slice(&offset.to_le_bytes());
            for &x in normal {
                out.extend_from_slice(&x.to_le_bytes());
            }
            for _ in normal.len()..slots {
                out.extend_from_slice(&0u32.to_le_bytes());
            }
        }
    }
}

/// Borrows a node view out of one fixed-stride record.
///
/// `record` must be exactly one stride long, 4-byte aligned, and previously
/// validated (see [`validate_node_record`]).
pub(crate) fn view_node(record: &[u8], dimension: usize) -> NodeView<'_> {
    let tag = read_u32(record, 0);
    let a = read_u32(record, 4);
    let b = read_u32(record, 8);
    let c = f32::from_le_bytes(record[12..16].try_into().unwrap());
    let payload = &record[NODE_FIXED_LEN..];

    if tag == TAG_LEAF {
        let items: &[u32] = bytemuck::cast_slice(payload);
        NodeView::Leaf {
            items: &items[..a as usize],
        }
    } else {
        let normal: &[f32] = bytemuck::cast_slice(payload);
        NodeView::Split {
            normal: &normal[..dimension],
            offset: c,
            left: a,
            right: b,
        }
    }
}

/// Checks one record's invariants: a known tag, a leaf count within the
/// payload and the item-id range, and split children strictly before the
/// record itself (records are written children-first, so this also rules
/// out cycles).
pub(crate) fn validate_node_record(
    record: &[u8],
    index: u64,
    dimension: usize,
    item_count: u64,
) -> Result<()> {
    let tag = read_u32(record, 0);
    let a = read_u32(record, 4);
    let b = read_u32(record, 8);
    let slots = leaf_capacity(dimension);

    match tag {
        TAG_LEAF => {
            if a as usize > slots {
                return Err(Error::FormatMismatch(format!(
                    "leaf {index} count {a} exceeds capacity {slots}"
                )));
            }
            let items: &[u32] = bytemuck::cast_slice(&record[NODE_FIXED_LEN..]);
            for &id in &items[..a as usize] {
                if id as u64 >= item_count {
                    return Err(Error::FormatMismatch(format!(
                        "leaf {index} references unknown item {id}"
                    )));
                }
            }
        }
        TAG_SPLIT => {
            if a as u64 >= index || b as u64 >= index {
                return Err(Error::FormatMismatch(format!(
                    "split {index} has forward child reference"
                )));
            }
        }
        other => {
            return Err(Error::FormatMismatch(format!(
                "node {index} has unknown tag {other}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Copies record bytes into a u32-backed buffer so the slice handed to
    /// `view_node`/`validate_node_record` is 4-byte aligned, as mmap-backed
    /// records always are.
    fn aligned(bytes: &[u8]) -> Vec<u32> {
        assert_eq!(bytes.len() % 4, 0);
        let mut out = vec![0u32; bytes.len() / 4];
        bytemuck::cast_slice_mut::<u32, u8>(&mut out).copy_from_slice(bytes);
        out
    }

    #[test]
    fn test_header_round_trip() {
        let header = Header {
            metric: Metric::Euclidean,
            dimension: 64,
            item_count: 1000,
            node_count: 321,
            tree_count: 10,
            roots_crc: 0xDEADBEEF,
        };
        let bytes = header.encode();
        assert_eq!(Header::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut bytes = Header {
            metric: Metric::Angular,
            dimension: 2,
            item_count: 0,
            node_count: 0,
            tree_count: 0,
            roots_crc: 0,
        }
        .encode();
        bytes[0] = b'X';
        assert!(matches!(
            Header::decode(&bytes),
            Err(Error::FormatMismatch(_))
        ));
    }

    #[test]
    fn test_header_rejects_future_version() {
        let mut bytes = Header {
            metric: Metric::Angular,
            dimension: 2,
            item_count: 0,
            node_count: 0,
            tree_count: 0,
            roots_crc: 0,
        }
        .encode();
        bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(
            Header::decode(&bytes),
            Err(Error::FormatMismatch(_))
        ));
    }

    #[test]
    fn test_leaf_record_round_trip() {
        let node = Node::Leaf {
            items: vec![3, 1, 4, 1, 5],
        };
        let dimension = 16;
        let mut buf = Vec::new();
        encode_node(&node, dimension, &mut buf);
        assert_eq!(buf.len(), node_stride(dimension));

        let record = aligned(&buf);
        let record: &[u8] = bytemuck::cast_slice(&record);
        validate_node_record(record, 0, dimension, 10).unwrap();
        match view_node(record, dimension) {
            NodeView::Leaf { items } => assert_eq!(items, &[3, 1, 4, 1, 5]),
            NodeView::Split { .. } => panic!("expected leaf"),
        }
    }

    #[test]
    fn test_split_record_round_trip() {
        let node = Node::Split {
            normal: vec![0.5, -1.5, 2.0],
            offset: -0.25,
            left: 7,
            right: 9,
        };
        let dimension = 3;
        let mut buf = Vec::new();
        encode_node(&node, dimension, &mut buf);
        assert_eq!(buf.len(), node_stride(dimension));

        let record = aligned(&buf);
        let record: &[u8] = bytemuck::cast_slice(&record);
        validate_node_record(record, 10, dimension, 100).unwrap();
        match view_node(record, dimension) {
            NodeView::Split {
                normal,
                offset,
                left,
                right,
            } => {
                assert_eq!(normal, &[0.5, -1.5, 2.0]);
                assert_eq!(offset, -0.25);
                assert_eq!(left, 7);
                assert_eq!(right, 9);
            }
            NodeView::Leaf { .. } => panic!("expected split"),
        }
    }

    #[test]
    fn test_validate_rejects_forward_reference() {
        let node = Node::Split {
            normal: vec![1.0, 0.0],
            offset: 0.0,
            left: 5,
            right: 2,
        };
        let mut buf = Vec::new();
        encode_node(&node, 2, &mut buf);
        let record = aligned(&buf);

        // Record index 3 cannot reference child 5.
        assert!(matches!(
            validate_node_record(bytemuck::cast_slice(&record), 3, 2, 100),
            Err(Error::FormatMismatch(_))
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_item() {
        let node = Node::Leaf { items: vec![42] };
        let mut buf = Vec::new();
        encode_node(&node, 2, &mut buf);
        let record = aligned(&buf);

        assert!(matches!(
            validate_node_record(bytemuck::cast_slice(&record), 0, 2, 10),
            Err(Error::FormatMismatch(_))
        ));
    }

    #[test]
    fn test_node_stride_floor() {
        // Small dimensions still reserve the minimum payload slots.
        assert_eq!(node_stride(2), NODE_FIXED_LEN + 4 * 8);
        assert_eq!(node_stride(128), NODE_FIXED_LEN + 4 * 128);
    }
}
