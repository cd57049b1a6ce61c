//! Version 2 B-tree chunk index (layout index type 5).
//!
//! Records are type 10 (unfiltered: address, scaled coordinate) or type 11
//! (filtered: address, stored size, filter mask, scaled coordinate) and are
//! ordered lexicographically by scaled coordinate. Internal nodes interleave
//! records with child pointers whose field widths depend on how many records
//! a subtree of that depth can hold.

use std::cmp::Ordering;

use log::debug;

use crate::chunk_index::{Arena, ChunkDescriptor, IndexSettings};
use crate::error::FormatError;
use crate::field::{FieldReader, UNDEFINED_ADDRESS, verify_checksum};
use crate::io::ByteSource;

const RECORD_UNFILTERED: u8 = 10;
const RECORD_FILTERED: u8 = 11;
/// Signature, version, type and checksum.
const NODE_OVERHEAD: u64 = 10;

/// Per-depth node capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NodeCapacity {
    /// Records a node at this depth holds.
    pub(crate) max_records: u64,
    /// Records a subtree rooted at this depth holds.
    pub(crate) total_records: u64,
    /// Bytes encoding `total_records`.
    pub(crate) total_size: usize,
    /// Bytes of one child pointer in a node at this depth (0 for leaves).
    pub(crate) pointer_size: usize,
}

/// Bytes needed to store counts up to `limit`.
fn limit_size(limit: u64) -> usize {
    (limit.max(1).ilog2() / 8 + 1) as usize
}

/// Node capacities for depths `0..=depth`.
pub(crate) fn capacities(
    node_size: u32,
    record_size: usize,
    depth: u16,
    offset_size: usize,
) -> Result<Vec<NodeCapacity>, FormatError> {
    let node_size = node_size as u64;
    let record = record_size as u64;
    let too_small = || {
        FormatError::corrupt(
            "v2 B-tree header",
            format!("{node_size}-byte nodes cannot hold {record_size}-byte records"),
        )
    };
    if record == 0 {
        return Err(too_small());
    }
    let leaf = node_size.checked_sub(NODE_OVERHEAD).ok_or_else(too_small)? / record;
    if leaf == 0 {
        return Err(too_small());
    }
    let count_size = limit_size(leaf);
    let mut caps = vec![NodeCapacity {
        max_records: leaf,
        total_records: leaf,
        total_size: 0,
        pointer_size: 0,
    }];
    for d in 1..=depth as usize {
        let below = caps[d - 1];
        let pointer = offset_size + count_size + if d > 1 { below.total_size } else { 0 };
        let max_records = node_size
            .checked_sub(NODE_OVERHEAD + pointer as u64)
            .ok_or_else(too_small)?
            / (record + pointer as u64);
        if max_records == 0 {
            return Err(too_small());
        }
        let total_records = (max_records + 1)
            .saturating_mul(below.total_records)
            .saturating_add(max_records);
        caps.push(NodeCapacity {
            max_records,
            total_records,
            total_size: limit_size(total_records),
            pointer_size: pointer,
        });
    }
    Ok(caps)
}

#[derive(Debug, Clone)]
struct Header {
    record_type: u8,
    record_size: usize,
    depth: u16,
    root: u64,
    root_records: u64,
    /// Width of a child pointer's record count.
    count_size: usize,
    capacity: Vec<NodeCapacity>,
}

#[derive(Debug, Clone)]
struct Record {
    scaled: Vec<u64>,
    descriptor: ChunkDescriptor,
}

#[derive(Debug, Clone, Copy)]
struct Child {
    address: u64,
    records: u64,
}

#[derive(Debug, Clone)]
struct Node {
    records: Vec<Record>,
    children: Vec<Child>,
}

/// Version 2 B-tree index state for one dataset handle.
#[derive(Debug)]
pub struct BTreeV2Index {
    settings: IndexSettings,
    address: u64,
    header: Option<Header>,
    nodes: Arena<Node>,
}

impl BTreeV2Index {
    pub(crate) fn new(settings: IndexSettings, address: u64) -> Self {
        Self {
            settings,
            address,
            header: None,
            nodes: Arena::default(),
        }
    }

    pub(crate) fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub(crate) fn decoded_structures(&self) -> usize {
        self.header.is_some() as usize + self.nodes.decoded()
    }

    pub(crate) fn lookup<S: ByteSource + ?Sized>(
        &mut self,
        source: &S,
        scaled: &[u64],
    ) -> Result<ChunkDescriptor, FormatError> {
        if self.address == UNDEFINED_ADDRESS {
            return Ok(ChunkDescriptor::UNDEFINED);
        }
        if self.header.is_none() {
            self.header = Some(read_header(source, self.address, &self.settings)?);
        }
        let Some(header) = self.header.as_ref() else {
            return Ok(ChunkDescriptor::UNDEFINED);
        };
        if header.root == UNDEFINED_ADDRESS || header.root_records == 0 {
            return Ok(ChunkDescriptor::UNDEFINED);
        }

        let settings = &self.settings;
        let (mut address, mut records, mut depth) = (header.root, header.root_records, header.depth);
        loop {
            let node = self
                .nodes
                .fetch_or_create(address, || read_node(source, header, address, records, depth, settings))?;
            let (slot, ord) = locate(&node.records, scaled);
            if ord == Ordering::Equal {
                return Ok(node.records[slot].descriptor);
            }
            if depth == 0 {
                return Ok(ChunkDescriptor::UNDEFINED);
            }
            let slot = if ord == Ordering::Greater { slot + 1 } else { slot };
            let Some(child) = node.children.get(slot).copied() else {
                return Ok(ChunkDescriptor::UNDEFINED);
            };
            if child.address == UNDEFINED_ADDRESS {
                return Ok(ChunkDescriptor::UNDEFINED);
            }
            address = child.address;
            records = child.records;
            depth -= 1;
        }
    }
}

/// Binary search; returns the last probed slot and how `target` compared to it.
fn locate(records: &[Record], target: &[u64]) -> (usize, Ordering) {
    let (mut lo, mut hi) = (0usize, records.len());
    let (mut slot, mut ord) = (0usize, Ordering::Less);
    while lo < hi && ord != Ordering::Equal {
        slot = (lo + hi) / 2;
        ord = target.cmp(&records[slot].scaled[..]);
        if ord == Ordering::Less {
            hi = slot;
        } else {
            lo = slot + 1;
        }
    }
    (slot, ord)
}

fn read_header<S: ByteSource + ?Sized>(
    source: &S,
    address: u64,
    settings: &IndexSettings,
) -> Result<Header, FormatError> {
    let ctx = &settings.file;
    let os = ctx.offset_size() as usize;
    let len = 16 + os + 2 + ctx.length_size() as usize + 4;
    let image = source.read_vec(address, len)?;
    let mut r = FieldReader::new(&image);
    r.signature(b"BTHD", "v2 B-tree header")?;
    r.version(0, "v2 B-tree header")?;
    let record_type = r.u8()?;
    let expected = if settings.filtered { RECORD_FILTERED } else { RECORD_UNFILTERED };
    if record_type != expected {
        return Err(FormatError::corrupt(
            "v2 B-tree header",
            format!("record type {record_type}, expected {expected}"),
        ));
    }
    let node_size = r.u32()?;
    let record_size = r.u16()? as usize;
    let depth = r.u16()?;
    let _split = r.u8()?;
    let _merge = r.u8()?;
    let root = r.address(ctx)?;
    let root_records = r.u16()? as u64;
    let total = r.length(ctx)?;
    if settings.verify_checksums {
        verify_checksum(&image, r.position(), "v2 B-tree header", address)?;
    }

    let coords = 8 * settings.chunk_dims.len();
    let fixed = os + coords + if settings.filtered { 4 } else { 0 };
    let size_ok = if settings.filtered {
        record_size > fixed && record_size <= fixed + 8
    } else {
        record_size == fixed
    };
    if !size_ok {
        return Err(FormatError::corrupt(
            "v2 B-tree header",
            format!("{record_size}-byte type {record_type} records for rank {}", settings.chunk_dims.len()),
        ));
    }
    let capacity = capacities(node_size, record_size, depth, os)?;
    debug!(
        "v2 B-tree header at {address:#x}: depth {depth}, {total} records, {} per leaf",
        capacity[0].max_records
    );
    Ok(Header {
        record_type,
        record_size,
        depth,
        root,
        root_records,
        count_size: limit_size(capacity[0].max_records),
        capacity,
    })
}

fn read_record(r: &mut FieldReader<'_>, header: &Header, settings: &IndexSettings) -> Result<Record, FormatError> {
    let rank = settings.chunk_dims.len();
    let os = settings.offset_size();
    let address = r.address(&settings.file)?;
    let descriptor = if header.record_type == RECORD_FILTERED {
        let stored_size = r.uint(header.record_size - os - 4 - 8 * rank)?;
        let filter_mask = r.u32()?;
        if address == UNDEFINED_ADDRESS {
            ChunkDescriptor::UNDEFINED
        } else {
            ChunkDescriptor {
                address,
                stored_size,
                filter_mask,
            }
        }
    } else {
        settings.plain(address)
    };
    let scaled = (0..rank).map(|_| r.u64()).collect::<Result<Vec<_>, _>>()?;
    Ok(Record { scaled, descriptor })
}

fn read_node<S: ByteSource + ?Sized>(
    source: &S,
    header: &Header,
    address: u64,
    records: u64,
    depth: u16,
    settings: &IndexSettings,
) -> Result<Node, FormatError> {
    let cap = header
        .capacity
        .get(depth as usize)
        .copied()
        .ok_or_else(|| FormatError::corrupt("v2 B-tree node", format!("depth {depth} beyond the tree")))?;
    if records > cap.max_records {
        return Err(FormatError::corrupt(
            "v2 B-tree node",
            format!("{records} records, at most {} fit", cap.max_records),
        ));
    }
    let n = records as usize;
    let (signature, structure) = if depth == 0 {
        (b"BTLF", "v2 B-tree leaf node")
    } else {
        (b"BTIN", "v2 B-tree internal node")
    };
    let children = if depth == 0 { 0 } else { n + 1 };
    let len = 6 + n * header.record_size + children * cap.pointer_size + 4;
    let image = source.read_vec(address, len)?;
    let mut r = FieldReader::new(&image);
    r.signature(signature, structure)?;
    r.version(0, structure)?;
    let record_type = r.u8()?;
    if record_type != header.record_type {
        return Err(FormatError::corrupt(
            structure,
            format!("record type {record_type} in a type {} tree", header.record_type),
        ));
    }
    let records = (0..n)
        .map(|_| read_record(&mut r, header, settings))
        .collect::<Result<Vec<_>, _>>()?;
    let total_size = if depth > 1 {
        header.capacity[depth as usize - 1].total_size
    } else {
        0
    };
    let children = (0..children)
        .map(|_| {
            let address = r.address(&settings.file)?;
            let records = r.uint(header.count_size)?;
            if total_size > 0 {
                r.uint(total_size)?;
            }
            Ok(Child { address, records })
        })
        .collect::<Result<Vec<_>, FormatError>>()?;
    if settings.verify_checksums {
        verify_checksum(&image, r.position(), structure, address)?;
    }
    debug!("{structure} at {address:#x}: {n} records");
    Ok(Node { records, children })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_index::ChunkIndex;
    use crate::coords::{ScaledGeometry, UNLIMITED};
    use crate::data_layout::{ChunkIndexParams, ChunkedLayout};
    use crate::field::put_checksum;
    use crate::io::{FileContext, SliceSource};

    /// Record size of an unfiltered rank-2 tree.
    const REC: usize = 8 + 16;
    /// Three records per leaf, one per internal node.
    const NODE_SIZE: u32 = 10 + 3 * REC as u32;

    fn addr_of(r: u64, c: u64) -> u64 {
        0x8000 + 0x40 * (r * 10 + c)
    }

    fn record(r: u64, c: u64) -> Vec<u8> {
        let mut b = addr_of(r, c).to_le_bytes().to_vec();
        b.extend_from_slice(&r.to_le_bytes());
        b.extend_from_slice(&c.to_le_bytes());
        b
    }

    fn leaf(records: &[(u64, u64)]) -> Vec<u8> {
        let mut b = b"BTLF".to_vec();
        b.extend_from_slice(&[0, RECORD_UNFILTERED]);
        for &(r, c) in records {
            b.extend_from_slice(&record(r, c));
        }
        put_checksum(&mut b);
        b
    }

    fn header(record_type: u8, record_size: u16, depth: u16, root: u64, root_records: u16, total: u64) -> Vec<u8> {
        let mut b = b"BTHD".to_vec();
        b.extend_from_slice(&[0, record_type]);
        b.extend_from_slice(&NODE_SIZE.to_le_bytes());
        b.extend_from_slice(&record_size.to_le_bytes());
        b.extend_from_slice(&depth.to_le_bytes());
        b.extend_from_slice(&[100, 40]);
        b.extend_from_slice(&root.to_le_bytes());
        b.extend_from_slice(&root_records.to_le_bytes());
        b.extend_from_slice(&total.to_le_bytes());
        put_checksum(&mut b);
        b
    }

    fn place(file: &mut Vec<u8>, bytes: &[u8]) -> u64 {
        let at = file.len() as u64;
        file.extend_from_slice(bytes);
        at
    }

    fn open(filtered: bool, address: u64) -> ChunkIndex {
        let layout = ChunkedLayout {
            version: 4,
            flags: 0,
            chunk_dims: vec![4, 4],
            element_size: 2,
            index: ChunkIndexParams::BTreeV2 {
                node_size: NODE_SIZE,
                split_percent: 100,
                merge_percent: 40,
            },
            address,
        };
        let g = ScaledGeometry::new(&[40, 40], &[UNLIMITED, UNLIMITED], &[4, 4], 2).unwrap();
        ChunkIndex::from_layout(&layout, g, FileContext::default(), filtered, true).unwrap()
    }

    /// Depth-1 tree: leaf {(0,0),(0,3),(1,1)}, root record (2,0), leaf {(2,5),(3,3)}.
    fn depth_one_file() -> (Vec<u8>, u64) {
        let mut file = vec![0u8; 8];
        let left = place(&mut file, &leaf(&[(0, 0), (0, 3), (1, 1)]));
        let right = place(&mut file, &leaf(&[(2, 5), (3, 3)]));

        let mut root = b"BTIN".to_vec();
        root.extend_from_slice(&[0, RECORD_UNFILTERED]);
        root.extend_from_slice(&record(2, 0));
        for (child, n) in [(left, 3u8), (right, 2)] {
            root.extend_from_slice(&child.to_le_bytes());
            root.push(n);
        }
        put_checksum(&mut root);
        let root = place(&mut file, &root);
        let hdr = place(&mut file, &header(RECORD_UNFILTERED, REC as u16, 1, root, 1, 6));
        (file, hdr)
    }

    #[test]
    fn capacity_recurrence() {
        let caps = capacities(2048, 24, 2, 8).unwrap();
        let max: Vec<_> = caps.iter().map(|c| c.max_records).collect();
        assert_eq!(max, vec![84, 61, 57]);
        assert_eq!(caps[1].pointer_size, 9);
        assert_eq!(caps[1].total_records, 62 * 84 + 61);
        assert_eq!(caps[1].total_size, 2);
        assert_eq!(caps[2].pointer_size, 11);
        assert_eq!(caps[2].total_size, 3);

        let caps = capacities(NODE_SIZE, REC, 1, 8).unwrap();
        assert_eq!(caps[0].max_records, 3);
        assert_eq!(caps[1].max_records, 1);
        assert!(capacities(12, 24, 0, 8).is_err());
    }

    #[test]
    fn depth_one_lookup() {
        let (file, hdr) = depth_one_file();
        let src = SliceSource::new(file);
        let mut idx = open(false, hdr);
        for (r, c) in [(0, 0), (0, 3), (1, 1), (2, 0), (2, 5), (3, 3)] {
            let d = idx.lookup(&src, &[r, c]).unwrap();
            assert_eq!(d, ChunkDescriptor { address: addr_of(r, c), stored_size: 32, filter_mask: 0 });
        }
        for (r, c) in [(0, 1), (1, 9), (2, 1), (9, 9)] {
            assert!(!idx.lookup(&src, &[r, c]).unwrap().is_allocated(), "({r}, {c})");
        }
        // Header, root and both leaves.
        assert_eq!(idx.decoded_structures(), 4);
    }

    #[test]
    fn filtered_leaf_root() {
        let mut leaf = b"BTLF".to_vec();
        leaf.extend_from_slice(&[0, RECORD_FILTERED]);
        for (r, c, size) in [(0u64, 0u64, 300u16), (5, 5, 17)] {
            leaf.extend_from_slice(&addr_of(r, c).to_le_bytes());
            leaf.extend_from_slice(&size.to_le_bytes());
            leaf.extend_from_slice(&(r as u32).to_le_bytes());
            leaf.extend_from_slice(&r.to_le_bytes());
            leaf.extend_from_slice(&c.to_le_bytes());
        }
        put_checksum(&mut leaf);
        let mut file = vec![0u8; 8];
        let root = place(&mut file, &leaf);
        let hdr = place(&mut file, &header(RECORD_FILTERED, (REC + 6) as u16, 0, root, 2, 2));
        let src = SliceSource::new(file);

        let mut idx = open(true, hdr);
        assert_eq!(
            idx.lookup(&src, &[5, 5]).unwrap(),
            ChunkDescriptor { address: addr_of(5, 5), stored_size: 17, filter_mask: 5 }
        );
        assert_eq!(idx.lookup(&src, &[0, 0]).unwrap().stored_size, 300);
        assert!(!idx.lookup(&src, &[4, 4]).unwrap().is_allocated());

        // The same tree opened as unfiltered is rejected.
        let err = open(false, hdr).lookup(&src, &[0, 0]).unwrap_err();
        assert!(matches!(err, FormatError::CorruptStructure { .. }));
    }

    #[test]
    fn empty_tree() {
        let mut file = vec![0u8; 8];
        let hdr = place(&mut file, &header(RECORD_UNFILTERED, REC as u16, 0, u64::MAX, 0, 0));
        let mut idx = open(false, hdr);
        assert!(!idx.lookup(&SliceSource::new(file), &[0, 0]).unwrap().is_allocated());
    }

    #[test]
    fn corrupted_leaf_checksum() {
        let (mut file, hdr) = depth_one_file();
        // First byte of the first leaf's first record.
        file[8 + 6] ^= 0x10;
        let src = SliceSource::new(file);
        let err = open(false, hdr).lookup(&src, &[0, 0]).unwrap_err();
        assert!(matches!(
            err,
            FormatError::MetadataChecksumMismatch { structure: "v2 B-tree leaf node", .. }
        ));
    }

    #[test]
    fn node_record_count_beyond_capacity() {
        let mut file = vec![0u8; 8];
        let root = place(&mut file, &leaf(&[(0, 0)]));
        let hdr = place(&mut file, &header(RECORD_UNFILTERED, REC as u16, 0, root, 9, 9));
        let err = open(false, hdr).lookup(&SliceSource::new(file), &[0, 0]).unwrap_err();
        assert!(matches!(err, FormatError::CorruptStructure { .. }));
    }
}
