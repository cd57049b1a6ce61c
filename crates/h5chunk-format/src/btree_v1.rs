//! Version 1 B-tree chunk index (node type 1), used by layout messages
//! version 1 to 3.
//!
//! Each node stores `entries + 1` keys interleaved with `entries` child
//! addresses. A chunk key holds the stored chunk size, its filter mask and
//! the chunk's element offset in every dimension plus a trailing element-size
//! dimension. Child `i` covers chunks from key `i` up to but excluding key
//! `i + 1`.

use std::cmp::Ordering;

use log::debug;

use crate::chunk_index::{Arena, ChunkDescriptor, IndexSettings};
use crate::error::FormatError;
use crate::field::{FieldReader, UNDEFINED_ADDRESS};
use crate::io::ByteSource;

const SIGNATURE: &[u8; 4] = b"TREE";
const RAW_DATA_NODE: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ChunkKey {
    stored_size: u32,
    filter_mask: u32,
    /// Scaled coordinate, including the trailing element dimension.
    scaled: Vec<u64>,
}

#[derive(Debug, Clone)]
struct Node {
    level: u8,
    keys: Vec<ChunkKey>,
    children: Vec<u64>,
}

/// Version 1 B-tree index state for one dataset handle.
#[derive(Debug)]
pub struct BTreeV1Index {
    settings: IndexSettings,
    root: u64,
    nodes: Arena<Node>,
}

impl BTreeV1Index {
    pub(crate) fn new(settings: IndexSettings, root: u64) -> Self {
        Self {
            settings,
            root,
            nodes: Arena::default(),
        }
    }

    pub(crate) fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub(crate) fn decoded_structures(&self) -> usize {
        self.nodes.decoded()
    }

    pub(crate) fn lookup<S: ByteSource + ?Sized>(
        &mut self,
        source: &S,
        scaled: &[u64],
    ) -> Result<ChunkDescriptor, FormatError> {
        if self.root == UNDEFINED_ADDRESS {
            return Ok(ChunkDescriptor::UNDEFINED);
        }
        let mut target = scaled.to_vec();
        target.push(0);

        let mut address = self.root;
        let mut parent_level: Option<u8> = None;
        loop {
            let settings = &self.settings;
            let node = self
                .nodes
                .fetch_or_create(address, || read_node(source, address, settings))?;
            if parent_level.is_some_and(|p| node.level.checked_add(1) != Some(p)) {
                return Err(FormatError::corrupt(
                    "v1 B-tree node",
                    format!("level {} below a level {:?} node", node.level, parent_level),
                ));
            }
            let Some(slot) = find_child(&node.keys, &target) else {
                return Ok(ChunkDescriptor::UNDEFINED);
            };
            if node.level > 0 {
                parent_level = Some(node.level);
                address = node.children[slot];
                continue;
            }
            let key = &node.keys[slot];
            if key.scaled != target {
                return Ok(ChunkDescriptor::UNDEFINED);
            }
            return Ok(ChunkDescriptor {
                address: node.children[slot],
                stored_size: key.stored_size as u64,
                filter_mask: key.filter_mask,
            });
        }
    }
}

/// Three-way comparison of `target` against the span `[left, right)`.
fn compare_span(left: &[u64], target: &[u64], right: &[u64]) -> Ordering {
    if target.len() == 2 {
        // Rank-1 datasets: only the chunk offset is checked against the left key.
        if target[0] > right[0] || (target[0] == right[0] && target[1] >= right[1]) {
            Ordering::Greater
        } else if target[0] < left[0] {
            Ordering::Less
        } else {
            Ordering::Equal
        }
    } else if target >= right {
        Ordering::Greater
    } else if target < left {
        Ordering::Less
    } else {
        Ordering::Equal
    }
}

/// Binary search for the child whose span holds `target`.
fn find_child(keys: &[ChunkKey], target: &[u64]) -> Option<usize> {
    let children = keys.len().checked_sub(1)?;
    let (mut lo, mut hi) = (0usize, children);
    while lo < hi {
        let mid = (lo + hi) / 2;
        match compare_span(&keys[mid].scaled, target, &keys[mid + 1].scaled) {
            Ordering::Less => hi = mid,
            Ordering::Greater => lo = mid + 1,
            Ordering::Equal => return Some(mid),
        }
    }
    None
}

fn read_node<S: ByteSource + ?Sized>(
    source: &S,
    address: u64,
    settings: &IndexSettings,
) -> Result<Node, FormatError> {
    let ctx = &settings.file;
    let os = ctx.offset_size() as usize;
    let prefix = 8 + 2 * os;
    let head = source.read_vec(address, prefix)?;
    let mut r = FieldReader::new(&head);
    r.signature(SIGNATURE, "v1 B-tree node")?;
    let node_type = r.u8()?;
    if node_type != RAW_DATA_NODE {
        return Err(FormatError::corrupt(
            "v1 B-tree node",
            format!("node type {node_type} in a chunk index"),
        ));
    }
    let level = r.u8()?;
    let entries = r.u16()? as usize;

    let rank = settings.chunk_dims.len();
    let key_size = 8 + 8 * (rank + 1);
    let body_len = (entries + 1) * key_size + entries * os;
    let image = source.read_vec(address + prefix as u64, body_len)?;
    let mut r = FieldReader::new(&image);

    let mut divisors = settings.chunk_dims.clone();
    divisors.push(settings.element_size.max(1) as u64);
    let read_key = |r: &mut FieldReader<'_>| -> Result<ChunkKey, FormatError> {
        let stored_size = r.u32()?;
        let filter_mask = r.u32()?;
        let scaled = divisors
            .iter()
            .map(|&d| r.u64().map(|offset| offset / d))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ChunkKey {
            stored_size,
            filter_mask,
            scaled,
        })
    };

    let mut keys = Vec::with_capacity(entries + 1);
    let mut children = Vec::with_capacity(entries);
    for _ in 0..entries {
        keys.push(read_key(&mut r)?);
        children.push(r.address(ctx)?);
    }
    keys.push(read_key(&mut r)?);
    debug!("v1 B-tree node at {address:#x}: level {level}, {entries} entries");
    Ok(Node {
        level,
        keys,
        children,
    })
}
