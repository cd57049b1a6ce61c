//! Chunk index dispatch.
//!
//! A chunked layout names one of six index schemes. [`ChunkIndex`] is built
//! once per dataset handle from that discriminator and then answers
//! coordinate lookups. Every on-disk structure a lookup touches is decoded at
//! most once per handle and kept in an [`Arena`].

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use log::{debug, trace};

use crate::btree_v1::BTreeV1Index;
use crate::btree_v2::BTreeV2Index;
use crate::coords::{ScaledGeometry, UNLIMITED, to_linear_index};
use crate::data_layout::{ChunkIndexParams, ChunkedLayout};
use crate::error::FormatError;
use crate::extensible_array::ExtensibleArrayIndex;
use crate::field::UNDEFINED_ADDRESS;
use crate::fixed_array::FixedArrayIndex;
use crate::io::{ByteSource, FileContext};

/// Physical location of one stored chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// File address, or [`UNDEFINED_ADDRESS`] when the chunk was never written.
    pub address: u64,
    /// Bytes stored on disk (after filtering).
    pub stored_size: u64,
    /// Bit `i` set means pipeline filter `i` was not applied.
    pub filter_mask: u32,
}

impl ChunkDescriptor {
    /// Descriptor of a chunk that has no storage.
    pub const UNDEFINED: ChunkDescriptor = ChunkDescriptor {
        address: UNDEFINED_ADDRESS,
        stored_size: 0,
        filter_mask: 0,
    };

    /// Whether the chunk has storage.
    pub fn is_allocated(&self) -> bool {
        self.address != UNDEFINED_ADDRESS
    }
}

/// Fetch-or-create memo of decoded structures, keyed by file address.
#[derive(Debug)]
pub(crate) struct Arena<T> {
    items: HashMap<u64, T>,
    decoded: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
            decoded: 0,
        }
    }
}

impl<T> Arena<T> {
    /// Return the object stored under `key`, decoding it with `create` on first use.
    pub(crate) fn fetch_or_create(
        &mut self,
        key: u64,
        create: impl FnOnce() -> Result<T, FormatError>,
    ) -> Result<&T, FormatError> {
        match self.items.entry(key) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(v) => {
                let item = create()?;
                self.decoded += 1;
                Ok(v.insert(item))
            }
        }
    }

    /// How many objects were decoded so far.
    pub(crate) fn decoded(&self) -> usize {
        self.decoded
    }
}

/// Settings shared by every index variant, fixed at construction.
#[derive(Debug, Clone)]
pub(crate) struct IndexSettings {
    pub(crate) file: FileContext,
    pub(crate) geometry: ScaledGeometry,
    pub(crate) chunk_dims: Vec<u64>,
    pub(crate) element_size: u32,
    pub(crate) filtered: bool,
    pub(crate) verify_checksums: bool,
}

impl IndexSettings {
    /// Descriptor for an unfiltered chunk stored at `address`.
    pub(crate) fn plain(&self, address: u64) -> ChunkDescriptor {
        if address == UNDEFINED_ADDRESS {
            return ChunkDescriptor::UNDEFINED;
        }
        ChunkDescriptor {
            address,
            stored_size: self.geometry.chunk_bytes,
            filter_mask: 0,
        }
    }

    pub(crate) fn offset_size(&self) -> usize {
        self.file.offset_size() as usize
    }
}

/// Decoded element of a fixed or extensible array.
///
/// `entry_size` is the on-disk element width; filtered elements carry
/// `address`, a stored size filling the remaining bytes, and a 4-byte mask.
pub(crate) fn decode_array_element(
    raw: &[u8],
    settings: &IndexSettings,
) -> Result<ChunkDescriptor, FormatError> {
    let os = settings.offset_size();
    let mut r = crate::field::FieldReader::new(raw);
    let address = r.address(&settings.file)?;
    if !settings.filtered {
        return Ok(settings.plain(address));
    }
    let size_len = raw.len().checked_sub(os + 4).filter(|&n| n <= 8).ok_or_else(|| {
        FormatError::corrupt("chunk index element", format!("{}-byte filtered element", raw.len()))
    })?;
    let stored_size = r.uint(size_len)?;
    let filter_mask = r.u32()?;
    if address == UNDEFINED_ADDRESS {
        return Ok(ChunkDescriptor::UNDEFINED);
    }
    Ok(ChunkDescriptor {
        address,
        stored_size,
        filter_mask,
    })
}

/// Expected on-disk element width for array indexes.
pub(crate) fn array_element_size(settings: &IndexSettings, entry_size: u8) -> Result<usize, FormatError> {
    let os = settings.offset_size();
    let entry = entry_size as usize;
    let ok = if settings.filtered {
        entry > os + 4 && entry <= os + 4 + 8
    } else {
        entry == os
    };
    if !ok {
        return Err(FormatError::corrupt(
            "chunk index header",
            format!("element size {entry} with {os}-byte addresses"),
        ));
    }
    Ok(entry)
}

/// Byte length of `count` entries of `width` bytes.
pub(crate) fn byte_span(count: u64, width: usize, structure: &'static str) -> Result<usize, FormatError> {
    usize::try_from(count)
        .ok()
        .and_then(|c| c.checked_mul(width))
        .ok_or_else(|| FormatError::corrupt(structure, format!("{count} entries of {width} bytes")))
}

/// Test bit `index` of an MSB-first bitmap.
pub(crate) fn bit_is_set(bitmap: &[u8], index: u64) -> bool {
    let byte = (index / 8) as usize;
    bitmap
        .get(byte)
        .is_some_and(|b| b & (0x80 >> (index % 8)) != 0)
}

/// The one chunk of a dataset whose chunk covers the whole maximum extent.
#[derive(Debug, Clone)]
pub struct SingleChunkIndex {
    settings: IndexSettings,
    descriptor: ChunkDescriptor,
}

impl SingleChunkIndex {
    fn lookup(&self, scaled: &[u64]) -> Result<ChunkDescriptor, FormatError> {
        if scaled.iter().any(|&c| c != 0) {
            return Err(FormatError::InvalidCoordinate(scaled.to_vec()));
        }
        Ok(self.descriptor)
    }
}

/// Chunks preallocated back to back in scan order over the maximum extent.
#[derive(Debug, Clone)]
pub struct ImplicitIndex {
    settings: IndexSettings,
    base: u64,
}

impl ImplicitIndex {
    fn lookup(&self, scaled: &[u64]) -> ChunkDescriptor {
        if self.base == UNDEFINED_ADDRESS || !self.settings.geometry.within_max(scaled) {
            return ChunkDescriptor::UNDEFINED;
        }
        let g = &self.settings.geometry;
        let linear = to_linear_index(scaled, &g.down_max_counts);
        match linear
            .checked_mul(g.chunk_bytes)
            .and_then(|off| off.checked_add(self.base))
        {
            Some(address) => self.settings.plain(address),
            None => ChunkDescriptor::UNDEFINED,
        }
    }
}

/// Chunk index of one dataset, selected once from the layout.
#[derive(Debug)]
pub enum ChunkIndex {
    /// Layout index type 1.
    Single(SingleChunkIndex),
    /// Layout index type 2.
    Implicit(ImplicitIndex),
    /// Layout index type 3.
    FixedArray(FixedArrayIndex),
    /// Layout index type 4.
    ExtensibleArray(ExtensibleArrayIndex),
    /// Version 1 B-tree (layout versions 1 to 3).
    BTreeV1(BTreeV1Index),
    /// Layout index type 5.
    BTreeV2(BTreeV2Index),
}

impl ChunkIndex {
    /// Select and initialise the index named by `layout`.
    ///
    /// `filtered` says whether the dataset has a non-empty filter pipeline.
    pub fn from_layout(
        layout: &ChunkedLayout,
        geometry: ScaledGeometry,
        file: FileContext,
        filtered: bool,
        verify_checksums: bool,
    ) -> Result<ChunkIndex, FormatError> {
        if layout.chunk_dims.len() != geometry.rank() {
            return Err(FormatError::RankMismatch {
                expected: geometry.rank(),
                actual: layout.chunk_dims.len(),
            });
        }
        let settings = IndexSettings {
            file,
            geometry,
            chunk_dims: layout.chunk_dims.clone(),
            element_size: layout.element_size,
            filtered,
            verify_checksums,
        };
        debug!(
            "chunk index {:?} at {:#x}: scaled dims {:?}, max {:?}, {} bytes per chunk",
            layout.index,
            layout.address,
            settings.geometry.scaled_dims,
            settings.geometry.scaled_max_dims,
            settings.geometry.chunk_bytes
        );

        let index = match layout.index {
            ChunkIndexParams::SingleChunk { filtered: info } => {
                let descriptor = if layout.address == UNDEFINED_ADDRESS {
                    ChunkDescriptor::UNDEFINED
                } else {
                    match info {
                        Some((stored_size, filter_mask)) => ChunkDescriptor {
                            address: layout.address,
                            stored_size,
                            filter_mask,
                        },
                        None => settings.plain(layout.address),
                    }
                };
                ChunkIndex::Single(SingleChunkIndex { settings, descriptor })
            }
            ChunkIndexParams::Implicit => {
                if filtered {
                    return Err(FormatError::UnsupportedFeature(
                        "implicit chunk index with a filter pipeline".into(),
                    ));
                }
                if settings.geometry.scaled_max_dims.contains(&UNLIMITED) {
                    return Err(FormatError::UnsupportedFeature(
                        "implicit chunk index with unlimited dimensions".into(),
                    ));
                }
                ChunkIndex::Implicit(ImplicitIndex {
                    settings,
                    base: layout.address,
                })
            }
            ChunkIndexParams::FixedArray { .. } => {
                ChunkIndex::FixedArray(FixedArrayIndex::new(settings, layout.address)?)
            }
            ChunkIndexParams::ExtensibleArray { .. } => {
                ChunkIndex::ExtensibleArray(ExtensibleArrayIndex::new(settings, layout.address)?)
            }
            ChunkIndexParams::BTreeV1 => ChunkIndex::BTreeV1(BTreeV1Index::new(settings, layout.address)),
            ChunkIndexParams::BTreeV2 { .. } => ChunkIndex::BTreeV2(BTreeV2Index::new(settings, layout.address)),
        };
        Ok(index)
    }

    /// Short name of the index scheme.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ChunkIndex::Single(_) => "single chunk",
            ChunkIndex::Implicit(_) => "implicit",
            ChunkIndex::FixedArray(_) => "fixed array",
            ChunkIndex::ExtensibleArray(_) => "extensible array",
            ChunkIndex::BTreeV1(_) => "v1 B-tree",
            ChunkIndex::BTreeV2(_) => "v2 B-tree",
        }
    }

    /// Geometry the index was built with.
    pub fn geometry(&self) -> &ScaledGeometry {
        &self.settings().geometry
    }

    fn settings(&self) -> &IndexSettings {
        match self {
            ChunkIndex::Single(i) => &i.settings,
            ChunkIndex::Implicit(i) => &i.settings,
            ChunkIndex::FixedArray(i) => i.settings(),
            ChunkIndex::ExtensibleArray(i) => i.settings(),
            ChunkIndex::BTreeV1(i) => i.settings(),
            ChunkIndex::BTreeV2(i) => i.settings(),
        }
    }

    /// Resolve a scaled chunk coordinate.
    ///
    /// A chunk that was never written yields [`ChunkDescriptor::UNDEFINED`].
    pub fn lookup<S: ByteSource + ?Sized>(
        &mut self,
        source: &S,
        scaled: &[u64],
    ) -> Result<ChunkDescriptor, FormatError> {
        self.settings().geometry.check_rank(scaled)?;
        let found = match self {
            ChunkIndex::Single(i) => i.lookup(scaled)?,
            ChunkIndex::Implicit(i) => i.lookup(scaled),
            ChunkIndex::FixedArray(i) => i.lookup(source, scaled)?,
            ChunkIndex::ExtensibleArray(i) => i.lookup(source, scaled)?,
            ChunkIndex::BTreeV1(i) => i.lookup(source, scaled)?,
            ChunkIndex::BTreeV2(i) => i.lookup(source, scaled)?,
        };
        trace!("lookup {scaled:?} -> {found:?}");
        Ok(found)
    }

    /// Number of on-disk index structures decoded so far.
    pub fn decoded_structures(&self) -> usize {
        match self {
            ChunkIndex::Single(_) | ChunkIndex::Implicit(_) => 0,
            ChunkIndex::FixedArray(i) => i.decoded_structures(),
            ChunkIndex::ExtensibleArray(i) => i.decoded_structures(),
            ChunkIndex::BTreeV1(i) => i.decoded_structures(),
            ChunkIndex::BTreeV2(i) => i.decoded_structures(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SliceSource;

    fn layout(index: ChunkIndexParams, address: u64, chunk_dims: Vec<u64>) -> ChunkedLayout {
        ChunkedLayout {
            version: 4,
            flags: 0,
            chunk_dims,
            element_size: 4,
            index,
            address,
        }
    }

    fn empty() -> SliceSource<Vec<u8>> {
        SliceSource::new(Vec::new())
    }

    #[test]
    fn single_chunk_unfiltered_and_filtered() {
        let g = ScaledGeometry::new(&[10, 10], &[10, 10], &[10, 10], 4).unwrap();
        let l = layout(ChunkIndexParams::SingleChunk { filtered: None }, 0x800, vec![10, 10]);
        let mut idx = ChunkIndex::from_layout(&l, g.clone(), FileContext::default(), false, true).unwrap();
        let d = idx.lookup(&empty(), &[0, 0]).unwrap();
        assert_eq!(d, ChunkDescriptor { address: 0x800, stored_size: 400, filter_mask: 0 });

        let l = layout(
            ChunkIndexParams::SingleChunk { filtered: Some((123, 0b10)) },
            0x900,
            vec![10, 10],
        );
        let mut idx = ChunkIndex::from_layout(&l, g, FileContext::default(), true, true).unwrap();
        let d = idx.lookup(&empty(), &[0, 0]).unwrap();
        assert_eq!(d, ChunkDescriptor { address: 0x900, stored_size: 123, filter_mask: 0b10 });
    }

    #[test]
    fn single_chunk_rejects_other_coordinates() {
        let g = ScaledGeometry::new(&[10], &[10], &[10], 4).unwrap();
        let l = layout(ChunkIndexParams::SingleChunk { filtered: None }, 0x800, vec![10]);
        let mut idx = ChunkIndex::from_layout(&l, g, FileContext::default(), false, true).unwrap();
        assert_eq!(
            idx.lookup(&empty(), &[1]),
            Err(FormatError::InvalidCoordinate(vec![1]))
        );
        assert!(matches!(
            idx.lookup(&empty(), &[0, 0]),
            Err(FormatError::RankMismatch { expected: 1, actual: 2 })
        ));
    }

    #[test]
    fn single_chunk_unallocated() {
        let g = ScaledGeometry::new(&[10], &[10], &[10], 4).unwrap();
        let l = layout(ChunkIndexParams::SingleChunk { filtered: None }, UNDEFINED_ADDRESS, vec![10]);
        let mut idx = ChunkIndex::from_layout(&l, g, FileContext::default(), false, true).unwrap();
        assert!(!idx.lookup(&empty(), &[0]).unwrap().is_allocated());
    }

    #[test]
    fn implicit_addresses_follow_max_extent() {
        // Current extent 4x6 of a 8x6 maximum, 2x3 chunks of 4-byte elements.
        let g = ScaledGeometry::new(&[4, 6], &[8, 6], &[2, 3], 4).unwrap();
        let l = layout(ChunkIndexParams::Implicit, 0x1000, vec![2, 3]);
        let mut idx = ChunkIndex::from_layout(&l, g, FileContext::default(), false, true).unwrap();
        let src = empty();
        assert_eq!(idx.lookup(&src, &[0, 0]).unwrap().address, 0x1000);
        assert_eq!(idx.lookup(&src, &[0, 1]).unwrap().address, 0x1000 + 24);
        assert_eq!(idx.lookup(&src, &[3, 1]).unwrap().address, 0x1000 + 7 * 24);
        assert_eq!(idx.lookup(&src, &[1, 0]).unwrap().stored_size, 24);
        assert!(!idx.lookup(&src, &[4, 0]).unwrap().is_allocated());
    }

    #[test]
    fn implicit_rejects_filters_and_unlimited() {
        let g = ScaledGeometry::new(&[4], &[4], &[2], 4).unwrap();
        let l = layout(ChunkIndexParams::Implicit, 0x1000, vec![2]);
        let err = ChunkIndex::from_layout(&l, g, FileContext::default(), true, true).unwrap_err();
        assert!(matches!(err, FormatError::UnsupportedFeature(_)));

        let g = ScaledGeometry::new(&[4], &[UNLIMITED], &[2], 4).unwrap();
        let err = ChunkIndex::from_layout(&l, g, FileContext::default(), false, true).unwrap_err();
        assert!(matches!(err, FormatError::UnsupportedFeature(_)));
    }

    #[test]
    fn implicit_unallocated_base() {
        let g = ScaledGeometry::new(&[4], &[4], &[2], 4).unwrap();
        let l = layout(ChunkIndexParams::Implicit, UNDEFINED_ADDRESS, vec![2]);
        let mut idx = ChunkIndex::from_layout(&l, g, FileContext::default(), false, true).unwrap();
        assert_eq!(idx.lookup(&empty(), &[1]).unwrap(), ChunkDescriptor::UNDEFINED);
    }

    #[test]
    fn arena_decodes_once() {
        let mut arena: Arena<u32> = Arena::default();
        let mut calls = 0;
        for _ in 0..3 {
            let v = arena
                .fetch_or_create(7, || {
                    calls += 1;
                    Ok(42)
                })
                .unwrap();
            assert_eq!(*v, 42);
        }
        assert_eq!(calls, 1);
        assert_eq!(arena.decoded(), 1);
        assert!(arena.fetch_or_create(8, || Err(FormatError::Cancelled)).is_err());
        assert_eq!(arena.decoded(), 1);
    }

    #[test]
    fn msb_first_bitmap() {
        let bitmap = [0b1000_0001, 0b0100_0000];
        assert!(bit_is_set(&bitmap, 0));
        assert!(!bit_is_set(&bitmap, 1));
        assert!(bit_is_set(&bitmap, 7));
        assert!(bit_is_set(&bitmap, 9));
        assert!(!bit_is_set(&bitmap, 100));
    }

    #[test]
    fn filtered_element_decoding() {
        let g = ScaledGeometry::new(&[4], &[4], &[2], 4).unwrap();
        let settings = IndexSettings {
            file: FileContext::default(),
            geometry: g,
            chunk_dims: vec![2],
            element_size: 4,
            filtered: true,
            verify_checksums: true,
        };
        let mut raw = 0x4000u64.to_le_bytes().to_vec();
        raw.extend_from_slice(&[0x34, 0x12]);
        raw.extend_from_slice(&5u32.to_le_bytes());
        let d = decode_array_element(&raw, &settings).unwrap();
        assert_eq!(d, ChunkDescriptor { address: 0x4000, stored_size: 0x1234, filter_mask: 5 });
        assert_eq!(array_element_size(&settings, 14).unwrap(), 14);
        assert!(array_element_size(&settings, 8).is_err());
    }
}
