//! Extensible array chunk index (layout index type 4).
//!
//! The array grows along one unlimited dimension. Its entries live in four
//! tiers: a few directly in the index block (`EAIB`), then in data blocks
//! (`EADB`) addressed from the index block, then in data blocks addressed
//! through secondary blocks (`EASB`). Data blocks larger than one page are
//! split into pages; secondary blocks record which pages were initialised.
//!
//! Secondary block `i` holds `2^(i/2)` data blocks of
//! `2^((i+1)/2) * min_elements` entries each.

use log::debug;

use crate::chunk_index::{
    Arena, ChunkDescriptor, IndexSettings, array_element_size, bit_is_set, byte_span, decode_array_element,
};
use crate::coords::{UNLIMITED, down_counts, swizzle, to_linear_index};
use crate::error::FormatError;
use crate::field::{FieldReader, UNDEFINED_ADDRESS, verify_checksum};
use crate::fixed_array::check_client;
use crate::io::ByteSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SuperBlockInfo {
    data_blocks: u64,
    block_elements: u64,
    start_index: u64,
    start_block: u64,
}

/// Decoded `EAHD` plus the derived secondary block table.
#[derive(Debug, Clone)]
struct ExtensibleArrayHeader {
    entry_size: usize,
    max_bits: u8,
    index_elements: u64,
    min_elements: u64,
    min_pointers: u64,
    page_bits: u8,
    max_index_set: u64,
    index_block: u64,
    super_blocks: Vec<SuperBlockInfo>,
}

impl ExtensibleArrayHeader {
    fn offset_width(&self) -> usize {
        (self.max_bits as usize).div_ceil(8)
    }

    fn page_elements(&self) -> u64 {
        1u64 << self.page_bits.min(63)
    }

    /// Secondary blocks whose data blocks hang directly off the index block.
    fn direct_super_blocks(&self) -> usize {
        2 * self.min_pointers.trailing_zeros() as usize
    }

    fn direct_data_blocks(&self) -> usize {
        2 * (self.min_pointers as usize).saturating_sub(1)
    }

    fn indirect_super_blocks(&self) -> usize {
        self.super_blocks.len().saturating_sub(self.direct_super_blocks())
    }

    fn pages_per_block(&self, block_elements: u64) -> u64 {
        if block_elements > self.page_elements() {
            block_elements / self.page_elements()
        } else {
            0
        }
    }

    fn data_block_prefix(&self, offset_size: usize) -> u64 {
        (4 + 1 + 1 + offset_size + self.offset_width() + 4) as u64
    }
}

#[derive(Debug, Clone)]
struct IndexBlock {
    elements: Vec<ChunkDescriptor>,
    data_blocks: Vec<u64>,
    super_blocks: Vec<u64>,
}

#[derive(Debug, Clone)]
struct SuperBlock {
    page_init: Vec<u8>,
    data_blocks: Vec<u64>,
}

/// Extensible array index state for one dataset handle.
#[derive(Debug)]
pub struct ExtensibleArrayIndex {
    settings: IndexSettings,
    address: u64,
    unlimited_dim: usize,
    swizzled_down: Vec<u64>,
    header: Option<ExtensibleArrayHeader>,
    index_block: Option<IndexBlock>,
    super_blocks: Arena<SuperBlock>,
    data_blocks: Arena<Vec<ChunkDescriptor>>,
    pages: Arena<Vec<ChunkDescriptor>>,
}

impl ExtensibleArrayIndex {
    pub(crate) fn new(settings: IndexSettings, address: u64) -> Result<Self, FormatError> {
        let max = &settings.geometry.scaled_max_dims;
        let unlimited_dim = max.iter().position(|&m| m == UNLIMITED).unwrap_or(0);
        let swizzled_down = if unlimited_dim > 0 {
            down_counts(&swizzle(max, unlimited_dim)?)
        } else {
            settings.geometry.down_max_counts.clone()
        };
        Ok(Self {
            settings,
            address,
            unlimited_dim,
            swizzled_down,
            header: None,
            index_block: None,
            super_blocks: Arena::default(),
            data_blocks: Arena::default(),
            pages: Arena::default(),
        })
    }

    pub(crate) fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub(crate) fn decoded_structures(&self) -> usize {
        self.header.is_some() as usize
            + self.index_block.is_some() as usize
            + self.super_blocks.decoded()
            + self.data_blocks.decoded()
            + self.pages.decoded()
    }

    fn linear_index(&self, scaled: &[u64]) -> Result<u64, FormatError> {
        if self.unlimited_dim > 0 {
            Ok(to_linear_index(&swizzle(scaled, self.unlimited_dim)?, &self.swizzled_down))
        } else {
            Ok(to_linear_index(scaled, &self.swizzled_down))
        }
    }

    pub(crate) fn lookup<S: ByteSource + ?Sized>(
        &mut self,
        source: &S,
        scaled: &[u64],
    ) -> Result<ChunkDescriptor, FormatError> {
        if self.address == UNDEFINED_ADDRESS || !self.settings.geometry.within_max(scaled) {
            return Ok(ChunkDescriptor::UNDEFINED);
        }
        let index = self.linear_index(scaled)?;

        if self.header.is_none() {
            self.header = Some(read_header(source, self.address, &self.settings)?);
        }
        let Some(header) = self.header.as_ref() else {
            return Ok(ChunkDescriptor::UNDEFINED);
        };
        if index >= header.max_index_set || header.index_block == UNDEFINED_ADDRESS {
            return Ok(ChunkDescriptor::UNDEFINED);
        }

        if self.index_block.is_none() {
            self.index_block = Some(read_index_block(source, header, self.address, &self.settings)?);
        }
        let Some(iblock) = self.index_block.as_ref() else {
            return Ok(ChunkDescriptor::UNDEFINED);
        };
        if index < header.index_elements {
            return Ok(iblock.elements[index as usize]);
        }

        let relative = index - header.index_elements;
        let sblk = (relative / header.min_elements + 1).ilog2() as usize;
        let Some(info) = header.super_blocks.get(sblk).copied() else {
            return Ok(ChunkDescriptor::UNDEFINED);
        };
        let Some(element) = relative.checked_sub(info.start_index) else {
            return Ok(ChunkDescriptor::UNDEFINED);
        };
        let mut tiers = Tiers {
            source,
            settings: &self.settings,
            header,
            header_address: self.address,
            data_blocks: &mut self.data_blocks,
            pages: &mut self.pages,
        };

        if sblk < header.direct_super_blocks() {
            let dblk = info.start_block.saturating_add(element / info.block_elements);
            let address = iblock
                .data_blocks
                .get(dblk as usize)
                .copied()
                .unwrap_or(UNDEFINED_ADDRESS);
            if address == UNDEFINED_ADDRESS {
                return Ok(ChunkDescriptor::UNDEFINED);
            }
            return tiers.element(address, info.block_elements, element % info.block_elements);
        }

        let sblk_address = iblock
            .super_blocks
            .get(sblk - header.direct_super_blocks())
            .copied()
            .unwrap_or(UNDEFINED_ADDRESS);
        if sblk_address == UNDEFINED_ADDRESS {
            return Ok(ChunkDescriptor::UNDEFINED);
        }
        let settings = &self.settings;
        let own = self.address;
        let sblock = self.super_blocks.fetch_or_create(sblk_address, || {
            read_super_block(source, header, info, sblk_address, own, settings)
        })?;

        let dblk = element / info.block_elements;
        let address = sblock
            .data_blocks
            .get(dblk as usize)
            .copied()
            .unwrap_or(UNDEFINED_ADDRESS);
        if address == UNDEFINED_ADDRESS {
            return Ok(ChunkDescriptor::UNDEFINED);
        }
        let within = element % info.block_elements;
        let pages = header.pages_per_block(info.block_elements);
        if pages > 0 {
            let page = within / header.page_elements();
            if !bit_is_set(&sblock.page_init, dblk.saturating_mul(pages).saturating_add(page)) {
                return Ok(ChunkDescriptor::UNDEFINED);
            }
        }
        tiers.element(address, info.block_elements, within)
    }
}

/// Borrowed view used to resolve an element inside a data block.
struct Tiers<'a, S: ?Sized> {
    source: &'a S,
    settings: &'a IndexSettings,
    header: &'a ExtensibleArrayHeader,
    header_address: u64,
    data_blocks: &'a mut Arena<Vec<ChunkDescriptor>>,
    pages: &'a mut Arena<Vec<ChunkDescriptor>>,
}

impl<S: ByteSource + ?Sized> Tiers<'_, S> {
    fn element(
        &mut self,
        address: u64,
        block_elements: u64,
        within: u64,
    ) -> Result<ChunkDescriptor, FormatError> {
        let header = self.header;
        let settings = self.settings;
        let source = self.source;
        let pages = header.pages_per_block(block_elements);
        let (entries, slot) = if pages == 0 {
            let owner = self.header_address;
            let entries = self.data_blocks.fetch_or_create(address, || {
                read_data_block(source, header, address, block_elements, owner, settings)
            })?;
            (entries, within)
        } else {
            let per_page = header.page_elements();
            let page = within / per_page;
            let stride = per_page.saturating_mul(header.entry_size as u64).saturating_add(4);
            let page_address = address
                .saturating_add(header.data_block_prefix(settings.offset_size()))
                .saturating_add(page.saturating_mul(stride));
            let entries = self.pages.fetch_or_create(page_address, || {
                debug!("extensible array page {page} of data block {address:#x}");
                read_page(source, page_address, per_page, header.entry_size, settings)
            })?;
            (entries, within % per_page)
        };
        Ok(entries.get(slot as usize).copied().unwrap_or(ChunkDescriptor::UNDEFINED))
    }
}

fn super_block_table(
    max_bits: u8,
    min_elements: u64,
) -> Result<Vec<SuperBlockInfo>, FormatError> {
    let min_log = min_elements.trailing_zeros() as u8;
    if max_bits < min_log || max_bits > 64 {
        return Err(FormatError::corrupt(
            "extensible array header",
            format!("{max_bits} index bits with {min_elements}-entry data blocks"),
        ));
    }
    let count = 1 + (max_bits - min_log) as u64;
    let mut table = Vec::with_capacity(count as usize);
    let (mut start_index, mut start_block) = (0u64, 0u64);
    for i in 0..count {
        let data_blocks = 1u64.checked_shl((i / 2) as u32).unwrap_or(u64::MAX);
        let block_elements = 1u64
            .checked_shl(i.div_ceil(2) as u32)
            .unwrap_or(u64::MAX)
            .saturating_mul(min_elements);
        table.push(SuperBlockInfo {
            data_blocks,
            block_elements,
            start_index,
            start_block,
        });
        start_index = start_index.saturating_add(data_blocks.saturating_mul(block_elements));
        start_block = start_block.saturating_add(data_blocks);
    }
    Ok(table)
}

fn read_header<S: ByteSource + ?Sized>(
    source: &S,
    address: u64,
    settings: &IndexSettings,
) -> Result<ExtensibleArrayHeader, FormatError> {
    let ctx = &settings.file;
    let len = 12 + 6 * ctx.length_size() as usize + ctx.offset_size() as usize + 4;
    let image = source.read_vec(address, len)?;
    let mut r = FieldReader::new(&image);
    r.signature(b"EAHD", "extensible array header")?;
    r.version(0, "extensible array header")?;
    check_client(r.u8()?, settings, "extensible array header")?;
    let entry_size = array_element_size(settings, r.u8()?)?;
    let max_bits = r.u8()?;
    let index_elements = r.u8()? as u64;
    let min_elements = r.u8()? as u64;
    let min_pointers = r.u8()? as u64;
    let page_bits = r.u8()?;
    for (value, what) in [(min_elements, "data block size"), (min_pointers, "secondary block size")] {
        if !value.is_power_of_two() {
            return Err(FormatError::corrupt(
                "extensible array header",
                format!("minimum {what} {value} is not a power of two"),
            ));
        }
    }
    // Super block count and size, data block count and size.
    for _ in 0..4 {
        r.length(ctx)?;
    }
    let max_index_set = r.length(ctx)?;
    let _elements = r.length(ctx)?;
    let index_block = r.address(ctx)?;
    if settings.verify_checksums {
        verify_checksum(&image, r.position(), "extensible array header", address)?;
    }
    let super_blocks = super_block_table(max_bits, min_elements)?;
    debug!(
        "extensible array header at {address:#x}: {} secondary blocks, {index_elements} direct entries, max index set {max_index_set}",
        super_blocks.len()
    );
    Ok(ExtensibleArrayHeader {
        entry_size,
        max_bits,
        index_elements,
        min_elements,
        min_pointers,
        page_bits,
        max_index_set,
        index_block,
        super_blocks,
    })
}

/// Common prefix of the tier blocks: signature, version, client, owner.
fn read_prefix(
    r: &mut FieldReader<'_>,
    signature: &[u8; 4],
    structure: &'static str,
    header_address: u64,
    settings: &IndexSettings,
) -> Result<(), FormatError> {
    r.signature(signature, structure)?;
    r.version(0, structure)?;
    check_client(r.u8()?, settings, structure)?;
    let owner = r.address(&settings.file)?;
    if owner != header_address {
        return Err(FormatError::corrupt(
            structure,
            format!("owned by header {owner:#x}, expected {header_address:#x}"),
        ));
    }
    Ok(())
}

fn read_addresses(r: &mut FieldReader<'_>, count: usize, settings: &IndexSettings) -> Result<Vec<u64>, FormatError> {
    (0..count).map(|_| r.address(&settings.file)).collect()
}

fn read_index_block<S: ByteSource + ?Sized>(
    source: &S,
    header: &ExtensibleArrayHeader,
    header_address: u64,
    settings: &IndexSettings,
) -> Result<IndexBlock, FormatError> {
    let os = settings.offset_size();
    let elements = header.index_elements as usize;
    let dblks = header.direct_data_blocks();
    let sblks = header.indirect_super_blocks();
    let len = 6 + os + elements * header.entry_size + (dblks + sblks) * os + 4;
    let address = header.index_block;
    let image = source.read_vec(address, len)?;
    let mut r = FieldReader::new(&image);
    read_prefix(&mut r, b"EAIB", "extensible array index block", header_address, settings)?;
    let elements = (0..elements)
        .map(|_| decode_array_element(r.take(header.entry_size)?, settings))
        .collect::<Result<Vec<_>, _>>()?;
    let data_blocks = read_addresses(&mut r, dblks, settings)?;
    let super_blocks = read_addresses(&mut r, sblks, settings)?;
    if settings.verify_checksums {
        verify_checksum(&image, r.position(), "extensible array index block", address)?;
    }
    debug!("extensible array index block at {address:#x}");
    Ok(IndexBlock {
        elements,
        data_blocks,
        super_blocks,
    })
}

fn read_super_block<S: ByteSource + ?Sized>(
    source: &S,
    header: &ExtensibleArrayHeader,
    info: SuperBlockInfo,
    address: u64,
    header_address: u64,
    settings: &IndexSettings,
) -> Result<SuperBlock, FormatError> {
    const STRUCTURE: &str = "extensible array secondary block";
    let os = settings.offset_size();
    let pages = header.pages_per_block(info.block_elements);
    let init_len = if pages > 0 {
        byte_span(info.data_blocks, pages.div_ceil(8) as usize, STRUCTURE)?
    } else {
        0
    };
    let pointers = byte_span(info.data_blocks, os, STRUCTURE)?;
    let len = (6 + os + header.offset_width() + 4)
        .saturating_add(init_len)
        .saturating_add(pointers);
    let image = source.read_vec(address, len)?;
    let count = pointers / os;
    let mut r = FieldReader::new(&image);
    read_prefix(&mut r, b"EASB", STRUCTURE, header_address, settings)?;
    r.skip(header.offset_width())?;
    let page_init = r.take(init_len)?.to_vec();
    let data_blocks = read_addresses(&mut r, count, settings)?;
    if settings.verify_checksums {
        verify_checksum(&image, r.position(), STRUCTURE, address)?;
    }
    debug!("extensible array secondary block at {address:#x}: {count} data blocks");
    Ok(SuperBlock { page_init, data_blocks })
}

fn read_data_block<S: ByteSource + ?Sized>(
    source: &S,
    header: &ExtensibleArrayHeader,
    address: u64,
    block_elements: u64,
    header_address: u64,
    settings: &IndexSettings,
) -> Result<Vec<ChunkDescriptor>, FormatError> {
    let os = settings.offset_size();
    let body = byte_span(block_elements, header.entry_size, "extensible array data block")?;
    let len = (6 + os + header.offset_width() + 4).saturating_add(body);
    let image = source.read_vec(address, len)?;
    let mut r = FieldReader::new(&image);
    read_prefix(&mut r, b"EADB", "extensible array data block", header_address, settings)?;
    r.skip(header.offset_width())?;
    let raw = r.take(body)?;
    if settings.verify_checksums {
        verify_checksum(&image, r.position(), "extensible array data block", address)?;
    }
    debug!("extensible array data block at {address:#x}: {block_elements} entries");
    raw.chunks_exact(header.entry_size)
        .map(|e| decode_array_element(e, settings))
        .collect()
}

fn read_page<S: ByteSource + ?Sized>(
    source: &S,
    address: u64,
    count: u64,
    entry_size: usize,
    settings: &IndexSettings,
) -> Result<Vec<ChunkDescriptor>, FormatError> {
    let body = byte_span(count, entry_size, "extensible array data block page")?;
    let image = source.read_vec(address, body.saturating_add(4))?;
    if settings.verify_checksums {
        verify_checksum(&image, body, "extensible array data block page", address)?;
    }
    image[..body]
        .chunks_exact(entry_size)
        .map(|e| decode_array_element(e, settings))
        .collect()
}
