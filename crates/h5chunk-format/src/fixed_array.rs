//! Fixed array chunk index (layout index type 3).
//!
//! On disk: a header (`FAHD`) naming the entry count and the data block
//! (`FADB`). Small arrays keep every entry in the data block. Arrays with more
//! than `2^page_bits` entries are paged: the data block holds an MSB-first
//! bitmap of initialised pages, and the pages follow it back to back, each
//! with its own checksum.

use log::debug;

use crate::chunk_index::{
    Arena, ChunkDescriptor, IndexSettings, array_element_size, bit_is_set, byte_span, decode_array_element,
};
use crate::coords::to_linear_index;
use crate::error::FormatError;
use crate::field::{FieldReader, UNDEFINED_ADDRESS, verify_checksum};
use crate::io::ByteSource;

pub(crate) const HEADER_SIGNATURE: &[u8; 4] = b"FAHD";
pub(crate) const DATA_BLOCK_SIGNATURE: &[u8; 4] = b"FADB";

/// Decoded `FAHD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FixedArrayHeader {
    pub(crate) entry_size: usize,
    pub(crate) page_bits: u8,
    pub(crate) entries: u64,
    pub(crate) data_block: u64,
}

impl FixedArrayHeader {
    fn entries_per_page(&self) -> u64 {
        1u64 << self.page_bits.min(63)
    }

    fn is_paged(&self) -> bool {
        self.entries > self.entries_per_page()
    }

    fn page_count(&self) -> u64 {
        self.entries.div_ceil(self.entries_per_page())
    }
}

#[derive(Debug, Clone)]
enum DataBlock {
    Unpaged(Vec<ChunkDescriptor>),
    Paged {
        bitmap: Vec<u8>,
        /// Address of page 0.
        first_page: u64,
    },
}

/// Fixed array index state for one dataset handle.
#[derive(Debug)]
pub struct FixedArrayIndex {
    settings: IndexSettings,
    address: u64,
    header: Option<FixedArrayHeader>,
    block: Option<DataBlock>,
    pages: Arena<Vec<ChunkDescriptor>>,
}

impl FixedArrayIndex {
    pub(crate) fn new(settings: IndexSettings, address: u64) -> Result<Self, FormatError> {
        Ok(Self {
            settings,
            address,
            header: None,
            block: None,
            pages: Arena::default(),
        })
    }

    pub(crate) fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub(crate) fn decoded_structures(&self) -> usize {
        self.header.is_some() as usize + self.block.is_some() as usize + self.pages.decoded()
    }

    pub(crate) fn lookup<S: ByteSource + ?Sized>(
        &mut self,
        source: &S,
        scaled: &[u64],
    ) -> Result<ChunkDescriptor, FormatError> {
        if self.address == UNDEFINED_ADDRESS || !self.settings.geometry.within_max(scaled) {
            return Ok(ChunkDescriptor::UNDEFINED);
        }
        let index = to_linear_index(scaled, &self.settings.geometry.down_max_counts);

        if self.header.is_none() {
            self.header = Some(read_header(source, self.address, &self.settings)?);
        }
        let Some(header) = self.header.as_ref() else {
            return Ok(ChunkDescriptor::UNDEFINED);
        };
        if index >= header.entries || header.data_block == UNDEFINED_ADDRESS {
            return Ok(ChunkDescriptor::UNDEFINED);
        }

        if self.block.is_none() {
            self.block = Some(read_data_block(source, header, self.address, &self.settings)?);
        }
        match self.block.as_ref() {
            Some(DataBlock::Unpaged(entries)) => {
                Ok(entries.get(index as usize).copied().unwrap_or(ChunkDescriptor::UNDEFINED))
            }
            Some(DataBlock::Paged { bitmap, first_page }) => {
                let per_page = header.entries_per_page();
                let page = index / per_page;
                if !bit_is_set(bitmap, page) {
                    return Ok(ChunkDescriptor::UNDEFINED);
                }
                let stride = per_page.saturating_mul(header.entry_size as u64).saturating_add(4);
                let page_address = first_page.saturating_add(page.saturating_mul(stride));
                let count = per_page.min(header.entries - page * per_page);
                let settings = &self.settings;
                let entries = self.pages.fetch_or_create(page_address, || {
                    debug!("fixed array page {page} at {page_address:#x}, {count} entries");
                    read_page(source, page_address, count, header.entry_size, settings)
                })?;
                Ok(entries.get((index % per_page) as usize).copied().unwrap_or(ChunkDescriptor::UNDEFINED))
            }
            None => Ok(ChunkDescriptor::UNDEFINED),
        }
    }
}

fn read_header<S: ByteSource + ?Sized>(
    source: &S,
    address: u64,
    settings: &IndexSettings,
) -> Result<FixedArrayHeader, FormatError> {
    let ctx = &settings.file;
    let len = 4 + 4 + ctx.length_size() as usize + ctx.offset_size() as usize + 4;
    let image = source.read_vec(address, len)?;
    let mut r = FieldReader::new(&image);
    r.signature(HEADER_SIGNATURE, "fixed array header")?;
    r.version(0, "fixed array header")?;
    let client_id = r.u8()?;
    check_client(client_id, settings, "fixed array header")?;
    let entry_size = array_element_size(settings, r.u8()?)?;
    let page_bits = r.u8()?;
    let entries = r.length(ctx)?;
    let data_block = r.address(ctx)?;
    if settings.verify_checksums {
        verify_checksum(&image, r.position(), "fixed array header", address)?;
    }
    let header = FixedArrayHeader {
        entry_size,
        page_bits,
        entries,
        data_block,
    };
    debug!(
        "fixed array header at {address:#x}: {entries} entries of {entry_size} bytes, paged: {}",
        header.is_paged()
    );
    Ok(header)
}

pub(crate) fn check_client(
    client_id: u8,
    settings: &IndexSettings,
    structure: &'static str,
) -> Result<(), FormatError> {
    if client_id != settings.filtered as u8 {
        return Err(FormatError::corrupt(
            structure,
            format!("client id {client_id} for a {} dataset", if settings.filtered { "filtered" } else { "unfiltered" }),
        ));
    }
    Ok(())
}

fn read_data_block<S: ByteSource + ?Sized>(
    source: &S,
    header: &FixedArrayHeader,
    header_address: u64,
    settings: &IndexSettings,
) -> Result<DataBlock, FormatError> {
    let ctx = &settings.file;
    let os = ctx.offset_size() as usize;
    let prefix = 4 + 1 + 1 + os;
    let body = if header.is_paged() {
        header.page_count().div_ceil(8)
    } else {
        header.entries.saturating_mul(header.entry_size as u64)
    };
    let body = usize::try_from(body)
        .map_err(|_| FormatError::corrupt("fixed array data block", "block size overflows"))?;
    let address = header.data_block;
    let image = source.read_vec(address, prefix.saturating_add(body).saturating_add(4))?;

    let mut r = FieldReader::new(&image);
    r.signature(DATA_BLOCK_SIGNATURE, "fixed array data block")?;
    r.version(0, "fixed array data block")?;
    check_client(r.u8()?, settings, "fixed array data block")?;
    let owner = r.address(ctx)?;
    if owner != header_address {
        return Err(FormatError::corrupt(
            "fixed array data block",
            format!("owned by header {owner:#x}, expected {header_address:#x}"),
        ));
    }
    let raw = r.take(body)?;
    if settings.verify_checksums {
        verify_checksum(&image, r.position(), "fixed array data block", address)?;
    }
    debug!("fixed array data block at {address:#x}");

    if header.is_paged() {
        Ok(DataBlock::Paged {
            bitmap: raw.to_vec(),
            first_page: address + image.len() as u64,
        })
    } else {
        let entries = raw
            .chunks_exact(header.entry_size)
            .map(|e| decode_array_element(e, settings))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DataBlock::Unpaged(entries))
    }
}

fn read_page<S: ByteSource + ?Sized>(
    source: &S,
    address: u64,
    count: u64,
    entry_size: usize,
    settings: &IndexSettings,
) -> Result<Vec<ChunkDescriptor>, FormatError> {
    let body = byte_span(count, entry_size, "fixed array page")?;
    let image = source.read_vec(address, body.saturating_add(4))?;
    if settings.verify_checksums {
        verify_checksum(&image, body, "fixed array page", address)?;
    }
    image[..body]
        .chunks_exact(entry_size)
        .map(|e| decode_array_element(e, settings))
        .collect()
}
