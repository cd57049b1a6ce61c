//! Appending chunks and publishing them through a fixed array index.
//!
//! [`ChunkAppender`] runs each chunk through the filter pipeline and appends
//! the stored bytes at the end of the sink. [`FixedArrayBuilder`] serialises
//! the resulting descriptors as a `FAHD` header immediately followed by its
//! `FADB` data block (and pages), so a layout message can point at them.

use std::io::{Seek, SeekFrom, Write};

use log::debug;

use crate::chunk_index::ChunkDescriptor;
use crate::coords::{ScaledGeometry, UNLIMITED, chunk_size_length, to_linear_index};
use crate::error::FormatError;
use crate::field::{UNDEFINED_ADDRESS, put_address, put_checksum, put_uint};
use crate::filter_pipeline::FilterPipeline;
use crate::filters::FilterRegistry;
use crate::fixed_array::{DATA_BLOCK_SIGNATURE, HEADER_SIGNATURE};
use crate::io::FileContext;

/// Appends encoded chunks to the end of a seekable sink.
pub struct ChunkAppender<W> {
    sink: W,
    pipeline: FilterPipeline,
    registry: FilterRegistry,
    element_size: u32,
}

impl<W: Write + Seek> ChunkAppender<W> {
    /// An appender encoding with the built-in filters.
    pub fn new(sink: W, pipeline: FilterPipeline, element_size: u32) -> Self {
        Self::with_registry(sink, pipeline, FilterRegistry::with_builtins(), element_size)
    }

    pub fn with_registry(sink: W, pipeline: FilterPipeline, registry: FilterRegistry, element_size: u32) -> Self {
        Self {
            sink,
            pipeline,
            registry,
            element_size,
        }
    }

    /// Encode `chunk` and append it, returning where it landed.
    ///
    /// Optional filters that fail are skipped and recorded in the returned
    /// filter mask.
    pub fn append(&mut self, chunk: &[u8]) -> Result<ChunkDescriptor, FormatError> {
        let (stored, filter_mask) =
            self.registry
                .encode(&self.pipeline, chunk.to_vec(), self.element_size as usize)?;
        let address = self.append_raw(&stored)?;
        debug!(
            "appended chunk at {address:#x}: {} -> {} bytes, mask {filter_mask:#x}",
            chunk.len(),
            stored.len()
        );
        Ok(ChunkDescriptor {
            address,
            stored_size: stored.len() as u64,
            filter_mask,
        })
    }

    /// Append `bytes` unchanged and return their address.
    pub fn append_raw(&mut self, bytes: &[u8]) -> Result<u64, FormatError> {
        let address = self.end_position()?;
        self.sink.write_all(bytes)?;
        Ok(address)
    }

    /// Address the next append will land at.
    pub fn end_position(&mut self) -> Result<u64, FormatError> {
        Ok(self.sink.seek(SeekFrom::End(0))?)
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    /// Flush and give back the sink.
    pub fn into_inner(mut self) -> Result<W, FormatError> {
        self.sink.flush()?;
        Ok(self.sink)
    }
}

/// Serialiser for a fixed array chunk index.
#[derive(Debug, Clone)]
pub struct FixedArrayBuilder {
    file: FileContext,
    page_bits: u8,
    size_len: Option<usize>,
    entries: Vec<ChunkDescriptor>,
}

impl FixedArrayBuilder {
    /// `entries` unallocated slots. `chunk_size_len` is the width of the
    /// stored-size field for a filtered dataset and `None` otherwise.
    pub fn new(file: FileContext, entries: usize, page_bits: u8, chunk_size_len: Option<usize>) -> Self {
        Self {
            file,
            page_bits,
            size_len: chunk_size_len,
            entries: vec![ChunkDescriptor::UNDEFINED; entries],
        }
    }

    /// A builder sized for every chunk of `geometry`'s maximum extent.
    pub fn for_geometry(
        file: FileContext,
        geometry: &ScaledGeometry,
        filtered: bool,
        page_bits: u8,
    ) -> Result<Self, FormatError> {
        if geometry.scaled_max_dims.contains(&UNLIMITED) {
            return Err(FormatError::UnsupportedFeature(
                "fixed array index over an unlimited dimension".into(),
            ));
        }
        let count = geometry
            .scaled_max_dims
            .iter()
            .try_fold(1u64, |acc, &d| acc.checked_mul(d))
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| FormatError::corrupt("fixed array", "entry count overflows"))?;
        let size_len = filtered.then(|| chunk_size_length(geometry.chunk_bytes));
        Ok(Self::new(file, count, page_bits, size_len))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record the chunk at linear index `index`. Out-of-range indexes are ignored.
    pub fn set(&mut self, index: u64, descriptor: ChunkDescriptor) {
        if let Some(slot) = usize::try_from(index).ok().and_then(|i| self.entries.get_mut(i)) {
            *slot = descriptor;
        }
    }

    /// Record the chunk at scaled coordinate `scaled`, linearised over the
    /// maximum extent.
    pub fn set_chunk(&mut self, geometry: &ScaledGeometry, scaled: &[u64], descriptor: ChunkDescriptor) {
        self.set(to_linear_index(scaled, &geometry.down_max_counts), descriptor);
    }

    fn entry_size(&self) -> usize {
        let os = self.file.offset_size() as usize;
        match self.size_len {
            Some(n) => os + n + 4,
            None => os,
        }
    }

    fn put_entry(&self, buf: &mut Vec<u8>, d: &ChunkDescriptor) -> Result<(), FormatError> {
        let address = if d.is_allocated() { d.address } else { UNDEFINED_ADDRESS };
        put_address(buf, address, &self.file);
        if let Some(n) = self.size_len {
            if n < 8 && d.stored_size >> (8 * n) != 0 {
                return Err(FormatError::corrupt(
                    "fixed array",
                    format!("stored size {} does not fit in {n} bytes", d.stored_size),
                ));
            }
            put_uint(buf, d.stored_size, n);
            buf.extend_from_slice(&d.filter_mask.to_le_bytes());
        }
        Ok(())
    }

    /// Header, data block and pages for a header placed at `address`.
    pub fn build(&self, address: u64) -> Result<Vec<u8>, FormatError> {
        let os = self.file.offset_size() as usize;
        let ls = self.file.length_size() as usize;
        let client_id = self.size_len.is_some() as u8;
        let entry_size = self.entry_size();
        if entry_size > u8::MAX as usize {
            return Err(FormatError::corrupt("fixed array", format!("entry size {entry_size}")));
        }

        let header_len = 4 + 4 + ls + os + 4;
        let mut out = Vec::with_capacity(header_len + 6 + os + self.entries.len() * entry_size + 4);
        out.extend_from_slice(HEADER_SIGNATURE);
        out.extend_from_slice(&[0, client_id, entry_size as u8, self.page_bits]);
        put_uint(&mut out, self.entries.len() as u64, ls);
        put_address(&mut out, address + header_len as u64, &self.file);
        put_checksum(&mut out);

        let mut block = DATA_BLOCK_SIGNATURE.to_vec();
        block.extend_from_slice(&[0, client_id]);
        put_address(&mut block, address, &self.file);

        let per_page = 1usize << self.page_bits.min(63);
        if self.entries.len() <= per_page {
            for d in &self.entries {
                self.put_entry(&mut block, d)?;
            }
            put_checksum(&mut block);
            out.extend_from_slice(&block);
            return Ok(out);
        }

        let pages: Vec<&[ChunkDescriptor]> = self.entries.chunks(per_page).collect();
        let mut bitmap = vec![0u8; pages.len().div_ceil(8)];
        for (i, page) in pages.iter().enumerate() {
            if page.iter().any(ChunkDescriptor::is_allocated) {
                bitmap[i / 8] |= 0x80 >> (i % 8);
            }
        }
        block.extend_from_slice(&bitmap);
        put_checksum(&mut block);
        out.extend_from_slice(&block);
        for page in pages {
            let mut image = Vec::with_capacity(page.len() * entry_size + 4);
            for d in page {
                self.put_entry(&mut image, d)?;
            }
            put_checksum(&mut image);
            out.extend_from_slice(&image);
        }
        Ok(out)
    }
}
