//! HDF5 Data Layout message parsing (message type 0x0008).
//!
//! Only the chunked class is serviced by this crate, but every class is
//! parsed so callers get a precise error for the others.

use crate::coords::min_byte_count;
use crate::error::FormatError;
use crate::field::{put_address, put_uint, FieldReader, UNDEFINED_ADDRESS};
use crate::io::FileContext;

/// Layout flag: partial edge chunks are stored unfiltered.
pub const DONT_FILTER_PARTIAL_BOUND_CHUNKS: u8 = 0x01;
/// Layout flag: the single-chunk index carries a filtered size and mask.
pub const SINGLE_INDEX_WITH_FILTER: u8 = 0x02;

/// Parsed data layout message.
#[derive(Debug, Clone, PartialEq)]
pub enum DataLayout {
    /// Raw data stored inline in the message.
    Compact {
        /// The inline bytes.
        data: Vec<u8>,
    },
    /// Raw data stored at a single address.
    Contiguous {
        /// File address, or [`UNDEFINED_ADDRESS`].
        address: u64,
        /// Size in bytes.
        size: u64,
    },
    /// Raw data split into chunks.
    Chunked(ChunkedLayout),
    /// Virtual dataset mapping (v4 only).
    Virtual,
}

/// Chunked layout description.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkedLayout {
    /// Message version the layout was read from (1 to 4).
    pub version: u8,
    /// Layout flags (v4).
    pub flags: u8,
    /// Chunk shape in elements, without the trailing element-size dimension.
    pub chunk_dims: Vec<u64>,
    /// Element size in bytes (the trailing dimension on disk).
    pub element_size: u32,
    /// Index scheme and its creation parameters.
    pub index: ChunkIndexParams,
    /// Address of the index structure (or of the single/implicit chunk data).
    pub address: u64,
}

/// Chunk index discriminator with its layout parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkIndexParams {
    /// Version 1 B-tree (layout versions 1 to 3).
    BTreeV1,
    /// Type 1: exactly one chunk.
    SingleChunk {
        /// Filtered size and filter mask, when the chunk is filtered.
        filtered: Option<(u64, u32)>,
    },
    /// Type 2: chunks preallocated contiguously in scan order.
    Implicit,
    /// Type 3: fixed array.
    FixedArray {
        /// Log2 of the entries per data block page.
        page_bits: u8,
    },
    /// Type 4: extensible array.
    ExtensibleArray {
        /// Bits needed for the maximum number of entries.
        max_bits: u8,
        /// Entries stored directly in the index block.
        index_elements: u8,
        /// Minimum data block pointers per secondary block.
        min_pointers: u8,
        /// Minimum entries per data block.
        min_elements: u8,
        /// Log2 of the entries per data block page.
        page_bits: u8,
    },
    /// Type 5: version 2 B-tree.
    BTreeV2 {
        /// Node size in bytes.
        node_size: u32,
        /// Split percentage.
        split_percent: u8,
        /// Merge percentage.
        merge_percent: u8,
    },
}

impl ChunkIndexParams {
    /// The v4 index type code, or `None` for the version 1 B-tree.
    pub fn type_code(&self) -> Option<u8> {
        match self {
            ChunkIndexParams::BTreeV1 => None,
            ChunkIndexParams::SingleChunk { .. } => Some(1),
            ChunkIndexParams::Implicit => Some(2),
            ChunkIndexParams::FixedArray { .. } => Some(3),
            ChunkIndexParams::ExtensibleArray { .. } => Some(4),
            ChunkIndexParams::BTreeV2 { .. } => Some(5),
        }
    }
}

impl DataLayout {
    /// Parse a data layout message from raw message bytes.
    pub fn parse(data: &[u8], ctx: &FileContext) -> Result<DataLayout, FormatError> {
        let mut r = FieldReader::new(data);
        let version = r.u8()?;
        match version {
            1 | 2 => Self::parse_v1(&mut r, version, ctx),
            3 | 4 => {
                let class = r.u8()?;
                match class {
                    0 => {
                        let size = r.u16()? as usize;
                        Ok(DataLayout::Compact {
                            data: r.take(size)?.to_vec(),
                        })
                    }
                    1 => {
                        let address = r.address(ctx)?;
                        let size = r.length(ctx)?;
                        Ok(DataLayout::Contiguous { address, size })
                    }
                    2 if version == 3 => Self::parse_v3_chunked(&mut r, ctx),
                    2 => Self::parse_v4_chunked(&mut r, ctx),
                    3 if version == 4 => Ok(DataLayout::Virtual),
                    _ => Err(FormatError::InvalidLayoutClass(class)),
                }
            }
            _ => Err(FormatError::InvalidLayoutVersion(version)),
        }
    }

    fn parse_v1(
        r: &mut FieldReader<'_>,
        version: u8,
        ctx: &FileContext,
    ) -> Result<DataLayout, FormatError> {
        let ndims = r.u8()? as usize;
        let class = r.u8()?;
        r.skip(5)?;
        match class {
            0 => {
                r.skip(ndims * 4)?;
                let size = r.u32()? as usize;
                Ok(DataLayout::Compact {
                    data: r.take(size)?.to_vec(),
                })
            }
            1 => {
                let address = r.address(ctx)?;
                let mut size = 1u64;
                for _ in 0..ndims {
                    size = size.saturating_mul(r.u32()? as u64);
                }
                Ok(DataLayout::Contiguous { address, size })
            }
            2 => {
                let address = r.address(ctx)?;
                let dims = read_dims(r, ndims, 4)?;
                chunked(version, 0, dims, ChunkIndexParams::BTreeV1, address)
            }
            _ => Err(FormatError::InvalidLayoutClass(class)),
        }
    }

    fn parse_v3_chunked(
        r: &mut FieldReader<'_>,
        ctx: &FileContext,
    ) -> Result<DataLayout, FormatError> {
        let ndims = r.u8()? as usize;
        let address = r.address(ctx)?;
        let dims = read_dims(r, ndims, 4)?;
        chunked(3, 0, dims, ChunkIndexParams::BTreeV1, address)
    }

    fn parse_v4_chunked(
        r: &mut FieldReader<'_>,
        ctx: &FileContext,
    ) -> Result<DataLayout, FormatError> {
        let flags = r.u8()?;
        let ndims = r.u8()? as usize;
        let dim_width = r.u8()? as usize;
        if !(1..=8).contains(&dim_width) {
            return Err(FormatError::corrupt(
                "data layout",
                format!("dimension width {dim_width}"),
            ));
        }
        let dims = read_dims(r, ndims, dim_width)?;
        let index_type = r.u8()?;
        let index = match index_type {
            1 => {
                let filtered = if flags & SINGLE_INDEX_WITH_FILTER != 0 {
                    let size = r.length(ctx)?;
                    let mask = r.u32()?;
                    Some((size, mask))
                } else {
                    None
                };
                ChunkIndexParams::SingleChunk { filtered }
            }
            2 => ChunkIndexParams::Implicit,
            3 => ChunkIndexParams::FixedArray { page_bits: r.u8()? },
            4 => ChunkIndexParams::ExtensibleArray {
                max_bits: r.u8()?,
                index_elements: r.u8()?,
                min_pointers: r.u8()?,
                min_elements: r.u8()?,
                page_bits: r.u8()?,
            },
            5 => ChunkIndexParams::BTreeV2 {
                node_size: r.u32()?,
                split_percent: r.u8()?,
                merge_percent: r.u8()?,
            },
            other => return Err(FormatError::UnsupportedChunkIndex(other)),
        };
        let address = r.address(ctx)?;
        chunked(4, flags, dims, index, address)
    }

    /// The chunked description, or an error naming the layout class.
    pub fn as_chunked(&self) -> Result<&ChunkedLayout, FormatError> {
        match self {
            DataLayout::Chunked(c) => Ok(c),
            DataLayout::Compact { .. } => Err(FormatError::UnsupportedLayout("compact".into())),
            DataLayout::Contiguous { .. } => {
                Err(FormatError::UnsupportedLayout("contiguous".into()))
            }
            DataLayout::Virtual => Err(FormatError::UnsupportedLayout("virtual".into())),
        }
    }
}

fn read_dims(r: &mut FieldReader<'_>, ndims: usize, width: usize) -> Result<Vec<u64>, FormatError> {
    (0..ndims).map(|_| r.uint(width)).collect()
}

fn chunked(
    version: u8,
    flags: u8,
    mut dims: Vec<u64>,
    index: ChunkIndexParams,
    address: u64,
) -> Result<DataLayout, FormatError> {
    if dims.len() < 2 {
        return Err(FormatError::corrupt(
            "data layout",
            format!("chunked layout with {} dimensions", dims.len()),
        ));
    }
    let element_size = dims.pop().unwrap_or(0);
    if element_size == 0 || element_size > u32::MAX as u64 || dims.contains(&0) {
        return Err(FormatError::corrupt("data layout", "zero or oversized chunk dimension"));
    }
    Ok(DataLayout::Chunked(ChunkedLayout {
        version,
        flags,
        chunk_dims: dims,
        element_size: element_size as u32,
        index,
        address,
    }))
}

impl ChunkedLayout {
    /// Serialize as a layout message: version 3 for the v1 B-tree, otherwise
    /// version 4.
    pub fn encode(&self, ctx: &FileContext) -> Vec<u8> {
        match self.index {
            ChunkIndexParams::BTreeV1 => self.encode_v3(ctx),
            _ => self.encode_v4(ctx),
        }
    }

    fn encode_v3(&self, ctx: &FileContext) -> Vec<u8> {
        let mut buf = vec![3u8, 2, (self.chunk_dims.len() + 1) as u8];
        put_address(&mut buf, self.address, ctx);
        for &d in &self.chunk_dims {
            put_uint(&mut buf, d, 4);
        }
        put_uint(&mut buf, self.element_size as u64, 4);
        buf
    }

    fn encode_v4(&self, ctx: &FileContext) -> Vec<u8> {
        let mut flags = self.flags & DONT_FILTER_PARTIAL_BOUND_CHUNKS;
        if let ChunkIndexParams::SingleChunk { filtered: Some(_) } = self.index {
            flags |= SINGLE_INDEX_WITH_FILTER;
        }
        let widest = self
            .chunk_dims
            .iter()
            .copied()
            .chain([self.element_size as u64])
            .max()
            .unwrap_or(1);
        let width = min_byte_count(widest);

        let mut buf = vec![4u8, 2, flags, (self.chunk_dims.len() + 1) as u8, width as u8];
        for &d in self.chunk_dims.iter().chain([&(self.element_size as u64)]) {
            put_uint(&mut buf, d, width);
        }
        buf.push(self.index.type_code().unwrap_or(0));
        match self.index {
            ChunkIndexParams::BTreeV1 | ChunkIndexParams::Implicit => {}
            ChunkIndexParams::SingleChunk { filtered } => {
                if let Some((size, mask)) = filtered {
                    put_uint(&mut buf, size, ctx.length_size() as usize);
                    buf.extend_from_slice(&mask.to_le_bytes());
                }
            }
            ChunkIndexParams::FixedArray { page_bits } => buf.push(page_bits),
            ChunkIndexParams::ExtensibleArray {
                max_bits,
                index_elements,
                min_pointers,
                min_elements,
                page_bits,
            } => buf.extend_from_slice(&[max_bits, index_elements, min_pointers, min_elements, page_bits]),
            ChunkIndexParams::BTreeV2 {
                node_size,
                split_percent,
                merge_percent,
            } => {
                buf.extend_from_slice(&node_size.to_le_bytes());
                buf.push(split_percent);
                buf.push(merge_percent);
            }
        }
        put_address(&mut buf, self.address, ctx);
        buf
    }
}

/// Encode a version 4 chunked layout message.
pub fn encode_layout_v4(
    chunk_dims: &[u64],
    element_size: u32,
    index: ChunkIndexParams,
    address: u64,
    ctx: &FileContext,
) -> Vec<u8> {
    ChunkedLayout {
        version: 4,
        flags: 0,
        chunk_dims: chunk_dims.to_vec(),
        element_size,
        index,
        address,
    }
    .encode_v4(ctx)
}

impl Default for ChunkedLayout {
    fn default() -> Self {
        Self {
            version: 4,
            flags: 0,
            chunk_dims: vec![1],
            element_size: 1,
            index: ChunkIndexParams::SingleChunk { filtered: None },
            address: UNDEFINED_ADDRESS,
        }
    }
}
