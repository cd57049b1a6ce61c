//! Filter registry and the built-in filter codecs.
//!
//! A [`FilterRegistry`] maps filter ids to [`FilterCodec`] implementations
//! for one open dataset. Reads run the pipeline in reverse, skipping every
//! filter whose bit is set in the chunk's filter mask; writes run it forward.

use std::collections::BTreeMap;
use std::fmt;

use log::{trace, warn};

use crate::error::FormatError;
use crate::filter_pipeline::{
    FilterDescription, FilterPipeline, FILTER_FLETCHER32, FILTER_SHUFFLE,
};
#[cfg(feature = "deflate")]
use crate::filter_pipeline::FILTER_DEFLATE;
#[cfg(feature = "bzip2")]
use crate::filter_pipeline::FILTER_BZIP2;
use crate::scale_offset::ScaleOffsetCodec;

/// What a codec knows about the chunk it is transforming.
#[derive(Debug, Clone, Copy)]
pub struct FilterContext<'a> {
    /// The pipeline entry being applied.
    pub description: &'a FilterDescription,
    /// Position of the entry in the pipeline (0 = applied first on write).
    pub position: usize,
    /// Dataset element size in bytes.
    pub element_size: usize,
    /// Decoded size of a full chunk in bytes.
    pub chunk_bytes: usize,
    /// Exact size the decode step must produce, or 0 when unknown.
    pub output_hint: usize,
}

/// One reversible transform of the filter pipeline.
pub trait FilterCodec {
    /// Filter identifier this codec implements.
    fn id(&self) -> u16;

    /// Human-readable filter name.
    fn name(&self) -> &'static str;

    /// Undo the filter (read direction).
    fn decode(&self, input: Vec<u8>, ctx: &FilterContext<'_>) -> Result<Vec<u8>, FormatError>;

    /// Apply the filter (write direction).
    fn encode(&self, input: Vec<u8>, ctx: &FilterContext<'_>) -> Result<Vec<u8>, FormatError>;
}

/// Per-dataset mapping of filter id to codec.
#[derive(Default)]
pub struct FilterRegistry {
    codecs: BTreeMap<u16, Box<dyn FilterCodec>>,
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.codecs.iter().map(|(id, c)| (id, c.name())))
            .finish()
    }
}

impl FilterRegistry {
    /// A registry with no codecs.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every codec compiled into this build.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ShuffleCodec));
        registry.register(Box::new(Fletcher32Codec));
        registry.register(Box::new(ScaleOffsetCodec));
        #[cfg(feature = "deflate")]
        registry.register(Box::new(DeflateCodec));
        #[cfg(feature = "bzip2")]
        registry.register(Box::new(Bzip2Codec));
        registry
    }

    /// Register `codec`, returning the one it replaces.
    pub fn register(&mut self, codec: Box<dyn FilterCodec>) -> Option<Box<dyn FilterCodec>> {
        self.codecs.insert(codec.id(), codec)
    }

    /// Whether a codec is registered for `id`.
    pub fn contains(&self, id: u16) -> bool {
        self.codecs.contains_key(&id)
    }

    /// Registered filter ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.codecs.keys().copied()
    }

    fn codec(&self, desc: &FilterDescription) -> Result<&dyn FilterCodec, FormatError> {
        self.codecs
            .get(&desc.id)
            .map(|c| c.as_ref())
            .ok_or_else(|| FormatError::UnsupportedFilter {
                id: desc.id,
                name: desc.name.clone(),
            })
    }

    /// Undo `pipeline` on one stored chunk.
    ///
    /// Filters run in reverse order; the filter at position `i` is skipped
    /// when bit `i` of `filter_mask` is set.
    pub fn decode(
        &self,
        pipeline: &FilterPipeline,
        filter_mask: u32,
        data: Vec<u8>,
        element_size: usize,
        chunk_bytes: usize,
    ) -> Result<Vec<u8>, FormatError> {
        let mut data = data;
        for (position, desc) in pipeline.filters.iter().enumerate().rev() {
            if is_masked(filter_mask, position) {
                trace!("filter {} at position {position} skipped by mask", desc.id);
                continue;
            }
            let codec = self.codec(desc)?;
            let ctx = FilterContext {
                description: desc,
                position,
                element_size,
                chunk_bytes,
                output_hint: output_hint(pipeline, position, chunk_bytes),
            };
            let before = data.len();
            data = codec.decode(data, &ctx)?;
            trace!("{} decode: {before} -> {} bytes", codec.name(), data.len());
        }
        Ok(data)
    }

    /// Apply `pipeline` to one chunk, returning the stored bytes and the
    /// filter mask recording optional filters that were skipped.
    pub fn encode(
        &self,
        pipeline: &FilterPipeline,
        data: Vec<u8>,
        element_size: usize,
    ) -> Result<(Vec<u8>, u32), FormatError> {
        let chunk_bytes = data.len();
        let mut data = data;
        let mut mask = 0u32;
        for (position, desc) in pipeline.filters.iter().enumerate() {
            let codec = match self.codec(desc) {
                Ok(c) => c,
                Err(e) if desc.is_optional() => {
                    warn!("optional filter {} skipped: {e}", desc.id);
                    mask |= mask_bit(position);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let ctx = FilterContext {
                description: desc,
                position,
                element_size,
                chunk_bytes,
                output_hint: output_hint(pipeline, position, chunk_bytes),
            };
            if desc.is_optional() {
                match codec.encode(data.clone(), &ctx) {
                    Ok(out) => data = out,
                    Err(e) => {
                        warn!("optional filter {} failed on write, skipped: {e}", codec.name());
                        mask |= mask_bit(position);
                    }
                }
            } else {
                data = codec.encode(data, &ctx)?;
            }
        }
        Ok((data, mask))
    }
}

/// A filter's decoded output is one raw chunk when only size-preserving
/// filters precede it on write.
fn output_hint(pipeline: &FilterPipeline, position: usize, chunk_bytes: usize) -> usize {
    if pipeline.filters[..position].iter().all(|f| f.id == FILTER_SHUFFLE) {
        chunk_bytes
    } else {
        0
    }
}

fn mask_bit(position: usize) -> u32 {
    1u32.checked_shl(position as u32).unwrap_or(0)
}

fn is_masked(filter_mask: u32, position: usize) -> bool {
    filter_mask & mask_bit(position) != 0
}

/// Shuffle (filter 2): byte-plane transpose of the chunk's elements.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShuffleCodec;

impl ShuffleCodec {
    fn width(ctx: &FilterContext<'_>) -> usize {
        ctx.description
            .client_data
            .first()
            .map(|&w| w as usize)
            .filter(|&w| w > 0)
            .unwrap_or(ctx.element_size)
    }
}

impl FilterCodec for ShuffleCodec {
    fn id(&self) -> u16 {
        FILTER_SHUFFLE
    }

    fn name(&self) -> &'static str {
        "shuffle"
    }

    fn decode(&self, input: Vec<u8>, ctx: &FilterContext<'_>) -> Result<Vec<u8>, FormatError> {
        let width = Self::width(ctx);
        if width <= 1 {
            return Ok(input);
        }
        Ok(h5chunk_accel::unshuffle(&input, width)?)
    }

    fn encode(&self, input: Vec<u8>, ctx: &FilterContext<'_>) -> Result<Vec<u8>, FormatError> {
        let width = Self::width(ctx);
        if width <= 1 {
            return Ok(input);
        }
        Ok(h5chunk_accel::shuffle(&input, width)?)
    }
}

/// Fletcher-32 (filter 3): trailing checksum of the chunk bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fletcher32Codec;

impl FilterCodec for Fletcher32Codec {
    fn id(&self) -> u16 {
        FILTER_FLETCHER32
    }

    fn name(&self) -> &'static str {
        "fletcher32"
    }

    fn decode(&self, mut input: Vec<u8>, _ctx: &FilterContext<'_>) -> Result<Vec<u8>, FormatError> {
        if input.len() < 4 {
            return Err(FormatError::corrupt(
                "fletcher32 chunk",
                format!("{} bytes cannot hold a checksum", input.len()),
            ));
        }
        let body_len = input.len() - 4;
        let tail = &input[body_len..];
        let stored = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        let computed = h5chunk_accel::checksum_fletcher32(&input[..body_len]);
        if stored != computed {
            if stored.swap_bytes() == computed {
                warn!("fletcher32 checksum stored in legacy byte order");
            } else {
                return Err(FormatError::Fletcher32Mismatch { stored, computed });
            }
        }
        input.truncate(body_len);
        Ok(input)
    }

    fn encode(&self, mut input: Vec<u8>, _ctx: &FilterContext<'_>) -> Result<Vec<u8>, FormatError> {
        let sum = h5chunk_accel::checksum_fletcher32(&input);
        input.extend_from_slice(&sum.to_le_bytes());
        Ok(input)
    }
}

/// Deflate (filter 1) through `h5chunk-filters`.
#[cfg(feature = "deflate")]
#[derive(Debug, Clone, Copy, Default)]
pub struct DeflateCodec;

#[cfg(feature = "deflate")]
impl FilterCodec for DeflateCodec {
    fn id(&self) -> u16 {
        FILTER_DEFLATE
    }

    fn name(&self) -> &'static str {
        "deflate"
    }

    fn decode(&self, input: Vec<u8>, ctx: &FilterContext<'_>) -> Result<Vec<u8>, FormatError> {
        h5chunk_filters::deflate_decompress(&input, ctx.output_hint).map_err(|message| FormatError::Codec {
            filter: "deflate",
            message,
        })
    }

    fn encode(&self, input: Vec<u8>, ctx: &FilterContext<'_>) -> Result<Vec<u8>, FormatError> {
        let level = ctx.description.client_data.first().copied().unwrap_or(6);
        h5chunk_filters::deflate_compress(&input, level).map_err(|message| FormatError::Codec {
            filter: "deflate",
            message,
        })
    }
}

/// bzip2 (filter 307) through `h5chunk-filters`.
#[cfg(feature = "bzip2")]
#[derive(Debug, Clone, Copy, Default)]
pub struct Bzip2Codec;

#[cfg(feature = "bzip2")]
impl FilterCodec for Bzip2Codec {
    fn id(&self) -> u16 {
        FILTER_BZIP2
    }

    fn name(&self) -> &'static str {
        "bzip2"
    }

    fn decode(&self, input: Vec<u8>, ctx: &FilterContext<'_>) -> Result<Vec<u8>, FormatError> {
        h5chunk_filters::bzip2_decompress(&input, ctx.output_hint).map_err(|message| {
            FormatError::Codec {
                filter: "bzip2",
                message,
            }
        })
    }

    fn encode(&self, input: Vec<u8>, ctx: &FilterContext<'_>) -> Result<Vec<u8>, FormatError> {
        let level = ctx.description.client_data.first().copied().unwrap_or(9);
        h5chunk_filters::bzip2_compress(&input, level).map_err(|message| FormatError::Codec {
            filter: "bzip2",
            message,
        })
    }
}
