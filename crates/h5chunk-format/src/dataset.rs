//! Chunked dataset reads.
//!
//! [`ChunkedDataset`] ties the pieces together for one open dataset: it picks
//! the chunk index named by the layout once, resolves scaled coordinates to
//! stored chunks, runs the filter pipeline in reverse and keeps decoded chunks
//! in a per-handle [`ChunkCache`]. Unallocated chunks read as the fill value.

use std::borrow::Cow;

use log::debug;

use crate::chunk_cache::{CacheStats, ChunkCache};
use crate::chunk_index::{ChunkDescriptor, ChunkIndex};
use crate::coords::{ScaledGeometry, down_counts};
use crate::data_layout::{ChunkedLayout, DONT_FILTER_PARTIAL_BOUND_CHUNKS, DataLayout};
use crate::error::FormatError;
use crate::filter_pipeline::FilterPipeline;
use crate::filters::FilterRegistry;
use crate::io::{ByteSource, FileContext};
use crate::property_list::DatasetAccessProps;
use crate::selection::{Hyperslab, for_each_in_span};

/// Extent and element geometry of a chunked dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetShape {
    /// Current extent.
    pub dims: Vec<u64>,
    /// Maximum extent; [`crate::coords::UNLIMITED`] marks an unlimited dimension.
    pub max_dims: Vec<u64>,
    /// Chunk extent, same rank as `dims`.
    pub chunk_dims: Vec<u64>,
    /// Bytes per element.
    pub element_size: u32,
}

impl DatasetShape {
    pub fn new(dims: Vec<u64>, max_dims: Vec<u64>, chunk_dims: Vec<u64>, element_size: u32) -> Self {
        Self {
            dims,
            max_dims,
            chunk_dims,
            element_size,
        }
    }

    /// A shape whose maximum extent equals its current extent.
    pub fn fixed(dims: Vec<u64>, chunk_dims: Vec<u64>, element_size: u32) -> Self {
        Self {
            max_dims: dims.clone(),
            dims,
            chunk_dims,
            element_size,
        }
    }

    /// Combine dataspace extents with the chunk geometry of a layout message.
    pub fn from_layout(dims: Vec<u64>, max_dims: Vec<u64>, layout: &ChunkedLayout) -> Self {
        Self {
            dims,
            max_dims,
            chunk_dims: layout.chunk_dims.clone(),
            element_size: layout.element_size,
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Number of elements in the current extent.
    pub fn num_elements(&self) -> u64 {
        self.dims.iter().product()
    }
}

/// An open chunked dataset.
pub struct ChunkedDataset<S> {
    source: S,
    shape: DatasetShape,
    pipeline: FilterPipeline,
    registry: FilterRegistry,
    index: ChunkIndex,
    cache: ChunkCache,
    props: DatasetAccessProps,
    fill_chunk: Vec<u8>,
    skip_filters_on_edges: bool,
}

impl<S: ByteSource> ChunkedDataset<S> {
    /// Open a dataset with the built-in filters.
    pub fn open(
        source: S,
        file: FileContext,
        layout: &DataLayout,
        shape: DatasetShape,
        pipeline: FilterPipeline,
        props: DatasetAccessProps,
    ) -> Result<Self, FormatError> {
        Self::open_with_registry(
            source,
            file,
            layout,
            shape,
            pipeline,
            props,
            FilterRegistry::with_builtins(),
        )
    }

    /// Open a dataset that decodes through `registry`.
    pub fn open_with_registry(
        source: S,
        file: FileContext,
        layout: &DataLayout,
        shape: DatasetShape,
        pipeline: FilterPipeline,
        props: DatasetAccessProps,
        registry: FilterRegistry,
    ) -> Result<Self, FormatError> {
        let layout = layout.as_chunked()?;
        if shape.chunk_dims.len() != shape.rank() || shape.max_dims.len() != shape.rank() {
            return Err(FormatError::RankMismatch {
                expected: shape.rank(),
                actual: shape.chunk_dims.len().min(shape.max_dims.len()),
            });
        }
        if layout.chunk_dims != shape.chunk_dims || layout.element_size != shape.element_size {
            return Err(FormatError::corrupt(
                "data layout",
                format!(
                    "chunk shape {:?} x {} disagrees with dataset {:?} x {}",
                    layout.chunk_dims, layout.element_size, shape.chunk_dims, shape.element_size
                ),
            ));
        }
        if let Some((d, (&n, &m))) = shape
            .dims
            .iter()
            .zip(&shape.max_dims)
            .enumerate()
            .find(|(_, (n, m))| n > m)
        {
            return Err(FormatError::corrupt(
                "dataspace",
                format!("dimension {d}: extent {n} exceeds maximum {m}"),
            ));
        }

        let geometry = ScaledGeometry::new(&shape.dims, &shape.max_dims, &shape.chunk_dims, shape.element_size)?;
        let chunk_bytes = usize::try_from(geometry.chunk_bytes)
            .map_err(|_| FormatError::corrupt("chunk shape", "chunk does not fit in memory"))?;
        let fill_chunk = fill_buffer(props.fill_value.as_deref(), shape.element_size as usize, chunk_bytes)?;

        let index = ChunkIndex::from_layout(
            layout,
            geometry,
            file,
            !pipeline.is_empty(),
            props.verify_metadata_checksums,
        )?;
        debug!(
            "opened chunked dataset: dims {:?}, chunks {:?}, {} index, {} filters",
            shape.dims,
            shape.chunk_dims,
            index.kind_name(),
            pipeline.filters.len()
        );

        Ok(Self {
            source,
            cache: ChunkCache::new(props.chunk_cache),
            skip_filters_on_edges: layout.flags & DONT_FILTER_PARTIAL_BOUND_CHUNKS != 0,
            shape,
            pipeline,
            registry,
            index,
            props,
            fill_chunk,
        })
    }

    pub fn shape(&self) -> &DatasetShape {
        &self.shape
    }

    /// Chunk extent per dimension.
    pub fn chunk_shape(&self) -> &[u64] {
        &self.shape.chunk_dims
    }

    /// Name of the chunk index scheme in use.
    pub fn index_kind(&self) -> &'static str {
        self.index.kind_name()
    }

    pub fn geometry(&self) -> &ScaledGeometry {
        self.index.geometry()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached chunk.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Number of index structures decoded so far.
    pub fn decoded_index_structures(&self) -> usize {
        self.index.decoded_structures()
    }

    /// Where the chunk at `scaled` is stored.
    pub fn lookup(&mut self, scaled: &[u64]) -> Result<ChunkDescriptor, FormatError> {
        self.index.lookup(&self.source, scaled)
    }

    /// The decoded bytes of the chunk at `scaled`.
    pub fn get_decoded_chunk(&mut self, scaled: &[u64]) -> Result<Vec<u8>, FormatError> {
        Ok(self.decoded_chunk(scaled)?.into_owned())
    }

    /// Read a contiguous selection in row-major order.
    pub fn read_hyperslab(&mut self, selection: &Hyperslab) -> Result<Vec<u8>, FormatError> {
        selection.validate(&self.shape.dims)?;
        let element_size = self.shape.element_size as usize;
        let out_len = usize::try_from(selection.num_elements())
            .ok()
            .and_then(|n| n.checked_mul(element_size))
            .ok_or_else(|| FormatError::InvalidSelection("selection does not fit in memory".into()))?;
        let mut out = vec![0u8; out_len];
        let Some(span) = selection.chunk_span(&self.shape.chunk_dims) else {
            return Ok(out);
        };

        let chunk_dims = self.shape.chunk_dims.clone();
        let chunk_down = down_counts(&chunk_dims);
        let out_down = down_counts(&selection.count);
        for_each_in_span(&span, |scaled| {
            let chunk = self.decoded_chunk(scaled)?;
            copy_chunk_region(
                &chunk,
                scaled,
                &chunk_dims,
                &chunk_down,
                selection,
                &out_down,
                element_size,
                &mut out,
            )
        })?;
        Ok(out)
    }

    /// Read the whole current extent.
    pub fn read_all(&mut self) -> Result<Vec<u8>, FormatError> {
        let all = Hyperslab::all(&self.shape.dims);
        self.read_hyperslab(&all)
    }

    /// Give back the byte source.
    pub fn into_source(self) -> S {
        self.source
    }

    fn decoded_chunk(&mut self, scaled: &[u64]) -> Result<Cow<'_, [u8]>, FormatError> {
        if self.props.is_cancelled() {
            return Err(FormatError::Cancelled);
        }
        let Self {
            source,
            shape,
            pipeline,
            registry,
            index,
            cache,
            fill_chunk,
            skip_filters_on_edges,
            ..
        } = self;
        let unfiltered = pipeline.is_empty() || (*skip_filters_on_edges && is_edge_chunk(shape, scaled));
        cache.get(scaled, || {
            let descriptor = index.lookup(&*source, scaled)?;
            if !descriptor.is_allocated() {
                return Ok(fill_chunk.clone());
            }
            let chunk_bytes = fill_chunk.len();
            if unfiltered {
                return source.read_vec(descriptor.address, chunk_bytes);
            }
            let stored_size = usize::try_from(descriptor.stored_size)
                .map_err(|_| FormatError::corrupt("chunk", "stored size does not fit in memory"))?;
            let raw = source.read_vec(descriptor.address, stored_size)?;
            let decoded = registry.decode(
                pipeline,
                descriptor.filter_mask,
                raw,
                shape.element_size as usize,
                chunk_bytes,
            )?;
            if decoded.len() != chunk_bytes {
                return Err(FormatError::corrupt(
                    "chunk",
                    format!(
                        "chunk {scaled:?} decoded to {} bytes, expected {chunk_bytes}",
                        decoded.len()
                    ),
                ));
            }
            Ok(decoded)
        })
    }
}

impl<S> std::fmt::Debug for ChunkedDataset<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedDataset")
            .field("shape", &self.shape)
            .field("index", &self.index.kind_name())
            .field("filters", &self.pipeline.filters.len())
            .field("cache", &self.cache.stats())
            .finish()
    }
}

/// One chunk's worth of fill bytes.
fn fill_buffer(fill: Option<&[u8]>, element_size: usize, chunk_bytes: usize) -> Result<Vec<u8>, FormatError> {
    match fill {
        None => Ok(vec![0u8; chunk_bytes]),
        Some(pattern) if pattern.len() == element_size && element_size > 0 => {
            Ok(pattern.iter().copied().cycle().take(chunk_bytes).collect())
        }
        Some(pattern) => Err(FormatError::corrupt(
            "fill value",
            format!("{} bytes for a {element_size}-byte element", pattern.len()),
        )),
    }
}

/// Whether the chunk at `scaled` extends past the current extent.
fn is_edge_chunk(shape: &DatasetShape, scaled: &[u64]) -> bool {
    scaled
        .iter()
        .zip(&shape.chunk_dims)
        .zip(&shape.dims)
        .any(|((&s, &k), &n)| s.saturating_add(1).saturating_mul(k) > n)
}

/// Copy the part of one decoded chunk that falls inside `selection`.
#[allow(clippy::too_many_arguments)]
fn copy_chunk_region(
    chunk: &[u8],
    scaled: &[u64],
    chunk_dims: &[u64],
    chunk_down: &[u64],
    selection: &Hyperslab,
    out_down: &[u64],
    element_size: usize,
    out: &mut [u8],
) -> Result<(), FormatError> {
    let rank = chunk_dims.len();
    if rank == 0 {
        out[..element_size].copy_from_slice(&chunk[..element_size]);
        return Ok(());
    }
    let origin: Vec<u64> = scaled.iter().zip(chunk_dims).map(|(&s, &k)| s * k).collect();
    // Inclusive overlap of the chunk box and the selection box.
    let overlap: Vec<(u64, u64)> = (0..rank)
        .map(|d| {
            let lo = origin[d].max(selection.start[d]);
            let hi = (origin[d] + chunk_dims[d]).min(selection.start[d] + selection.count[d]) - 1;
            (lo, hi)
        })
        .collect();

    let last = rank - 1;
    let (run_lo, run_hi) = overlap[last];
    let run = (run_hi - run_lo + 1) as usize * element_size;
    for_each_in_span(&overlap[..last], |outer| {
        let mut src = (run_lo - origin[last]) * chunk_down[last];
        let mut dst = (run_lo - selection.start[last]) * out_down[last];
        for d in 0..last {
            src += (outer[d] - origin[d]) * chunk_down[d];
            dst += (outer[d] - selection.start[d]) * out_down[d];
        }
        let src = src as usize * element_size;
        let dst = dst as usize * element_size;
        out[dst..dst + run].copy_from_slice(&chunk[src..src + run]);
        Ok(())
    })
}
