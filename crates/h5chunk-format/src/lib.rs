//! Chunked dataset storage engine for HDF5-compatible files.
//!
//! This crate translates scaled chunk coordinates into stored chunks through
//! the six HDF5 chunk index schemes, runs the filter pipeline in both
//! directions, caches decoded chunks and assembles hyperslab reads. Files are
//! reached only through a [`ByteSource`]; opening files and parsing object
//! headers belong to the caller.

pub mod btree_v1;
pub mod btree_v2;
pub mod checksum;
pub mod chunk_cache;
pub mod chunk_index;
pub mod coords;
pub mod data_layout;
pub mod dataset;
pub mod error;
pub mod extensible_array;
pub(crate) mod field;
pub mod filter_pipeline;
pub mod filters;
pub mod fixed_array;
pub mod io;
pub mod property_list;
pub mod scale_offset;
pub mod selection;
pub mod writer;

pub use chunk_cache::{CacheStats, ChunkCache, ChunkCacheConfig};
pub use chunk_index::{ChunkDescriptor, ChunkIndex};
pub use coords::{ScaledGeometry, UNLIMITED};
pub use data_layout::{ChunkIndexParams, ChunkedLayout, DataLayout};
pub use dataset::{ChunkedDataset, DatasetShape};
pub use error::{ErrorKind, FormatError};
pub use field::UNDEFINED_ADDRESS;
pub use filter_pipeline::{FilterDescription, FilterPipeline};
pub use filters::{FilterCodec, FilterContext, FilterRegistry};
pub use io::{ByteSource, FileContext, ReaderSource, SliceSource};
#[cfg(feature = "mmap")]
pub use io::MmapSource;
pub use property_list::{CancelToken, DatasetAccessProps};
pub use selection::Hyperslab;
pub use writer::{ChunkAppender, FixedArrayBuilder};
