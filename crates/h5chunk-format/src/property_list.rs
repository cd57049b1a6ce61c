//! Dataset access properties.
//!
//! Property lists group the per-open configuration of a chunked dataset
//! handle: chunk cache limits, metadata checksum verification, the fill
//! value for unallocated chunks and an optional cancellation token.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::chunk_cache::ChunkCacheConfig;

/// Shared flag checked between chunks of a multi-chunk read.
///
/// Clones observe the same flag, so a token can be handed to another thread
/// and cancelled from there.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Dataset access properties.
#[derive(Debug, Clone)]
pub struct DatasetAccessProps {
    /// Chunk cache limits.
    pub chunk_cache: ChunkCacheConfig,
    /// Verify lookup3 checksums of chunk index structures.
    pub verify_metadata_checksums: bool,
    /// One element's fill bytes; zeros when unset.
    pub fill_value: Option<Vec<u8>>,
    /// Cancellation observed at chunk boundaries.
    pub cancel: Option<CancelToken>,
}

impl Default for DatasetAccessProps {
    fn default() -> Self {
        Self {
            chunk_cache: ChunkCacheConfig::default(),
            verify_metadata_checksums: true,
            fill_value: None,
            cancel: None,
        }
    }
}

impl DatasetAccessProps {
    /// Create default dataset access properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set chunk cache size in bytes and number of slots.
    pub fn chunk_cache(mut self, bytes: usize, slots: usize) -> Self {
        self.chunk_cache = ChunkCacheConfig {
            max_slots: slots,
            max_bytes: bytes,
        };
        self
    }

    /// Enable or disable metadata checksum verification.
    pub fn verify_metadata_checksums(mut self, verify: bool) -> Self {
        self.verify_metadata_checksums = verify;
        self
    }

    /// Set the fill value of one element.
    pub fn fill_value(mut self, bytes: Vec<u8>) -> Self {
        self.fill_value = Some(bytes);
        self
    }

    /// Attach a cancellation token.
    pub fn cancellation(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}
