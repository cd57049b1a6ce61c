//! Error types for the chunk storage engine.

use h5chunk_accel::ByteCodecError;
use thiserror::Error;

/// Broad category of a [`FormatError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed on-disk metadata or an invalid request shape.
    Structural,
    /// Valid input that this engine (or this build) cannot decode.
    Unsupported,
    /// A data checksum did not verify.
    Integrity,
    /// An external codec reported failure.
    Codec,
    /// The byte source failed.
    Io,
    /// The caller cancelled the read.
    Cancelled,
}

/// Errors produced while locating, reading and decoding chunks.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormatError {
    /// Unexpected end of data.
    #[error("unexpected EOF: need {expected} bytes, have {available}")]
    UnexpectedEof {
        /// Number of bytes expected.
        expected: usize,
        /// Number of bytes actually available.
        available: usize,
    },
    /// A structure did not start with its signature.
    #[error("invalid {structure} signature {found:?}")]
    BadSignature {
        /// Expected four-character signature.
        structure: &'static str,
        /// Bytes found instead.
        found: [u8; 4],
    },
    /// A structure carries a version this engine does not know.
    #[error("unsupported {structure} version {version}")]
    UnsupportedVersion {
        /// Structure name.
        structure: &'static str,
        /// Version byte found.
        version: u8,
    },
    /// Invalid offset size (must be 2, 4, or 8).
    #[error("invalid offset size: {0} (must be 2, 4, or 8)")]
    InvalidOffsetSize(u8),
    /// Invalid length size (must be 2, 4, or 8).
    #[error("invalid length size: {0} (must be 2, 4, or 8)")]
    InvalidLengthSize(u8),
    /// Unknown data layout message version.
    #[error("invalid data layout version: {0}")]
    InvalidLayoutVersion(u8),
    /// Unknown data layout class.
    #[error("invalid data layout class: {0}")]
    InvalidLayoutClass(u8),
    /// Unknown filter pipeline message version.
    #[error("invalid filter pipeline version: {0}")]
    InvalidFilterPipelineVersion(u8),
    /// Counts or sizes inside a structure contradict each other.
    #[error("corrupt {structure}: {detail}")]
    CorruptStructure {
        /// Structure name.
        structure: &'static str,
        /// What was inconsistent.
        detail: String,
    },
    /// Jenkins lookup3 checksum of an index structure did not match.
    #[error(
        "{structure} checksum mismatch at {address:#x}: stored {stored:#010x}, computed {computed:#010x}"
    )]
    MetadataChecksumMismatch {
        /// Structure name.
        structure: &'static str,
        /// File address of the structure.
        address: u64,
        /// Checksum stored in the file.
        stored: u32,
        /// Checksum computed over the structure.
        computed: u32,
    },
    /// A coordinate has the wrong number of dimensions.
    #[error("rank mismatch: expected {expected} dimensions, got {actual}")]
    RankMismatch {
        /// Rank the operation was set up for.
        expected: usize,
        /// Rank supplied.
        actual: usize,
    },
    /// A chunk coordinate that no chunk of this index can have.
    #[error("invalid chunk coordinate {0:?}")]
    InvalidCoordinate(Vec<u64>),
    /// A selection that does not fit the dataset.
    #[error("invalid selection: {0}")]
    InvalidSelection(String),
    /// A filter id with no registered codec.
    #[error("unsupported filter {id}{}", .name.as_deref().map(|n| format!(" ({n})")).unwrap_or_default())]
    UnsupportedFilter {
        /// Filter identifier.
        id: u16,
        /// Name from the pipeline message, if any.
        name: Option<String>,
    },
    /// A feature that is recognised but not implemented.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
    /// A layout the chunk engine does not service.
    #[error("unsupported layout: {0}")]
    UnsupportedLayout(String),
    /// Unknown chunk index type in a version 4 layout.
    #[error("unsupported chunk index type {0}")]
    UnsupportedChunkIndex(u8),
    /// Fletcher-32 checksum mismatch.
    #[error("fletcher32 mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    Fletcher32Mismatch {
        /// Checksum stored after the chunk data.
        stored: u32,
        /// Checksum computed over the chunk data.
        computed: u32,
    },
    /// An external codec failed.
    #[error("{filter} codec error: {message}")]
    Codec {
        /// Codec name.
        filter: &'static str,
        /// Message reported by the codec.
        message: String,
    },
    /// Shuffle or byte-order conversion rejected its input.
    #[error(transparent)]
    ByteCodec(#[from] ByteCodecError),
    /// The byte source failed.
    #[error("I/O error: {0}")]
    Io(String),
    /// The read was cancelled.
    #[error("read cancelled")]
    Cancelled,
}

impl FormatError {
    /// The category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FormatError::UnexpectedEof { .. }
            | FormatError::BadSignature { .. }
            | FormatError::UnsupportedVersion { .. }
            | FormatError::InvalidOffsetSize(_)
            | FormatError::InvalidLengthSize(_)
            | FormatError::InvalidLayoutVersion(_)
            | FormatError::InvalidLayoutClass(_)
            | FormatError::InvalidFilterPipelineVersion(_)
            | FormatError::CorruptStructure { .. }
            | FormatError::MetadataChecksumMismatch { .. }
            | FormatError::RankMismatch { .. }
            | FormatError::InvalidCoordinate(_)
            | FormatError::InvalidSelection(_) => ErrorKind::Structural,
            FormatError::UnsupportedFilter { .. }
            | FormatError::UnsupportedFeature(_)
            | FormatError::UnsupportedLayout(_)
            | FormatError::UnsupportedChunkIndex(_) => ErrorKind::Unsupported,
            FormatError::Fletcher32Mismatch { .. } => ErrorKind::Integrity,
            FormatError::Codec { .. } | FormatError::ByteCodec(_) => ErrorKind::Codec,
            FormatError::Io(_) => ErrorKind::Io,
            FormatError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn corrupt(structure: &'static str, detail: impl Into<String>) -> Self {
        FormatError::CorruptStructure {
            structure,
            detail: detail.into(),
        }
    }
}

impl From<std::io::Error> for FormatError {
    fn from(e: std::io::Error) -> Self {
        FormatError::Io(e.to_string())
    }
}
