//! SIMD-accelerated byte codecs for h5chunk.
//!
//! This crate provides runtime-dispatched implementations of the byte-level
//! transforms used when reading chunked HDF5 data: the shuffle filter and its
//! inverse, element byte-order conversion, and the Fletcher-32 checksum.
//!
//! All public functions select the best available backend at runtime. The
//! scalar module is the reference: every SIMD path produces bit-identical
//! output, including for the tail that does not fill a whole vector.

use std::sync::OnceLock;

use thiserror::Error;

pub mod scalar;

#[cfg(target_arch = "aarch64")]
pub mod neon;

#[cfg(target_arch = "x86_64")]
pub mod avx2;

#[cfg(target_arch = "x86_64")]
pub mod sse4;

/// Available SIMD backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// ARM NEON (always available on aarch64)
    Neon,
    /// x86_64 AVX2
    Avx2,
    /// x86_64 SSE4.1 (implies SSSE3 byte shuffles)
    Sse4,
    /// Portable scalar fallback
    Scalar,
}

/// Errors returned by the byte codecs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ByteCodecError {
    /// Element width of zero.
    #[error("element width must be non-zero")]
    ZeroWidth,
    /// Input length is not a whole number of elements.
    #[error("buffer of {len} bytes is not a multiple of the {width}-byte element width")]
    LengthNotMultiple {
        /// Input length in bytes.
        len: usize,
        /// Element width in bytes.
        width: usize,
    },
    /// Output buffer has the wrong size.
    #[error("output buffer holds {actual} bytes, expected {expected}")]
    OutputLength {
        /// Required output length.
        expected: usize,
        /// Provided output length.
        actual: usize,
    },
    /// Requested backend cannot run on this processor.
    #[error("{0:?} backend is not available on this processor")]
    BackendUnavailable(Backend),
}

static BACKEND: OnceLock<Backend> = OnceLock::new();

/// Detect the best available SIMD backend. The probe runs once per process.
pub fn detect_backend() -> Backend {
    *BACKEND.get_or_init(probe_backend)
}

fn probe_backend() -> Backend {
    #[cfg(target_arch = "aarch64")]
    {
        return Backend::Neon;
    }

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            return Backend::Avx2;
        }
        if is_x86_feature_detected!("sse4.1") {
            return Backend::Sse4;
        }
    }

    #[allow(unreachable_code)]
    Backend::Scalar
}

/// Whether `backend` can run on this processor.
pub fn is_available(backend: Backend) -> bool {
    match backend {
        Backend::Scalar => true,
        #[cfg(target_arch = "aarch64")]
        Backend::Neon => true,
        #[cfg(target_arch = "x86_64")]
        Backend::Avx2 => is_x86_feature_detected!("avx2"),
        #[cfg(target_arch = "x86_64")]
        Backend::Sse4 => is_x86_feature_detected!("sse4.1"),
        #[allow(unreachable_patterns)]
        _ => false,
    }
}

/// Every backend usable on this processor, widest first.
pub fn available_backends() -> Vec<Backend> {
    [Backend::Avx2, Backend::Sse4, Backend::Neon, Backend::Scalar]
        .into_iter()
        .filter(|&b| is_available(b))
        .collect()
}

fn validate(src_len: usize, dst_len: usize, width: usize) -> Result<(), ByteCodecError> {
    if width == 0 {
        return Err(ByteCodecError::ZeroWidth);
    }
    if src_len % width != 0 {
        return Err(ByteCodecError::LengthNotMultiple {
            len: src_len,
            width,
        });
    }
    if dst_len != src_len {
        return Err(ByteCodecError::OutputLength {
            expected: src_len,
            actual: dst_len,
        });
    }
    Ok(())
}

fn ensure_available(backend: Backend) -> Result<(), ByteCodecError> {
    if is_available(backend) {
        Ok(())
    } else {
        Err(ByteCodecError::BackendUnavailable(backend))
    }
}

// ---------------------------------------------------------------------------
// Shuffle
// ---------------------------------------------------------------------------

/// Shuffle `src` (elements of `width` bytes) into a new buffer.
pub fn shuffle(src: &[u8], width: usize) -> Result<Vec<u8>, ByteCodecError> {
    let mut dst = vec![0u8; src.len()];
    shuffle_into(src, &mut dst, width)?;
    Ok(dst)
}

/// Shuffle `src` into `dst`, which must have the same length.
pub fn shuffle_into(src: &[u8], dst: &mut [u8], width: usize) -> Result<(), ByteCodecError> {
    shuffle_with_backend(detect_backend(), src, dst, width)
}

/// Shuffle with an explicit backend. Used to compare backends in tests and benches.
pub fn shuffle_with_backend(
    backend: Backend,
    src: &[u8],
    dst: &mut [u8],
    width: usize,
) -> Result<(), ByteCodecError> {
    validate(src.len(), dst.len(), width)?;
    ensure_available(backend)?;
    if width == 1 {
        dst.copy_from_slice(src);
        return Ok(());
    }
    match backend {
        #[cfg(target_arch = "aarch64")]
        Backend::Neon => unsafe { neon::shuffle(src, dst, width) },

        #[cfg(target_arch = "x86_64")]
        Backend::Avx2 => unsafe { avx2::shuffle(src, dst, width) },

        #[cfg(target_arch = "x86_64")]
        Backend::Sse4 => unsafe { sse4::shuffle(src, dst, width) },

        _ => scalar::shuffle(src, dst, width),
    }
    Ok(())
}

/// Undo [`shuffle`] into a new buffer.
pub fn unshuffle(src: &[u8], width: usize) -> Result<Vec<u8>, ByteCodecError> {
    let mut dst = vec![0u8; src.len()];
    unshuffle_into(src, &mut dst, width)?;
    Ok(dst)
}

/// Undo [`shuffle`] into `dst`, which must have the same length.
pub fn unshuffle_into(src: &[u8], dst: &mut [u8], width: usize) -> Result<(), ByteCodecError> {
    unshuffle_with_backend(detect_backend(), src, dst, width)
}

/// Unshuffle with an explicit backend.
pub fn unshuffle_with_backend(
    backend: Backend,
    src: &[u8],
    dst: &mut [u8],
    width: usize,
) -> Result<(), ByteCodecError> {
    validate(src.len(), dst.len(), width)?;
    ensure_available(backend)?;
    if width == 1 {
        dst.copy_from_slice(src);
        return Ok(());
    }
    match backend {
        #[cfg(target_arch = "aarch64")]
        Backend::Neon => unsafe { neon::unshuffle(src, dst, width) },

        #[cfg(target_arch = "x86_64")]
        Backend::Avx2 => unsafe { avx2::unshuffle(src, dst, width) },

        #[cfg(target_arch = "x86_64")]
        Backend::Sse4 => unsafe { sse4::unshuffle(src, dst, width) },

        _ => scalar::unshuffle(src, dst, width),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Byte order
// ---------------------------------------------------------------------------

/// Reverse the byte order of each `width`-byte element into a new buffer.
///
/// Conversion never happens in place. `width == 1` is a copy.
pub fn swap_endianness(src: &[u8], width: usize) -> Result<Vec<u8>, ByteCodecError> {
    let mut dst = vec![0u8; src.len()];
    swap_endianness_into(src, &mut dst, width)?;
    Ok(dst)
}

/// Reverse the byte order of each element of `src` into `dst`.
pub fn swap_endianness_into(
    src: &[u8],
    dst: &mut [u8],
    width: usize,
) -> Result<(), ByteCodecError> {
    swap_endianness_with_backend(detect_backend(), src, dst, width)
}

/// Byte-order conversion with an explicit backend.
pub fn swap_endianness_with_backend(
    backend: Backend,
    src: &[u8],
    dst: &mut [u8],
    width: usize,
) -> Result<(), ByteCodecError> {
    validate(src.len(), dst.len(), width)?;
    ensure_available(backend)?;
    if width == 1 {
        dst.copy_from_slice(src);
        return Ok(());
    }
    match backend {
        #[cfg(target_arch = "aarch64")]
        Backend::Neon => unsafe { neon::swap_endianness(src, dst, width) },

        #[cfg(target_arch = "x86_64")]
        Backend::Avx2 => unsafe { avx2::swap_endianness(src, dst, width) },

        #[cfg(target_arch = "x86_64")]
        Backend::Sse4 => unsafe { sse4::swap_endianness(src, dst, width) },

        _ => scalar::swap_endianness(src, dst, width),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Checksums
// ---------------------------------------------------------------------------

/// Compute the HDF5 Fletcher-32 checksum of `data`.
pub fn checksum_fletcher32(data: &[u8]) -> u32 {
    scalar::checksum_fletcher32(data)
}
