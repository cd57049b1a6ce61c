//! External compression codecs for the h5chunk filter pipeline.
//!
//! The filter pipeline treats these as opaque byte transforms:
//!
//! - **deflate** (HDF5 filter 1): flate2 on `miniz_oxide` by default,
//!   on `zlib-ng` with the `fast-deflate` feature
//! - **bzip2** (HDF5 filter 307): behind the `bzip2` feature
//!
//! Errors are returned as strings; the pipeline wraps them with the filter
//! identity.

pub mod deflate;

#[cfg(feature = "bzip2")]
pub mod bz2;

/// HDF5 filter identifier for deflate.
pub const DEFLATE_FILTER_ID: u16 = 1;
/// Registered HDF5 filter identifier for bzip2.
pub const BZIP2_FILTER_ID: u16 = 307;

/// Decompress zlib-compressed data.
///
/// Uses the fastest compiled-in backend. When `max_output_size` > 0, the
/// output buffer is pre-allocated and output beyond it is rejected.
pub fn deflate_decompress(data: &[u8], max_output_size: usize) -> Result<Vec<u8>, String> {
    log::trace!(
        "deflate: {} -> {} bytes via {}",
        data.len(),
        max_output_size,
        deflate::active_backend()
    );
    deflate::decompress(data, max_output_size)
}

/// Compress data with zlib framing.
pub fn deflate_compress(data: &[u8], level: u32) -> Result<Vec<u8>, String> {
    deflate::compress(data, level)
}

/// Decompress zlib data using miniz_oxide directly.
/// Always available regardless of feature flags, for cross-checking backends.
pub fn deflate_decompress_miniz(data: &[u8]) -> Result<Vec<u8>, String> {
    miniz_oxide::inflate::decompress_to_vec_zlib(data)
        .map_err(|e| format!("miniz_oxide decompress error: {e:?}"))
}

/// Compress data using miniz_oxide directly.
pub fn deflate_compress_miniz(data: &[u8], level: u32) -> Result<Vec<u8>, String> {
    let level = level.min(10) as u8;
    Ok(miniz_oxide::deflate::compress_to_vec_zlib(data, level))
}

/// Returns the name of the active deflate backend.
pub fn deflate_backend() -> &'static str {
    deflate::active_backend()
}

/// Decompress bzip2 data.
#[cfg(feature = "bzip2")]
pub fn bzip2_decompress(data: &[u8], output_hint: usize) -> Result<Vec<u8>, String> {
    bz2::decompress(data, output_hint)
}

/// Compress data with bzip2 at block size `level`.
#[cfg(feature = "bzip2")]
pub fn bzip2_compress(data: &[u8], level: u32) -> Result<Vec<u8>, String> {
    bz2::compress(data, level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_decompress_roundtrip() {
        let data: Vec<u8> = (0..1000).map(|i| (i % 256) as u8).collect();
        let compressed = deflate_compress(&data, 6).unwrap();
        let decompressed = deflate_decompress(&compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn decompress_python_zlib() {
        // python3 -c "import zlib; print(list(zlib.compress(bytes(range(10)), 6)))"
        let compressed: Vec<u8> = vec![
            120, 156, 99, 96, 100, 98, 102, 97, 101, 99, 231, 224, 4, 0, 0, 175, 0, 46,
        ];
        let decompressed = deflate_decompress(&compressed, 10).unwrap();
        assert_eq!(decompressed, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn cross_backend_compatibility() {
        let data: Vec<u8> = (0..500).map(|i| (i * 7 % 256) as u8).collect();
        let compressed = deflate_compress_miniz(&data, 6).unwrap();
        assert_eq!(deflate_decompress(&compressed, data.len()).unwrap(), data);

        let compressed = deflate_compress(&data, 6).unwrap();
        assert_eq!(deflate_decompress_miniz(&compressed).unwrap(), data);
    }

    #[test]
    fn backend_reports_name() {
        let name = deflate_backend();
        assert!(["miniz_oxide", "zlib-ng"].contains(&name), "unexpected backend: {name}");
    }

    #[cfg(feature = "bzip2")]
    #[test]
    fn bzip2_roundtrip() {
        let data = vec![42u8; 10_000];
        let compressed = bzip2_compress(&data, 9).unwrap();
        assert_eq!(bzip2_decompress(&compressed, data.len()).unwrap(), data);
    }
}
