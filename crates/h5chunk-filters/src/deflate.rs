//! Deflate (zlib-wrapped) backends.
//!
//! flate2 is always the primary path: it runs on miniz_oxide by default and
//! on zlib-ng when the `fast-deflate` feature is enabled, which is what C HDF5
//! links against in most distributions.

use std::io::{Read, Write};

/// Decompress into a buffer pre-sized to the expected output.
///
/// HDF5 chunks have a known decoded size, so the common case never
/// reallocates. Output that would exceed `output_size` is an error rather
/// than silently truncated.
pub(crate) fn flate2_decompress_preallocated(
    data: &[u8],
    output_size: usize,
) -> Result<Vec<u8>, String> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut output = vec![0u8; output_size];
    let mut total_read = 0;

    while total_read < output.len() {
        match decoder.read(&mut output[total_read..]) {
            Ok(0) => break,
            Ok(n) => total_read += n,
            Err(e) => return Err(e.to_string()),
        }
    }

    if total_read == output.len() {
        let mut probe = [0u8; 1];
        match decoder.read(&mut probe) {
            Ok(0) => {}
            Ok(_) => {
                return Err(format!(
                    "deflate stream decodes to more than the expected {output_size} bytes"
                ));
            }
            Err(e) => return Err(e.to_string()),
        }
    }

    output.truncate(total_read);
    Ok(output)
}

/// Decompress when the output size is unknown.
pub(crate) fn flate2_decompress_streaming(data: &[u8]) -> Result<Vec<u8>, String> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut result = Vec::new();
    decoder.read_to_end(&mut result).map_err(|e| e.to_string())?;
    Ok(result)
}

pub(crate) fn flate2_compress(data: &[u8], level: u32) -> Result<Vec<u8>, String> {
    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(level.min(9)));
    encoder.write_all(data).map_err(|e| e.to_string())?;
    encoder.finish().map_err(|e| e.to_string())
}

/// Decompress zlib data. `output_hint` > 0 pre-allocates the output.
pub fn decompress(data: &[u8], output_hint: usize) -> Result<Vec<u8>, String> {
    if output_hint > 0 {
        flate2_decompress_preallocated(data, output_hint)
    } else {
        flate2_decompress_streaming(data)
    }
}

/// Compress with zlib framing at `level` (clamped to 0..=9).
pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>, String> {
    flate2_compress(data, level)
}

/// Name of the flate2 backend compiled in.
pub fn active_backend() -> &'static str {
    if cfg!(feature = "fast-deflate") {
        "zlib-ng"
    } else {
        "miniz_oxide"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_hint() {
        let data: Vec<u8> = (0..1000).map(|i| (i % 256) as u8).collect();
        let compressed = compress(&data, 6).unwrap();
        let decompressed = decompress(&compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn roundtrip_without_hint() {
        let data: Vec<u8> = (0..500).map(|i| (i % 256) as u8).collect();
        let compressed = compress(&data, 6).unwrap();
        assert_eq!(decompress(&compressed, 0).unwrap(), data);
    }

    #[test]
    fn hint_larger_than_output_truncates() {
        let data = vec![7u8; 300];
        let compressed = compress(&data, 6).unwrap();
        assert_eq!(decompress(&compressed, 4096).unwrap(), data);
    }

    #[test]
    fn hint_smaller_than_output_is_error() {
        let data = vec![7u8; 300];
        let compressed = compress(&data, 6).unwrap();
        let err = decompress(&compressed, 100).unwrap_err();
        assert!(err.contains("more than the expected 100 bytes"), "{err}");
    }

    #[test]
    fn empty_input() {
        let compressed = compress(&[], 6).unwrap();
        assert!(decompress(&compressed, 0).unwrap().is_empty());
    }

    #[test]
    fn preallocated_vs_streaming_match() {
        let data: Vec<u8> = (0..2000).map(|i| (i * 7 % 256) as u8).collect();
        let compressed = flate2_compress(&data, 6).unwrap();
        let prealloc = flate2_decompress_preallocated(&compressed, data.len()).unwrap();
        let streaming = flate2_decompress_streaming(&compressed).unwrap();
        assert_eq!(prealloc, streaming);
        assert_eq!(prealloc, data);
    }

    #[test]
    fn garbage_is_error() {
        assert!(decompress(&[0x00, 0x01, 0x02, 0x03], 16).is_err());
    }
}
