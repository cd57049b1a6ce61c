//! bzip2 codec (HDF5 registered filter 307).

use std::io::{Read, Write};

/// Decompress a bzip2 stream. `output_hint` sizes the initial buffer.
pub fn decompress(data: &[u8], output_hint: usize) -> Result<Vec<u8>, String> {
    let mut decoder = bzip2::read::BzDecoder::new(data);
    let mut output = Vec::with_capacity(output_hint);
    decoder
        .read_to_end(&mut output)
        .map_err(|e| format!("bzip2 decompress error: {e}"))?;
    Ok(output)
}

/// Compress with block size `level` (1..=9, clamped).
pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>, String> {
    let level = level.clamp(1, 9);
    let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::new(level));
    encoder
        .write_all(data)
        .map_err(|e| format!("bzip2 compress error: {e}"))?;
    encoder
        .finish()
        .map_err(|e| format!("bzip2 compress error: {e}"))
}
