//! Portable scalar implementations of all byte codecs.
//! These are the reference behaviour every SIMD path must reproduce.

/// Byte-transpose `src` (N elements of `width` bytes) into `dst`.
///
/// Element `i`, byte `j` lands at `dst[j * N + i]`.
pub fn shuffle(src: &[u8], dst: &mut [u8], width: usize) {
    debug_assert_eq!(src.len(), dst.len());
    let n = src.len() / width;
    shuffle_range(src, dst, width, n, 0);
}

/// Inverse of [`shuffle`].
pub fn unshuffle(src: &[u8], dst: &mut [u8], width: usize) {
    debug_assert_eq!(src.len(), dst.len());
    let n = src.len() / width;
    unshuffle_range(src, dst, width, n, 0);
}

/// Shuffle elements `start..n` only. SIMD kernels call this for their tail.
pub(crate) fn shuffle_range(src: &[u8], dst: &mut [u8], width: usize, n: usize, start: usize) {
    for j in 0..width {
        let plane = &mut dst[j * n..(j + 1) * n];
        for i in start..n {
            plane[i] = src[i * width + j];
        }
    }
}

/// Unshuffle elements `start..n` only.
pub(crate) fn unshuffle_range(src: &[u8], dst: &mut [u8], width: usize, n: usize, start: usize) {
    for j in 0..width {
        let plane = &src[j * n..(j + 1) * n];
        for i in start..n {
            dst[i * width + j] = plane[i];
        }
    }
}

/// Reverse the byte order of every `width`-byte element of `src` into `dst`.
pub fn swap_endianness(src: &[u8], dst: &mut [u8], width: usize) {
    debug_assert_eq!(src.len(), dst.len());
    swap_endianness_range(src, dst, width, 0);
}

pub(crate) fn swap_endianness_range(src: &[u8], dst: &mut [u8], width: usize, start: usize) {
    for (s, d) in src[start..]
        .chunks_exact(width)
        .zip(dst[start..].chunks_exact_mut(width))
    {
        for (k, byte) in s.iter().rev().enumerate() {
            d[k] = *byte;
        }
    }
}

/// Fletcher-32 as computed by HDF5's `H5_checksum_fletcher32`.
///
/// Data is consumed as big-endian 16-bit words; both sums start at zero and
/// are folded every 360 words, the largest run that cannot overflow.
pub fn checksum_fletcher32(data: &[u8]) -> u32 {
    let mut sum1: u32 = 0;
    let mut sum2: u32 = 0;

    let mut words = data.chunks_exact(2);
    loop {
        let mut block = 0;
        for pair in words.by_ref() {
            sum1 += ((pair[0] as u32) << 8) | pair[1] as u32;
            sum2 += sum1;
            block += 1;
            if block == 360 {
                break;
            }
        }
        if block == 0 {
            break;
        }
        sum1 = (sum1 & 0xffff) + (sum1 >> 16);
        sum2 = (sum2 & 0xffff) + (sum2 >> 16);
        if block < 360 {
            break;
        }
    }

    if let [last] = words.remainder() {
        sum1 += (*last as u32) << 8;
        sum2 += sum1;
        sum1 = (sum1 & 0xffff) + (sum1 >> 16);
        sum2 = (sum2 & 0xffff) + (sum2 >> 16);
    }

    sum1 = (sum1 & 0xffff) + (sum1 >> 16);
    sum2 = (sum2 & 0xffff) + (sum2 >> 16);

    (sum2 << 16) | sum1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shuffle_groups_byte_planes() {
        let src = [0x01, 0x02, 0x03, 0x04, 0x11, 0x12, 0x13, 0x14];
        let mut dst = [0u8; 8];
        shuffle(&src, &mut dst, 4);
        assert_eq!(dst, [0x01, 0x11, 0x02, 0x12, 0x03, 0x13, 0x04, 0x14]);
    }

    #[test]
    fn unshuffle_inverts_shuffle() {
        let src: Vec<u8> = (0..60).collect();
        let mut shuffled = vec![0u8; 60];
        let mut restored = vec![0u8; 60];
        shuffle(&src, &mut shuffled, 3);
        unshuffle(&shuffled, &mut restored, 3);
        assert_eq!(restored, src);
    }

    #[test]
    fn swap_endianness_reverses_each_element() {
        let src = [1, 2, 3, 4, 5, 6, 7, 8];
        let mut dst = [0u8; 8];
        swap_endianness(&src, &mut dst, 4);
        assert_eq!(dst, [4, 3, 2, 1, 8, 7, 6, 5]);
        swap_endianness(&src, &mut dst, 2);
        assert_eq!(dst, [2, 1, 4, 3, 6, 5, 8, 7]);
    }

    #[test]
    fn fletcher32_small_vectors() {
        assert_eq!(checksum_fletcher32(&[]), 0);
        assert_eq!(checksum_fletcher32(&[0x01, 0x02]), 0x0102_0102);
        assert_eq!(checksum_fletcher32(&[0xAB]), 0xAB00_AB00);
    }

    #[test]
    fn fletcher32_all_zero_block() {
        assert_eq!(checksum_fletcher32(&[0u8; 720]), 0);
    }

    #[test]
    fn fletcher32_folds_long_input() {
        // Two words of 0xFFFF: sum1 = 0x1FFFE folds to 0xFFFF, sum2 = 0x2FFFD folds to 0xFFFF.
        assert_eq!(checksum_fletcher32(&[0xFF; 4]), 0xFFFF_FFFF);
    }

    #[test]
    fn fletcher32_detects_single_byte_change() {
        let mut data: Vec<u8> = (0..2001u32).map(|i| (i * 7 % 251) as u8).collect();
        let before = checksum_fletcher32(&data);
        data[1234] ^= 0x10;
        assert_ne!(before, checksum_fletcher32(&data));
    }
}
