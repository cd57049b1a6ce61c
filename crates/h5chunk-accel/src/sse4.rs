//! SSE4.1 byte codecs for x86_64.
//! All functions require runtime detection via is_x86_feature_detected!("sse4.1").
//!
//! Kernels work on blocks of 16 elements; the remainder goes through
//! [`crate::scalar`].

#![cfg(target_arch = "x86_64")]

use std::arch::x86_64::*;

use crate::scalar;

pub(crate) const SWAP2: [u8; 16] = [1, 0, 3, 2, 5, 4, 7, 6, 9, 8, 11, 10, 13, 12, 15, 14];
pub(crate) const SWAP4: [u8; 16] = [3, 2, 1, 0, 7, 6, 5, 4, 11, 10, 9, 8, 15, 14, 13, 12];
pub(crate) const SWAP8: [u8; 16] = [7, 6, 5, 4, 3, 2, 1, 0, 15, 14, 13, 12, 11, 10, 9, 8];
pub(crate) const SWAP16: [u8; 16] = [15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0];

// Gather byte j of each element in a 16-byte register into contiguous runs.
pub(crate) const GATHER2: [u8; 16] = [0, 2, 4, 6, 8, 10, 12, 14, 1, 3, 5, 7, 9, 11, 13, 15];
pub(crate) const GATHER4: [u8; 16] = [0, 4, 8, 12, 1, 5, 9, 13, 2, 6, 10, 14, 3, 7, 11, 15];
pub(crate) const GATHER8: [u8; 16] = [0, 8, 1, 9, 2, 10, 3, 11, 4, 12, 5, 13, 6, 14, 7, 15];

pub(crate) fn swap_mask(width: usize) -> Option<&'static [u8; 16]> {
    match width {
        2 => Some(&SWAP2),
        4 => Some(&SWAP4),
        8 => Some(&SWAP8),
        16 => Some(&SWAP16),
        _ => None,
    }
}

#[inline(always)]
unsafe fn load(p: *const u8) -> __m128i {
    unsafe { _mm_loadu_si128(p as *const __m128i) }
}

#[inline(always)]
unsafe fn store(p: *mut u8, v: __m128i) {
    unsafe { _mm_storeu_si128(p as *mut __m128i, v) }
}

/// SSE4.1 byte swap of every `width`-byte element.
///
/// # Safety
/// Caller must verify is_x86_feature_detected!("sse4.1"), that
/// `src.len() == dst.len()` and that the length is a multiple of `width`.
#[target_feature(enable = "sse4.1")]
pub unsafe fn swap_endianness(src: &[u8], dst: &mut [u8], width: usize) { unsafe {
    let Some(mask) = swap_mask(width) else {
        scalar::swap_endianness(src, dst, width);
        return;
    };
    let m = load(mask.as_ptr());
    let len = src.len();
    let mut i = 0;
    while i + 16 <= len {
        let v = load(src.as_ptr().add(i));
        store(dst.as_mut_ptr().add(i), _mm_shuffle_epi8(v, m));
        i += 16;
    }
    scalar::swap_endianness_range(src, dst, width, i);
}}

/// SSE4.1 shuffle.
///
/// # Safety
/// Same contract as [`swap_endianness`].
#[target_feature(enable = "sse4.1")]
pub unsafe fn shuffle(src: &[u8], dst: &mut [u8], width: usize) { unsafe {
    let n = src.len() / width;
    let blocks = n / 16;
    match width {
        2 => shuffle2(src, dst, n, blocks),
        4 => shuffle4(src, dst, n, blocks),
        8 => shuffle8(src, dst, n, blocks),
        _ => {
            scalar::shuffle(src, dst, width);
            return;
        }
    }
    scalar::shuffle_range(src, dst, width, n, blocks * 16);
}}

/// SSE4.1 unshuffle.
///
/// # Safety
/// Same contract as [`swap_endianness`].
#[target_feature(enable = "sse4.1")]
pub unsafe fn unshuffle(src: &[u8], dst: &mut [u8], width: usize) { unsafe {
    let n = src.len() / width;
    let blocks = n / 16;
    match width {
        2 => unshuffle2(src, dst, n, blocks),
        4 => unshuffle4(src, dst, n, blocks),
        8 => unshuffle8(src, dst, n, blocks),
        _ => {
            scalar::unshuffle(src, dst, width);
            return;
        }
    }
    scalar::unshuffle_range(src, dst, width, n, blocks * 16);
}}

// ---------------------------------------------------------------------------
// Shuffle kernels
// ---------------------------------------------------------------------------

#[target_feature(enable = "sse4.1")]
unsafe fn shuffle2(src: &[u8], dst: &mut [u8], n: usize, blocks: usize) { unsafe {
    let mask = load(GATHER2.as_ptr());
    let s = src.as_ptr();
    let d = dst.as_mut_ptr();
    for b in 0..blocks {
        let base = b * 16;
        let r0 = _mm_shuffle_epi8(load(s.add(base * 2)), mask);
        let r1 = _mm_shuffle_epi8(load(s.add(base * 2 + 16)), mask);
        store(d.add(base), _mm_unpacklo_epi64(r0, r1));
        store(d.add(n + base), _mm_unpackhi_epi64(r0, r1));
    }
}}

#[target_feature(enable = "sse4.1")]
unsafe fn shuffle4(src: &[u8], dst: &mut [u8], n: usize, blocks: usize) { unsafe {
    let mask = load(GATHER4.as_ptr());
    let s = src.as_ptr();
    let d = dst.as_mut_ptr();
    for b in 0..blocks {
        let base = b * 16;
        let p = s.add(base * 4);
        let r0 = _mm_shuffle_epi8(load(p), mask);
        let r1 = _mm_shuffle_epi8(load(p.add(16)), mask);
        let r2 = _mm_shuffle_epi8(load(p.add(32)), mask);
        let r3 = _mm_shuffle_epi8(load(p.add(48)), mask);

        let t0 = _mm_unpacklo_epi32(r0, r1);
        let t1 = _mm_unpacklo_epi32(r2, r3);
        let t2 = _mm_unpackhi_epi32(r0, r1);
        let t3 = _mm_unpackhi_epi32(r2, r3);

        store(d.add(base), _mm_unpacklo_epi64(t0, t1));
        store(d.add(n + base), _mm_unpackhi_epi64(t0, t1));
        store(d.add(2 * n + base), _mm_unpacklo_epi64(t2, t3));
        store(d.add(3 * n + base), _mm_unpackhi_epi64(t2, t3));
    }
}}

#[target_feature(enable = "sse4.1")]
unsafe fn shuffle8(src: &[u8], dst: &mut [u8], n: usize, blocks: usize) { unsafe {
    let mask = load(GATHER8.as_ptr());
    let s = src.as_ptr();
    let d = dst.as_mut_ptr();
    for b in 0..blocks {
        let base = b * 16;
        let p = s.add(base * 8);
        let mut r = [_mm_setzero_si128(); 8];
        for (k, reg) in r.iter_mut().enumerate() {
            *reg = _mm_shuffle_epi8(load(p.add(16 * k)), mask);
        }
        let planes = transpose_words_8x8(r);
        for (j, plane) in planes.iter().enumerate() {
            store(d.add(j * n + base), *plane);
        }
    }
}}

/// Transpose an 8x8 matrix of 16-bit words held in eight registers.
#[inline]
#[target_feature(enable = "sse4.1")]
unsafe fn transpose_words_8x8(r: [__m128i; 8]) -> [__m128i; 8] { unsafe {
    let a0 = _mm_unpacklo_epi16(r[0], r[1]);
    let a1 = _mm_unpackhi_epi16(r[0], r[1]);
    let a2 = _mm_unpacklo_epi16(r[2], r[3]);
    let a3 = _mm_unpackhi_epi16(r[2], r[3]);
    let a4 = _mm_unpacklo_epi16(r[4], r[5]);
    let a5 = _mm_unpackhi_epi16(r[4], r[5]);
    let a6 = _mm_unpacklo_epi16(r[6], r[7]);
    let a7 = _mm_unpackhi_epi16(r[6], r[7]);

    let b0 = _mm_unpacklo_epi32(a0, a2);
    let b1 = _mm_unpackhi_epi32(a0, a2);
    let b2 = _mm_unpacklo_epi32(a1, a3);
    let b3 = _mm_unpackhi_epi32(a1, a3);
    let b4 = _mm_unpacklo_epi32(a4, a6);
    let b5 = _mm_unpackhi_epi32(a4, a6);
    let b6 = _mm_unpacklo_epi32(a5, a7);
    let b7 = _mm_unpackhi_epi32(a5, a7);

    [
        _mm_unpacklo_epi64(b0, b4),
        _mm_unpackhi_epi64(b0, b4),
        _mm_unpacklo_epi64(b1, b5),
        _mm_unpackhi_epi64(b1, b5),
        _mm_unpacklo_epi64(b2, b6),
        _mm_unpackhi_epi64(b2, b6),
        _mm_unpacklo_epi64(b3, b7),
        _mm_unpackhi_epi64(b3, b7),
    ]
}}

// ---------------------------------------------------------------------------
// Unshuffle kernels
// ---------------------------------------------------------------------------

#[target_feature(enable = "sse4.1")]
unsafe fn unshuffle2(src: &[u8], dst: &mut [u8], n: usize, blocks: usize) { unsafe {
    let s = src.as_ptr();
    let d = dst.as_mut_ptr();
    for b in 0..blocks {
        let base = b * 16;
        let p0 = load(s.add(base));
        let p1 = load(s.add(n + base));
        let out = d.add(base * 2);
        store(out, _mm_unpacklo_epi8(p0, p1));
        store(out.add(16), _mm_unpackhi_epi8(p0, p1));
    }
}}

#[target_feature(enable = "sse4.1")]
unsafe fn unshuffle4(src: &[u8], dst: &mut [u8], n: usize, blocks: usize) { unsafe {
    let s = src.as_ptr();
    let d = dst.as_mut_ptr();
    for b in 0..blocks {
        let base = b * 16;
        let p0 = load(s.add(base));
        let p1 = load(s.add(n + base));
        let p2 = load(s.add(2 * n + base));
        let p3 = load(s.add(3 * n + base));

        let t0 = _mm_unpacklo_epi8(p0, p1);
        let t1 = _mm_unpackhi_epi8(p0, p1);
        let t2 = _mm_unpacklo_epi8(p2, p3);
        let t3 = _mm_unpackhi_epi8(p2, p3);

        let out = d.add(base * 4);
        store(out, _mm_unpacklo_epi16(t0, t2));
        store(out.add(16), _mm_unpackhi_epi16(t0, t2));
        store(out.add(32), _mm_unpacklo_epi16(t1, t3));
        store(out.add(48), _mm_unpackhi_epi16(t1, t3));
    }
}}

#[target_feature(enable = "sse4.1")]
unsafe fn unshuffle8(src: &[u8], dst: &mut [u8], n: usize, blocks: usize) { unsafe {
    let s = src.as_ptr();
    let d = dst.as_mut_ptr();
    for b in 0..blocks {
        let base = b * 16;
        let mut p = [_mm_setzero_si128(); 8];
        for (j, reg) in p.iter_mut().enumerate() {
            *reg = load(s.add(j * n + base));
        }
        let out = interleave_planes_8(p);
        let o = d.add(base * 8);
        for (k, v) in out.iter().enumerate() {
            store(o.add(16 * k), *v);
        }
    }
}}

/// Interleave eight byte planes of 16 elements back into 128 element bytes.
#[inline]
#[target_feature(enable = "sse4.1")]
unsafe fn interleave_planes_8(p: [__m128i; 8]) -> [__m128i; 8] { unsafe {
    let a0 = _mm_unpacklo_epi8(p[0], p[1]);
    let a1 = _mm_unpackhi_epi8(p[0], p[1]);
    let a2 = _mm_unpacklo_epi8(p[2], p[3]);
    let a3 = _mm_unpackhi_epi8(p[2], p[3]);
    let a4 = _mm_unpacklo_epi8(p[4], p[5]);
    let a5 = _mm_unpackhi_epi8(p[4], p[5]);
    let a6 = _mm_unpacklo_epi8(p[6], p[7]);
    let a7 = _mm_unpackhi_epi8(p[6], p[7]);

    let b0 = _mm_unpacklo_epi16(a0, a2);
    let b1 = _mm_unpackhi_epi16(a0, a2);
    let b2 = _mm_unpacklo_epi16(a1, a3);
    let b3 = _mm_unpackhi_epi16(a1, a3);
    let b4 = _mm_unpacklo_epi16(a4, a6);
    let b5 = _mm_unpackhi_epi16(a4, a6);
    let b6 = _mm_unpacklo_epi16(a5, a7);
    let b7 = _mm_unpackhi_epi16(a5, a7);

    [
        _mm_unpacklo_epi32(b0, b4),
        _mm_unpackhi_epi32(b0, b4),
        _mm_unpacklo_epi32(b1, b5),
        _mm_unpackhi_epi32(b1, b5),
        _mm_unpacklo_epi32(b2, b6),
        _mm_unpackhi_epi32(b2, b6),
        _mm_unpacklo_epi32(b3, b7),
        _mm_unpackhi_epi32(b3, b7),
    ]
}}
