//! AVX2 byte codecs for x86_64.
//! All functions require runtime detection via is_x86_feature_detected!("avx2").
//!
//! The 256-bit unpack and byte-shuffle instructions operate on each 128-bit
//! lane separately, so every kernel runs the SSE4.1 algorithm on two blocks
//! of 16 elements at once and uses `vperm2i128` to route lanes to and from
//! memory order.

#![cfg(target_arch = "x86_64")]

use std::arch::x86_64::*;

use crate::scalar;
use crate::sse4::{swap_mask, GATHER2, GATHER4, GATHER8};

#[inline]
#[target_feature(enable = "avx2")]
unsafe fn load(p: *const u8) -> __m256i {
    unsafe { _mm256_loadu_si256(p as *const __m256i) }
}

#[inline]
#[target_feature(enable = "avx2")]
unsafe fn store(p: *mut u8, v: __m256i) {
    unsafe { _mm256_storeu_si256(p as *mut __m256i, v) }
}

#[inline]
#[target_feature(enable = "avx2")]
unsafe fn broadcast_mask(mask: &[u8; 16]) -> __m256i {
    unsafe { _mm256_broadcastsi128_si256(_mm_loadu_si128(mask.as_ptr() as *const __m128i)) }
}

/// AVX2 byte swap of every `width`-byte element.
///
/// # Safety
/// Caller must verify is_x86_feature_detected!("avx2"), that
/// `src.len() == dst.len()` and that the length is a multiple of `width`.
#[target_feature(enable = "avx2")]
pub unsafe fn swap_endianness(src: &[u8], dst: &mut [u8], width: usize) { unsafe {
    let Some(mask) = swap_mask(width) else {
        scalar::swap_endianness(src, dst, width);
        return;
    };
    let m = broadcast_mask(mask);
    let len = src.len();
    let mut i = 0;
    while i + 32 <= len {
        let v = load(src.as_ptr().add(i));
        store(dst.as_mut_ptr().add(i), _mm256_shuffle_epi8(v, m));
        i += 32;
    }
    scalar::swap_endianness_range(src, dst, width, i);
}}

/// AVX2 shuffle.
///
/// # Safety
/// Same contract as [`swap_endianness`].
#[target_feature(enable = "avx2")]
pub unsafe fn shuffle(src: &[u8], dst: &mut [u8], width: usize) { unsafe {
    let n = src.len() / width;
    let blocks = n / 32;
    match width {
        2 => shuffle2(src, dst, n, blocks),
        4 => shuffle4(src, dst, n, blocks),
        8 => shuffle8(src, dst, n, blocks),
        _ => {
            scalar::shuffle(src, dst, width);
            return;
        }
    }
    scalar::shuffle_range(src, dst, width, n, blocks * 32);
}}

/// AVX2 unshuffle.
///
/// # Safety
/// Same contract as [`swap_endianness`].
#[target_feature(enable = "avx2")]
pub unsafe fn unshuffle(src: &[u8], dst: &mut [u8], width: usize) { unsafe {
    let n = src.len() / width;
    let blocks = n / 32;
    match width {
        2 => unshuffle2(src, dst, n, blocks),
        4 => unshuffle4(src, dst, n, blocks),
        8 => unshuffle8(src, dst, n, blocks),
        _ => {
            scalar::unshuffle(src, dst, width);
            return;
        }
    }
    scalar::unshuffle_range(src, dst, width, n, blocks * 32);
}}

/// Load `W` consecutive 32-byte registers and regroup their 16-byte halves so
/// register `k` holds half `k` in its low lane and half `W + k` in its high lane.
#[inline]
#[target_feature(enable = "avx2")]
unsafe fn load_split_lanes<const W: usize>(p: *const u8) -> [__m256i; W] { unsafe {
    let mut raw = [_mm256_setzero_si256(); W];
    for (m, reg) in raw.iter_mut().enumerate() {
        *reg = load(p.add(32 * m));
    }
    let mut out = [_mm256_setzero_si256(); W];
    for (k, reg) in out.iter_mut().enumerate() {
        let lo = raw[k / 2];
        let hi = raw[(W + k) / 2];
        *reg = if k % 2 == 0 {
            _mm256_permute2x128_si256::<0x20>(lo, hi)
        } else {
            _mm256_permute2x128_si256::<0x31>(lo, hi)
        };
    }
    out
}}

/// Inverse of [`load_split_lanes`]: register `k` carries 16-byte half `k` in its
/// low lane and half `W + k` in its high lane.
#[inline]
#[target_feature(enable = "avx2")]
unsafe fn store_split_lanes<const W: usize>(p: *mut u8, regs: &[__m256i; W]) { unsafe {
    let mut k = 0;
    while k < W {
        let a = regs[k];
        let b = regs[k + 1];
        store(p.add(16 * k), _mm256_permute2x128_si256::<0x20>(a, b));
        store(p.add(16 * (W + k)), _mm256_permute2x128_si256::<0x31>(a, b));
        k += 2;
    }
}}

// ---------------------------------------------------------------------------
// Shuffle kernels
// ---------------------------------------------------------------------------

#[target_feature(enable = "avx2")]
unsafe fn shuffle2(src: &[u8], dst: &mut [u8], n: usize, blocks: usize) { unsafe {
    let mask = broadcast_mask(&GATHER2);
    let s = src.as_ptr();
    let d = dst.as_mut_ptr();
    for b in 0..blocks {
        let base = b * 32;
        let [r0, r1] = load_split_lanes::<2>(s.add(base * 2));
        let r0 = _mm256_shuffle_epi8(r0, mask);
        let r1 = _mm256_shuffle_epi8(r1, mask);
        store(d.add(base), _mm256_unpacklo_epi64(r0, r1));
        store(d.add(n + base), _mm256_unpackhi_epi64(r0, r1));
    }
}}

#[target_feature(enable = "avx2")]
unsafe fn shuffle4(src: &[u8], dst: &mut [u8], n: usize, blocks: usize) { unsafe {
    let mask = broadcast_mask(&GATHER4);
    let s = src.as_ptr();
    let d = dst.as_mut_ptr();
    for b in 0..blocks {
        let base = b * 32;
        let mut r = load_split_lanes::<4>(s.add(base * 4));
        for reg in r.iter_mut() {
            *reg = _mm256_shuffle_epi8(*reg, mask);
        }

        let t0 = _mm256_unpacklo_epi32(r[0], r[1]);
        let t1 = _mm256_unpacklo_epi32(r[2], r[3]);
        let t2 = _mm256_unpackhi_epi32(r[0], r[1]);
        let t3 = _mm256_unpackhi_epi32(r[2], r[3]);

        store(d.add(base), _mm256_unpacklo_epi64(t0, t1));
        store(d.add(n + base), _mm256_unpackhi_epi64(t0, t1));
        store(d.add(2 * n + base), _mm256_unpacklo_epi64(t2, t3));
        store(d.add(3 * n + base), _mm256_unpackhi_epi64(t2, t3));
    }
}}

#[target_feature(enable = "avx2")]
unsafe fn shuffle8(src: &[u8], dst: &mut [u8], n: usize, blocks: usize) { unsafe {
    let mask = broadcast_mask(&GATHER8);
    let s = src.as_ptr();
    let d = dst.as_mut_ptr();
    for b in 0..blocks {
        let base = b * 32;
        let mut r = load_split_lanes::<8>(s.add(base * 8));
        for reg in r.iter_mut() {
            *reg = _mm256_shuffle_epi8(*reg, mask);
        }

        let a0 = _mm256_unpacklo_epi16(r[0], r[1]);
        let a1 = _mm256_unpackhi_epi16(r[0], r[1]);
        let a2 = _mm256_unpacklo_epi16(r[2], r[3]);
        let a3 = _mm256_unpackhi_epi16(r[2], r[3]);
        let a4 = _mm256_unpacklo_epi16(r[4], r[5]);
        let a5 = _mm256_unpackhi_epi16(r[4], r[5]);
        let a6 = _mm256_unpacklo_epi16(r[6], r[7]);
        let a7 = _mm256_unpackhi_epi16(r[6], r[7]);

        let b0 = _mm256_unpacklo_epi32(a0, a2);
        let b1 = _mm256_unpackhi_epi32(a0, a2);
        let b2 = _mm256_unpacklo_epi32(a1, a3);
        let b3 = _mm256_unpackhi_epi32(a1, a3);
        let b4 = _mm256_unpacklo_epi32(a4, a6);
        let b5 = _mm256_unpackhi_epi32(a4, a6);
        let b6 = _mm256_unpacklo_epi32(a5, a7);
        let b7 = _mm256_unpackhi_epi32(a5, a7);

        let planes = [
            _mm256_unpacklo_epi64(b0, b4),
            _mm256_unpackhi_epi64(b0, b4),
            _mm256_unpacklo_epi64(b1, b5),
            _mm256_unpackhi_epi64(b1, b5),
            _mm256_unpacklo_epi64(b2, b6),
            _mm256_unpackhi_epi64(b2, b6),
            _mm256_unpacklo_epi64(b3, b7),
            _mm256_unpackhi_epi64(b3, b7),
        ];
        for (j, plane) in planes.iter().enumerate() {
            store(d.add(j * n + base), *plane);
        }
    }
}}

// ---------------------------------------------------------------------------
// Unshuffle kernels
// ---------------------------------------------------------------------------

#[target_feature(enable = "avx2")]
unsafe fn unshuffle2(src: &[u8], dst: &mut [u8], n: usize, blocks: usize) { unsafe {
    let s = src.as_ptr();
    let d = dst.as_mut_ptr();
    for b in 0..blocks {
        let base = b * 32;
        let p0 = load(s.add(base));
        let p1 = load(s.add(n + base));
        let out = [_mm256_unpacklo_epi8(p0, p1), _mm256_unpackhi_epi8(p0, p1)];
        store_split_lanes::<2>(d.add(base * 2), &out);
    }
}}

#[target_feature(enable = "avx2")]
unsafe fn unshuffle4(src: &[u8], dst: &mut [u8], n: usize, blocks: usize) { unsafe {
    let s = src.as_ptr();
    let d = dst.as_mut_ptr();
    for b in 0..blocks {
        let base = b * 32;
        let p0 = load(s.add(base));
        let p1 = load(s.add(n + base));
        let p2 = load(s.add(2 * n + base));
        let p3 = load(s.add(3 * n + base));

        let t0 = _mm256_unpacklo_epi8(p0, p1);
        let t1 = _mm256_unpackhi_epi8(p0, p1);
        let t2 = _mm256_unpacklo_epi8(p2, p3);
        let t3 = _mm256_unpackhi_epi8(p2, p3);

        let out = [
            _mm256_unpacklo_epi16(t0, t2),
            _mm256_unpackhi_epi16(t0, t2),
            _mm256_unpacklo_epi16(t1, t3),
            _mm256_unpackhi_epi16(t1, t3),
        ];
        store_split_lanes::<4>(d.add(base * 4), &out);
    }
}}

#[target_feature(enable = "avx2")]
unsafe fn unshuffle8(src: &[u8], dst: &mut [u8], n: usize, blocks: usize) { unsafe {
    let s = src.as_ptr();
    let d = dst.as_mut_ptr();
    for b in 0..blocks {
        let base = b * 32;
        let mut p = [_mm256_setzero_si256(); 8];
        for (j, reg) in p.iter_mut().enumerate() {
            *reg = load(s.add(j * n + base));
        }

        let a0 = _mm256_unpacklo_epi8(p[0], p[1]);
        let a1 = _mm256_unpackhi_epi8(p[0], p[1]);
        let a2 = _mm256_unpacklo_epi8(p[2], p[3]);
        let a3 = _mm256_unpackhi_epi8(p[2], p[3]);
        let a4 = _mm256_unpacklo_epi8(p[4], p[5]);
        let a5 = _mm256_unpackhi_epi8(p[4], p[5]);
        let a6 = _mm256_unpacklo_epi8(p[6], p[7]);
        let a7 = _mm256_unpackhi_epi8(p[6], p[7]);

        let b0 = _mm256_unpacklo_epi16(a0, a2);
        let b1 = _mm256_unpackhi_epi16(a0, a2);
        let b2 = _mm256_unpacklo_epi16(a1, a3);
        let b3 = _mm256_unpackhi_epi16(a1, a3);
        let b4 = _mm256_unpacklo_epi16(a4, a6);
        let b5 = _mm256_unpackhi_epi16(a4, a6);
        let b6 = _mm256_unpacklo_epi16(a5, a7);
        let b7 = _mm256_unpackhi_epi16(a5, a7);

        let out = [
            _mm256_unpacklo_epi32(b0, b4),
            _mm256_unpackhi_epi32(b0, b4),
            _mm256_unpacklo_epi32(b1, b5),
            _mm256_unpackhi_epi32(b1, b5),
            _mm256_unpacklo_epi32(b2, b6),
            _mm256_unpackhi_epi32(b2, b6),
            _mm256_unpacklo_epi32(b3, b7),
            _mm256_unpackhi_epi32(b3, b7),
        ];
        store_split_lanes::<8>(d.add(base * 8), &out);
    }
}}
