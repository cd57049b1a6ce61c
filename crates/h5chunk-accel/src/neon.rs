//! ARM NEON byte codecs.
//! NEON is always available on aarch64.

#![cfg(target_arch = "aarch64")]

use std::arch::aarch64::*;

use crate::scalar;

/// NEON byte swap of every `width`-byte element.
///
/// # Safety
/// Caller must ensure `src.len() == dst.len()` and that the length is a
/// multiple of `width`.
#[target_feature(enable = "neon")]
pub unsafe fn swap_endianness(src: &[u8], dst: &mut [u8], width: usize) { unsafe {
    if !matches!(width, 2 | 4 | 8 | 16) {
        scalar::swap_endianness(src, dst, width);
        return;
    }
    let len = src.len();
    let s = src.as_ptr();
    let d = dst.as_mut_ptr();
    let mut i = 0;
    while i + 16 <= len {
        let v = vld1q_u8(s.add(i));
        let r = match width {
            2 => vrev16q_u8(v),
            4 => vrev32q_u8(v),
            8 => vrev64q_u8(v),
            _ => {
                let halves = vrev64q_u8(v);
                vextq_u8::<8>(halves, halves)
            }
        };
        vst1q_u8(d.add(i), r);
        i += 16;
    }
    scalar::swap_endianness_range(src, dst, width, i);
}}

/// NEON shuffle using de-interleaving structure loads.
///
/// # Safety
/// Same contract as [`swap_endianness`].
#[target_feature(enable = "neon")]
pub unsafe fn shuffle(src: &[u8], dst: &mut [u8], width: usize) { unsafe {
    let n = src.len() / width;
    let blocks = n / 16;
    let s = src.as_ptr();
    let d = dst.as_mut_ptr();
    match width {
        2 => {
            for b in 0..blocks {
                let v = vld2q_u8(s.add(b * 32));
                vst1q_u8(d.add(b * 16), v.0);
                vst1q_u8(d.add(n + b * 16), v.1);
            }
        }
        4 => {
            for b in 0..blocks {
                let v = vld4q_u8(s.add(b * 64));
                let base = b * 16;
                vst1q_u8(d.add(base), v.0);
                vst1q_u8(d.add(n + base), v.1);
                vst1q_u8(d.add(2 * n + base), v.2);
                vst1q_u8(d.add(3 * n + base), v.3);
            }
        }
        8 => {
            for b in 0..blocks {
                // Each 4-way load yields bytes j and j+4 alternating per element.
                let lo = vld4q_u8(s.add(b * 128));
                let hi = vld4q_u8(s.add(b * 128 + 64));
                let base = b * 16;
                let pairs = [(lo.0, hi.0), (lo.1, hi.1), (lo.2, hi.2), (lo.3, hi.3)];
                for (j, (a, c)) in pairs.into_iter().enumerate() {
                    vst1q_u8(d.add(j * n + base), vuzp1q_u8(a, c));
                    vst1q_u8(d.add((j + 4) * n + base), vuzp2q_u8(a, c));
                }
            }
        }
        _ => {
            scalar::shuffle(src, dst, width);
            return;
        }
    }
    scalar::shuffle_range(src, dst, width, n, blocks * 16);
}}

/// NEON unshuffle using interleaving structure stores.
///
/// # Safety
/// Same contract as [`swap_endianness`].
#[target_feature(enable = "neon")]
pub unsafe fn unshuffle(src: &[u8], dst: &mut [u8], width: usize) { unsafe {
    let n = src.len() / width;
    let blocks = n / 16;
    let s = src.as_ptr();
    let d = dst.as_mut_ptr();
    match width {
        2 => {
            for b in 0..blocks {
                let base = b * 16;
                let v = uint8x16x2_t(vld1q_u8(s.add(base)), vld1q_u8(s.add(n + base)));
                vst2q_u8(d.add(b * 32), v);
            }
        }
        4 => {
            for b in 0..blocks {
                let base = b * 16;
                let v = uint8x16x4_t(
                    vld1q_u8(s.add(base)),
                    vld1q_u8(s.add(n + base)),
                    vld1q_u8(s.add(2 * n + base)),
                    vld1q_u8(s.add(3 * n + base)),
                );
                vst4q_u8(d.add(b * 64), v);
            }
        }
        8 => {
            for b in 0..blocks {
                let base = b * 16;
                let mut p = [vdupq_n_u8(0); 8];
                for (j, reg) in p.iter_mut().enumerate() {
                    *reg = vld1q_u8(s.add(j * n + base));
                }
                let lo = uint8x16x4_t(
                    vzip1q_u8(p[0], p[4]),
                    vzip1q_u8(p[1], p[5]),
                    vzip1q_u8(p[2], p[6]),
                    vzip1q_u8(p[3], p[7]),
                );
                let hi = uint8x16x4_t(
                    vzip2q_u8(p[0], p[4]),
                    vzip2q_u8(p[1], p[5]),
                    vzip2q_u8(p[2], p[6]),
                    vzip2q_u8(p[3], p[7]),
                );
                vst4q_u8(d.add(b * 128), lo);
                vst4q_u8(d.add(b * 128 + 64), hi);
            }
        }
        _ => {
            scalar::unshuffle(src, dst, width);
            return;
        }
    }
    scalar::unshuffle_range(src, dst, width, n, blocks * 16);
}}
