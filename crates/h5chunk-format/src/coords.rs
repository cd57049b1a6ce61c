//! Chunk coordinate arithmetic.
//!
//! Scaled coordinates count whole chunks. Linear indices enumerate chunks in
//! row-major order with the last dimension changing fastest; `down_counts`
//! holds the radix multiplier of each dimension.

use crate::error::FormatError;

/// Dimension size meaning "no fixed limit".
pub const UNLIMITED: u64 = u64::MAX;

/// `ceil(a / b)`, with an unlimited numerator staying unlimited.
pub fn ceil_div(a: u64, b: u64) -> u64 {
    if a == UNLIMITED {
        UNLIMITED
    } else if b == 0 {
        0
    } else {
        a.div_ceil(b)
    }
}

/// Reverse cumulative product: `down[i] = Π dims[i+1..]`, `down[rank-1] = 1`.
///
/// Products that overflow or include an unlimited extent saturate to
/// [`UNLIMITED`].
pub fn down_counts(dims: &[u64]) -> Vec<u64> {
    let mut down = vec![1u64; dims.len()];
    let mut acc = 1u64;
    for i in (0..dims.len()).rev() {
        down[i] = acc;
        acc = if dims[i] == UNLIMITED {
            UNLIMITED
        } else {
            acc.saturating_mul(dims[i])
        };
    }
    down
}

/// Dot product of a scaled coordinate with its down-counts.
pub fn to_linear_index(scaled: &[u64], down: &[u64]) -> u64 {
    scaled
        .iter()
        .zip(down)
        .fold(0u64, |acc, (&c, &d)| acc.wrapping_add(c.wrapping_mul(d)))
}

/// Inverse of [`to_linear_index`] over `scaled_dims`, slowest dimension first.
pub fn to_coordinate(mut linear: u64, scaled_dims: &[u64]) -> Vec<u64> {
    let mut coord = vec![0u64; scaled_dims.len()];
    for i in (0..scaled_dims.len()).rev() {
        let extent = scaled_dims[i];
        if extent == 0 || extent == UNLIMITED {
            coord[i] = linear;
            linear = 0;
        } else {
            coord[i] = linear % extent;
            linear /= extent;
        }
    }
    coord
}

/// Move dimension `unlimited_dim` to position 0, keeping the others in order.
///
/// `unlimited_dim == 0` returns the coordinate unchanged.
pub fn swizzle(coord: &[u64], unlimited_dim: usize) -> Result<Vec<u64>, FormatError> {
    if unlimited_dim >= coord.len() {
        return Err(FormatError::RankMismatch {
            expected: unlimited_dim + 1,
            actual: coord.len(),
        });
    }
    let mut out = coord.to_vec();
    out[..=unlimited_dim].rotate_right(1);
    Ok(out)
}

/// Undo [`swizzle`].
pub fn unswizzle(coord: &[u64], unlimited_dim: usize) -> Result<Vec<u64>, FormatError> {
    if unlimited_dim >= coord.len() {
        return Err(FormatError::RankMismatch {
            expected: unlimited_dim + 1,
            actual: coord.len(),
        });
    }
    let mut out = coord.to_vec();
    out[..=unlimited_dim].rotate_left(1);
    Ok(out)
}

/// Bytes used to encode a filtered chunk's stored size:
/// `min(8, 1 + (floor(log2(chunk_bytes)) + 8) / 8)`.
pub fn chunk_size_length(chunk_bytes: u64) -> usize {
    let log2 = if chunk_bytes == 0 { 0 } else { 63 - chunk_bytes.leading_zeros() as usize };
    (1 + (log2 + 8) / 8).min(8)
}

/// Smallest number of bytes that holds `value` (at least one).
pub fn min_byte_count(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(8).max(1)
}

/// Chunk-granular geometry derived once when an index is set up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaledGeometry {
    /// Chunks per dimension covering the current extent.
    pub scaled_dims: Vec<u64>,
    /// Chunks per dimension covering the maximum extent.
    pub scaled_max_dims: Vec<u64>,
    /// Radix multipliers over `scaled_dims`.
    pub down_counts: Vec<u64>,
    /// Radix multipliers over `scaled_max_dims`.
    pub down_max_counts: Vec<u64>,
    /// Decoded byte size of one chunk.
    pub chunk_bytes: u64,
    /// Number of chunks covering the current extent.
    pub total_chunks: u64,
}

impl ScaledGeometry {
    /// Derive the geometry for the given extents.
    pub fn new(
        dims: &[u64],
        max_dims: &[u64],
        chunk_dims: &[u64],
        element_size: u32,
    ) -> Result<Self, FormatError> {
        let rank = chunk_dims.len();
        for len in [dims.len(), max_dims.len()] {
            if len != rank {
                return Err(FormatError::RankMismatch {
                    expected: rank,
                    actual: len,
                });
            }
        }
        if chunk_dims.contains(&0) {
            return Err(FormatError::corrupt("chunk shape", "zero-sized chunk dimension"));
        }

        let scaled_dims: Vec<u64> = dims.iter().zip(chunk_dims).map(|(&d, &c)| ceil_div(d, c)).collect();
        let scaled_max_dims: Vec<u64> = max_dims
            .iter()
            .zip(chunk_dims)
            .map(|(&d, &c)| ceil_div(d, c))
            .collect();
        let chunk_bytes = chunk_dims
            .iter()
            .try_fold(element_size as u64, |acc, &c| acc.checked_mul(c))
            .ok_or_else(|| FormatError::corrupt("chunk shape", "chunk byte size overflows"))?;
        let total_chunks = scaled_dims.iter().fold(1u64, |acc, &s| acc.saturating_mul(s));

        Ok(Self {
            down_counts: down_counts(&scaled_dims),
            down_max_counts: down_counts(&scaled_max_dims),
            scaled_dims,
            scaled_max_dims,
            chunk_bytes,
            total_chunks,
        })
    }

    /// Dataset rank.
    pub fn rank(&self) -> usize {
        self.scaled_dims.len()
    }

    /// Whether `scaled` lies inside the maximum extent.
    pub fn within_max(&self, scaled: &[u64]) -> bool {
        scaled.iter().zip(&self.scaled_max_dims).all(|(&c, &m)| c < m)
    }

    pub(crate) fn check_rank(&self, scaled: &[u64]) -> Result<(), FormatError> {
        if scaled.len() != self.rank() {
            return Err(FormatError::RankMismatch {
                expected: self.rank(),
                actual: scaled.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn down_counts_row_major() {
        assert_eq!(down_counts(&[4, 3, 2]), vec![6, 2, 1]);
        assert_eq!(down_counts(&[7]), vec![1]);
        assert!(down_counts(&[]).is_empty());
    }

    #[test]
    fn down_counts_saturate_on_unlimited() {
        assert_eq!(down_counts(&[UNLIMITED, 3, 2]), vec![6, 2, 1]);
        assert_eq!(down_counts(&[2, UNLIMITED, 2]), vec![UNLIMITED, 2, 1]);
    }

    #[test]
    fn linear_roundtrip_all_coordinates() {
        let dims = [3u64, 4, 5];
        let down = down_counts(&dims);
        let mut expected = 0;
        for a in 0..3 {
            for b in 0..4 {
                for c in 0..5 {
                    let coord = [a, b, c];
                    let linear = to_linear_index(&coord, &down);
                    assert_eq!(linear, expected);
                    assert_eq!(to_coordinate(linear, &dims), coord.to_vec());
                    expected += 1;
                }
            }
        }
    }

    #[test]
    fn swizzle_rotates_unlimited_first() {
        assert_eq!(swizzle(&[1, 2, 3, 4], 2).unwrap(), vec![3, 1, 2, 4]);
        assert_eq!(swizzle(&[1, 2, 3], 2).unwrap(), vec![3, 1, 2]);
        assert_eq!(unswizzle(&[3, 1, 2, 4], 2).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn swizzle_dim_zero_is_identity() {
        assert_eq!(swizzle(&[5, 6, 7], 0).unwrap(), vec![5, 6, 7]);
    }

    #[test]
    fn swizzle_rank_mismatch() {
        assert_eq!(
            swizzle(&[1, 2], 2),
            Err(FormatError::RankMismatch { expected: 3, actual: 2 })
        );
    }

    #[test]
    fn chunk_size_length_matches_hdf5() {
        assert_eq!(chunk_size_length(1), 2);
        assert_eq!(chunk_size_length(255), 2);
        assert_eq!(chunk_size_length(256), 3);
        assert_eq!(chunk_size_length(16_000), 3);
        assert_eq!(chunk_size_length(65_536), 4);
        assert_eq!(chunk_size_length(u64::MAX), 8);
    }

    #[test]
    fn min_byte_count_values() {
        assert_eq!(min_byte_count(0), 1);
        assert_eq!(min_byte_count(255), 1);
        assert_eq!(min_byte_count(256), 2);
        assert_eq!(min_byte_count(u64::MAX), 8);
    }

    #[test]
    fn geometry_for_partial_edge_chunks() {
        let g = ScaledGeometry::new(&[10, 7], &[20, UNLIMITED], &[4, 3], 4).unwrap();
        assert_eq!(g.scaled_dims, vec![3, 3]);
        assert_eq!(g.scaled_max_dims, vec![5, UNLIMITED]);
        assert_eq!(g.down_counts, vec![3, 1]);
        assert_eq!(g.down_max_counts, vec![UNLIMITED, 1]);
        assert_eq!(g.chunk_bytes, 48);
        assert_eq!(g.total_chunks, 9);
        assert!(g.within_max(&[4, 1000]));
        assert!(!g.within_max(&[5, 0]));
    }

    #[test]
    fn geometry_rejects_rank_mismatch_and_zero_chunks() {
        assert!(matches!(
            ScaledGeometry::new(&[10], &[10, 10], &[2, 2], 1),
            Err(FormatError::RankMismatch { expected: 2, actual: 1 })
        ));
        assert!(ScaledGeometry::new(&[10], &[10], &[0], 1).is_err());
    }
}
