//! Contiguous hyperslab selections.
//!
//! # Example
//!
//! ```
//! use h5chunk_format::selection::Hyperslab;
//!
//! // Rows 20..30, columns 40..60 of a 100x100 dataset.
//! let sel = Hyperslab::from_ranges(&[20..30, 40..60]);
//! assert_eq!(sel.num_elements(), 200);
//! assert!(sel.validate(&[100, 100]).is_ok());
//! ```

use std::ops::Range;

use crate::error::FormatError;

/// A block of `count[d]` elements starting at `start[d]` in every dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hyperslab {
    /// First selected element per dimension.
    pub start: Vec<u64>,
    /// Number of selected elements per dimension.
    pub count: Vec<u64>,
}

impl Hyperslab {
    /// A selection from explicit start and count vectors.
    pub fn new(start: Vec<u64>, count: Vec<u64>) -> Self {
        Self { start, count }
    }

    /// One range per dimension.
    pub fn from_ranges(ranges: &[Range<u64>]) -> Self {
        Self {
            start: ranges.iter().map(|r| r.start).collect(),
            count: ranges.iter().map(|r| r.end.saturating_sub(r.start)).collect(),
        }
    }

    /// The whole extent `dims`.
    pub fn all(dims: &[u64]) -> Self {
        Self {
            start: vec![0; dims.len()],
            count: dims.to_vec(),
        }
    }

    pub fn rank(&self) -> usize {
        self.start.len()
    }

    /// Number of selected elements.
    pub fn num_elements(&self) -> u64 {
        self.count.iter().product()
    }

    /// Check the selection against the current extent.
    pub fn validate(&self, dims: &[u64]) -> Result<(), FormatError> {
        if self.start.len() != self.count.len() || self.start.len() != dims.len() {
            return Err(FormatError::RankMismatch {
                expected: dims.len(),
                actual: self.start.len().min(self.count.len()),
            });
        }
        for (d, ((&s, &c), &n)) in self.start.iter().zip(&self.count).zip(dims).enumerate() {
            match s.checked_add(c) {
                Some(end) if end <= n => {}
                _ => {
                    return Err(FormatError::InvalidSelection(format!(
                        "dimension {d}: start {s} + count {c} exceeds extent {n}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Inclusive range of scaled chunk coordinates touched in each dimension.
    ///
    /// Empty selections touch nothing and return `None`.
    pub fn chunk_span(&self, chunk_dims: &[u64]) -> Option<Vec<(u64, u64)>> {
        if self.count.contains(&0) {
            return None;
        }
        Some(
            self.start
                .iter()
                .zip(&self.count)
                .zip(chunk_dims)
                .map(|((&s, &c), &k)| (s / k, (s + c - 1) / k))
                .collect(),
        )
    }
}

/// Iterate every coordinate of the inclusive box `span`, last dimension fastest.
pub(crate) fn for_each_in_span(
    span: &[(u64, u64)],
    mut f: impl FnMut(&[u64]) -> Result<(), FormatError>,
) -> Result<(), FormatError> {
    let mut coord: Vec<u64> = span.iter().map(|&(lo, _)| lo).collect();
    if span.iter().any(|&(lo, hi)| lo > hi) {
        return Ok(());
    }
    loop {
        f(&coord)?;
        let mut d = span.len();
        loop {
            if d == 0 {
                return Ok(());
            }
            d -= 1;
            if coord[d] < span[d].1 {
                coord[d] += 1;
                break;
            }
            coord[d] = span[d].0;
        }
    }
}
