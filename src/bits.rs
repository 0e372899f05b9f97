//! Packed bit storage for level bookkeeping.
//!
//! The restage machinery keeps one bit per (node, predictor) cell for every
//! retained tree level. [`BitMatrix`] wraps a [`FixedBitSet`] with a fixed
//! row width so callers can address cells by `(row, col)` without doing the
//! flattening arithmetic themselves.

use fixedbitset::FixedBitSet;

/// Dense two-dimensional bit matrix with a fixed column count.
#[derive(Clone, Debug)]
pub struct BitMatrix {
    bits: FixedBitSet,
    rows: usize,
    cols: usize,
}

impl BitMatrix {
    /// Create an all-zeros matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            bits: FixedBitSet::with_capacity(rows * cols),
            rows,
            cols,
        }
    }

    /// Number of rows.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Read the bit at `(row, col)`.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> bool {
        debug_assert!(row < self.rows && col < self.cols);
        self.bits.contains(row * self.cols + col)
    }

    /// Set the bit at `(row, col)` to `value`.
    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: bool) {
        debug_assert!(row < self.rows && col < self.cols);
        self.bits.set(row * self.cols + col, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros() {
        let m = BitMatrix::zeros(3, 4);
        assert_eq!(m.rows(), 3);
        assert_eq!(m.cols(), 4);
        for r in 0..3 {
            for c in 0..4 {
                assert!(!m.get(r, c));
            }
        }
    }

    #[test]
    fn test_set_get_roundtrip() {
        let mut m = BitMatrix::zeros(2, 3);
        m.set(0, 2, true);
        m.set(1, 0, true);
        assert!(m.get(0, 2));
        assert!(m.get(1, 0));
        assert!(!m.get(0, 0));

        m.set(0, 2, false);
        assert!(!m.get(0, 2));
    }
}
