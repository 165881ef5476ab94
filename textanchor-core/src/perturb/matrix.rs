//! Dense binary matrix used for perturbation masks.

use serde::{Deserialize, Serialize};

/// Row-major `rows x cols` matrix of 0/1 values.
///
/// In a perturbation mask, 1 means the word at that column is unchanged and
/// 0 means it was perturbed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryMatrix {
    rows: usize,
    cols: usize,
    data: Vec<u8>,
}

impl BinaryMatrix {
    pub fn ones(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![1; rows * cols],
        }
    }

    /// Build from explicit rows; every row must have `cols` entries.
    pub fn from_rows(rows: &[Vec<u8>], cols: usize) -> Option<Self> {
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            if row.len() != cols {
                return None;
            }
            data.extend(row.iter().map(|v| u8::from(*v != 0)));
        }
        Some(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> bool {
        self.data[row * self.cols + col] != 0
    }

    pub fn set(&mut self, row: usize, col: usize, value: bool) {
        self.data[row * self.cols + col] = u8::from(value);
    }

    pub fn row(&self, row: usize) -> &[u8] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (0..self.rows).map(move |r| self.row(r))
    }

    /// Whether every column in `cols` is 1 in `row`.
    pub fn row_contains_all(&self, row: usize, cols: &[usize]) -> bool {
        let r = self.row(row);
        cols.iter().all(|&c| r[c] != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_and_rows() {
        let mut m = BinaryMatrix::ones(2, 3);
        m.set(1, 2, false);
        assert!(m.get(0, 2));
        assert!(!m.get(1, 2));
        assert_eq!(m.row(1), &[1, 1, 0]);
        assert!(m.row_contains_all(1, &[0, 1]));
        assert!(!m.row_contains_all(1, &[2]));
        assert_eq!(m.iter_rows().count(), 2);
    }

    #[test]
    fn test_from_rows_checks_width() {
        assert!(BinaryMatrix::from_rows(&[vec![1, 0], vec![1]], 2).is_none());
        let m = BinaryMatrix::from_rows(&[vec![1, 0], vec![0, 5]], 2).unwrap();
        assert_eq!(m.row(1), &[0, 1]);
        assert_eq!(BinaryMatrix::ones(0, 4).rows(), 0);
    }
}
