//! Row-major descriptor matrices.

use crate::error::{Result, VocabTreeError};

/// A row-major matrix of local feature descriptors, one descriptor per row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptorMatrix {
    dimension: usize,
    data: Vec<f32>,
}

impl DescriptorMatrix {
    /// Create an empty matrix for descriptors of the given dimension.
    pub fn new(dimension: usize) -> Self {
        DescriptorMatrix {
            dimension,
            data: Vec::new(),
        }
    }

    /// Wrap a flat row-major buffer. `data.len()` must be a multiple of `dimension`.
    pub fn from_flat(dimension: usize, data: Vec<f32>) -> Result<Self> {
        if dimension == 0 && !data.is_empty() {
            return Err(VocabTreeError::invalid_config(
                "descriptor dimension must be positive",
            ));
        }
        if dimension > 0 && data.len() % dimension != 0 {
            return Err(VocabTreeError::invalid_config(format!(
                "{} values do not form rows of dimension {dimension}",
                data.len()
            )));
        }
        Ok(DescriptorMatrix { dimension, data })
    }

    /// Build a matrix from individual rows, which must share one dimension.
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self> {
        let dimension = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        let mut matrix = DescriptorMatrix::new(dimension);
        for row in rows {
            matrix.push_row(row.as_ref())?;
        }
        Ok(matrix)
    }

    /// Stack several matrices vertically. Empty inputs are ignored.
    pub fn concat(parts: &[DescriptorMatrix]) -> Result<Self> {
        let dimension = parts
            .iter()
            .find(|p| !p.is_empty())
            .map(|p| p.dimension)
            .unwrap_or(0);
        let total: usize = parts.iter().map(|p| p.data.len()).sum();

        let mut data = Vec::with_capacity(total);
        for part in parts.iter().filter(|p| !p.is_empty()) {
            if part.dimension != dimension {
                return Err(VocabTreeError::invalid_config(format!(
                    "cannot merge descriptors of dimension {} into dimension {dimension}",
                    part.dimension
                )));
            }
            data.extend_from_slice(&part.data);
        }
        Ok(DescriptorMatrix { dimension, data })
    }

    /// Append one descriptor.
    pub fn push_row(&mut self, row: &[f32]) -> Result<()> {
        if self.dimension == 0 && self.data.is_empty() {
            self.dimension = row.len();
        }
        if row.len() != self.dimension {
            return Err(VocabTreeError::invalid_config(format!(
                "descriptor of dimension {} does not match matrix dimension {}",
                row.len(),
                self.dimension
            )));
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    /// Gather the given rows into a new matrix.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let mut data = Vec::with_capacity(indices.len() * self.dimension);
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        DescriptorMatrix {
            dimension: self.dimension,
            data,
        }
    }

    /// Descriptor dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of descriptors.
    pub fn rows(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    /// Whether the matrix holds no descriptors.
    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }

    /// Borrow descriptor `i`. Panics if out of range.
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dimension..(i + 1) * self.dimension]
    }

    /// Iterate over descriptors.
    pub fn iter_rows(&self) -> impl ExactSizeIterator<Item = &[f32]> + '_ {
        // chunks_exact panics on zero, and a zero-dimension matrix has no rows
        self.data.chunks_exact(self.dimension.max(1))
    }

    /// The flat row-major buffer.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows_and_access() {
        let m = DescriptorMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(m.rows(), 2);
        assert_eq!(m.dimension(), 2);
        assert_eq!(m.row(1), &[3.0, 4.0]);
        assert_eq!(m.iter_rows().count(), 2);
    }

    #[test]
    fn test_dimension_mismatch() {
        assert!(DescriptorMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).is_err());
        assert!(DescriptorMatrix::from_flat(3, vec![1.0; 4]).is_err());
    }

    #[test]
    fn test_concat_and_select() {
        let a = DescriptorMatrix::from_rows(&[vec![1.0, 1.0]]).unwrap();
        let b = DescriptorMatrix::from_rows(&[vec![2.0, 2.0], vec![3.0, 3.0]]).unwrap();
        let merged = DescriptorMatrix::concat(&[a, DescriptorMatrix::default(), b]).unwrap();
        assert_eq!(merged.rows(), 3);

        let picked = merged.select_rows(&[2, 0]);
        assert_eq!(picked.row(0), &[3.0, 3.0]);
        assert_eq!(picked.row(1), &[1.0, 1.0]);
    }

    #[test]
    fn test_empty_matrix() {
        let m = DescriptorMatrix::default();
        assert!(m.is_empty());
        assert_eq!(m.iter_rows().count(), 0);
    }
}
