//! Dense row-major matrices with a leading-dimension stride.
//!
//! A [`Matrix`] owns its backing buffer. Row `r` starts at element
//! `r * row_stride`; the `row_stride - n_cols` trailing elements of each row
//! are padding and are never read by the kernel.

use crate::element::Element;
use crate::error::{KernelError, Result};

/// Plan-time description of a matrix layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatrixShape {
    pub n_rows: usize,
    pub n_cols: usize,
    /// Elements between consecutive row starts.
    pub row_stride: usize,
}

impl MatrixShape {
    /// Contiguous layout (`row_stride == n_cols`).
    pub const fn contiguous(n_rows: usize, n_cols: usize) -> Self {
        Self { n_rows, n_cols, row_stride: n_cols }
    }

    pub const fn is_empty(&self) -> bool {
        self.n_rows == 0 || self.n_cols == 0
    }

    /// Minimum buffer length able to hold this layout.
    pub fn required_len(&self) -> usize {
        if self.n_rows == 0 {
            0
        } else {
            (self.n_rows - 1) * self.row_stride + self.n_cols
        }
    }

    /// Checks the stride and that every offset fits in `usize`.
    pub fn validate(&self) -> std::result::Result<(), KernelError> {
        if self.row_stride < self.n_cols {
            return Err(KernelError::invalid_shape(format!(
                "row_stride {} is smaller than n_cols {}",
                self.row_stride, self.n_cols
            )));
        }
        if self.n_rows > 0 {
            (self.n_rows - 1)
                .checked_mul(self.row_stride)
                .and_then(|v| v.checked_add(self.n_cols))
                .ok_or_else(|| {
                    KernelError::invalid_shape(format!(
                        "{}x{} with stride {} overflows the address space",
                        self.n_rows, self.n_cols, self.row_stride
                    ))
                })?;
        }
        Ok(())
    }
}

/// Dense two-dimensional buffer of `T`.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T> {
    data: Vec<T>,
    shape: MatrixShape,
}

impl<T: Element> Matrix<T> {
    /// Contiguous matrix from row-major data.
    pub fn from_vec(n_rows: usize, n_cols: usize, data: Vec<T>) -> Result<Self> {
        Self::with_stride(n_rows, n_cols, n_cols, data)
    }

    /// Matrix with a padded leading dimension.
    pub fn with_stride(
        n_rows: usize,
        n_cols: usize,
        row_stride: usize,
        data: Vec<T>,
    ) -> Result<Self> {
        let shape = MatrixShape { n_rows, n_cols, row_stride };
        shape.validate()?;
        let required = shape.required_len();
        if data.len() < required {
            return Err(KernelError::invalid_shape(format!(
                "buffer of {} elements cannot hold {}x{} with stride {} (needs {})",
                data.len(),
                n_rows,
                n_cols,
                row_stride,
                required
            ))
            .into());
        }
        Ok(Self { data, shape })
    }

    /// Contiguous matrix from an arbitrary-rank shape; anything but rank 2
    /// is rejected.
    pub fn from_shape_vec(dims: &[usize], data: Vec<T>) -> Result<Self> {
        match *dims {
            [n_rows, n_cols] => Self::from_vec(n_rows, n_cols, data),
            _ => Err(KernelError::invalid_shape(format!(
                "expected a rank-2 shape, got rank {} ({dims:?})",
                dims.len()
            ))
            .into()),
        }
    }

    /// Zero-filled contiguous matrix.
    pub fn zeros(n_rows: usize, n_cols: usize) -> Self {
        Self { data: vec![T::zero(); n_rows * n_cols], shape: MatrixShape::contiguous(n_rows, n_cols) }
    }

    /// Zero-filled matrix with the same shape and stride as `other`.
    pub fn zeros_like(other: &Self) -> Self {
        Self { data: vec![T::zero(); other.data.len()], shape: other.shape }
    }

    pub fn n_rows(&self) -> usize {
        self.shape.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.shape.n_cols
    }

    pub fn row_stride(&self) -> usize {
        self.shape.row_stride
    }

    pub fn shape(&self) -> MatrixShape {
        self.shape
    }

    pub fn is_empty(&self) -> bool {
        self.shape.is_empty()
    }

    /// The `n_cols` live elements of row `r`.
    ///
    /// # Panics
    ///
    /// Panics if `r >= n_rows`.
    pub fn row(&self, r: usize) -> &[T] {
        assert!(r < self.shape.n_rows, "row {r} out of range for {} rows", self.shape.n_rows);
        let start = r * self.shape.row_stride;
        &self.data[start..start + self.shape.n_cols]
    }

    pub fn get(&self, r: usize, c: usize) -> Option<T> {
        (r < self.shape.n_rows && c < self.shape.n_cols)
            .then(|| self.data[r * self.shape.row_stride + c])
    }

    /// Iterator over the live part of every row.
    pub fn rows(&self) -> impl ExactSizeIterator<Item = &[T]> + '_ {
        (0..self.shape.n_rows).map(move |r| self.row(r))
    }

    /// Raw backing buffer including padding.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Copy of the live elements with the padding removed.
    pub fn to_contiguous(&self) -> Vec<T> {
        self.rows().flat_map(|row| row.iter().copied()).collect()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}
