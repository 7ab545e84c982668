//! Dense row-major `f32` storage for weights and biases
//!
//! Only what a fully connected network needs: 1-D bias vectors, 2-D weight
//! matrices and the two matrix-vector products used in the forward and
//! backward passes.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for tensor construction
#[derive(Debug, Error, PartialEq)]
pub enum TensorError {
    #[error("Shape {shape:?} needs {expected} elements, got {got}")]
    DataLengthMismatch {
        shape: Vec<usize>,
        expected: usize,
        got: usize,
    },
    #[error("Shape {shape:?} has more elements than fit in memory")]
    ShapeOverflow { shape: Vec<usize> },
    #[error("Invalid standard deviation for initialization: {0}")]
    InvalidStd(f32),
}

/// Number of elements of `shape`, `None` if the product overflows
fn checked_numel(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |n, &d| n.checked_mul(d))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Result<Self, TensorError> {
        let Some(expected) = checked_numel(&shape) else {
            return Err(TensorError::ShapeOverflow { shape });
        };
        if data.len() != expected {
            return Err(TensorError::DataLengthMismatch {
                shape,
                expected,
                got: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Result<Self, TensorError> {
        let Some(n) = checked_numel(&shape) else {
            return Err(TensorError::ShapeOverflow { shape });
        };
        Ok(Self {
            shape,
            data: vec![0.0; n],
        })
    }

    /// A zero tensor with the same shape as `other`
    pub fn zeros_like(other: &Tensor) -> Self {
        Self {
            shape: other.shape.clone(),
            data: vec![0.0; other.data.len()],
        }
    }

    /// Samples every element from `N(0, std^2)`
    pub fn randn<R: Rng + ?Sized>(
        shape: Vec<usize>,
        std: f32,
        rng: &mut R,
    ) -> Result<Self, TensorError> {
        let normal = Normal::new(0.0, std).map_err(|_| TensorError::InvalidStd(std))?;
        let Some(n) = checked_numel(&shape) else {
            return Err(TensorError::ShapeOverflow { shape });
        };
        let data = (0..n).map(|_| normal.sample(rng)).collect();
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Whether the data length matches the shape. Deserialization bypasses `new`
    pub fn is_consistent(&self) -> bool {
        checked_numel(&self.shape) == Some(self.data.len())
    }

    fn rows_cols(&self) -> (usize, usize) {
        debug_assert_eq!(self.shape.len(), 2, "expected a matrix");
        (self.shape[0], self.shape[1])
    }

    /// `self @ x` for a `[rows, cols]` matrix and a `cols` long vector
    pub fn matvec(&self, x: &[f32]) -> Vec<f32> {
        let (rows, cols) = self.rows_cols();
        debug_assert_eq!(x.len(), cols);
        (0..rows)
            .map(|r| {
                self.data[r * cols..(r + 1) * cols]
                    .iter()
                    .zip(x.iter())
                    .map(|(w, v)| w * v)
                    .sum()
            })
            .collect()
    }

    /// `self^T @ g` for a `[rows, cols]` matrix and a `rows` long vector
    pub fn matvec_transposed(&self, g: &[f32]) -> Vec<f32> {
        let (rows, cols) = self.rows_cols();
        debug_assert_eq!(g.len(), rows);
        let mut out = vec![0.0; cols];
        for (r, g_r) in g.iter().enumerate() {
            if *g_r == 0.0 {
                continue;
            }
            for (o, w) in out.iter_mut().zip(&self.data[r * cols..(r + 1) * cols]) {
                *o += w * g_r;
            }
        }
        out
    }

    /// Accumulates the outer product `a ⊗ b` into a `[a.len(), b.len()]` matrix
    pub fn add_outer(&mut self, a: &[f32], b: &[f32]) {
        let (rows, cols) = self.rows_cols();
        debug_assert_eq!((a.len(), b.len()), (rows, cols));
        for (r, a_r) in a.iter().enumerate() {
            if *a_r == 0.0 {
                continue;
            }
            for (d, b_c) in self.data[r * cols..(r + 1) * cols].iter_mut().zip(b) {
                *d += a_r * b_c;
            }
        }
    }

    /// Element-wise `self += other`
    pub fn add_assign(&mut self, other: &[f32]) {
        debug_assert_eq!(self.data.len(), other.len());
        for (d, o) in self.data.iter_mut().zip(other) {
            *d += o;
        }
    }

    pub fn scale(&mut self, factor: f32) {
        for d in self.data.iter_mut() {
            *d *= factor;
        }
    }
}
