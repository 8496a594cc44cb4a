//! Conversion coefficient matrices
//!
//! A sink×source matrix applied along one axis of a data array. Region and
//! interval conversion both reduce to building one of these; they are
//! deterministic for a given pair of coordinate systems, so stores may cache
//! them keyed by the source and sink specs.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Dense row-major sink×source coefficient matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficients {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
}

impl Coefficients {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            values: vec![0.0; rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.values[row * self.cols + col] = value;
    }

    /// Sum of one row (the weight applied to produce one sink element).
    pub fn row_sum(&self, row: usize) -> f64 {
        self.values[row * self.cols..(row + 1) * self.cols]
            .iter()
            .sum()
    }

    /// Sum of one column (the fraction of one source element distributed).
    pub fn col_sum(&self, col: usize) -> f64 {
        (0..self.rows).map(|r| self.get(r, col)).sum()
    }

    /// Apply the matrix along `axis` of an array with the given shape.
    ///
    /// The input axis length must equal `cols`; the output has the same shape
    /// with that axis replaced by `rows`. Arrays are row-major.
    pub fn apply(&self, values: &[f64], shape: &[usize], axis: usize) -> Result<Vec<f64>> {
        let axis_len = shape[axis];
        if axis_len != self.cols {
            return Err(Error::CoefficientShape {
                rows: self.rows,
                cols: self.cols,
                expected_rows: self.rows,
                expected_cols: axis_len,
            });
        }
        // Row-major: outer indices before the axis, inner after it
        let outer: usize = shape[..axis].iter().product();
        let inner: usize = shape[axis + 1..].iter().product();

        let mut out = vec![0.0; outer * self.rows * inner];
        for o in 0..outer {
            for r in 0..self.rows {
                for c in 0..self.cols {
                    let w = self.get(r, c);
                    if w == 0.0 {
                        continue;
                    }
                    let src_base = (o * self.cols + c) * inner;
                    let dst_base = (o * self.rows + r) * inner;
                    for i in 0..inner {
                        out[dst_base + i] += w * values[src_base + i];
                    }
                }
            }
        }
        Ok(out)
    }
}
