//! Labelled data arrays
//!
//! A [`DataArray`] binds an n-dimensional block of values to a [`Spec`].
//! It is the single currency moved between models: scenario data, dependency
//! inputs, parameters and results are all data arrays.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::spec::Spec;

/// An n-dimensional array of values bound to a spec.
///
/// Values are stored row-major in spec dimension order; the length always
/// equals `spec.len()`. Mutation replaces values wholesale — there is no
/// in-place element assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataArray {
    spec: Spec,
    values: Vec<f64>,
}

impl DataArray {
    /// Bind values to a spec, checking the length against the spec shape.
    pub fn new(spec: Spec, values: Vec<f64>) -> Result<Self> {
        if values.len() != spec.len() {
            return Err(Error::ShapeMismatch {
                spec: spec.name().to_string(),
                expected: spec.len(),
                actual: values.len(),
            });
        }
        Ok(Self { spec, values })
    }

    /// An array with every element set to `value`.
    pub fn filled(spec: Spec, value: f64) -> Self {
        let len = spec.len();
        Self {
            spec,
            values: vec![value; len],
        }
    }

    /// A single-value array for a zero-dimensional spec.
    pub fn scalar(spec: Spec, value: f64) -> Result<Self> {
        Self::new(spec, vec![value])
    }

    pub fn spec(&self) -> &Spec {
        &self.spec
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Consume the array, returning spec and values.
    pub fn into_parts(self) -> (Spec, Vec<f64>) {
        (self.spec, self.values)
    }

    /// Rebind the same values to a different spec of identical shape.
    pub fn with_spec(self, spec: Spec) -> Result<Self> {
        Self::new(spec, self.values)
    }

    /// The value of a length-1 array.
    pub fn as_scalar(&self) -> Option<f64> {
        if self.values.len() == 1 {
            Some(self.values[0])
        } else {
            None
        }
    }

    /// Value at a multi-dimensional index in spec dimension order.
    pub fn get(&self, index: &[usize]) -> Result<f64> {
        let shape = self.spec.shape();
        if index.len() != shape.len() || index.iter().zip(&shape).any(|(i, n)| i >= n) {
            return Err(Error::IndexOutOfBounds {
                spec: self.spec.name().to_string(),
                index: index.to_vec(),
                shape,
            });
        }
        let mut flat = 0;
        for (i, n) in index.iter().zip(&shape) {
            flat = flat * n + i;
        }
        Ok(self.values[flat])
    }

    /// Sum of all values. NaN values propagate.
    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    /// Largest elementwise relative delta against another array of the same
    /// shape: `max(|a - b| / max(|b|, floor))`.
    ///
    /// Used by iterating decision loops to measure convergence. Returns
    /// `None` when the shapes differ.
    pub fn max_relative_delta(&self, other: &DataArray, floor: f64) -> Option<f64> {
        if self.values.len() != other.values.len() {
            return None;
        }
        let mut max = 0.0_f64;
        for (a, b) in self.values.iter().zip(&other.values) {
            let delta = (a - b).abs() / b.abs().max(floor);
            max = max.max(delta);
        }
        Some(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{Coords, DType};

    fn spec_2x2() -> Spec {
        Spec::new(
            "test",
            vec![
                Coords::new("region", vec!["north", "south"]),
                Coords::new("interval", vec!["day", "night"]),
            ],
            DType::F64,
            "GWh",
        )
        .unwrap()
    }

    #[test]
    fn test_shape_checked_on_construction() {
        let result = DataArray::new(spec_2x2(), vec![1.0, 2.0, 3.0]);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));

        let ok = DataArray::new(spec_2x2(), vec![1.0, 2.0, 3.0, 4.0]);
        assert!(ok.is_ok());
    }

    #[test]
    fn test_row_major_indexing() {
        let da = DataArray::new(spec_2x2(), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        // [region, interval]: north/day, north/night, south/day, south/night
        assert_eq!(da.get(&[0, 0]).unwrap(), 1.0);
        assert_eq!(da.get(&[0, 1]).unwrap(), 2.0);
        assert_eq!(da.get(&[1, 0]).unwrap(), 3.0);
        assert_eq!(da.get(&[1, 1]).unwrap(), 4.0);

        assert!(da.get(&[2, 0]).is_err());
        assert!(da.get(&[0]).is_err());
    }

    #[test]
    fn test_scalar_roundtrip() {
        let spec = Spec::scalar("price", "GBP");
        let da = DataArray::scalar(spec, 870.0).unwrap();
        assert_eq!(da.as_scalar(), Some(870.0));
    }

    #[test]
    fn test_max_relative_delta() {
        let a = DataArray::new(spec_2x2(), vec![10.0, 20.0, 30.0, 40.0]).unwrap();
        let b = DataArray::new(spec_2x2(), vec![10.0, 20.0, 30.0, 44.0]).unwrap();
        let delta = a.max_relative_delta(&b, 1e-12).unwrap();
        assert!((delta - 4.0 / 44.0).abs() < 1e-12);
    }

    #[test]
    fn test_nan_propagates_through_sum() {
        let da = DataArray::new(spec_2x2(), vec![1.0, f64::NAN, 3.0, 4.0]).unwrap();
        assert!(da.sum().is_nan());
    }
}
