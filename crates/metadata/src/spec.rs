//! Variable specs
//!
//! A [`Spec`] is the immutable description of one named model variable: its
//! dimensions, the coordinate labels along each dimension, its unit and dtype.
//! Specs are created at configuration load and never mutated during a run.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Element type of a variable's values.
///
/// Results data is carried as `f64`; the dtype is recorded on the spec so
/// stores and handles can check what a variable is declared to hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    #[default]
    F64,
    I64,
    Bool,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F64 => write!(f, "f64"),
            DType::I64 => write!(f, "i64"),
            DType::Bool => write!(f, "bool"),
        }
    }
}

/// Ordered coordinate labels for one dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coords {
    /// Dimension name, e.g. `"region"`
    pub dim: String,
    /// Ordered element ids along the dimension
    pub ids: Vec<String>,
}

impl Coords {
    pub fn new(dim: impl Into<String>, ids: Vec<impl Into<String>>) -> Self {
        Self {
            dim: dim.into(),
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Immutable description of a named data variable.
///
/// Shape is implied by the coordinate lists: one axis per dimension, axis
/// length = number of coordinate ids. A spec with no dimensions describes a
/// scalar (length 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    name: String,
    dims: Vec<String>,
    coords: IndexMap<String, Vec<String>>,
    #[serde(default)]
    dtype: DType,
    unit: String,
    /// Extensive quantities (energy, volume, counts) aggregate by summing;
    /// intensive quantities (prices, temperatures) aggregate by averaging.
    #[serde(default)]
    extensive: bool,
    #[serde(default)]
    description: String,
}

impl Spec {
    /// Create a spec from ordered per-dimension coordinates.
    ///
    /// Rejects duplicate dimension names and empty coordinate lists.
    pub fn new(
        name: impl Into<String>,
        coords: Vec<Coords>,
        dtype: DType,
        unit: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let mut dims = Vec::with_capacity(coords.len());
        let mut coord_map = IndexMap::with_capacity(coords.len());
        for c in coords {
            if c.ids.is_empty() {
                return Err(Error::EmptyCoords {
                    spec: name,
                    dim: c.dim,
                });
            }
            if coord_map.contains_key(&c.dim) {
                return Err(Error::DuplicateDim {
                    spec: name,
                    dim: c.dim,
                });
            }
            dims.push(c.dim.clone());
            coord_map.insert(c.dim, c.ids);
        }
        Ok(Self {
            name,
            dims,
            coords: coord_map,
            dtype,
            unit: unit.into(),
            extensive: false,
            description: String::new(),
        })
    }

    /// A zero-dimensional spec holding a single value.
    pub fn scalar(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dims: Vec::new(),
            coords: IndexMap::new(),
            dtype: DType::F64,
            unit: unit.into(),
            extensive: false,
            description: String::new(),
        }
    }

    /// Mark the variable as extensive (aggregates by summing).
    pub fn extensive(mut self, extensive: bool) -> Self {
        self.extensive = extensive;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Rename the variable, keeping dims, coords, unit and dtype.
    ///
    /// Used when a dependency connects a source output to a sink input under
    /// a different name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        let mut spec = self.clone();
        spec.name = name.into();
        spec
    }

    /// A copy with one dimension's coordinates replaced.
    ///
    /// Conversion steps use this to describe intermediate arrays as each
    /// dimension is adapted in turn.
    pub fn with_coords(&self, dim: &str, ids: Vec<String>) -> Result<Self> {
        if !self.coords.contains_key(dim) {
            return Err(Error::MissingCoords {
                spec: self.name.clone(),
                dim: dim.to_string(),
            });
        }
        if ids.is_empty() {
            return Err(Error::EmptyCoords {
                spec: self.name.clone(),
                dim: dim.to_string(),
            });
        }
        let mut spec = self.clone();
        spec.coords.insert(dim.to_string(), ids);
        Ok(spec)
    }

    /// A copy with the unit replaced.
    pub fn with_unit(&self, unit: impl Into<String>) -> Self {
        let mut spec = self.clone();
        spec.unit = unit.into();
        spec
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn coords(&self, dim: &str) -> Option<&[String]> {
        self.coords.get(dim).map(|ids| ids.as_slice())
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn is_extensive(&self) -> bool {
        self.extensive
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Axis lengths, one per dimension.
    pub fn shape(&self) -> Vec<usize> {
        self.dims.iter().map(|d| self.coords[d].len()).collect()
    }

    /// Total number of values (1 for a scalar spec).
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of a dimension in the axis order.
    pub fn axis(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    /// True if both specs name the same set of dimensions, in any order.
    pub fn has_same_dims(&self, other: &Spec) -> bool {
        self.dims.len() == other.dims.len()
            && self.dims.iter().all(|d| other.coords.contains_key(d))
    }

    /// True if both specs have identical dims, coords and unit, so values
    /// pass through without conversion.
    pub fn matches(&self, other: &Spec) -> bool {
        self.dims == other.dims && self.coords == other.coords && self.unit == other.unit
    }
}

impl fmt::Display for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (", self.name)?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}[{}]", dim, self.coords[dim].len())?;
        }
        write!(f, ") {} {}", self.unit, self.dtype)
    }
}
