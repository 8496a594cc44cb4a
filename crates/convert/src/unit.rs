//! Unit definitions and linear-affine conversion
//!
//! Units are grouped by physical dimension and defined by a scale and offset
//! relative to that dimension's base unit, so
//! `base = value * scale + offset`. Conversion between two units of the same
//! dimension goes through the base; units of different dimensions are
//! incompatible.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A named unit: scale and offset relative to its dimension's base unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDef {
    pub name: String,
    /// Physical dimension, e.g. `"energy"`. Units convert only within one.
    pub dimension: String,
    /// Multiplicative factor to the base unit (base = value * scale + offset)
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
}

impl UnitDef {
    pub fn new(name: &str, dimension: &str, scale: f64) -> Self {
        Self {
            name: name.to_string(),
            dimension: dimension.to_string(),
            scale,
            offset: 0.0,
        }
    }

    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }
}

/// Registry of known units.
///
/// `UnitRegistry::default()` carries the built-in definitions used across
/// infrastructure sector models; project-specific units are added with
/// [`UnitRegistry::register`].
#[derive(Debug, Clone)]
pub struct UnitRegistry {
    units: IndexMap<String, UnitDef>,
}

impl Default for UnitRegistry {
    fn default() -> Self {
        let mut registry = Self {
            units: IndexMap::new(),
        };
        for def in [
            UnitDef::new("-", "dimensionless", 1.0),
            UnitDef::new("%", "dimensionless", 0.01),
            UnitDef::new("J", "energy", 1.0),
            UnitDef::new("kWh", "energy", 3.6e6),
            UnitDef::new("MWh", "energy", 3.6e9),
            UnitDef::new("GWh", "energy", 3.6e12),
            UnitDef::new("W", "power", 1.0),
            UnitDef::new("kW", "power", 1e3),
            UnitDef::new("MW", "power", 1e6),
            UnitDef::new("GW", "power", 1e9),
            UnitDef::new("l", "volume", 1.0),
            UnitDef::new("Ml", "volume", 1e6),
            UnitDef::new("kg", "mass", 1.0),
            UnitDef::new("t", "mass", 1e3),
            UnitDef::new("people", "count", 1.0),
            UnitDef::new("thousand people", "count", 1e3),
            UnitDef::new("GBP", "currency", 1.0),
            UnitDef::new("MGBP", "currency", 1e6),
            UnitDef::new("K", "temperature", 1.0),
            UnitDef::new("degC", "temperature", 1.0).with_offset(273.15),
        ] {
            registry.units.insert(def.name.clone(), def);
        }
        registry
    }
}

impl UnitRegistry {
    /// An empty registry with no unit definitions.
    pub fn empty() -> Self {
        Self {
            units: IndexMap::new(),
        }
    }

    /// Add or replace a unit definition.
    pub fn register(&mut self, def: UnitDef) {
        self.units.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<&UnitDef> {
        self.units.get(name)
    }

    /// True if both units are known and share a dimension.
    pub fn compatible(&self, from: &str, to: &str) -> bool {
        match (self.units.get(from), self.units.get(to)) {
            (Some(a), Some(b)) => a.dimension == b.dimension,
            _ => false,
        }
    }

    fn pair(&self, from: &str, to: &str) -> Result<(&UnitDef, &UnitDef)> {
        let src = self
            .units
            .get(from)
            .ok_or_else(|| Error::UnknownUnit(from.to_string()))?;
        let dst = self
            .units
            .get(to)
            .ok_or_else(|| Error::UnknownUnit(to.to_string()))?;
        if src.dimension != dst.dimension {
            return Err(Error::IncompatibleUnits {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok((src, dst))
    }

    /// Convert a single value between units of the same dimension.
    pub fn convert(&self, value: f64, from: &str, to: &str) -> Result<f64> {
        let (src, dst) = self.pair(from, to)?;
        Ok((value * src.scale + src.offset - dst.offset) / dst.scale)
    }

    /// Convert a slice of values in place between units of the same dimension.
    pub fn convert_slice(&self, values: &mut [f64], from: &str, to: &str) -> Result<()> {
        let (src, dst) = self.pair(from, to)?;
        for v in values {
            *v = (*v * src.scale + src.offset - dst.offset) / dst.scale;
        }
        Ok(())
    }
}
