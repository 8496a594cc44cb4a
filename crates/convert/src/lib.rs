//! smif convert
//!
//! Adapts data arrays between producer and consumer specs: aggregating and
//! apportioning across region dimensions, resampling across interval
//! dimensions and rescaling units. Adaptors are pure and deterministic; a
//! fixed pipeline order (region, then interval, then unit) composes them.

pub mod adaptor;
pub mod coefficients;
pub mod error;
pub mod interval;
pub mod region;
pub mod unit;

pub use adaptor::{
    Adaptor, AdaptorPipeline, CoefficientCache, ConvertRegister, IdentityAdaptor, IntervalAdaptor,
    RegionAdaptor, UnitAdaptor,
};
pub use coefficients::Coefficients;
pub use error::{Error, Result};
pub use interval::{Interval, IntervalRegister, IntervalSet};
pub use region::{Region, RegionRegister, RegionSet};
pub use unit::{UnitDef, UnitRegistry};
