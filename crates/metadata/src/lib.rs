//! smif metadata
//!
//! Immutable descriptions of model variables (specs and coordinates) and the
//! labelled n-dimensional arrays that carry their values between models.

pub mod data_array;
pub mod error;
pub mod spec;
pub mod timestep;

pub use data_array::DataArray;
pub use error::{Error, Result};
pub use spec::{Coords, DType, Spec};
pub use timestep::RelativeTimestep;
