//! Metadata errors

use thiserror::Error;

/// Metadata result type
pub type Result<T> = std::result::Result<T, Error>;

/// Metadata errors
#[derive(Debug, Error)]
pub enum Error {
    #[error("spec '{spec}': dimension '{dim}' declared more than once")]
    DuplicateDim { spec: String, dim: String },

    #[error("spec '{spec}': dimension '{dim}' has no coordinates")]
    MissingCoords { spec: String, dim: String },

    #[error("spec '{spec}': dimension '{dim}' has an empty coordinate list")]
    EmptyCoords { spec: String, dim: String },

    #[error("spec '{spec}' expects {expected} values, got {actual}")]
    ShapeMismatch {
        spec: String,
        expected: usize,
        actual: usize,
    },

    #[error("index {index:?} out of bounds for spec '{spec}' with shape {shape:?}")]
    IndexOutOfBounds {
        spec: String,
        index: Vec<usize>,
        shape: Vec<usize>,
    },

    #[error("timestep {timestep} is not in the model run")]
    TimestepNotInRun { timestep: i32 },

    #[error("no timestep before {timestep} in the model run")]
    NoPreviousTimestep { timestep: i32 },

    #[error("model run has no timesteps")]
    EmptyTimesteps,
}
