//! Runtime errors

use thiserror::Error;

use crate::graph::CircularDependencyError;

/// Runtime result type
pub type Result<T> = std::result::Result<T, Error>;

/// Runtime errors
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] smif_model::ValidationError),

    #[error(transparent)]
    CircularDependency(#[from] CircularDependencyError),

    #[error(transparent)]
    Data(#[from] smif_data::Error),

    #[error(transparent)]
    Metadata(#[from] smif_metadata::Error),

    #[error("model '{model}' failed at timestep {timestep} iteration {iteration}: {message}")]
    ModelRun {
        model: String,
        timestep: i32,
        iteration: u32,
        message: String,
    },

    #[error(
        "no convergence at timestep {timestep} after {iterations} iterations \
         (max delta {max_delta:.3e})"
    )]
    Convergence {
        timestep: i32,
        iterations: u32,
        max_delta: f64,
    },

    #[error("model run cancelled at timestep {timestep}")]
    Cancelled { timestep: i32 },

    #[error("sector model '{0}' has no registered wrapper")]
    MissingWrapper(String),
}
