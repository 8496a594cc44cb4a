//! Model and validation errors

use thiserror::Error;

/// Raised by a model invocation: either the wrapped simulation failed or a
/// data access through the handle did.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Data(#[from] smif_data::Error),

    #[error(transparent)]
    Metadata(#[from] smif_metadata::Error),

    #[error("model '{model}' failed: {message}")]
    Simulation { model: String, message: String },
}

impl ModelError {
    pub fn simulation(model: &str, message: impl Into<String>) -> Self {
        ModelError::Simulation {
            model: model.to_string(),
            message: message.into(),
        }
    }

    /// True when the failure was a missing read, not a model fault.
    pub fn is_missing_data(&self) -> bool {
        matches!(self, ModelError::Data(e) if e.is_not_found())
    }
}

/// Raised when a configuration fails its invariants. Validation happens
/// before any job runs; none of these can occur mid-run.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("model '{0}' is included more than once")]
    DuplicateModel(String),

    #[error("dependency source model '{0}' is not in the sos model")]
    UnknownSourceModel(String),

    #[error("dependency sink model '{0}' is not in the sos model")]
    UnknownSinkModel(String),

    #[error("output '{output}' is not defined in '{model}' model")]
    UnknownSourceOutput { model: String, output: String },

    #[error("input '{input}' is not defined in '{model}' model")]
    UnknownSinkInput { model: String, input: String },

    #[error("input '{input}' of model '{model}' is not fed by any dependency")]
    UnsatisfiedInput { model: String, input: String },

    #[error("input '{input}' of model '{model}' is fed by more than one dependency")]
    DuplicateDependency { model: String, input: String },

    #[error(
        "dependency {src}.{source_output} -> {sink}.{sink_input} is not convertible: {reason}"
    )]
    NotConvertible {
        src: String,
        source_output: String,
        sink: String,
        sink_input: String,
        reason: String,
    },

    #[error("model run '{0}' has no timesteps")]
    EmptyTimesteps(String),

    #[error("model run '{run}' timesteps are not strictly increasing at {timestep}")]
    TimestepsNotIncreasing { run: String, timestep: i32 },

    #[error("scenario '{scenario}' has no variant '{variant}'")]
    UnknownScenarioVariant { scenario: String, variant: String },

    #[error("narrative '{narrative}' has no variant '{variant}'")]
    UnknownNarrativeVariant { narrative: String, variant: String },
}
