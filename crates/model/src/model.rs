//! The model contract
//!
//! Everything the scheduler runs is a [`Model`]: scenario models copying
//! exogenous data through, and sector models calling out to user code.
//! Models never share state; the [`DataHandle`] passed into `simulate` is
//! their only view of the world.

use indexmap::IndexMap;

use smif_data::DataHandle;
use smif_metadata::Spec;

use crate::error::ModelError;

/// A node in the system-of-systems: named, with typed inputs, outputs and
/// parameters, simulated once per (timestep, iteration).
pub trait Model: Send + Sync {
    fn name(&self) -> &str;

    /// Inputs this model consumes, keyed by input name.
    fn inputs(&self) -> &IndexMap<String, Spec>;

    /// Outputs this model produces, keyed by output name.
    fn outputs(&self) -> &IndexMap<String, Spec>;

    /// Parameters this model reads, keyed by parameter name.
    fn parameters(&self) -> &IndexMap<String, Spec>;

    /// One-shot hook before the first timestep of a run. No dependency data
    /// is available yet; parameters and state are.
    fn before_model_run(&self, _data: &mut DataHandle) -> Result<(), ModelError> {
        Ok(())
    }

    /// Generate results for the handle's timestep, reading inputs and
    /// writing outputs through the handle.
    fn simulate(&self, data: &mut DataHandle) -> Result<(), ModelError>;
}
