//! Sector models
//!
//! A sector model bridges the framework to user simulation code. The
//! framework owns the specs (from configuration); the user supplies a
//! [`ModelWrapper`] with the actual `simulate` behaviour. Closures taking a
//! data handle implement `ModelWrapper` directly.

use indexmap::IndexMap;

use smif_data::{DataHandle, SectorModelConfig};
use smif_metadata::Spec;

use crate::error::ModelError;
use crate::model::Model;

/// User-authored simulation behaviour behind a sector model.
pub trait ModelWrapper: Send + Sync {
    /// One-shot hook before the first timestep of a run.
    fn before_model_run(&self, _data: &mut DataHandle) -> Result<(), ModelError> {
        Ok(())
    }

    /// Run the wrapped simulation for the handle's timestep.
    fn simulate(&self, data: &mut DataHandle) -> Result<(), ModelError>;
}

impl<F> ModelWrapper for F
where
    F: Fn(&mut DataHandle) -> Result<(), ModelError> + Send + Sync,
{
    fn simulate(&self, data: &mut DataHandle) -> Result<(), ModelError> {
        self(data)
    }
}

impl ModelWrapper for std::sync::Arc<dyn ModelWrapper> {
    fn before_model_run(&self, data: &mut DataHandle) -> Result<(), ModelError> {
        self.as_ref().before_model_run(data)
    }

    fn simulate(&self, data: &mut DataHandle) -> Result<(), ModelError> {
        self.as_ref().simulate(data)
    }
}

/// A configured sector model: specs from configuration, behaviour from the
/// user's wrapper.
pub struct SectorModel {
    name: String,
    inputs: IndexMap<String, Spec>,
    outputs: IndexMap<String, Spec>,
    parameters: IndexMap<String, Spec>,
    wrapper: Box<dyn ModelWrapper>,
}

impl SectorModel {
    pub fn from_config(config: &SectorModelConfig, wrapper: Box<dyn ModelWrapper>) -> Self {
        Self {
            name: config.name.clone(),
            inputs: spec_map(&config.inputs),
            outputs: spec_map(&config.outputs),
            parameters: spec_map(&config.parameters),
            wrapper,
        }
    }

    pub fn new(
        name: &str,
        inputs: Vec<Spec>,
        outputs: Vec<Spec>,
        parameters: Vec<Spec>,
        wrapper: Box<dyn ModelWrapper>,
    ) -> Self {
        Self {
            name: name.to_string(),
            inputs: spec_map(&inputs),
            outputs: spec_map(&outputs),
            parameters: spec_map(&parameters),
            wrapper,
        }
    }
}

fn spec_map(specs: &[Spec]) -> IndexMap<String, Spec> {
    specs
        .iter()
        .map(|spec| (spec.name().to_string(), spec.clone()))
        .collect()
}

impl Model for SectorModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &IndexMap<String, Spec> {
        &self.inputs
    }

    fn outputs(&self) -> &IndexMap<String, Spec> {
        &self.outputs
    }

    fn parameters(&self) -> &IndexMap<String, Spec> {
        &self.parameters
    }

    fn before_model_run(&self, data: &mut DataHandle) -> Result<(), ModelError> {
        self.wrapper.before_model_run(data)
    }

    fn simulate(&self, data: &mut DataHandle) -> Result<(), ModelError> {
        self.wrapper.simulate(data)
    }
}
