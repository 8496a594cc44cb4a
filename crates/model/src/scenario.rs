//! Scenario models
//!
//! A scenario model produces exogenous data: no computation, it copies the
//! selected variant's data into the results namespace so every downstream
//! read (current or lagged) goes through the same path as model output.

use indexmap::IndexMap;
use tracing::debug;

use smif_data::DataHandle;
use smif_metadata::Spec;

use crate::error::ModelError;
use crate::model::Model;

/// Exogenous data source bound to one variant for the duration of a run.
///
/// The scheduler constructs the handle for a scenario model with its
/// provided variables wired as scenario dependencies on itself, so
/// `simulate` is a plain read-then-write per variable.
#[derive(Debug, Clone)]
pub struct ScenarioModel {
    name: String,
    scenario: String,
    variant: String,
    provides: IndexMap<String, Spec>,
    empty: IndexMap<String, Spec>,
}

impl ScenarioModel {
    pub fn new(name: &str, scenario: &str, variant: &str, provides: Vec<Spec>) -> Self {
        Self {
            name: name.to_string(),
            scenario: scenario.to_string(),
            variant: variant.to_string(),
            provides: provides
                .into_iter()
                .map(|spec| (spec.name().to_string(), spec))
                .collect(),
            empty: IndexMap::new(),
        }
    }

    /// The scenario this model draws data from.
    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    /// The variant selected for this run.
    pub fn variant(&self) -> &str {
        &self.variant
    }

    pub fn provides(&self) -> &IndexMap<String, Spec> {
        &self.provides
    }
}

impl Model for ScenarioModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &IndexMap<String, Spec> {
        &self.empty
    }

    fn outputs(&self) -> &IndexMap<String, Spec> {
        &self.provides
    }

    fn parameters(&self) -> &IndexMap<String, Spec> {
        &self.empty
    }

    fn simulate(&self, data: &mut DataHandle) -> Result<(), ModelError> {
        for name in self.provides.keys() {
            let values = data.get_data(name)?;
            data.set_results(name, &values)?;
        }
        debug!(
            scenario = %self.scenario,
            variant = %self.variant,
            variables = self.provides.len(),
            "scenario data copied through"
        );
        Ok(())
    }
}
