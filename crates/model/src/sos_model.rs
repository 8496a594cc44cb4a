//! System-of-systems composition
//!
//! A [`SosModel`] holds the included models and the typed dependencies
//! wiring them together. Validation runs before anything executes and
//! enforces the configuration invariants; cycle detection over the
//! dependency graph is the runtime's concern, not ours.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use smif_convert::ConvertRegister;
use smif_data::{DependencySource, NarrativeConfig, ResolvedDependency, SosModelConfig};
use smif_metadata::RelativeTimestep;

use crate::error::ValidationError;
use crate::model::Model;
use crate::scenario::ScenarioModel;

/// A typed dependency between two included models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub source: String,
    pub source_output: String,
    pub sink: String,
    pub sink_input: String,
    pub timestep: RelativeTimestep,
}

impl Dependency {
    pub fn is_lagged(&self) -> bool {
        self.timestep == RelativeTimestep::Previous
    }
}

/// A named collection of coupled models with a dependency list.
pub struct SosModel {
    name: String,
    models: IndexMap<String, Arc<dyn Model>>,
    scenario_models: Vec<String>,
    dependencies: Vec<Dependency>,
    narratives: Vec<NarrativeConfig>,
}

impl SosModel {
    /// Assemble from configuration plus constructed member models.
    ///
    /// `models` must contain one entry per name in the config's
    /// `sector_models`, and one [`ScenarioModel`] (passed via
    /// `scenario_models`) per included scenario.
    pub fn new(
        config: &SosModelConfig,
        sector_models: Vec<Arc<dyn Model>>,
        scenario_models: Vec<Arc<ScenarioModel>>,
    ) -> Result<Self, ValidationError> {
        let mut models: IndexMap<String, Arc<dyn Model>> = IndexMap::new();
        let mut scenario_names = Vec::with_capacity(scenario_models.len());

        for scenario in scenario_models {
            scenario_names.push(scenario.name().to_string());
            if models
                .insert(scenario.name().to_string(), scenario)
                .is_some()
            {
                return Err(ValidationError::DuplicateModel(
                    scenario_names.last().cloned().unwrap_or_default(),
                ));
            }
        }
        for model in sector_models {
            let name = model.name().to_string();
            if models.insert(name.clone(), model).is_some() {
                return Err(ValidationError::DuplicateModel(name));
            }
        }

        let dependencies = config
            .scenario_dependencies
            .iter()
            .chain(&config.model_dependencies)
            .map(|dep| Dependency {
                source: dep.source.clone(),
                source_output: dep.source_output.clone(),
                sink: dep.sink.clone(),
                sink_input: dep.sink_input.clone(),
                timestep: dep.timestep_or_current(),
            })
            .collect();

        Ok(Self {
            name: config.name.clone(),
            models,
            scenario_models: scenario_names,
            dependencies,
            narratives: config.narratives.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn models(&self) -> &IndexMap<String, Arc<dyn Model>> {
        &self.models
    }

    pub fn model(&self, name: &str) -> Option<&Arc<dyn Model>> {
        self.models.get(name)
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn narratives(&self) -> &[NarrativeConfig] {
        &self.narratives
    }

    pub fn is_scenario_model(&self, name: &str) -> bool {
        self.scenario_models.iter().any(|n| n == name)
    }

    /// Enforce the configuration invariants.
    ///
    /// Checks that every dependency endpoint exists, that every sector model
    /// input is fed by exactly one dependency (the scenario-plus-lagged
    /// pairing is the one sanctioned exception), and that each dependency's
    /// source spec can be adapted to its sink spec.
    pub fn validate(&self, convert: &ConvertRegister) -> Result<(), ValidationError> {
        for dep in &self.dependencies {
            let source =
                self.models
                    .get(&dep.source)
                    .ok_or_else(|| ValidationError::UnknownSourceModel(dep.source.clone()))?;
            let sink = self
                .models
                .get(&dep.sink)
                .ok_or_else(|| ValidationError::UnknownSinkModel(dep.sink.clone()))?;

            let source_spec = source.outputs().get(&dep.source_output).ok_or_else(|| {
                ValidationError::UnknownSourceOutput {
                    model: dep.source.clone(),
                    output: dep.source_output.clone(),
                }
            })?;
            let sink_spec = sink.inputs().get(&dep.sink_input).ok_or_else(|| {
                ValidationError::UnknownSinkInput {
                    model: dep.sink.clone(),
                    input: dep.sink_input.clone(),
                }
            })?;

            if !convert.is_convertible(source_spec, sink_spec) {
                return Err(ValidationError::NotConvertible {
                    src: dep.source.clone(),
                    source_output: dep.source_output.clone(),
                    sink: dep.sink.clone(),
                    sink_input: dep.sink_input.clone(),
                    reason: format!("{source_spec} cannot reach {sink_spec}"),
                });
            }
        }

        for (name, model) in &self.models {
            for input in model.inputs().keys() {
                let feeders: Vec<&Dependency> = self
                    .dependencies
                    .iter()
                    .filter(|dep| &dep.sink == name && &dep.sink_input == input)
                    .collect();
                match feeders.len() {
                    0 => {
                        return Err(ValidationError::UnsatisfiedInput {
                            model: name.clone(),
                            input: input.clone(),
                        })
                    }
                    1 => {}
                    2 => {
                        // One scenario source plus one lagged model source is
                        // the planning-with-feedback idiom; anything else is
                        // ambiguous.
                        let scenario_and_lagged = feeders.iter().any(|dep| {
                            self.is_scenario_model(&dep.source) && !dep.is_lagged()
                        }) && feeders.iter().any(|dep| {
                            !self.is_scenario_model(&dep.source) && dep.is_lagged()
                        });
                        if !scenario_and_lagged {
                            return Err(ValidationError::DuplicateDependency {
                                model: name.clone(),
                                input: input.clone(),
                            });
                        }
                    }
                    _ => {
                        return Err(ValidationError::DuplicateDependency {
                            model: name.clone(),
                            input: input.clone(),
                        })
                    }
                }
            }
        }

        debug!(
            sos_model = %self.name,
            models = self.models.len(),
            dependencies = self.dependencies.len(),
            "sos model validated"
        );
        Ok(())
    }

    /// Resolve the dependencies feeding one member model into the form a
    /// data handle consumes.
    ///
    /// When two dependencies feed an input (scenario plus lagged model), the
    /// current-offset scenario dependency wins for `get_data`; the lagged
    /// edge is reachable through `get_previous_timestep_data`.
    pub fn resolved_dependencies(
        &self,
        model_name: &str,
        scenario_models: &IndexMap<String, Arc<ScenarioModel>>,
    ) -> IndexMap<String, ResolvedDependency> {
        let mut resolved: IndexMap<String, ResolvedDependency> = IndexMap::new();
        for dep in self.dependencies.iter().filter(|d| d.sink == model_name) {
            let source_spec = match self
                .models
                .get(&dep.source)
                .and_then(|m| m.outputs().get(&dep.source_output))
            {
                Some(spec) => spec.clone(),
                None => continue,
            };
            let source = match scenario_models.get(&dep.source) {
                Some(scenario) => DependencySource::Scenario {
                    scenario: scenario.scenario().to_string(),
                    variant: scenario.variant().to_string(),
                },
                None => DependencySource::Model {
                    name: dep.source.clone(),
                },
            };
            let entry = ResolvedDependency {
                source,
                source_output: dep.source_output.clone(),
                source_spec,
                timestep: dep.timestep,
            };
            match resolved.get(&dep.sink_input) {
                Some(existing) if existing.timestep == RelativeTimestep::Current => {}
                _ => {
                    resolved.insert(dep.sink_input.clone(), entry);
                }
            }
        }
        resolved
    }
}
