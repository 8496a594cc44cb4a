//! Configuration records
//!
//! The typed records held in the store's config namespace. These are the
//! external interface of the core: the CLI and file loaders produce them,
//! validation and the model runner consume them. Serde-serializable so any
//! backing can persist them as documents.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use smif_metadata::{RelativeTimestep, Spec};

use crate::store::Decision;

/// Sector model configuration: the specs of what the wrapped simulation
/// consumes and produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorModelConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: Vec<Spec>,
    #[serde(default)]
    pub outputs: Vec<Spec>,
    #[serde(default)]
    pub parameters: Vec<Spec>,
    #[serde(default)]
    pub interventions: Vec<Intervention>,
    #[serde(default)]
    pub initial_conditions: Vec<Decision>,
}

/// A possible investment or build action belonging to one sector model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    pub name: String,
    #[serde(default)]
    pub build_year: Option<i32>,
    /// Open attribute map (capacity, capital cost, location, ...)
    #[serde(default)]
    pub attributes: IndexMap<String, serde_json::Value>,
}

/// Scenario configuration: exogenous variables and the variants providing
/// concrete data for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub provides: Vec<Spec>,
    #[serde(default)]
    pub variants: Vec<ScenarioVariantConfig>,
}

impl ScenarioConfig {
    pub fn variant(&self, name: &str) -> Option<&ScenarioVariantConfig> {
        self.variants.iter().find(|v| v.name == name)
    }
}

/// One concrete data set for a scenario: variable name to data key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioVariantConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub data: IndexMap<String, String>,
}

/// A typed dependency record: source output feeds sink input, optionally at
/// the previous timestep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyConfig {
    pub source: String,
    pub source_output: String,
    pub sink: String,
    pub sink_input: String,
    #[serde(default)]
    pub timestep: Option<RelativeTimestep>,
}

impl DependencyConfig {
    pub fn timestep_or_current(&self) -> RelativeTimestep {
        self.timestep.unwrap_or(RelativeTimestep::Current)
    }
}

/// Narrative configuration: parameter overrides expressing a storyline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// model name -> parameters this narrative may override
    pub provides: IndexMap<String, Vec<String>>,
    #[serde(default)]
    pub variants: Vec<NarrativeVariantConfig>,
}

impl NarrativeConfig {
    pub fn variant(&self, name: &str) -> Option<&NarrativeVariantConfig> {
        self.variants.iter().find(|v| v.name == name)
    }

    /// True if this narrative overrides the given model parameter.
    pub fn provides_parameter(&self, model: &str, parameter: &str) -> bool {
        self.provides
            .get(model)
            .is_some_and(|params| params.iter().any(|p| p == parameter))
    }
}

/// One concrete override set for a narrative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeVariantConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub data: IndexMap<String, String>,
}

/// System-of-systems model configuration: the models included and the typed
/// dependencies wiring them together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SosModelConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sector_models: Vec<String>,
    #[serde(default)]
    pub scenarios: Vec<String>,
    #[serde(default)]
    pub scenario_dependencies: Vec<DependencyConfig>,
    #[serde(default)]
    pub model_dependencies: Vec<DependencyConfig>,
    #[serde(default)]
    pub narratives: Vec<NarrativeConfig>,
}

/// Decision module selection and tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionModuleConfig {
    /// Apply pre-planned strategies; one iteration per timestep.
    PreSpecified,
    /// Apply rules against prior state; one iteration per timestep.
    RuleBased,
    /// Fixed-point iteration until convergence variables settle.
    Iterating {
        max_iterations: u32,
        #[serde(default = "default_relative_tolerance")]
        relative_tolerance: f64,
        #[serde(default = "default_absolute_tolerance")]
        absolute_tolerance: f64,
        /// (model, output) pairs compared between iterations
        convergence_variables: Vec<ConvergenceVariable>,
    },
}

fn default_relative_tolerance() -> f64 {
    1e-5
}

fn default_absolute_tolerance() -> f64 {
    1e-8
}

impl Default for DecisionModuleConfig {
    fn default() -> Self {
        DecisionModuleConfig::PreSpecified
    }
}

/// A model output watched for convergence by an iterating decision module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceVariable {
    pub model: String,
    pub output: String,
}

/// A planned set of interventions for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default)]
    pub strategy_type: String,
    pub model_name: String,
    #[serde(default)]
    pub interventions: Vec<Decision>,
}

/// Model run configuration: which sos model to run, over which timesteps,
/// with which scenario/narrative variants and decision module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRunConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub sos_model: String,
    pub timesteps: Vec<i32>,
    /// scenario name -> variant name
    #[serde(default)]
    pub scenarios: IndexMap<String, String>,
    /// narrative name -> selected variant names, applied in order
    #[serde(default)]
    pub narratives: IndexMap<String, Vec<String>>,
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
    #[serde(default)]
    pub decision_module: DecisionModuleConfig,
}

/// A named dimension definition shared across specs: region or interval
/// coordinates with their conversion metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DimensionConfig {
    Regions(smif_convert::RegionSet),
    Intervals(smif_convert::IntervalSet),
}

impl DimensionConfig {
    pub fn name(&self) -> &str {
        match self {
            DimensionConfig::Regions(set) => &set.name,
            DimensionConfig::Intervals(set) => &set.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_module_config_roundtrip() {
        let config = DecisionModuleConfig::Iterating {
            max_iterations: 20,
            relative_tolerance: 1e-3,
            absolute_tolerance: 1e-6,
            convergence_variables: vec![ConvergenceVariable {
                model: "energy_supply".to_string(),
                output: "q".to_string(),
            }],
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: DecisionModuleConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn test_dependency_defaults_to_current() {
        let json = r#"{
            "source": "gen", "source_output": "power",
            "sink": "consume", "sink_input": "power"
        }"#;
        let dep: DependencyConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            dep.timestep_or_current(),
            smif_metadata::RelativeTimestep::Current
        );
    }

    #[test]
    fn test_lagged_dependency_parses() {
        let json = r#"{
            "source": "reservoir", "source_output": "reservoir_level",
            "sink": "reservoir", "sink_input": "reservoir_level",
            "timestep": "previous"
        }"#;
        let dep: DependencyConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            dep.timestep_or_current(),
            smif_metadata::RelativeTimestep::Previous
        );
    }

    #[test]
    fn test_model_run_minimal_json() {
        let json = r#"{
            "name": "energy_central",
            "sos_model": "energy",
            "timesteps": [2020, 2025],
            "scenarios": {"population": "low"}
        }"#;
        let config: ModelRunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.decision_module, DecisionModuleConfig::PreSpecified);
        assert_eq!(config.timesteps, vec![2020, 2025]);
    }
}
