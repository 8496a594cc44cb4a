//! The store contract
//!
//! A namespaced persistence interface: configuration records, scenario and
//! parameter data, per-run results, decision state and job metadata. Writes
//! are atomic at the result-key grain and the scheduler guarantees a single
//! writer per key, so backings need no locking beyond interior mutability.

use serde::{Deserialize, Serialize};
use tracing::warn;

use smif_convert::{CoefficientCache, Coefficients, UnitDef};
use smif_metadata::{DataArray, Spec};

use crate::config::{
    DimensionConfig, Intervention, ModelRunConfig, NarrativeConfig, ScenarioConfig,
    SectorModelConfig, SosModelConfig, StrategyConfig,
};
use crate::error::Result;

/// Identifies one persisted result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResultKey {
    pub model: String,
    pub output: String,
    pub timestep: i32,
    pub iteration: u32,
}

/// One decision: an intervention committed in a build year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub name: String,
    pub build_year: i32,
}

impl Decision {
    pub fn new(name: &str, build_year: i32) -> Self {
        Self {
            name: name.to_string(),
            build_year,
        }
    }
}

/// Execution status of one job (one model at one timestep and iteration).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Unstarted,
    Running,
    Done,
    Failed,
    /// Not run because an ancestor failed
    Skipped,
}

/// Persisted record of one job's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub model: String,
    pub status: JobStatus,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobRecord {
    pub fn new(model: &str, status: JobStatus) -> Self {
        Self {
            model: model.to_string(),
            status,
            duration_ms: None,
            error: None,
        }
    }
}

/// Persistence contract used by the orchestration core.
///
/// Reads of absent keys return [`crate::Error::NotFound`]. Within one
/// process, `available_results` is consistent with `write_results` in
/// happens-before order.
pub trait Store: Send + Sync {
    // --- config namespace ---

    fn read_model_run(&self, name: &str) -> Result<ModelRunConfig>;
    fn write_model_run(&self, config: &ModelRunConfig) -> Result<()>;
    fn delete_model_run(&self, name: &str) -> Result<()>;
    fn list_model_runs(&self) -> Result<Vec<String>>;

    fn read_sos_model(&self, name: &str) -> Result<SosModelConfig>;
    fn write_sos_model(&self, config: &SosModelConfig) -> Result<()>;
    fn delete_sos_model(&self, name: &str) -> Result<()>;
    fn list_sos_models(&self) -> Result<Vec<String>>;

    fn read_sector_model(&self, name: &str) -> Result<SectorModelConfig>;
    fn write_sector_model(&self, config: &SectorModelConfig) -> Result<()>;
    fn delete_sector_model(&self, name: &str) -> Result<()>;
    fn list_sector_models(&self) -> Result<Vec<String>>;

    fn read_scenario(&self, name: &str) -> Result<ScenarioConfig>;
    fn write_scenario(&self, config: &ScenarioConfig) -> Result<()>;
    fn delete_scenario(&self, name: &str) -> Result<()>;
    fn list_scenarios(&self) -> Result<Vec<String>>;

    fn read_narrative(&self, name: &str) -> Result<NarrativeConfig>;
    fn write_narrative(&self, config: &NarrativeConfig) -> Result<()>;

    fn read_dimension(&self, name: &str) -> Result<DimensionConfig>;
    fn write_dimension(&self, config: &DimensionConfig) -> Result<()>;
    fn list_dimensions(&self) -> Result<Vec<String>>;

    fn read_unit_definitions(&self) -> Result<Vec<UnitDef>>;
    fn write_unit_definitions(&self, definitions: &[UnitDef]) -> Result<()>;

    fn read_strategies(&self, run: &str) -> Result<Vec<StrategyConfig>>;
    fn write_strategies(&self, run: &str, strategies: &[StrategyConfig]) -> Result<()>;

    // --- data namespace ---

    fn read_scenario_variant_data(
        &self,
        scenario: &str,
        variant: &str,
        variable: &str,
        timestep: i32,
    ) -> Result<DataArray>;
    fn write_scenario_variant_data(
        &self,
        scenario: &str,
        variant: &str,
        data: &DataArray,
        timestep: i32,
    ) -> Result<()>;

    fn read_narrative_variant_data(
        &self,
        narrative: &str,
        variant: &str,
        parameter: &str,
    ) -> Result<DataArray>;
    fn write_narrative_variant_data(
        &self,
        narrative: &str,
        variant: &str,
        data: &DataArray,
    ) -> Result<()>;

    fn read_model_parameter_default(&self, model: &str, parameter: &str) -> Result<DataArray>;
    fn write_model_parameter_default(&self, model: &str, data: &DataArray) -> Result<()>;

    fn read_interventions(&self, model: &str) -> Result<Vec<Intervention>>;
    fn write_interventions(&self, model: &str, interventions: &[Intervention]) -> Result<()>;

    fn read_initial_conditions(&self, model: &str) -> Result<Vec<Decision>>;
    fn write_initial_conditions(&self, model: &str, initial: &[Decision]) -> Result<()>;

    // --- results ---

    fn read_results(
        &self,
        run: &str,
        model: &str,
        output: &Spec,
        timestep: i32,
        iteration: u32,
    ) -> Result<DataArray>;
    fn write_results(
        &self,
        run: &str,
        model: &str,
        data: &DataArray,
        timestep: i32,
        iteration: u32,
    ) -> Result<()>;
    fn available_results(&self, run: &str) -> Result<Vec<ResultKey>>;

    // --- coefficients cache ---

    fn read_coefficients(&self, source: &Spec, sink: &Spec) -> Result<Option<Coefficients>>;
    fn write_coefficients(
        &self,
        source: &Spec,
        sink: &Spec,
        coefficients: &Coefficients,
    ) -> Result<()>;

    // --- state and job metadata ---

    fn read_state(&self, run: &str, timestep: i32, iteration: u32) -> Result<Vec<Decision>>;
    fn write_state(
        &self,
        run: &str,
        timestep: i32,
        iteration: u32,
        state: &[Decision],
    ) -> Result<()>;

    fn read_job_status(
        &self,
        run: &str,
        timestep: i32,
        iteration: u32,
        model: &str,
    ) -> Result<JobRecord>;
    fn write_job_status(
        &self,
        run: &str,
        timestep: i32,
        iteration: u32,
        record: &JobRecord,
    ) -> Result<()>;
    fn list_job_status(&self, run: &str, timestep: i32, iteration: u32) -> Result<Vec<JobRecord>>;

    /// Recover the latest timestep with any results, to warm-start a rerun.
    fn prepare_warm_start(&self, run: &str) -> Result<Option<i32>> {
        let results = self.available_results(run)?;
        Ok(results.iter().map(|key| key.timestep).max())
    }
}

/// Adapts a store to the conversion layer's coefficient cache.
///
/// Cache writes are best-effort: a failure is logged and conversion
/// continues with the freshly computed coefficients.
pub struct StoreCache<'a>(pub &'a dyn Store);

impl CoefficientCache for StoreCache<'_> {
    fn read_coefficients(&self, source: &Spec, sink: &Spec) -> Option<Coefficients> {
        self.0.read_coefficients(source, sink).ok().flatten()
    }

    fn write_coefficients(&self, source: &Spec, sink: &Spec, coefficients: &Coefficients) {
        if let Err(error) = self.0.write_coefficients(source, sink, coefficients) {
            warn!(%error, "failed to cache conversion coefficients");
        }
    }
}

/// Canonical cache key for a (source, sink) spec pair.
///
/// Coefficients depend on the coordinate lists, the unit pair and whether
/// the variable is extensive, so all of those go into the key.
pub(crate) fn coefficient_key(source: &Spec, sink: &Spec) -> String {
    fn signature(spec: &Spec) -> String {
        let mut sig = String::new();
        for dim in spec.dims() {
            sig.push_str(dim);
            sig.push('[');
            sig.push_str(&spec.coords(dim).unwrap_or(&[]).join(","));
            sig.push(']');
        }
        sig.push('|');
        sig.push_str(spec.unit());
        if spec.is_extensive() {
            sig.push_str("|ext");
        }
        sig
    }
    format!("{}->{}", signature(source), signature(sink))
}
