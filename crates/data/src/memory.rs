//! In-memory store
//!
//! The canonical backing for tests and single-process runs: every namespace
//! is an `IndexMap` behind an `RwLock`, so iteration order (and therefore
//! `available_results`) is deterministic under the single-writer-per-key
//! guarantee the scheduler provides.

use std::sync::RwLock;

use indexmap::IndexMap;
use tracing::trace;

use smif_convert::{Coefficients, UnitDef};
use smif_metadata::{DataArray, Spec};

use crate::config::{
    DimensionConfig, Intervention, ModelRunConfig, NarrativeConfig, ScenarioConfig,
    SectorModelConfig, SosModelConfig, StrategyConfig,
};
use crate::error::{Error, Result};
use crate::store::{coefficient_key, Decision, JobRecord, ResultKey, Store};

#[derive(Default)]
struct Namespaces {
    model_runs: IndexMap<String, ModelRunConfig>,
    sos_models: IndexMap<String, SosModelConfig>,
    sector_models: IndexMap<String, SectorModelConfig>,
    scenarios: IndexMap<String, ScenarioConfig>,
    narratives: IndexMap<String, NarrativeConfig>,
    dimensions: IndexMap<String, DimensionConfig>,
    units: Vec<UnitDef>,
    strategies: IndexMap<String, Vec<StrategyConfig>>,

    // (scenario, variant, variable, timestep)
    scenario_data: IndexMap<(String, String, String, i32), DataArray>,
    // (narrative, variant, parameter)
    narrative_data: IndexMap<(String, String, String), DataArray>,
    // (model, parameter)
    parameter_defaults: IndexMap<(String, String), DataArray>,
    interventions: IndexMap<String, Vec<Intervention>>,
    initial_conditions: IndexMap<String, Vec<Decision>>,

    // (run, model, output, timestep, iteration)
    results: IndexMap<(String, ResultKey), DataArray>,
    coefficients: IndexMap<String, Coefficients>,

    // (run, timestep, iteration)
    state: IndexMap<(String, i32, u32), Vec<Decision>>,
    // (run, timestep, iteration, model)
    jobs: IndexMap<(String, i32, u32, String), JobRecord>,
}

/// Store backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Namespaces>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Namespaces) -> T) -> T {
        f(&self.inner.read().expect("store lock poisoned"))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Namespaces) -> T) -> T {
        f(&mut self.inner.write().expect("store lock poisoned"))
    }
}

impl Store for MemoryStore {
    fn read_model_run(&self, name: &str) -> Result<ModelRunConfig> {
        self.read(|ns| ns.model_runs.get(name).cloned())
            .ok_or_else(|| Error::not_found(format!("model_run/{name}")))
    }

    fn write_model_run(&self, config: &ModelRunConfig) -> Result<()> {
        self.write(|ns| {
            ns.model_runs.insert(config.name.clone(), config.clone());
        });
        Ok(())
    }

    fn delete_model_run(&self, name: &str) -> Result<()> {
        self.write(|ns| ns.model_runs.shift_remove(name))
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("model_run/{name}")))
    }

    fn list_model_runs(&self) -> Result<Vec<String>> {
        Ok(self.read(|ns| ns.model_runs.keys().cloned().collect()))
    }

    fn read_sos_model(&self, name: &str) -> Result<SosModelConfig> {
        self.read(|ns| ns.sos_models.get(name).cloned())
            .ok_or_else(|| Error::not_found(format!("sos_model/{name}")))
    }

    fn write_sos_model(&self, config: &SosModelConfig) -> Result<()> {
        self.write(|ns| {
            ns.sos_models.insert(config.name.clone(), config.clone());
        });
        Ok(())
    }

    fn delete_sos_model(&self, name: &str) -> Result<()> {
        self.write(|ns| ns.sos_models.shift_remove(name))
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("sos_model/{name}")))
    }

    fn list_sos_models(&self) -> Result<Vec<String>> {
        Ok(self.read(|ns| ns.sos_models.keys().cloned().collect()))
    }

    fn read_sector_model(&self, name: &str) -> Result<SectorModelConfig> {
        self.read(|ns| ns.sector_models.get(name).cloned())
            .ok_or_else(|| Error::not_found(format!("sector_model/{name}")))
    }

    fn write_sector_model(&self, config: &SectorModelConfig) -> Result<()> {
        self.write(|ns| {
            ns.sector_models.insert(config.name.clone(), config.clone());
        });
        Ok(())
    }

    fn delete_sector_model(&self, name: &str) -> Result<()> {
        self.write(|ns| ns.sector_models.shift_remove(name))
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("sector_model/{name}")))
    }

    fn list_sector_models(&self) -> Result<Vec<String>> {
        Ok(self.read(|ns| ns.sector_models.keys().cloned().collect()))
    }

    fn read_scenario(&self, name: &str) -> Result<ScenarioConfig> {
        self.read(|ns| ns.scenarios.get(name).cloned())
            .ok_or_else(|| Error::not_found(format!("scenario/{name}")))
    }

    fn write_scenario(&self, config: &ScenarioConfig) -> Result<()> {
        self.write(|ns| {
            ns.scenarios.insert(config.name.clone(), config.clone());
        });
        Ok(())
    }

    fn delete_scenario(&self, name: &str) -> Result<()> {
        self.write(|ns| ns.scenarios.shift_remove(name))
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("scenario/{name}")))
    }

    fn list_scenarios(&self) -> Result<Vec<String>> {
        Ok(self.read(|ns| ns.scenarios.keys().cloned().collect()))
    }

    fn read_narrative(&self, name: &str) -> Result<NarrativeConfig> {
        self.read(|ns| ns.narratives.get(name).cloned())
            .ok_or_else(|| Error::not_found(format!("narrative/{name}")))
    }

    fn write_narrative(&self, config: &NarrativeConfig) -> Result<()> {
        self.write(|ns| {
            ns.narratives.insert(config.name.clone(), config.clone());
        });
        Ok(())
    }

    fn read_dimension(&self, name: &str) -> Result<DimensionConfig> {
        self.read(|ns| ns.dimensions.get(name).cloned())
            .ok_or_else(|| Error::not_found(format!("dimension/{name}")))
    }

    fn write_dimension(&self, config: &DimensionConfig) -> Result<()> {
        self.write(|ns| {
            ns.dimensions
                .insert(config.name().to_string(), config.clone());
        });
        Ok(())
    }

    fn list_dimensions(&self) -> Result<Vec<String>> {
        Ok(self.read(|ns| ns.dimensions.keys().cloned().collect()))
    }

    fn read_unit_definitions(&self) -> Result<Vec<UnitDef>> {
        Ok(self.read(|ns| ns.units.clone()))
    }

    fn write_unit_definitions(&self, definitions: &[UnitDef]) -> Result<()> {
        self.write(|ns| ns.units = definitions.to_vec());
        Ok(())
    }

    fn read_strategies(&self, run: &str) -> Result<Vec<StrategyConfig>> {
        Ok(self.read(|ns| ns.strategies.get(run).cloned().unwrap_or_default()))
    }

    fn write_strategies(&self, run: &str, strategies: &[StrategyConfig]) -> Result<()> {
        self.write(|ns| {
            ns.strategies.insert(run.to_string(), strategies.to_vec());
        });
        Ok(())
    }

    fn read_scenario_variant_data(
        &self,
        scenario: &str,
        variant: &str,
        variable: &str,
        timestep: i32,
    ) -> Result<DataArray> {
        let key = (
            scenario.to_string(),
            variant.to_string(),
            variable.to_string(),
            timestep,
        );
        self.read(|ns| ns.scenario_data.get(&key).cloned())
            .ok_or_else(|| {
                Error::not_found(format!("scenario/{scenario}/{variant}/{variable}@{timestep}"))
            })
    }

    fn write_scenario_variant_data(
        &self,
        scenario: &str,
        variant: &str,
        data: &DataArray,
        timestep: i32,
    ) -> Result<()> {
        let key = (
            scenario.to_string(),
            variant.to_string(),
            data.spec().name().to_string(),
            timestep,
        );
        self.write(|ns| {
            ns.scenario_data.insert(key, data.clone());
        });
        Ok(())
    }

    fn read_narrative_variant_data(
        &self,
        narrative: &str,
        variant: &str,
        parameter: &str,
    ) -> Result<DataArray> {
        let key = (
            narrative.to_string(),
            variant.to_string(),
            parameter.to_string(),
        );
        self.read(|ns| ns.narrative_data.get(&key).cloned())
            .ok_or_else(|| {
                Error::not_found(format!("narrative/{narrative}/{variant}/{parameter}"))
            })
    }

    fn write_narrative_variant_data(
        &self,
        narrative: &str,
        variant: &str,
        data: &DataArray,
    ) -> Result<()> {
        let key = (
            narrative.to_string(),
            variant.to_string(),
            data.spec().name().to_string(),
        );
        self.write(|ns| {
            ns.narrative_data.insert(key, data.clone());
        });
        Ok(())
    }

    fn read_model_parameter_default(&self, model: &str, parameter: &str) -> Result<DataArray> {
        let key = (model.to_string(), parameter.to_string());
        self.read(|ns| ns.parameter_defaults.get(&key).cloned())
            .ok_or_else(|| Error::not_found(format!("parameter/{model}/{parameter}")))
    }

    fn write_model_parameter_default(&self, model: &str, data: &DataArray) -> Result<()> {
        let key = (model.to_string(), data.spec().name().to_string());
        self.write(|ns| {
            ns.parameter_defaults.insert(key, data.clone());
        });
        Ok(())
    }

    fn read_interventions(&self, model: &str) -> Result<Vec<Intervention>> {
        Ok(self.read(|ns| ns.interventions.get(model).cloned().unwrap_or_default()))
    }

    fn write_interventions(&self, model: &str, interventions: &[Intervention]) -> Result<()> {
        self.write(|ns| {
            ns.interventions
                .insert(model.to_string(), interventions.to_vec());
        });
        Ok(())
    }

    fn read_initial_conditions(&self, model: &str) -> Result<Vec<Decision>> {
        Ok(self.read(|ns| ns.initial_conditions.get(model).cloned().unwrap_or_default()))
    }

    fn write_initial_conditions(&self, model: &str, initial: &[Decision]) -> Result<()> {
        self.write(|ns| {
            ns.initial_conditions
                .insert(model.to_string(), initial.to_vec());
        });
        Ok(())
    }

    fn read_results(
        &self,
        run: &str,
        model: &str,
        output: &Spec,
        timestep: i32,
        iteration: u32,
    ) -> Result<DataArray> {
        let key = (
            run.to_string(),
            ResultKey {
                model: model.to_string(),
                output: output.name().to_string(),
                timestep,
                iteration,
            },
        );
        self.read(|ns| ns.results.get(&key).cloned())
            .ok_or_else(|| {
                Error::not_found(format!(
                    "results/{run}/{model}/{}@{timestep}#{iteration}",
                    output.name()
                ))
            })
    }

    fn write_results(
        &self,
        run: &str,
        model: &str,
        data: &DataArray,
        timestep: i32,
        iteration: u32,
    ) -> Result<()> {
        let key = (
            run.to_string(),
            ResultKey {
                model: model.to_string(),
                output: data.spec().name().to_string(),
                timestep,
                iteration,
            },
        );
        trace!(run, model, output = data.spec().name(), timestep, iteration, "write results");
        self.write(|ns| {
            ns.results.insert(key, data.clone());
        });
        Ok(())
    }

    fn available_results(&self, run: &str) -> Result<Vec<ResultKey>> {
        Ok(self.read(|ns| {
            ns.results
                .keys()
                .filter(|(r, _)| r == run)
                .map(|(_, key)| key.clone())
                .collect()
        }))
    }

    fn read_coefficients(&self, source: &Spec, sink: &Spec) -> Result<Option<Coefficients>> {
        let key = coefficient_key(source, sink);
        Ok(self.read(|ns| ns.coefficients.get(&key).cloned()))
    }

    fn write_coefficients(
        &self,
        source: &Spec,
        sink: &Spec,
        coefficients: &Coefficients,
    ) -> Result<()> {
        let key = coefficient_key(source, sink);
        self.write(|ns| {
            ns.coefficients.insert(key, coefficients.clone());
        });
        Ok(())
    }

    fn read_state(&self, run: &str, timestep: i32, iteration: u32) -> Result<Vec<Decision>> {
        let key = (run.to_string(), timestep, iteration);
        self.read(|ns| ns.state.get(&key).cloned())
            .ok_or_else(|| Error::not_found(format!("state/{run}@{timestep}#{iteration}")))
    }

    fn write_state(
        &self,
        run: &str,
        timestep: i32,
        iteration: u32,
        state: &[Decision],
    ) -> Result<()> {
        let key = (run.to_string(), timestep, iteration);
        self.write(|ns| {
            ns.state.insert(key, state.to_vec());
        });
        Ok(())
    }

    fn read_job_status(
        &self,
        run: &str,
        timestep: i32,
        iteration: u32,
        model: &str,
    ) -> Result<JobRecord> {
        let key = (run.to_string(), timestep, iteration, model.to_string());
        self.read(|ns| ns.jobs.get(&key).cloned())
            .ok_or_else(|| Error::not_found(format!("job/{run}@{timestep}#{iteration}/{model}")))
    }

    fn write_job_status(
        &self,
        run: &str,
        timestep: i32,
        iteration: u32,
        record: &JobRecord,
    ) -> Result<()> {
        let key = (run.to_string(), timestep, iteration, record.model.clone());
        self.write(|ns| {
            ns.jobs.insert(key, record.clone());
        });
        Ok(())
    }

    fn list_job_status(&self, run: &str, timestep: i32, iteration: u32) -> Result<Vec<JobRecord>> {
        Ok(self.read(|ns| {
            ns.jobs
                .iter()
                .filter(|((r, t, i, _), _)| r == run && *t == timestep && *i == iteration)
                .map(|(_, record)| record.clone())
                .collect()
        }))
    }
}
