//! Test harness for end-to-end smif runs
//!
//! Builds a memory-store-backed project programmatically: specs, scenario
//! data, closure-backed sector models and a model run, then executes the
//! full pipeline (assemble, validate, schedule, iterate) and exposes the
//! results for assertions.

use std::sync::Arc;

use indexmap::IndexMap;

use smif_convert::ConvertRegister;
use smif_data::{
    DataHandle, Decision, DecisionModuleConfig, DependencyConfig, JobRecord, MemoryStore,
    ModelRunConfig, ScenarioConfig, ScenarioVariantConfig, SectorModelConfig, SosModelConfig,
    Store, StrategyConfig,
};
use smif_metadata::{DataArray, RelativeTimestep, Spec};
use smif_model::{ModelError, ModelWrapper};
use smif_runtime::{CancelToken, ModelRun, ModelRunner, RunReport};

/// A closure-backed sector model wrapper for tests.
pub struct ClosureWrapper<F>(pub F);

impl<F> ModelWrapper for ClosureWrapper<F>
where
    F: Fn(&mut DataHandle) -> Result<(), ModelError> + Send + Sync,
{
    fn simulate(&self, data: &mut DataHandle) -> Result<(), ModelError> {
        (self.0)(data)
    }
}

/// Programmatic project builder plus runner.
pub struct TestHarness {
    store: MemoryStore,
    convert: ConvertRegister,
    run_config: ModelRunConfig,
    sos_config: SosModelConfig,
    wrappers: IndexMap<String, Arc<dyn ModelWrapper>>,
    max_workers: usize,
    resume: bool,
}

impl TestHarness {
    /// A harness for one model run over the given timesteps.
    pub fn new(run_name: &str, timesteps: Vec<i32>) -> Self {
        let sos_name = format!("{run_name}_sos");
        Self {
            store: MemoryStore::new(),
            convert: ConvertRegister::with_default_units(),
            run_config: ModelRunConfig {
                name: run_name.to_string(),
                description: String::new(),
                sos_model: sos_name.clone(),
                timesteps,
                scenarios: IndexMap::new(),
                narratives: IndexMap::new(),
                strategies: Vec::new(),
                decision_module: DecisionModuleConfig::PreSpecified,
            },
            sos_config: SosModelConfig {
                name: sos_name,
                description: String::new(),
                sector_models: Vec::new(),
                scenarios: Vec::new(),
                scenario_dependencies: Vec::new(),
                model_dependencies: Vec::new(),
                narratives: Vec::new(),
            },
            wrappers: IndexMap::new(),
            max_workers: 1,
            resume: false,
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn convert_mut(&mut self) -> &mut ConvertRegister {
        &mut self.convert
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_decision_module(mut self, module: DecisionModuleConfig) -> Self {
        self.run_config.decision_module = module;
        self
    }

    pub fn with_strategies(mut self, strategies: Vec<StrategyConfig>) -> Self {
        self.run_config.strategies = strategies;
        self
    }

    /// Add a sector model with a closure as its simulation.
    pub fn add_model<F>(&mut self, config: SectorModelConfig, simulate: F)
    where
        F: Fn(&mut DataHandle) -> Result<(), ModelError> + Send + Sync + 'static,
    {
        self.add_model_wrapper(config, Arc::new(ClosureWrapper(simulate)));
    }

    /// Add a sector model with an arbitrary wrapper.
    pub fn add_model_wrapper(&mut self, config: SectorModelConfig, wrapper: Arc<dyn ModelWrapper>) {
        self.sos_config.sector_models.push(config.name.clone());
        self.wrappers.insert(config.name.clone(), wrapper);
        self.store
            .write_sector_model(&config)
            .expect("memory store write");
    }

    /// Add a scenario with one selected variant and its per-timestep data.
    pub fn add_scenario(
        &mut self,
        name: &str,
        variant: &str,
        provides: Vec<Spec>,
        data: Vec<(i32, DataArray)>,
    ) {
        self.sos_config.scenarios.push(name.to_string());
        self.run_config
            .scenarios
            .insert(name.to_string(), variant.to_string());
        self.store
            .write_scenario(&ScenarioConfig {
                name: name.to_string(),
                description: String::new(),
                provides,
                variants: vec![ScenarioVariantConfig {
                    name: variant.to_string(),
                    description: String::new(),
                    data: IndexMap::new(),
                }],
            })
            .expect("memory store write");
        for (timestep, array) in data {
            self.store
                .write_scenario_variant_data(name, variant, &array, timestep)
                .expect("memory store write");
        }
    }

    /// Add a narrative and select variants for this run.
    pub fn add_narrative(&mut self, config: smif_data::NarrativeConfig, selected: Vec<&str>) {
        self.run_config.narratives.insert(
            config.name.clone(),
            selected.into_iter().map(str::to_string).collect(),
        );
        self.sos_config.narratives.push(config);
    }

    /// Wire a dependency; `lagged` routes it through the previous timestep.
    pub fn add_dependency(
        &mut self,
        source: &str,
        source_output: &str,
        sink: &str,
        sink_input: &str,
        lagged: bool,
    ) {
        let dep = DependencyConfig {
            source: source.to_string(),
            source_output: source_output.to_string(),
            sink: sink.to_string(),
            sink_input: sink_input.to_string(),
            timestep: lagged.then_some(RelativeTimestep::Previous),
        };
        if self.sos_config.scenarios.iter().any(|s| s == source) {
            self.sos_config.scenario_dependencies.push(dep);
        } else {
            self.sos_config.model_dependencies.push(dep);
        }
    }

    /// Seed a result before the run's first timestep: the initial condition
    /// a lagged edge reads at the base timestep.
    pub fn seed_initial_result(&self, model: &str, data: &DataArray, timestep: i32) {
        self.store
            .write_results(&self.run_config.name, model, data, timestep, 0)
            .expect("memory store write");
    }

    /// Seed a parameter default for a model.
    pub fn seed_parameter_default(&self, model: &str, data: &DataArray) {
        self.store
            .write_model_parameter_default(model, data)
            .expect("memory store write");
    }

    /// Execute the run. Can be called repeatedly; each call reassembles the
    /// run from stored configuration.
    pub fn run(&self) -> smif_runtime::Result<RunReport> {
        self.run_with_cancel(&CancelToken::new())
    }

    pub fn run_with_cancel(&self, cancel: &CancelToken) -> smif_runtime::Result<RunReport> {
        self.store
            .write_sos_model(&self.sos_config)
            .expect("memory store write");
        self.store
            .write_model_run(&self.run_config)
            .expect("memory store write");

        let wrappers: IndexMap<String, Box<dyn ModelWrapper>> = self
            .wrappers
            .iter()
            .map(|(name, wrapper)| {
                (
                    name.clone(),
                    Box::new(wrapper.clone()) as Box<dyn ModelWrapper>,
                )
            })
            .collect();

        let model_run = ModelRun::build(&self.store, &self.run_config.name, wrappers)?;
        ModelRunner::new(&self.store, &self.convert)
            .with_max_workers(self.max_workers)
            .with_resume(self.resume)
            .run(&model_run, cancel)
    }

    /// Read one stored result.
    pub fn results(
        &self,
        model: &str,
        output: &Spec,
        timestep: i32,
        iteration: u32,
    ) -> smif_data::Result<DataArray> {
        self.store
            .read_results(&self.run_config.name, model, output, timestep, iteration)
    }

    /// Job records for one (timestep, iteration).
    pub fn job_records(&self, timestep: i32, iteration: u32) -> Vec<JobRecord> {
        self.store
            .list_job_status(&self.run_config.name, timestep, iteration)
            .expect("memory store read")
    }

    /// Decision state for one (timestep, iteration).
    pub fn state(&self, timestep: i32, iteration: u32) -> smif_data::Result<Vec<Decision>> {
        self.store
            .read_state(&self.run_config.name, timestep, iteration)
    }
}
