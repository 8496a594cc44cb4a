//! Model run assembly and execution
//!
//! The runner is the entry point: it reads the run's configuration from the
//! store, assembles and validates the system-of-systems, builds the
//! dependency graph, seeds interventions and initial conditions, and drives
//! the decision loop. The aggregate outcome is a [`RunReport`]: done iff
//! every job in every timestep and iteration is done.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info, instrument, warn};

use smif_convert::ConvertRegister;
use smif_data::{Decision, DimensionConfig, JobRecord, ModelRunConfig, Store};
use smif_model::{
    InterventionRegister, Model, ModelWrapper, ScenarioModel, SectorModel, SosModel,
    ValidationError,
};

use crate::decision::{build_decision_module, DecisionLoop, LoopStatus};
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::scheduler::{CancelToken, JobScheduler, RunContext};

/// Aggregate status of a finished model run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Done,
    Failed,
}

/// Outcome of a model run.
#[derive(Debug)]
pub struct RunReport {
    pub run: String,
    pub status: RunStatus,
    /// (timestep, iteration, record) for every job scheduled
    pub jobs: Vec<(i32, u32, JobRecord)>,
    pub first_failure: Option<String>,
    /// Canonical iteration per completed timestep
    pub final_iterations: IndexMap<i32, u32>,
}

impl RunReport {
    pub fn is_done(&self) -> bool {
        self.status == RunStatus::Done
    }
}

/// A validated, assembled model run ready to execute.
pub struct ModelRun {
    pub config: ModelRunConfig,
    pub sos: SosModel,
    pub scenario_models: IndexMap<String, Arc<ScenarioModel>>,
    pub interventions: InterventionRegister,
    pub initial_conditions: Vec<Decision>,
}

impl ModelRun {
    /// Assemble a run from stored configuration plus the sector model
    /// wrappers registered by the embedding application.
    ///
    /// Validates everything that can fail before execution: timestep
    /// monotonicity, variant selections, dependency wiring.
    pub fn build(
        store: &dyn Store,
        run_name: &str,
        mut wrappers: IndexMap<String, Box<dyn ModelWrapper>>,
    ) -> Result<Self> {
        let config = store.read_model_run(run_name)?;
        validate_timesteps(&config)?;

        let sos_config = store.read_sos_model(&config.sos_model)?;

        // Scenario models, bound to this run's variant selections
        let mut scenario_models = IndexMap::new();
        for scenario_name in &sos_config.scenarios {
            let scenario_config = store.read_scenario(scenario_name)?;
            let variant = config.scenarios.get(scenario_name).ok_or_else(|| {
                ValidationError::UnknownScenarioVariant {
                    scenario: scenario_name.clone(),
                    variant: "(none selected)".to_string(),
                }
            })?;
            if scenario_config.variant(variant).is_none() {
                return Err(ValidationError::UnknownScenarioVariant {
                    scenario: scenario_name.clone(),
                    variant: variant.clone(),
                }
                .into());
            }
            scenario_models.insert(
                scenario_name.clone(),
                Arc::new(ScenarioModel::new(
                    scenario_name,
                    scenario_name,
                    variant,
                    scenario_config.provides.clone(),
                )),
            );
        }

        // Narrative selections must name configured narratives and variants
        for (narrative_name, variants) in &config.narratives {
            let narrative = sos_config
                .narratives
                .iter()
                .find(|n| &n.name == narrative_name)
                .ok_or_else(|| ValidationError::UnknownNarrativeVariant {
                    narrative: narrative_name.clone(),
                    variant: "(narrative not in sos model)".to_string(),
                })?;
            for variant in variants {
                if narrative.variant(variant).is_none() {
                    return Err(ValidationError::UnknownNarrativeVariant {
                        narrative: narrative_name.clone(),
                        variant: variant.clone(),
                    }
                    .into());
                }
            }
        }

        // Sector models from config plus user wrappers
        let mut sector_models: Vec<Arc<dyn Model>> = Vec::new();
        let mut interventions = InterventionRegister::default();
        let mut initial_conditions = Vec::new();
        for model_name in &sos_config.sector_models {
            let model_config = store.read_sector_model(model_name)?;
            let wrapper = wrappers
                .shift_remove(model_name)
                .ok_or_else(|| Error::MissingWrapper(model_name.clone()))?;
            interventions.register_model(model_name, model_config.interventions.clone());
            initial_conditions.extend(model_config.initial_conditions.iter().cloned());
            sector_models.push(Arc::new(SectorModel::from_config(&model_config, wrapper)));
        }

        let sos = SosModel::new(
            &sos_config,
            sector_models,
            scenario_models.values().cloned().collect(),
        )?;

        Ok(Self {
            config,
            sos,
            scenario_models,
            interventions,
            initial_conditions,
        })
    }

    /// Assemble with a no-op wrapper substituted for every sector model, so
    /// configuration can be checked without linking simulation code.
    pub fn build_for_validation(store: &dyn Store, run_name: &str) -> Result<Self> {
        struct NoopWrapper;
        impl ModelWrapper for NoopWrapper {
            fn simulate(
                &self,
                _data: &mut smif_data::DataHandle,
            ) -> std::result::Result<(), smif_model::ModelError> {
                Ok(())
            }
        }

        let config = store.read_model_run(run_name)?;
        let sos_config = store.read_sos_model(&config.sos_model)?;
        let wrappers = sos_config
            .sector_models
            .iter()
            .map(|name| (name.clone(), Box::new(NoopWrapper) as Box<dyn ModelWrapper>))
            .collect();
        Self::build(store, run_name, wrappers)
    }
}

fn validate_timesteps(config: &ModelRunConfig) -> Result<()> {
    if config.timesteps.is_empty() {
        return Err(ValidationError::EmptyTimesteps(config.name.clone()).into());
    }
    for window in config.timesteps.windows(2) {
        if window[1] <= window[0] {
            return Err(ValidationError::TimestepsNotIncreasing {
                run: config.name.clone(),
                timestep: window[1],
            }
            .into());
        }
    }
    Ok(())
}

/// Load region/interval dimensions and custom units from the store into a
/// conversion register.
pub fn load_convert_register(store: &dyn Store) -> Result<ConvertRegister> {
    let mut register = ConvertRegister::with_default_units();
    for definition in store.read_unit_definitions()? {
        register.units.register(definition);
    }
    for name in store.list_dimensions()? {
        match store.read_dimension(&name)? {
            DimensionConfig::Regions(set) => register.regions.register(set),
            DimensionConfig::Intervals(set) => register.intervals.register(set),
        }
    }
    Ok(register)
}

/// Entry point: validates a model run, initialises the store namespace and
/// drives the decision loop.
pub struct ModelRunner<'a> {
    store: &'a dyn Store,
    convert: &'a ConvertRegister,
    max_workers: usize,
    resume: bool,
}

impl<'a> ModelRunner<'a> {
    pub fn new(store: &'a dyn Store, convert: &'a ConvertRegister) -> Self {
        Self {
            store,
            convert,
            max_workers: 1,
            resume: false,
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Continue from the latest timestep with persisted results.
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Execute a model run to completion or first failure.
    #[instrument(skip_all, fields(run = %model_run.config.name))]
    pub fn run(&self, model_run: &ModelRun, cancel: &CancelToken) -> Result<RunReport> {
        let config = &model_run.config;

        model_run.sos.validate(self.convert)?;
        let graph = DependencyGraph::from_sos_model(&model_run.sos);
        graph.validate()?;
        info!(
            models = graph.nodes().len(),
            edges = graph.current_edges().len() + graph.lagged_edges().len(),
            timesteps = config.timesteps.len(),
            "model run validated"
        );

        // Seed the store namespace: strategies, plus any initial conditions
        // persisted alongside the configured ones
        self.store.write_strategies(&config.name, &config.strategies)?;
        let mut initial_conditions = model_run.initial_conditions.clone();
        for model_name in model_run.sos.models().keys() {
            if model_run.scenario_models.contains_key(model_name) {
                continue;
            }
            for decision in self.store.read_initial_conditions(model_name)? {
                if !initial_conditions.iter().any(|d| d.name == decision.name) {
                    initial_conditions.push(decision);
                }
            }
        }
        if !initial_conditions.is_empty() {
            debug!(decisions = initial_conditions.len(), "initial conditions present");
        }
        if !model_run.interventions.is_empty() {
            for decision in &initial_conditions {
                if model_run.interventions.get(&decision.name).is_none() {
                    warn!(name = %decision.name, "initial condition names unknown intervention");
                }
            }
        }

        let ctx = RunContext {
            store: self.store,
            convert: self.convert,
            run: &config.name,
            sos: &model_run.sos,
            scenario_models: &model_run.scenario_models,
            narrative_selections: &config.narratives,
            timesteps: &config.timesteps,
        };
        let scheduler = JobScheduler::new(&ctx).with_max_workers(self.max_workers);

        // One-shot model setup before the first timestep
        self.before_model_run(&ctx, &scheduler, model_run)?;

        let module = build_decision_module(
            &config.decision_module,
            config.strategies.clone(),
            initial_conditions,
            &config.timesteps,
            &model_run.sos,
        )?;

        let start_at = if self.resume {
            let recovered = self.store.prepare_warm_start(&config.name)?;
            if let Some(timestep) = recovered {
                info!(timestep, "warm start: resuming");
            }
            recovered
        } else {
            None
        };

        let outcome = DecisionLoop::new(&ctx, scheduler, module).run(&graph, cancel, start_at)?;

        let status = match outcome.status {
            LoopStatus::Done => RunStatus::Done,
            LoopStatus::Failed => RunStatus::Failed,
        };
        if status == RunStatus::Failed {
            warn!(
                failure = outcome.first_failure.as_deref().unwrap_or("unknown"),
                "model run failed"
            );
        }
        Ok(RunReport {
            run: config.name.clone(),
            status,
            jobs: outcome.jobs,
            first_failure: outcome.first_failure,
            final_iterations: outcome.final_iterations,
        })
    }

    /// Call every sector model's one-shot hook with a handle at the base
    /// timestep.
    fn before_model_run(
        &self,
        ctx: &RunContext<'_>,
        scheduler: &JobScheduler<'_>,
        model_run: &ModelRun,
    ) -> Result<()> {
        let base = *ctx
            .timesteps
            .first()
            .expect("timesteps validated non-empty");
        for (name, model) in model_run.sos.models() {
            if model_run.scenario_models.contains_key(name) {
                continue;
            }
            let mut handle = scheduler.build_handle(model.as_ref(), base, 0);
            model
                .before_model_run(&mut handle)
                .map_err(|e| Error::ModelRun {
                    model: name.clone(),
                    timestep: base,
                    iteration: 0,
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }
}
