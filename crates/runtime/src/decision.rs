//! Decision modules and the decision loop
//!
//! The decision loop drives the scheduler across the run's timesteps. A
//! decision module decides which interventions are in effect at each
//! timestep and whether the timestep needs another iteration: pre-specified
//! and rule-based modules accept the first iteration; an iterating module
//! re-runs the timestep until its convergence variables settle or the
//! iteration bound is hit.

use indexmap::IndexMap;
use tracing::{debug, info, instrument, warn};

use smif_data::{
    Decision, DecisionModuleConfig, JobRecord, Store, StrategyConfig,
};
use smif_metadata::Spec;
use smif_model::SosModel;

use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::scheduler::{CancelToken, JobScheduler, RunContext};

/// Convergence assessment between two iterations of one timestep.
#[derive(Debug, Clone, Copy)]
pub struct Convergence {
    pub converged: bool,
    pub max_delta: f64,
}

/// A policy driving the run forward: which decisions are in effect at a
/// timestep, and when an iterating timestep has settled.
pub trait DecisionModule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Upper bound on iterations per timestep; 1 means no fixed point.
    fn max_iterations(&self) -> u32 {
        1
    }

    /// The decisions effective at `(timestep, iteration)`.
    fn decide(
        &self,
        store: &dyn Store,
        run: &str,
        timestep: i32,
        iteration: u32,
    ) -> Result<Vec<Decision>>;

    /// Compare `iteration` against `iteration - 1`. Only called when
    /// `iteration >= 1` on modules that iterate.
    fn converged(
        &self,
        _store: &dyn Store,
        _run: &str,
        _timestep: i32,
        _iteration: u32,
    ) -> Result<Convergence> {
        Ok(Convergence {
            converged: true,
            max_delta: 0.0,
        })
    }
}

/// Interventions from the run's strategies whose build year has arrived,
/// merged with the initial conditions.
fn due_decisions(
    strategies: &[StrategyConfig],
    initial: &[Decision],
    timestep: i32,
) -> Vec<Decision> {
    let mut decisions: IndexMap<String, Decision> = initial
        .iter()
        .map(|d| (d.name.clone(), d.clone()))
        .collect();
    for strategy in strategies {
        for intervention in &strategy.interventions {
            if intervention.build_year <= timestep {
                decisions
                    .entry(intervention.name.clone())
                    .or_insert_with(|| intervention.clone());
            }
        }
    }
    decisions.into_values().collect()
}

/// Pre-specified planning: the strategy timetable is the whole policy.
pub struct PreSpecifiedDecision {
    strategies: Vec<StrategyConfig>,
    initial: Vec<Decision>,
}

impl PreSpecifiedDecision {
    pub fn new(strategies: Vec<StrategyConfig>, initial: Vec<Decision>) -> Self {
        Self {
            strategies,
            initial,
        }
    }
}

impl DecisionModule for PreSpecifiedDecision {
    fn name(&self) -> &'static str {
        "pre_specified"
    }

    fn decide(
        &self,
        _store: &dyn Store,
        _run: &str,
        timestep: i32,
        _iteration: u32,
    ) -> Result<Vec<Decision>> {
        Ok(due_decisions(&self.strategies, &self.initial, timestep))
    }
}

/// Rule-based planning: decisions accumulate, carrying the previous
/// timestep's committed state forward and adding strategies as they fall
/// due.
pub struct RuleBasedDecision {
    strategies: Vec<StrategyConfig>,
    initial: Vec<Decision>,
    timesteps: Vec<i32>,
}

impl RuleBasedDecision {
    pub fn new(strategies: Vec<StrategyConfig>, initial: Vec<Decision>, timesteps: Vec<i32>) -> Self {
        Self {
            strategies,
            initial,
            timesteps,
        }
    }
}

impl DecisionModule for RuleBasedDecision {
    fn name(&self) -> &'static str {
        "rule_based"
    }

    fn decide(
        &self,
        store: &dyn Store,
        run: &str,
        timestep: i32,
        _iteration: u32,
    ) -> Result<Vec<Decision>> {
        // Carry forward the previous timestep's committed state
        let position = self.timesteps.iter().position(|&t| t == timestep);
        let carried = match position {
            Some(index) if index > 0 => {
                let previous = self.timesteps[index - 1];
                match store.read_state(run, previous, 0) {
                    Ok(state) => state,
                    Err(e) if e.is_not_found() => self.initial.clone(),
                    Err(e) => return Err(e.into()),
                }
            }
            _ => self.initial.clone(),
        };

        let mut decisions: IndexMap<String, Decision> = carried
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        for due in due_decisions(&self.strategies, &[], timestep) {
            decisions.entry(due.name.clone()).or_insert(due);
        }
        Ok(decisions.into_values().collect())
    }
}

/// Bounded fixed-point iteration: re-run the timestep until the watched
/// variables change by less than tolerance between iterations.
///
/// The norm is L-infinity over the per-variable elementwise relative
/// deltas: converged iff `|curr - prev| <= atol + rtol * |prev|` holds for
/// every element of every convergence variable.
pub struct IteratingDecision {
    max_iterations: u32,
    relative_tolerance: f64,
    absolute_tolerance: f64,
    /// (model name, output spec) pairs watched for convergence
    variables: Vec<(String, Spec)>,
    strategies: Vec<StrategyConfig>,
    initial: Vec<Decision>,
}

impl IteratingDecision {
    pub fn new(
        max_iterations: u32,
        relative_tolerance: f64,
        absolute_tolerance: f64,
        variables: Vec<(String, Spec)>,
        strategies: Vec<StrategyConfig>,
        initial: Vec<Decision>,
    ) -> Self {
        Self {
            max_iterations,
            relative_tolerance,
            absolute_tolerance,
            variables,
            strategies,
            initial,
        }
    }
}

impl DecisionModule for IteratingDecision {
    fn name(&self) -> &'static str {
        "iterating"
    }

    fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    fn decide(
        &self,
        _store: &dyn Store,
        _run: &str,
        timestep: i32,
        _iteration: u32,
    ) -> Result<Vec<Decision>> {
        Ok(due_decisions(&self.strategies, &self.initial, timestep))
    }

    fn converged(
        &self,
        store: &dyn Store,
        run: &str,
        timestep: i32,
        iteration: u32,
    ) -> Result<Convergence> {
        let mut converged = true;
        let mut max_delta = 0.0_f64;

        for (model, spec) in &self.variables {
            let current = store.read_results(run, model, spec, timestep, iteration)?;
            let previous = store.read_results(run, model, spec, timestep, iteration - 1)?;

            for (curr, prev) in current.values().iter().zip(previous.values()) {
                let delta = (curr - prev).abs();
                if delta > self.absolute_tolerance + self.relative_tolerance * prev.abs() {
                    converged = false;
                }
                let relative = delta / prev.abs().max(f64::MIN_POSITIVE);
                max_delta = max_delta.max(relative);
            }
        }

        debug!(timestep, iteration, converged, max_delta, "convergence assessed");
        Ok(Convergence {
            converged,
            max_delta,
        })
    }
}

/// Construct the decision module selected by a model run configuration.
pub fn build_decision_module(
    config: &DecisionModuleConfig,
    strategies: Vec<StrategyConfig>,
    initial: Vec<Decision>,
    timesteps: &[i32],
    sos: &SosModel,
) -> Result<Box<dyn DecisionModule>> {
    match config {
        DecisionModuleConfig::PreSpecified => {
            Ok(Box::new(PreSpecifiedDecision::new(strategies, initial)))
        }
        DecisionModuleConfig::RuleBased => Ok(Box::new(RuleBasedDecision::new(
            strategies,
            initial,
            timesteps.to_vec(),
        ))),
        DecisionModuleConfig::Iterating {
            max_iterations,
            relative_tolerance,
            absolute_tolerance,
            convergence_variables,
        } => {
            let mut variables = Vec::with_capacity(convergence_variables.len());
            for variable in convergence_variables {
                let spec = sos
                    .model(&variable.model)
                    .and_then(|m| m.outputs().get(&variable.output))
                    .cloned()
                    .ok_or_else(|| smif_model::ValidationError::UnknownSourceOutput {
                        model: variable.model.clone(),
                        output: variable.output.clone(),
                    })?;
                variables.push((variable.model.clone(), spec));
            }
            Ok(Box::new(IteratingDecision::new(
                *max_iterations,
                *relative_tolerance,
                *absolute_tolerance,
                variables,
                strategies,
                initial,
            )))
        }
    }
}

/// Aggregate status of a model run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Done,
    Failed,
}

/// Outcome of driving the loop over all timesteps.
#[derive(Debug)]
pub struct LoopReport {
    pub status: LoopStatus,
    /// (timestep, iteration, record) for every job run
    pub jobs: Vec<(i32, u32, JobRecord)>,
    pub first_failure: Option<String>,
    /// Final (canonical) iteration per completed timestep
    pub final_iterations: IndexMap<i32, u32>,
}

/// Drives the scheduler across timesteps under a decision module.
pub struct DecisionLoop<'a> {
    ctx: &'a RunContext<'a>,
    scheduler: JobScheduler<'a>,
    module: Box<dyn DecisionModule>,
}

impl<'a> DecisionLoop<'a> {
    pub fn new(
        ctx: &'a RunContext<'a>,
        scheduler: JobScheduler<'a>,
        module: Box<dyn DecisionModule>,
    ) -> Self {
        Self {
            ctx,
            scheduler,
            module,
        }
    }

    /// Run every timestep from `start_at` (inclusive; `None` means the
    /// first) to the end of the run.
    ///
    /// Decisions are persisted as state before each scheduler invocation,
    /// which is what makes a run resumable. A job failure ends the run with
    /// a failed report; iteration exhaustion is a convergence error (the
    /// last iteration's results stay in the store).
    #[instrument(skip_all, fields(run = self.ctx.run, module = self.module.name()))]
    pub fn run(
        &self,
        graph: &DependencyGraph,
        cancel: &CancelToken,
        start_at: Option<i32>,
    ) -> Result<LoopReport> {
        let mut report = LoopReport {
            status: LoopStatus::Done,
            jobs: Vec::new(),
            first_failure: None,
            final_iterations: IndexMap::new(),
        };

        for &timestep in self.ctx.timesteps {
            if let Some(start) = start_at {
                if timestep < start {
                    debug!(timestep, "skipped: warm start");
                    continue;
                }
            }

            let final_iteration = self.run_timestep(graph, timestep, cancel, &mut report)?;
            match final_iteration {
                Some(iteration) => {
                    report.final_iterations.insert(timestep, iteration);
                }
                None => {
                    report.status = LoopStatus::Failed;
                    return Ok(report);
                }
            }
        }

        info!(timesteps = report.final_iterations.len(), "model run complete");
        Ok(report)
    }

    /// Run one timestep to its final iteration. Returns `None` on job
    /// failure (the report carries the detail).
    fn run_timestep(
        &self,
        graph: &DependencyGraph,
        timestep: i32,
        cancel: &CancelToken,
        report: &mut LoopReport,
    ) -> Result<Option<u32>> {
        let store = self.ctx.store;
        let max_iterations = self.module.max_iterations().max(1);
        let mut iteration = 0;

        loop {
            let decisions = self.module.decide(store, self.ctx.run, timestep, iteration)?;
            store.write_state(self.ctx.run, timestep, iteration, &decisions)?;
            debug!(timestep, iteration, decisions = decisions.len(), "decisions in effect");

            let outcome = self
                .scheduler
                .run_timestep(graph, timestep, iteration, cancel)?;
            for record in store.list_job_status(self.ctx.run, timestep, iteration)? {
                report.jobs.push((timestep, iteration, record));
            }

            if let Some((model, message)) = outcome.first_failure {
                warn!(timestep, iteration, model = %model, "timestep failed");
                if report.first_failure.is_none() {
                    report.first_failure = Some(format!(
                        "{model} at timestep {timestep} iteration {iteration}: {message}"
                    ));
                }
                return Ok(None);
            }

            if max_iterations == 1 {
                return Ok(Some(iteration));
            }

            if iteration > 0 {
                let convergence =
                    self.module
                        .converged(store, self.ctx.run, timestep, iteration)?;
                if convergence.converged {
                    info!(
                        timestep,
                        iterations = iteration + 1,
                        max_delta = convergence.max_delta,
                        "converged"
                    );
                    return Ok(Some(iteration));
                }
                if iteration + 1 >= max_iterations {
                    return Err(Error::Convergence {
                        timestep,
                        iterations: iteration + 1,
                        max_delta: convergence.max_delta,
                    });
                }
            }

            iteration += 1;
        }
    }
}
