//! The job scheduler
//!
//! Runs one (timestep, iteration) of the dependency graph: each model in
//! topological level order, invoking `simulate` with a scoped data handle
//! and recording per-job status and timing in the store's meta namespace.
//!
//! Execution is sequential by default. With `max_workers > 1` the nodes of
//! a level run on a rayon pool — levels guarantee that two concurrent nodes
//! are never ancestor and descendant under current edges. Lagged edges
//! never gate the current timestep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use rayon::prelude::*;
use tracing::{debug, error, info, instrument, warn};

use smif_convert::ConvertRegister;
use smif_data::{DataHandle, JobRecord, JobStatus, Store};
use smif_model::{narrative_overrides, Model, ScenarioModel, SosModel};

use crate::error::{Error, Result};
use crate::graph::DependencyGraph;

/// Cooperative cancellation flag, checked between jobs.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a scheduler invocation needs to know about its model run.
pub struct RunContext<'a> {
    pub store: &'a dyn Store,
    pub convert: &'a ConvertRegister,
    pub run: &'a str,
    pub sos: &'a SosModel,
    pub scenario_models: &'a IndexMap<String, Arc<ScenarioModel>>,
    pub narrative_selections: &'a IndexMap<String, Vec<String>>,
    pub timesteps: &'a [i32],
}

/// Per-job outcome of one (timestep, iteration).
#[derive(Debug)]
pub struct SchedulerOutcome {
    pub timestep: i32,
    pub iteration: u32,
    pub statuses: IndexMap<String, JobStatus>,
    /// First failed model and its error, in topological order
    pub first_failure: Option<(String, String)>,
}

impl SchedulerOutcome {
    pub fn all_done(&self) -> bool {
        self.statuses.values().all(|s| *s == JobStatus::Done)
    }
}

/// Schedules the jobs of one timestep over the dependency graph.
pub struct JobScheduler<'a> {
    ctx: &'a RunContext<'a>,
    max_workers: usize,
}

impl<'a> JobScheduler<'a> {
    pub fn new(ctx: &'a RunContext<'a>) -> Self {
        Self {
            ctx,
            max_workers: 1,
        }
    }

    /// Allow up to `max_workers` jobs of one level to run concurrently.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Run every model once for `(timestep, iteration)`.
    ///
    /// A failed job fails its strict descendants (marked skipped); completed
    /// siblings keep their results. Re-running the same key overwrites
    /// results deterministically.
    #[instrument(skip(self, graph, cancel), fields(run = self.ctx.run))]
    pub fn run_timestep(
        &self,
        graph: &DependencyGraph,
        timestep: i32,
        iteration: u32,
        cancel: &CancelToken,
    ) -> Result<SchedulerOutcome> {
        let mut statuses: IndexMap<String, JobStatus> = graph
            .nodes()
            .iter()
            .map(|n| (n.clone(), JobStatus::Unstarted))
            .collect();
        let mut first_failure = None;

        for level in graph.levels() {
            if cancel.is_cancelled() {
                warn!(timestep, iteration, "cancelled between jobs");
                self.flush_statuses(&statuses, timestep, iteration)?;
                return Err(Error::Cancelled { timestep });
            }

            // A node only starts if every current-edge predecessor is done
            let (runnable, blocked): (Vec<String>, Vec<String>) =
                level.into_iter().partition(|node| {
                    graph
                        .predecessors(node)
                        .all(|pred| statuses[pred] == JobStatus::Done)
                });

            for node in blocked {
                debug!(model = %node, "skipped: upstream failure");
                statuses.insert(node.clone(), JobStatus::Skipped);
                self.write_record(&node, JobStatus::Skipped, None, None, timestep, iteration)?;
            }

            let results = self.run_level(&runnable, timestep, iteration)?;
            for (node, result) in results {
                match result {
                    Ok(duration_ms) => {
                        statuses.insert(node.clone(), JobStatus::Done);
                        self.write_record(
                            &node,
                            JobStatus::Done,
                            Some(duration_ms),
                            None,
                            timestep,
                            iteration,
                        )?;
                    }
                    Err(message) => {
                        error!(model = %node, timestep, iteration, %message, "job failed");
                        statuses.insert(node.clone(), JobStatus::Failed);
                        self.write_record(
                            &node,
                            JobStatus::Failed,
                            None,
                            Some(&message),
                            timestep,
                            iteration,
                        )?;
                        if first_failure.is_none() {
                            first_failure = Some((node.clone(), message));
                        }
                    }
                }
            }
        }

        let outcome = SchedulerOutcome {
            timestep,
            iteration,
            statuses,
            first_failure,
        };
        info!(
            timestep,
            iteration,
            done = outcome
                .statuses
                .values()
                .filter(|s| **s == JobStatus::Done)
                .count(),
            total = outcome.statuses.len(),
            "timestep scheduled"
        );
        Ok(outcome)
    }

    /// Run the ready nodes of one level, in parallel when configured.
    fn run_level(
        &self,
        nodes: &[String],
        timestep: i32,
        iteration: u32,
    ) -> Result<Vec<(String, std::result::Result<u64, String>)>> {
        for node in nodes {
            self.write_record(node, JobStatus::Running, None, None, timestep, iteration)?;
        }

        if self.max_workers > 1 && nodes.len() > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.max_workers)
                .build()
            {
                Ok(pool) => {
                    return Ok(pool.install(|| {
                        nodes
                            .par_iter()
                            .map(|node| (node.clone(), self.run_job(node, timestep, iteration)))
                            .collect()
                    }));
                }
                Err(e) => warn!(error = %e, "worker pool unavailable, running sequentially"),
            }
        }
        Ok(nodes
            .iter()
            .map(|node| (node.clone(), self.run_job(node, timestep, iteration)))
            .collect())
    }

    /// Invoke one model, returning its wall-clock duration or error text.
    fn run_job(
        &self,
        node: &str,
        timestep: i32,
        iteration: u32,
    ) -> std::result::Result<u64, String> {
        let model = self
            .ctx
            .sos
            .model(node)
            .ok_or_else(|| format!("model '{node}' not in sos model"))?;

        debug!(model = %node, timestep, iteration, "job start");
        let start = Instant::now();
        let mut handle = self.build_handle(model.as_ref(), timestep, iteration);
        let result = model.simulate(&mut handle);
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                debug!(model = %node, duration_ms, "job done");
                Ok(duration_ms)
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Construct the data handle for one model invocation.
    ///
    /// Scenario models get their provided variables wired back to themselves
    /// as scenario dependencies, so their simulate is a uniform copy-through.
    pub fn build_handle(
        &self,
        model: &dyn Model,
        timestep: i32,
        iteration: u32,
    ) -> DataHandle<'a> {
        let ctx = self.ctx;
        let handle = DataHandle::new(
            ctx.store,
            ctx.convert,
            ctx.run,
            model.name(),
            timestep,
            iteration,
            ctx.timesteps.to_vec(),
        );

        if let Some(scenario) = ctx.scenario_models.get(model.name()) {
            let deps = scenario
                .provides()
                .iter()
                .map(|(name, spec)| {
                    (
                        name.clone(),
                        smif_data::ResolvedDependency {
                            source: smif_data::DependencySource::Scenario {
                                scenario: scenario.scenario().to_string(),
                                variant: scenario.variant().to_string(),
                            },
                            source_output: name.clone(),
                            source_spec: spec.clone(),
                            timestep: smif_metadata::RelativeTimestep::Current,
                        },
                    )
                })
                .collect();
            handle
                .with_inputs(scenario.provides().clone())
                .with_outputs(scenario.provides().clone())
                .with_dependencies(deps)
        } else {
            let narratives =
                narrative_overrides(ctx.sos.narratives(), ctx.narrative_selections, model.name());
            handle
                .with_inputs(model.inputs().clone())
                .with_outputs(model.outputs().clone())
                .with_parameters(model.parameters().clone())
                .with_dependencies(
                    ctx.sos
                        .resolved_dependencies(model.name(), ctx.scenario_models),
                )
                .with_narratives(narratives)
        }
    }

    fn write_record(
        &self,
        model: &str,
        status: JobStatus,
        duration_ms: Option<u64>,
        error: Option<&str>,
        timestep: i32,
        iteration: u32,
    ) -> Result<()> {
        let record = JobRecord {
            model: model.to_string(),
            status,
            duration_ms,
            error: error.map(str::to_string),
        };
        self.ctx
            .store
            .write_job_status(self.ctx.run, timestep, iteration, &record)?;
        Ok(())
    }

    fn flush_statuses(
        &self,
        statuses: &IndexMap<String, JobStatus>,
        timestep: i32,
        iteration: u32,
    ) -> Result<()> {
        for (model, status) in statuses {
            self.write_record(model, *status, None, None, timestep, iteration)?;
        }
        Ok(())
    }
}
