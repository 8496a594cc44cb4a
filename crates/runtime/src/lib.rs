//! smif runtime
//!
//! Orchestrates a model run: builds and validates the per-timestep
//! dependency graph, schedules jobs in topological order, drives the
//! decision loop across timesteps (with bounded fixed-point iteration when
//! configured) and aggregates the run outcome.

pub mod decision;
pub mod error;
pub mod graph;
pub mod modelrun;
pub mod scheduler;

pub use decision::{
    build_decision_module, Convergence, DecisionLoop, DecisionModule, IteratingDecision,
    LoopReport, LoopStatus, PreSpecifiedDecision, RuleBasedDecision,
};
pub use error::{Error, Result};
pub use graph::{CircularDependencyError, DependencyGraph, GraphEdge};
pub use modelrun::{load_convert_register, ModelRun, ModelRunner, RunReport, RunStatus};
pub use scheduler::{CancelToken, JobScheduler, RunContext, SchedulerOutcome};
