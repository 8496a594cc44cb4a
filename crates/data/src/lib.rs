//! smif data layer
//!
//! The store is the single shared resource of a model run: it persists
//! configuration, scenario and parameter data, per-run results and job
//! metadata. Models never touch it directly; each model invocation sees a
//! [`DataHandle`] scoped to one `(run, model, timestep, iteration)` that
//! applies coordinate and unit conversion transparently.

pub mod config;
pub mod data_handle;
pub mod error;
pub mod file;
pub mod memory;
pub mod store;

pub use config::{
    ConvergenceVariable, DecisionModuleConfig, DependencyConfig, DimensionConfig, Intervention,
    ModelRunConfig, NarrativeConfig, NarrativeVariantConfig, ScenarioConfig,
    ScenarioVariantConfig, SectorModelConfig, SosModelConfig, StrategyConfig,
};
pub use data_handle::{DataHandle, DependencySource, ResolvedDependency};
pub use error::{Error, Result};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::{Decision, JobRecord, JobStatus, ResultKey, Store, StoreCache};
