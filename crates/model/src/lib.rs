//! smif model layer
//!
//! The contracts a system-of-systems is composed from: the [`Model`] trait
//! every node implements, scenario models wrapping exogenous data, sector
//! models wrapping user simulation code, and the [`SosModel`] that wires
//! them together with typed, validated dependencies.

pub mod error;
pub mod intervention;
pub mod model;
pub mod narrative;
pub mod scenario;
pub mod sector;
pub mod sos_model;

pub use error::{ModelError, ValidationError};
pub use intervention::InterventionRegister;
pub use model::Model;
pub use narrative::narrative_overrides;
pub use scenario::ScenarioModel;
pub use sector::{ModelWrapper, SectorModel};
pub use sos_model::{Dependency, SosModel};
