//! Intervention catalogues
//!
//! Interventions are the build actions a decision module can commit:
//! pipelines, power stations, retrofits. Each sector model declares its
//! catalogue; decision state is the set of committed (name, build_year)
//! pairs, resolved here to concrete interventions active at a timestep.

use indexmap::IndexMap;
use tracing::warn;

use smif_data::{Decision, Intervention};

/// Per-model intervention catalogues for one system-of-systems.
#[derive(Debug, Clone, Default)]
pub struct InterventionRegister {
    /// model -> intervention name -> definition
    by_model: IndexMap<String, IndexMap<String, Intervention>>,
}

impl InterventionRegister {
    pub fn register_model(&mut self, model: &str, interventions: Vec<Intervention>) {
        let catalogue = interventions
            .into_iter()
            .map(|i| (i.name.clone(), i))
            .collect();
        self.by_model.insert(model.to_string(), catalogue);
    }

    /// True when no model has declared any interventions.
    pub fn is_empty(&self) -> bool {
        self.by_model.values().all(|catalogue| catalogue.is_empty())
    }

    /// Look up an intervention by name across all models.
    pub fn get(&self, name: &str) -> Option<&Intervention> {
        self.by_model.values().find_map(|catalogue| catalogue.get(name))
    }

    /// The model owning an intervention.
    pub fn owner(&self, name: &str) -> Option<&str> {
        self.by_model
            .iter()
            .find(|(_, catalogue)| catalogue.contains_key(name))
            .map(|(model, _)| model.as_str())
    }

    /// Interventions from the decision state that are built by `timestep`.
    ///
    /// Decisions naming unknown interventions are skipped with a warning;
    /// they indicate a strategy drifting from the catalogue, not a fault in
    /// the run itself.
    pub fn active(&self, state: &[Decision], timestep: i32) -> Vec<&Intervention> {
        let mut active = Vec::new();
        for decision in state {
            if decision.build_year > timestep {
                continue;
            }
            match self.get(&decision.name) {
                Some(intervention) => active.push(intervention),
                None => warn!(name = %decision.name, "decision names unknown intervention"),
            }
        }
        active
    }
}
