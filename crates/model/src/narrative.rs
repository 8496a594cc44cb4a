//! Narrative parameter overrides
//!
//! A narrative overlays model parameters to express a storyline. The model
//! run selects variants per narrative; resolution maps each overridden
//! parameter of a model to the (narrative, variant) pairs to try, in
//! selection order — later selections override earlier ones.

use indexmap::IndexMap;

use smif_data::NarrativeConfig;

/// Overrides for one model's parameters from the run's narrative selections.
///
/// Returns `parameter name -> [(narrative, variant)]` in selection order.
pub fn narrative_overrides(
    narratives: &[NarrativeConfig],
    selections: &IndexMap<String, Vec<String>>,
    model: &str,
) -> IndexMap<String, Vec<(String, String)>> {
    let mut overrides: IndexMap<String, Vec<(String, String)>> = IndexMap::new();
    for narrative in narratives {
        let Some(variants) = selections.get(&narrative.name) else {
            continue;
        };
        let Some(parameters) = narrative.provides.get(model) else {
            continue;
        };
        for variant in variants {
            for parameter in parameters {
                overrides
                    .entry(parameter.clone())
                    .or_default()
                    .push((narrative.name.clone(), variant.clone()));
            }
        }
    }
    overrides
}
