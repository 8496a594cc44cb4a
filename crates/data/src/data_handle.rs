//! Per-invocation data handles
//!
//! A [`DataHandle`] is the only object a model ever sees: a read/write
//! facade onto the store scoped to one `(run, model, timestep, iteration)`,
//! with coordinate and unit conversion applied transparently between the
//! producer's output spec and this model's input spec.

use indexmap::IndexMap;
use tracing::{debug, trace};

use smif_convert::ConvertRegister;
use smif_metadata::{DataArray, RelativeTimestep, Spec};

use crate::error::{Error, Result};
use crate::store::{Decision, Store, StoreCache};

/// Where a dependency's data comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencySource {
    /// Exogenous data, read from the scenario namespace
    Scenario { scenario: String, variant: String },
    /// Another model's output, read from the results namespace
    Model { name: String },
}

/// One dependency resolved for a sink model: which source feeds an input,
/// under what spec, at what relative timestep.
#[derive(Debug, Clone)]
pub struct ResolvedDependency {
    pub source: DependencySource,
    pub source_output: String,
    pub source_spec: Spec,
    pub timestep: RelativeTimestep,
}

/// Scoped store access for one model invocation.
pub struct DataHandle<'a> {
    store: &'a dyn Store,
    convert: &'a ConvertRegister,
    run: String,
    model: String,
    timestep: i32,
    iteration: u32,
    timesteps: Vec<i32>,
    inputs: IndexMap<String, Spec>,
    outputs: IndexMap<String, Spec>,
    parameters: IndexMap<String, Spec>,
    /// input name -> resolved dependency
    dependencies: IndexMap<String, ResolvedDependency>,
    /// parameter name -> (narrative, variant) overrides, applied in order
    narratives: IndexMap<String, Vec<(String, String)>>,
}

impl<'a> DataHandle<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: &'a dyn Store,
        convert: &'a ConvertRegister,
        run: impl Into<String>,
        model: impl Into<String>,
        timestep: i32,
        iteration: u32,
        timesteps: Vec<i32>,
    ) -> Self {
        Self {
            store,
            convert,
            run: run.into(),
            model: model.into(),
            timestep,
            iteration,
            timesteps,
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            parameters: IndexMap::new(),
            dependencies: IndexMap::new(),
            narratives: IndexMap::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: IndexMap<String, Spec>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: IndexMap<String, Spec>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_parameters(mut self, parameters: IndexMap<String, Spec>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_dependencies(mut self, dependencies: IndexMap<String, ResolvedDependency>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_narratives(
        mut self,
        narratives: IndexMap<String, Vec<(String, String)>>,
    ) -> Self {
        self.narratives = narratives;
        self
    }

    pub fn run(&self) -> &str {
        &self.run
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn current_timestep(&self) -> i32 {
        self.timestep
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn timesteps(&self) -> &[i32] {
        &self.timesteps
    }

    pub fn base_timestep(&self) -> Option<i32> {
        self.timesteps.first().copied()
    }

    pub fn previous_timestep(&self) -> Result<i32> {
        RelativeTimestep::Previous
            .resolve_relative_to(self.timestep, &self.timesteps)
            .map_err(Into::into)
    }

    /// Read the data feeding a named input, converted to the input's spec.
    pub fn get_data(&self, input: &str) -> Result<DataArray> {
        let dependency = self.dependency(input)?;
        self.read_dependency(input, dependency, dependency.timestep)
    }

    /// Read a named input's dependency at the previous timestep.
    pub fn get_previous_timestep_data(&self, input: &str) -> Result<DataArray> {
        let dependency = self.dependency(input)?;
        self.read_dependency(input, dependency, RelativeTimestep::Previous)
    }

    /// Read a named input's dependency at the first timestep of the run.
    pub fn get_base_timestep_data(&self, input: &str) -> Result<DataArray> {
        let dependency = self.dependency(input)?;
        self.read_dependency(input, dependency, RelativeTimestep::Base)
    }

    /// Resolve a parameter value: narrative overrides first, then the model
    /// default, converted to the parameter's spec.
    pub fn get_parameter(&self, name: &str) -> Result<DataArray> {
        let sink = self
            .parameters
            .get(name)
            .ok_or_else(|| Error::UnknownParameter {
                model: self.model.clone(),
                name: name.to_string(),
            })?;

        // Later narrative selections override earlier ones
        if let Some(overrides) = self.narratives.get(name) {
            for (narrative, variant) in overrides.iter().rev() {
                match self
                    .store
                    .read_narrative_variant_data(narrative, variant, name)
                {
                    Ok(data) => {
                        trace!(parameter = name, narrative, variant, "narrative override");
                        return self.convert_to(&data, sink);
                    }
                    Err(error) if error.is_not_found() => continue,
                    Err(error) => return Err(error),
                }
            }
        }

        let data = self
            .store
            .read_model_parameter_default(&self.model, name)?;
        self.convert_to(&data, sink)
    }

    /// All parameter values, keyed by name.
    pub fn get_parameters(&self) -> Result<IndexMap<String, DataArray>> {
        let mut values = IndexMap::with_capacity(self.parameters.len());
        for name in self.parameters.keys() {
            values.insert(name.clone(), self.get_parameter(name)?);
        }
        Ok(values)
    }

    /// Read this model's own output at the current timestep and iteration.
    pub fn get_results(&self, output: &str) -> Result<DataArray> {
        let spec = self.outputs.get(output).ok_or_else(|| Error::UnknownOutput {
            model: self.model.clone(),
            name: output.to_string(),
        })?;
        self.store
            .read_results(&self.run, &self.model, spec, self.timestep, self.iteration)
    }

    /// Write a named output's results for the current timestep and iteration.
    ///
    /// The data's spec must match the declared output spec exactly; no
    /// conversion happens on write.
    pub fn set_results(&mut self, output: &str, data: &DataArray) -> Result<()> {
        let spec = self.outputs.get(output).ok_or_else(|| Error::UnknownOutput {
            model: self.model.clone(),
            name: output.to_string(),
        })?;
        if !data.spec().matches(spec) {
            return Err(Error::Mismatch {
                name: output.to_string(),
                message: format!("expected {spec}, got {}", data.spec()),
            });
        }
        debug!(
            model = %self.model,
            output,
            timestep = self.timestep,
            iteration = self.iteration,
            "set results"
        );
        let bound = data.clone().with_spec(spec.clone())?;
        self.store
            .write_results(&self.run, &self.model, &bound, self.timestep, self.iteration)
    }

    /// Decisions in effect for this timestep and iteration.
    pub fn get_state(&self) -> Result<Vec<Decision>> {
        self.store.read_state(&self.run, self.timestep, self.iteration)
    }

    fn dependency(&self, input: &str) -> Result<&ResolvedDependency> {
        if !self.inputs.contains_key(input) {
            return Err(Error::UnknownInput {
                model: self.model.clone(),
                name: input.to_string(),
            });
        }
        self.dependencies
            .get(input)
            .ok_or_else(|| Error::UnsatisfiedInput {
                model: self.model.clone(),
                input: input.to_string(),
            })
    }

    fn read_dependency(
        &self,
        input: &str,
        dependency: &ResolvedDependency,
        offset: RelativeTimestep,
    ) -> Result<DataArray> {
        let sink = &self.inputs[input];
        let data = match &dependency.source {
            DependencySource::Scenario { scenario, variant } => {
                let timestep = offset
                    .resolve_relative_to(self.timestep, &self.timesteps)
                    .map_err(Error::from)?;
                self.store.read_scenario_variant_data(
                    scenario,
                    variant,
                    &dependency.source_output,
                    timestep,
                )?
            }
            DependencySource::Model { name } => {
                self.read_model_results(name, dependency, offset)?
            }
        };
        self.convert_to(&data, sink)
    }

    /// Read another model's results at the resolved timestep.
    ///
    /// Current-offset reads take this invocation's iteration; lagged reads
    /// take the final (highest persisted) iteration of the source timestep.
    /// A lagged read at the first timestep falls back to initial data seeded
    /// before the run started.
    fn read_model_results(
        &self,
        source_model: &str,
        dependency: &ResolvedDependency,
        offset: RelativeTimestep,
    ) -> Result<DataArray> {
        match offset.resolve_relative_to(self.timestep, &self.timesteps) {
            Ok(timestep) => {
                let iteration = match offset {
                    RelativeTimestep::Current => self.iteration,
                    _ => self.final_iteration(source_model, &dependency.source_output, timestep)?,
                };
                self.store.read_results(
                    &self.run,
                    source_model,
                    &dependency.source_spec,
                    timestep,
                    iteration,
                )
            }
            Err(smif_metadata::Error::NoPreviousTimestep { .. }) => self.initial_data(
                source_model,
                &dependency.source_output,
                &dependency.source_spec,
            ),
            Err(error) => Err(error.into()),
        }
    }

    /// Highest iteration persisted for a (model, output, timestep).
    fn final_iteration(&self, model: &str, output: &str, timestep: i32) -> Result<u32> {
        self.store
            .available_results(&self.run)?
            .iter()
            .filter(|key| key.model == model && key.output == output && key.timestep == timestep)
            .map(|key| key.iteration)
            .max()
            .ok_or_else(|| Error::not_found(format!("results/{}/{model}/{output}@{timestep}", self.run)))
    }

    /// Latest result written before the run's first timestep: the seeded
    /// initial condition for a lagged edge.
    fn initial_data(&self, model: &str, output: &str, spec: &Spec) -> Result<DataArray> {
        let first = self.base_timestep().ok_or(smif_metadata::Error::EmptyTimesteps)?;
        let key = self
            .store
            .available_results(&self.run)?
            .into_iter()
            .filter(|key| key.model == model && key.output == output && key.timestep < first)
            .max_by_key(|key| (key.timestep, key.iteration))
            .ok_or_else(|| {
                Error::not_found(format!(
                    "initial data for {model}.{output} before {first} in run '{}'",
                    self.run
                ))
            })?;
        self.store
            .read_results(&self.run, model, spec, key.timestep, key.iteration)
    }

    fn convert_to(&self, data: &DataArray, sink: &Spec) -> Result<DataArray> {
        if data.spec().matches(sink) && data.spec().name() == sink.name() {
            return Ok(data.clone());
        }
        let cache = StoreCache(self.store);
        self.convert
            .pipeline_with_cache(&cache)
            .convert(data, sink)
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use smif_convert::{Region, RegionSet};
    use smif_metadata::{Coords, DType};

    fn spec(name: &str, regions: Vec<&str>, unit: &str) -> Spec {
        Spec::new(name, vec![Coords::new("region", regions)], DType::F64, unit)
            .unwrap()
            .extensive(true)
    }

    fn convert_register() -> ConvertRegister {
        let mut register = ConvertRegister::with_default_units();
        register.regions.register(RegionSet::new(
            "halves",
            vec![
                Region::new("north", vec![("z1", 1.0)]),
                Region::new("south", vec![("z2", 1.0)]),
            ],
        ));
        register.regions.register(RegionSet::new(
            "national",
            vec![Region::new("UK", vec![("z1", 1.0), ("z2", 1.0)])],
        ));
        register
    }

    fn handle<'a>(
        store: &'a MemoryStore,
        convert: &'a ConvertRegister,
        timestep: i32,
        iteration: u32,
    ) -> DataHandle<'a> {
        let sink = spec("power", vec!["UK"], "GWh");
        let source_spec = spec("power", vec!["north", "south"], "GWh");
        let mut deps = IndexMap::new();
        deps.insert(
            "power".to_string(),
            ResolvedDependency {
                source: DependencySource::Model {
                    name: "gen".to_string(),
                },
                source_output: "power".to_string(),
                source_spec,
                timestep: RelativeTimestep::Current,
            },
        );
        DataHandle::new(store, convert, "run", "consume", timestep, iteration, vec![
            2020, 2025,
        ])
        .with_inputs(IndexMap::from([("power".to_string(), sink)]))
        .with_outputs(IndexMap::from([(
            "cost".to_string(),
            Spec::scalar("cost", "GBP"),
        )]))
        .with_dependencies(deps)
    }

    #[test]
    fn test_get_data_converts_to_sink_spec() {
        let store = MemoryStore::new();
        let convert = convert_register();
        let source = DataArray::new(spec("power", vec!["north", "south"], "GWh"), vec![60.0, 40.0])
            .unwrap();
        store.write_results("run", "gen", &source, 2020, 0).unwrap();

        let handle = handle(&store, &convert, 2020, 0);
        let data = handle.get_data("power").unwrap();
        assert_eq!(data.values(), &[100.0]);
        assert_eq!(data.spec().name(), "power");
    }

    #[test]
    fn test_get_data_missing_source_is_not_found() {
        let store = MemoryStore::new();
        let convert = convert_register();
        let handle = handle(&store, &convert, 2020, 0);
        let result = handle.get_data("power");
        assert!(result.is_err_and(|e| e.is_not_found()));
    }

    #[test]
    fn test_unknown_input_rejected() {
        let store = MemoryStore::new();
        let convert = convert_register();
        let handle = handle(&store, &convert, 2020, 0);
        assert!(matches!(
            handle.get_data("not_an_input"),
            Err(Error::UnknownInput { .. })
        ));
    }

    #[test]
    fn test_set_results_validates_spec() {
        let store = MemoryStore::new();
        let convert = convert_register();
        let mut handle = handle(&store, &convert, 2020, 0);

        let wrong = DataArray::new(spec("cost", vec!["UK"], "GBP"), vec![1.0]).unwrap();
        assert!(matches!(
            handle.set_results("cost", &wrong),
            Err(Error::Mismatch { .. })
        ));

        let right = DataArray::scalar(Spec::scalar("cost", "GBP"), 1.0).unwrap();
        handle.set_results("cost", &right).unwrap();
        assert_eq!(handle.get_results("cost").unwrap().as_scalar(), Some(1.0));
    }

    #[test]
    fn test_lagged_read_uses_final_iteration() {
        let store = MemoryStore::new();
        let convert = convert_register();
        let source_spec = spec("power", vec!["north", "south"], "GWh");

        // Two iterations at 2020; the lagged read at 2025 sees the last one
        store
            .write_results(
                "run",
                "gen",
                &DataArray::new(source_spec.clone(), vec![1.0, 1.0]).unwrap(),
                2020,
                0,
            )
            .unwrap();
        store
            .write_results(
                "run",
                "gen",
                &DataArray::new(source_spec, vec![30.0, 20.0]).unwrap(),
                2020,
                1,
            )
            .unwrap();

        let handle = handle(&store, &convert, 2025, 0);
        let data = handle.get_previous_timestep_data("power").unwrap();
        assert_eq!(data.values(), &[50.0]);
    }

    #[test]
    fn test_lagged_read_at_first_timestep_uses_seeded_initial_data() {
        let store = MemoryStore::new();
        let convert = convert_register();
        let source_spec = spec("power", vec!["north", "south"], "GWh");

        // Initial condition written before the run's first timestep
        store
            .write_results(
                "run",
                "gen",
                &DataArray::new(source_spec, vec![250.0, 250.0]).unwrap(),
                2019,
                0,
            )
            .unwrap();

        let handle = handle(&store, &convert, 2020, 0);
        let data = handle.get_previous_timestep_data("power").unwrap();
        assert_eq!(data.values(), &[500.0]);
    }

    #[test]
    fn test_parameter_default_and_narrative_override() {
        let store = MemoryStore::new();
        let convert = convert_register();
        let param_spec = Spec::scalar("discount_rate", "-");

        store
            .write_model_parameter_default(
                "consume",
                &DataArray::scalar(param_spec.clone(), 0.03).unwrap(),
            )
            .unwrap();

        let base = DataHandle::new(&store, &convert, "run", "consume", 2020, 0, vec![2020])
            .with_parameters(IndexMap::from([(
                "discount_rate".to_string(),
                param_spec.clone(),
            )]));
        assert_eq!(
            base.get_parameter("discount_rate").unwrap().as_scalar(),
            Some(0.03)
        );

        // Narrative override wins
        store
            .write_narrative_variant_data(
                "austerity",
                "deep",
                &DataArray::scalar(param_spec.clone(), 0.07).unwrap(),
            )
            .unwrap();
        let overridden = DataHandle::new(&store, &convert, "run", "consume", 2020, 0, vec![2020])
            .with_parameters(IndexMap::from([(
                "discount_rate".to_string(),
                param_spec,
            )]))
            .with_narratives(IndexMap::from([(
                "discount_rate".to_string(),
                vec![("austerity".to_string(), "deep".to_string())],
            )]));
        assert_eq!(
            overridden.get_parameter("discount_rate").unwrap().as_scalar(),
            Some(0.07)
        );
    }

    #[test]
    fn test_scenario_dependency_reads_scenario_namespace() {
        let store = MemoryStore::new();
        let convert = convert_register();
        let pop_spec = spec("population", vec!["UK"], "people");

        store
            .write_scenario_variant_data(
                "population",
                "low",
                &DataArray::new(pop_spec.clone(), vec![6.6e7]).unwrap(),
                2020,
            )
            .unwrap();

        let mut deps = IndexMap::new();
        deps.insert(
            "population".to_string(),
            ResolvedDependency {
                source: DependencySource::Scenario {
                    scenario: "population".to_string(),
                    variant: "low".to_string(),
                },
                source_output: "population".to_string(),
                source_spec: pop_spec.clone(),
                timestep: RelativeTimestep::Current,
            },
        );
        let handle = DataHandle::new(&store, &convert, "run", "gen", 2020, 0, vec![2020])
            .with_inputs(IndexMap::from([("population".to_string(), pop_spec)]))
            .with_dependencies(deps);

        let data = handle.get_data("population").unwrap();
        assert_eq!(data.as_scalar(), Some(6.6e7));
    }
}
