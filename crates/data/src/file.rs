//! File-tree store
//!
//! One JSON document per key under a root directory. Result writes go
//! through a temporary file and a rename so a key is either absent or holds
//! a complete document. Layout:
//!
//! ```text
//! <root>/config/<kind>/<name>.json
//! <root>/data/scenarios/<scenario>/<variant>/<variable>__t<timestep>.json
//! <root>/data/narratives/<narrative>/<variant>/<parameter>.json
//! <root>/data/parameters/<model>/<parameter>.json
//! <root>/results/<run>/<model>/<output>__t<timestep>__i<iteration>.json
//! <root>/state/<run>/t<timestep>__i<iteration>.json
//! <root>/meta/<run>/t<timestep>__i<iteration>/<model>.json
//! <root>/coefficients/<digest>.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use smif_convert::{Coefficients, UnitDef};
use smif_metadata::{DataArray, Spec};

use crate::config::{
    DimensionConfig, Intervention, ModelRunConfig, NarrativeConfig, ScenarioConfig,
    SectorModelConfig, SosModelConfig, StrategyConfig,
};
use crate::error::{Error, Result};
use crate::store::{coefficient_key, Decision, JobRecord, ResultKey, Store};

/// Store backed by a directory tree of JSON documents.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create if absent) a file store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| Error::Io {
            path: root.display().to_string(),
            source,
        })?;
        debug!(root = %root.display(), "file store opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn config_path(&self, kind: &str, name: &str) -> PathBuf {
        self.root
            .join("config")
            .join(kind)
            .join(format!("{name}.json"))
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path, key: &str) -> Result<T> {
        if !path.exists() {
            return Err(Error::not_found(key));
        }
        let text = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| Error::Serde {
            path: path.display().to_string(),
            source,
        })
    }

    /// Write a document atomically: temp file in the same directory, then
    /// rename over the target.
    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(|source| Error::Io {
            path: parent.display().to_string(),
            source,
        })?;
        let text = serde_json::to_string_pretty(value).map_err(|source| Error::Serde {
            path: path.display().to_string(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(|source| Error::Io {
            path: tmp.display().to_string(),
            source,
        })?;
        fs::rename(&tmp, path).map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })
    }

    fn delete(&self, path: &Path, key: &str) -> Result<()> {
        if !path.exists() {
            return Err(Error::not_found(key));
        }
        fs::remove_file(path).map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// File stems of `<dir>/*.json`, sorted for deterministic listings.
    fn list_stems(&self, dir: &Path) -> Result<Vec<String>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(dir).map_err(|source| Error::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| Error::Io {
                path: dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn results_path(&self, run: &str, model: &str, output: &str, timestep: i32, iteration: u32) -> PathBuf {
        self.root
            .join("results")
            .join(run)
            .join(model)
            .join(format!("{output}__t{timestep}__i{iteration}.json"))
    }

    fn coefficients_path(&self, source: &Spec, sink: &Spec) -> PathBuf {
        let digest = Sha256::digest(coefficient_key(source, sink).as_bytes());
        let mut name = String::with_capacity(2 * digest.len() + 5);
        for byte in digest {
            name.push_str(&format!("{byte:02x}"));
        }
        name.push_str(".json");
        self.root.join("coefficients").join(name)
    }
}

impl Store for FileStore {
    fn read_model_run(&self, name: &str) -> Result<ModelRunConfig> {
        let path = self.config_path("model_runs", name);
        self.read_json(&path, &format!("model_run/{name}"))
    }

    fn write_model_run(&self, config: &ModelRunConfig) -> Result<()> {
        self.write_json(&self.config_path("model_runs", &config.name), config)
    }

    fn delete_model_run(&self, name: &str) -> Result<()> {
        self.delete(
            &self.config_path("model_runs", name),
            &format!("model_run/{name}"),
        )
    }

    fn list_model_runs(&self) -> Result<Vec<String>> {
        self.list_stems(&self.root.join("config").join("model_runs"))
    }

    fn read_sos_model(&self, name: &str) -> Result<SosModelConfig> {
        let path = self.config_path("sos_models", name);
        self.read_json(&path, &format!("sos_model/{name}"))
    }

    fn write_sos_model(&self, config: &SosModelConfig) -> Result<()> {
        self.write_json(&self.config_path("sos_models", &config.name), config)
    }

    fn delete_sos_model(&self, name: &str) -> Result<()> {
        self.delete(
            &self.config_path("sos_models", name),
            &format!("sos_model/{name}"),
        )
    }

    fn list_sos_models(&self) -> Result<Vec<String>> {
        self.list_stems(&self.root.join("config").join("sos_models"))
    }

    fn read_sector_model(&self, name: &str) -> Result<SectorModelConfig> {
        let path = self.config_path("sector_models", name);
        self.read_json(&path, &format!("sector_model/{name}"))
    }

    fn write_sector_model(&self, config: &SectorModelConfig) -> Result<()> {
        self.write_json(&self.config_path("sector_models", &config.name), config)
    }

    fn delete_sector_model(&self, name: &str) -> Result<()> {
        self.delete(
            &self.config_path("sector_models", name),
            &format!("sector_model/{name}"),
        )
    }

    fn list_sector_models(&self) -> Result<Vec<String>> {
        self.list_stems(&self.root.join("config").join("sector_models"))
    }

    fn read_scenario(&self, name: &str) -> Result<ScenarioConfig> {
        let path = self.config_path("scenarios", name);
        self.read_json(&path, &format!("scenario/{name}"))
    }

    fn write_scenario(&self, config: &ScenarioConfig) -> Result<()> {
        self.write_json(&self.config_path("scenarios", &config.name), config)
    }

    fn delete_scenario(&self, name: &str) -> Result<()> {
        self.delete(
            &self.config_path("scenarios", name),
            &format!("scenario/{name}"),
        )
    }

    fn list_scenarios(&self) -> Result<Vec<String>> {
        self.list_stems(&self.root.join("config").join("scenarios"))
    }

    fn read_narrative(&self, name: &str) -> Result<NarrativeConfig> {
        let path = self.config_path("narratives", name);
        self.read_json(&path, &format!("narrative/{name}"))
    }

    fn write_narrative(&self, config: &NarrativeConfig) -> Result<()> {
        self.write_json(&self.config_path("narratives", &config.name), config)
    }

    fn read_dimension(&self, name: &str) -> Result<DimensionConfig> {
        let path = self.config_path("dimensions", name);
        self.read_json(&path, &format!("dimension/{name}"))
    }

    fn write_dimension(&self, config: &DimensionConfig) -> Result<()> {
        self.write_json(&self.config_path("dimensions", config.name()), config)
    }

    fn list_dimensions(&self) -> Result<Vec<String>> {
        self.list_stems(&self.root.join("config").join("dimensions"))
    }

    fn read_unit_definitions(&self) -> Result<Vec<UnitDef>> {
        let path = self.root.join("config").join("units.json");
        if !path.exists() {
            return Ok(Vec::new());
        }
        self.read_json(&path, "units")
    }

    fn write_unit_definitions(&self, definitions: &[UnitDef]) -> Result<()> {
        self.write_json(&self.root.join("config").join("units.json"), &definitions)
    }

    fn read_strategies(&self, run: &str) -> Result<Vec<StrategyConfig>> {
        let path = self.config_path("strategies", run);
        if !path.exists() {
            return Ok(Vec::new());
        }
        self.read_json(&path, &format!("strategies/{run}"))
    }

    fn write_strategies(&self, run: &str, strategies: &[StrategyConfig]) -> Result<()> {
        self.write_json(&self.config_path("strategies", run), &strategies)
    }

    fn read_scenario_variant_data(
        &self,
        scenario: &str,
        variant: &str,
        variable: &str,
        timestep: i32,
    ) -> Result<DataArray> {
        let path = self
            .root
            .join("data")
            .join("scenarios")
            .join(scenario)
            .join(variant)
            .join(format!("{variable}__t{timestep}.json"));
        self.read_json(
            &path,
            &format!("scenario/{scenario}/{variant}/{variable}@{timestep}"),
        )
    }

    fn write_scenario_variant_data(
        &self,
        scenario: &str,
        variant: &str,
        data: &DataArray,
        timestep: i32,
    ) -> Result<()> {
        let path = self
            .root
            .join("data")
            .join("scenarios")
            .join(scenario)
            .join(variant)
            .join(format!("{}__t{timestep}.json", data.spec().name()));
        self.write_json(&path, data)
    }

    fn read_narrative_variant_data(
        &self,
        narrative: &str,
        variant: &str,
        parameter: &str,
    ) -> Result<DataArray> {
        let path = self
            .root
            .join("data")
            .join("narratives")
            .join(narrative)
            .join(variant)
            .join(format!("{parameter}.json"));
        self.read_json(
            &path,
            &format!("narrative/{narrative}/{variant}/{parameter}"),
        )
    }

    fn write_narrative_variant_data(
        &self,
        narrative: &str,
        variant: &str,
        data: &DataArray,
    ) -> Result<()> {
        let path = self
            .root
            .join("data")
            .join("narratives")
            .join(narrative)
            .join(variant)
            .join(format!("{}.json", data.spec().name()));
        self.write_json(&path, data)
    }

    fn read_model_parameter_default(&self, model: &str, parameter: &str) -> Result<DataArray> {
        let path = self
            .root
            .join("data")
            .join("parameters")
            .join(model)
            .join(format!("{parameter}.json"));
        self.read_json(&path, &format!("parameter/{model}/{parameter}"))
    }

    fn write_model_parameter_default(&self, model: &str, data: &DataArray) -> Result<()> {
        let path = self
            .root
            .join("data")
            .join("parameters")
            .join(model)
            .join(format!("{}.json", data.spec().name()));
        self.write_json(&path, data)
    }

    fn read_interventions(&self, model: &str) -> Result<Vec<Intervention>> {
        let path = self
            .root
            .join("data")
            .join("interventions")
            .join(format!("{model}.json"));
        if !path.exists() {
            return Ok(Vec::new());
        }
        self.read_json(&path, &format!("interventions/{model}"))
    }

    fn write_interventions(&self, model: &str, interventions: &[Intervention]) -> Result<()> {
        let path = self
            .root
            .join("data")
            .join("interventions")
            .join(format!("{model}.json"));
        self.write_json(&path, &interventions)
    }

    fn read_initial_conditions(&self, model: &str) -> Result<Vec<Decision>> {
        let path = self
            .root
            .join("data")
            .join("initial_conditions")
            .join(format!("{model}.json"));
        if !path.exists() {
            return Ok(Vec::new());
        }
        self.read_json(&path, &format!("initial_conditions/{model}"))
    }

    fn write_initial_conditions(&self, model: &str, initial: &[Decision]) -> Result<()> {
        let path = self
            .root
            .join("data")
            .join("initial_conditions")
            .join(format!("{model}.json"));
        self.write_json(&path, &initial)
    }

    fn read_results(
        &self,
        run: &str,
        model: &str,
        output: &Spec,
        timestep: i32,
        iteration: u32,
    ) -> Result<DataArray> {
        let path = self.results_path(run, model, output.name(), timestep, iteration);
        self.read_json(
            &path,
            &format!("results/{run}/{model}/{}@{timestep}#{iteration}", output.name()),
        )
    }

    fn write_results(
        &self,
        run: &str,
        model: &str,
        data: &DataArray,
        timestep: i32,
        iteration: u32,
    ) -> Result<()> {
        let path = self.results_path(run, model, data.spec().name(), timestep, iteration);
        self.write_json(&path, data)
    }

    fn available_results(&self, run: &str) -> Result<Vec<ResultKey>> {
        let run_dir = self.root.join("results").join(run);
        if !run_dir.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        let models = fs::read_dir(&run_dir).map_err(|source| Error::Io {
            path: run_dir.display().to_string(),
            source,
        })?;
        for model_entry in models {
            let model_entry = model_entry.map_err(|source| Error::Io {
                path: run_dir.display().to_string(),
                source,
            })?;
            let model = model_entry.file_name().to_string_lossy().to_string();
            for stem in self.list_stems(&model_entry.path())? {
                if let Some(key) = parse_result_stem(&model, &stem) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn read_coefficients(&self, source: &Spec, sink: &Spec) -> Result<Option<Coefficients>> {
        let path = self.coefficients_path(source, sink);
        if !path.exists() {
            return Ok(None);
        }
        self.read_json(&path, "coefficients").map(Some)
    }

    fn write_coefficients(
        &self,
        source: &Spec,
        sink: &Spec,
        coefficients: &Coefficients,
    ) -> Result<()> {
        self.write_json(&self.coefficients_path(source, sink), coefficients)
    }

    fn read_state(&self, run: &str, timestep: i32, iteration: u32) -> Result<Vec<Decision>> {
        let path = self
            .root
            .join("state")
            .join(run)
            .join(format!("t{timestep}__i{iteration}.json"));
        self.read_json(&path, &format!("state/{run}@{timestep}#{iteration}"))
    }

    fn write_state(
        &self,
        run: &str,
        timestep: i32,
        iteration: u32,
        state: &[Decision],
    ) -> Result<()> {
        let path = self
            .root
            .join("state")
            .join(run)
            .join(format!("t{timestep}__i{iteration}.json"));
        self.write_json(&path, &state)
    }

    fn read_job_status(
        &self,
        run: &str,
        timestep: i32,
        iteration: u32,
        model: &str,
    ) -> Result<JobRecord> {
        let path = self
            .root
            .join("meta")
            .join(run)
            .join(format!("t{timestep}__i{iteration}"))
            .join(format!("{model}.json"));
        self.read_json(&path, &format!("job/{run}@{timestep}#{iteration}/{model}"))
    }

    fn write_job_status(
        &self,
        run: &str,
        timestep: i32,
        iteration: u32,
        record: &JobRecord,
    ) -> Result<()> {
        let path = self
            .root
            .join("meta")
            .join(run)
            .join(format!("t{timestep}__i{iteration}"))
            .join(format!("{}.json", record.model));
        self.write_json(&path, record)
    }

    fn list_job_status(&self, run: &str, timestep: i32, iteration: u32) -> Result<Vec<JobRecord>> {
        let dir = self
            .root
            .join("meta")
            .join(run)
            .join(format!("t{timestep}__i{iteration}"));
        let mut records = Vec::new();
        for model in self.list_stems(&dir)? {
            records.push(self.read_job_status(run, timestep, iteration, &model)?);
        }
        Ok(records)
    }
}

/// Parse `<output>__t<timestep>__i<iteration>` back into a result key.
fn parse_result_stem(model: &str, stem: &str) -> Option<ResultKey> {
    let (rest, iteration) = stem.rsplit_once("__i")?;
    let (output, timestep) = rest.rsplit_once("__t")?;
    Some(ResultKey {
        model: model.to_string(),
        output: output.to_string(),
        timestep: timestep.parse().ok()?,
        iteration: iteration.parse().ok()?,
    })
}
