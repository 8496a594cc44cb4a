//! smif tools
//!
//! Logging setup and CSV ingest shared by the `smif` command line binary.

use std::path::Path;

use anyhow::{bail, Context};
use indexmap::IndexMap;

use smif_data::Store;
use smif_metadata::DataArray;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize logging with a default filter.
///
/// Use the `RUST_LOG` environment variable to override. Default is `info`
/// for smif crates and `warn` for others.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("warn,smif_tools=info,smif_runtime=info,smif_data=info,smif_model=info")
    });

    fmt().with_env_filter(filter).with_target(false).init();
}

/// Ingest a scenario variant data table from CSV into the store.
///
/// Expected columns: `timestep`, one column per dimension of the variable's
/// spec (holding coordinate ids), and `value`. Each timestep present in the
/// table becomes one stored data array; every coordinate combination must
/// appear exactly once per timestep.
pub fn load_scenario_csv(
    store: &dyn Store,
    scenario: &str,
    variant: &str,
    variable: &str,
    path: &Path,
) -> anyhow::Result<Vec<i32>> {
    let config = store
        .read_scenario(scenario)
        .with_context(|| format!("scenario '{scenario}' not found"))?;
    let spec = config
        .provides
        .iter()
        .find(|s| s.name() == variable)
        .with_context(|| format!("scenario '{scenario}' does not provide '{variable}'"))?;

    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    let headers = reader.headers()?.clone();

    let column = |name: &str| -> anyhow::Result<usize> {
        headers
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("missing column '{name}' in {}", path.display()))
    };
    let timestep_col = column("timestep")?;
    let value_col = column("value")?;
    let dim_cols: Vec<(String, usize)> = spec
        .dims()
        .iter()
        .map(|dim| column(dim).map(|col| (dim.clone(), col)))
        .collect::<anyhow::Result<_>>()?;

    // timestep -> flat index -> value
    let mut tables: IndexMap<i32, Vec<Option<f64>>> = IndexMap::new();
    for record in reader.records() {
        let record = record?;
        let timestep: i32 = record
            .get(timestep_col)
            .unwrap_or_default()
            .trim()
            .parse()
            .context("bad timestep")?;
        let value: f64 = record
            .get(value_col)
            .unwrap_or_default()
            .trim()
            .parse()
            .context("bad value")?;

        let mut flat = 0usize;
        for (dim, col) in &dim_cols {
            let id = record.get(*col).unwrap_or_default().trim();
            let coords = spec.coords(dim).expect("spec dims have coords");
            let position = coords
                .iter()
                .position(|c| c == id)
                .with_context(|| format!("unknown {dim} coordinate '{id}'"))?;
            flat = flat * coords.len() + position;
        }

        let table = tables
            .entry(timestep)
            .or_insert_with(|| vec![None; spec.len()]);
        table[flat] = Some(value);
    }

    let mut timesteps = Vec::with_capacity(tables.len());
    for (timestep, table) in tables {
        let values: Vec<f64> = table
            .into_iter()
            .collect::<Option<Vec<f64>>>()
            .with_context(|| format!("incomplete data for timestep {timestep}"))?;
        let data = DataArray::new(spec.clone(), values)?;
        store.write_scenario_variant_data(scenario, variant, &data, timestep)?;
        timesteps.push(timestep);
    }
    if timesteps.is_empty() {
        bail!("no rows in {}", path.display());
    }
    Ok(timesteps)
}
