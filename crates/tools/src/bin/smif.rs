//!
//! Runs, validates and inspects smif model runs against a project directory.
//!
//! Usage: `smif <command> [options]`

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use tracing::{error, info};

use smif_data::{FileStore, Store};
use smif_runtime::{load_convert_register, CancelToken, ModelRun, ModelRunner};

#[derive(Parser, Debug)]
#[command(name = "smif")]
#[command(about = "Simulation modelling integration framework")]
struct Args {
    /// Path to the project directory (the file store root)
    #[arg(long, short = 'd', default_value = ".")]
    directory: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a model run; exits non-zero if any job fails
    Run {
        model_run: String,

        /// Resume from the latest timestep with persisted results
        #[arg(long)]
        warm: bool,

        /// Jobs of one level that may run concurrently
        #[arg(long, default_value = "1")]
        max_workers: usize,
    },
    /// List configurations of a kind
    List {
        /// One of: model_runs, sos_models, sector_models, scenarios
        kind: String,
    },
    /// Print the (model, output, timestep, iteration) tuples already stored
    AvailableResults { model_run: String },
    /// Validate a model run configuration without executing it
    Validate { model_run: String },
    /// Ingest a scenario variant data table from CSV
    Csv2store {
        scenario: String,
        variant: String,
        variable: String,
        file: PathBuf,
    },
}

fn main() {
    smif_tools::init_logging();
    let args = Args::parse();

    let store = match FileStore::new(&args.directory) {
        Ok(store) => store,
        Err(e) => {
            error!("cannot open project directory: {e}");
            process::exit(1);
        }
    };

    let code = match args.command {
        Command::Run {
            model_run,
            warm,
            max_workers,
        } => run(&store, &model_run, warm, max_workers),
        Command::List { kind } => list(&store, &kind),
        Command::AvailableResults { model_run } => available_results(&store, &model_run),
        Command::Validate { model_run } => validate(&store, &model_run),
        Command::Csv2store {
            scenario,
            variant,
            variable,
            file,
        } => csv2store(&store, &scenario, &variant, &variable, &file),
    };
    process::exit(code);
}

fn run(store: &FileStore, run_name: &str, warm: bool, max_workers: usize) -> i32 {
    // Sector model wrappers are registered by embedding applications that
    // link their simulation code against smif; the bare CLI can only drive
    // runs whose models are all scenarios.
    let wrappers = IndexMap::new();

    let model_run = match ModelRun::build(store, run_name, wrappers) {
        Ok(model_run) => model_run,
        Err(e) => {
            error!("cannot assemble model run '{run_name}': {e}");
            return 1;
        }
    };

    let convert = match load_convert_register(store) {
        Ok(register) => register,
        Err(e) => {
            error!("cannot load conversion registers: {e}");
            return 1;
        }
    };

    let runner = ModelRunner::new(store, &convert)
        .with_max_workers(max_workers)
        .with_resume(warm);
    match runner.run(&model_run, &CancelToken::new()) {
        Ok(report) if report.is_done() => {
            info!(
                run = run_name,
                jobs = report.jobs.len(),
                "model run complete"
            );
            0
        }
        Ok(report) => {
            error!(
                run = run_name,
                failure = report.first_failure.as_deref().unwrap_or("unknown"),
                "model run failed"
            );
            1
        }
        Err(e) => {
            error!("model run error: {e}");
            1
        }
    }
}

fn list(store: &FileStore, kind: &str) -> i32 {
    let names = match kind {
        "model_runs" => store.list_model_runs(),
        "sos_models" => store.list_sos_models(),
        "sector_models" => store.list_sector_models(),
        "scenarios" => store.list_scenarios(),
        other => {
            error!("unknown kind '{other}' (expected model_runs, sos_models, sector_models or scenarios)");
            return 1;
        }
    };
    match names {
        Ok(names) => {
            for name in names {
                println!("{name}");
            }
            0
        }
        Err(e) => {
            error!("cannot list {kind}: {e}");
            1
        }
    }
}

fn available_results(store: &FileStore, run_name: &str) -> i32 {
    match store.available_results(run_name) {
        Ok(keys) => {
            for key in keys {
                println!(
                    "{} {} {} {}",
                    key.model, key.output, key.timestep, key.iteration
                );
            }
            0
        }
        Err(e) => {
            error!("cannot read results for '{run_name}': {e}");
            1
        }
    }
}

fn validate(store: &FileStore, run_name: &str) -> i32 {
    let model_run = match ModelRun::build_for_validation(store, run_name) {
        Ok(model_run) => model_run,
        Err(e) => {
            error!("invalid: {e}");
            return 1;
        }
    };

    let convert = match load_convert_register(store) {
        Ok(register) => register,
        Err(e) => {
            error!("cannot load conversion registers: {e}");
            return 1;
        }
    };

    if let Err(e) = model_run.sos.validate(&convert) {
        error!("invalid: {e}");
        return 1;
    }
    let graph = smif_runtime::DependencyGraph::from_sos_model(&model_run.sos);
    if let Err(e) = graph.validate() {
        error!("invalid: {e}");
        return 1;
    }
    info!(run = run_name, "configuration valid");
    0
}

fn csv2store(
    store: &FileStore,
    scenario: &str,
    variant: &str,
    variable: &str,
    file: &std::path::Path,
) -> i32 {
    match smif_tools::load_scenario_csv(store, scenario, variant, variable, file) {
        Ok(timesteps) => {
            info!(
                scenario,
                variant,
                variable,
                timesteps = timesteps.len(),
                "scenario data ingested"
            );
            0
        }
        Err(e) => {
            error!("ingest failed: {e:#}");
            1
        }
    }
}
