//! Integration tests for end-to-end smif execution.
//!
//! These tests drive the full pipeline: assemble a model run from stored
//! configuration, validate it, schedule every timestep and iteration, and
//! check what landed in the store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;

use smif_data::{
    ConvergenceVariable, Decision, DecisionModuleConfig, JobStatus, NarrativeConfig,
    NarrativeVariantConfig, SectorModelConfig, Store, StrategyConfig,
};
use smif_metadata::{Coords, DType, DataArray, Spec};
use smif_model::ModelError;
use smif_runtime::RunStatus;
use smif_tests::TestHarness;

use smif_convert::{Interval, IntervalSet, Region, RegionSet};
use smif_data::DataHandle;

fn regional_spec(name: &str, regions: Vec<&str>, unit: &str) -> Spec {
    Spec::new(
        name,
        vec![
            Coords::new("region", regions),
            Coords::new("interval", vec!["annual"]),
        ],
        DType::F64,
        unit,
    )
    .unwrap()
    .extensive(true)
}

fn sector_model(name: &str, inputs: Vec<Spec>, outputs: Vec<Spec>) -> SectorModelConfig {
    SectorModelConfig {
        name: name.to_string(),
        description: String::new(),
        inputs,
        outputs,
        parameters: Vec::new(),
        interventions: Vec::new(),
        initial_conditions: Vec::new(),
    }
}

/// S1: two models in a line, identical specs, scenario feeding the source.
///
/// Both jobs reach done each timestep and the consumer sees the producer's
/// values unchanged.
#[test]
fn test_two_node_linear_run() {
    let mut harness = TestHarness::new("s1", vec![2020, 2025]);

    let population = regional_spec("population", vec!["UK"], "people");
    harness.add_scenario(
        "population",
        "central",
        vec![population.clone()],
        vec![
            (2020, DataArray::new(population.clone(), vec![6.6e7]).unwrap()),
            (2025, DataArray::new(population.clone(), vec![6.8e7]).unwrap()),
        ],
    );

    let power = regional_spec("power", vec!["UK"], "GWh");
    let gen_out = power.clone();
    harness.add_model(
        sector_model("gen", vec![population.clone()], vec![power.clone()]),
        move |data: &mut DataHandle| {
            let people = data.get_data("population")?;
            let gwh = people.as_scalar().unwrap_or(0.0) / 1e6;
            data.set_results("power", &DataArray::new(gen_out.clone(), vec![gwh])?)?;
            Ok(())
        },
    );

    let served = regional_spec("served", vec!["UK"], "GWh");
    let consume_out = served.clone();
    harness.add_model(
        sector_model("consume", vec![power.clone()], vec![served.clone()]),
        move |data: &mut DataHandle| {
            let power = data.get_data("power")?;
            data.set_results(
                "served",
                &DataArray::new(consume_out.clone(), power.values().to_vec())?,
            )?;
            Ok(())
        },
    );

    harness.add_dependency("population", "population", "gen", "population", false);
    harness.add_dependency("gen", "power", "consume", "power", false);

    let report = harness.run().unwrap();
    assert_eq!(report.status, RunStatus::Done);

    for timestep in [2020, 2025] {
        let records = harness.job_records(timestep, 0);
        assert_eq!(records.len(), 3); // scenario + gen + consume
        assert!(records.iter().all(|r| r.status == JobStatus::Done));
    }

    // consume reads gen.power unchanged
    let power_2020 = harness.results("gen", &power, 2020, 0).unwrap();
    let served_2020 = harness.results("consume", &served, 2020, 0).unwrap();
    assert_eq!(power_2020.values(), served_2020.values());
    assert_eq!(served_2020.values(), &[66.0]);
}

/// S2: producer on four regions, consumer on one; extensive sum.
#[test]
fn test_region_aggregation() {
    let mut harness = TestHarness::new("s2", vec![2020]);
    harness.convert_mut().regions.register(RegionSet::new(
        "quadrants",
        vec![
            Region::new("NW", vec![("z1", 1.0)]),
            Region::new("NE", vec![("z2", 1.0)]),
            Region::new("SW", vec![("z3", 1.0)]),
            Region::new("SE", vec![("z4", 1.0)]),
        ],
    ));
    harness.convert_mut().regions.register(RegionSet::new(
        "national",
        vec![Region::new(
            "UK",
            vec![("z1", 1.0), ("z2", 1.0), ("z3", 1.0), ("z4", 1.0)],
        )],
    ));

    let fine = regional_spec("power", vec!["NW", "NE", "SW", "SE"], "GWh");
    let coarse = regional_spec("power", vec!["UK"], "GWh");

    let gen_out = fine.clone();
    harness.add_model(
        sector_model("gen", vec![], vec![fine.clone()]),
        move |data: &mut DataHandle| {
            data.set_results(
                "power",
                &DataArray::new(gen_out.clone(), vec![10.0, 20.0, 30.0, 40.0])?,
            )?;
            Ok(())
        },
    );

    let total = regional_spec("total", vec!["UK"], "GWh");
    let consume_out = total.clone();
    harness.add_model(
        sector_model("consume", vec![coarse.clone()], vec![total.clone()]),
        move |data: &mut DataHandle| {
            let power = data.get_data("power")?;
            data.set_results(
                "total",
                &DataArray::new(consume_out.clone(), power.values().to_vec())?,
            )?;
            Ok(())
        },
    );
    harness.add_dependency("gen", "power", "consume", "power", false);

    let report = harness.run().unwrap();
    assert_eq!(report.status, RunStatus::Done);

    let total_2020 = harness.results("consume", &total, 2020, 0).unwrap();
    assert!((total_2020.values()[0] - 100.0).abs() < 1e-9);
}

/// S3: producer emits MWh, consumer expects GWh.
#[test]
fn test_unit_conversion() {
    let mut harness = TestHarness::new("s3", vec![2020]);

    let mwh = regional_spec("power", vec!["UK"], "MWh");
    let gwh = regional_spec("power", vec!["UK"], "GWh");

    let gen_out = mwh.clone();
    harness.add_model(
        sector_model("gen", vec![], vec![mwh.clone()]),
        move |data: &mut DataHandle| {
            data.set_results("power", &DataArray::new(gen_out.clone(), vec![1000.0])?)?;
            Ok(())
        },
    );

    let seen = regional_spec("seen", vec!["UK"], "GWh");
    let consume_out = seen.clone();
    harness.add_model(
        sector_model("consume", vec![gwh.clone()], vec![seen.clone()]),
        move |data: &mut DataHandle| {
            let power = data.get_data("power")?;
            data.set_results(
                "seen",
                &DataArray::new(consume_out.clone(), power.values().to_vec())?,
            )?;
            Ok(())
        },
    );
    harness.add_dependency("gen", "power", "consume", "power", false);

    harness.run().unwrap();
    let seen_2020 = harness.results("consume", &seen, 2020, 0).unwrap();
    assert!((seen_2020.values()[0] - 1.0).abs() < 1e-12);
}

/// S4: a reservoir fed by its own output at the previous timestep.
///
/// The graph accepts the configuration (no cycle through lagged edges); the
/// first timestep reads the seeded initial condition, later timesteps read
/// what the previous timestep wrote.
#[test]
fn test_lagged_self_dependency() {
    let mut harness = TestHarness::new("s4", vec![2020, 2021, 2022]);

    let level = regional_spec("reservoir_level", vec!["UK"], "Ml");
    let out_spec = level.clone();
    harness.add_model(
        sector_model("reservoir", vec![level.clone()], vec![level.clone()]),
        move |data: &mut DataHandle| {
            let previous = data.get_data("reservoir_level")?;
            let drawn = previous.values()[0] - 20.0;
            data.set_results(
                "reservoir_level",
                &DataArray::new(out_spec.clone(), vec![drawn])?,
            )?;
            Ok(())
        },
    );
    harness.add_dependency(
        "reservoir",
        "reservoir_level",
        "reservoir",
        "reservoir_level",
        true,
    );

    // Initial condition: level at 2019 was 500
    harness.seed_initial_result(
        "reservoir",
        &DataArray::new(level.clone(), vec![500.0]).unwrap(),
        2019,
    );

    let report = harness.run().unwrap();
    assert_eq!(report.status, RunStatus::Done);

    let at = |timestep| {
        harness
            .results("reservoir", &level, timestep, 0)
            .unwrap()
            .values()[0]
    };
    assert_eq!(at(2020), 480.0);
    assert_eq!(at(2021), 460.0);
    assert_eq!(at(2022), 440.0);
}

/// S5: iterating decision loop terminates once the convergence variable
/// settles within relative tolerance.
#[test]
fn test_iterating_loop_convergence() {
    let mut harness = TestHarness::new("s5", vec![2020]).with_decision_module(
        DecisionModuleConfig::Iterating {
            max_iterations: 10,
            relative_tolerance: 1e-3,
            absolute_tolerance: 0.0,
            convergence_variables: vec![ConvergenceVariable {
                model: "supply".to_string(),
                output: "q".to_string(),
            }],
        },
    );

    let q = regional_spec("q", vec!["UK"], "Ml");
    let supply_out = q.clone();
    harness.add_model(
        sector_model("supply", vec![], vec![q.clone()]),
        move |data: &mut DataHandle| {
            let series = [10.0, 9.5, 9.48, 9.479];
            let value = series[(data.iteration() as usize).min(series.len() - 1)];
            data.set_results("q", &DataArray::new(supply_out.clone(), vec![value])?)?;
            Ok(())
        },
    );

    let demand_out = regional_spec("shortfall", vec!["UK"], "Ml");
    let demand_spec = demand_out.clone();
    harness.add_model(
        sector_model("demand", vec![q.clone()], vec![demand_out.clone()]),
        move |data: &mut DataHandle| {
            let supplied = data.get_data("q")?;
            let shortfall = 12.0 - supplied.values()[0];
            data.set_results(
                "shortfall",
                &DataArray::new(demand_spec.clone(), vec![shortfall])?,
            )?;
            Ok(())
        },
    );
    harness.add_dependency("supply", "q", "demand", "q", false);

    let report = harness.run().unwrap();
    assert_eq!(report.status, RunStatus::Done);

    // Terminates at iteration 3: |9.479 - 9.48| / 9.48 < 1e-3
    assert_eq!(report.final_iterations.get(&2020), Some(&3));
    let canonical = harness.results("supply", &q, 2020, 3).unwrap();
    assert_eq!(canonical.values(), &[9.479]);
}

/// S5 continued: exhausting max_iterations without settling is an error,
/// and the last iteration's results stay readable.
#[test]
fn test_iterating_loop_exhaustion() {
    let mut harness = TestHarness::new("s5_diverge", vec![2020]).with_decision_module(
        DecisionModuleConfig::Iterating {
            max_iterations: 3,
            relative_tolerance: 1e-6,
            absolute_tolerance: 0.0,
            convergence_variables: vec![ConvergenceVariable {
                model: "supply".to_string(),
                output: "q".to_string(),
            }],
        },
    );

    let q = regional_spec("q", vec!["UK"], "Ml");
    let supply_out = q.clone();
    harness.add_model(
        sector_model("supply", vec![], vec![q.clone()]),
        move |data: &mut DataHandle| {
            // Oscillates, never converging
            let value = if data.iteration() % 2 == 0 { 10.0 } else { 5.0 };
            data.set_results("q", &DataArray::new(supply_out.clone(), vec![value])?)?;
            Ok(())
        },
    );

    let result = harness.run();
    assert!(matches!(
        result,
        Err(smif_runtime::Error::Convergence {
            timestep: 2020,
            iterations: 3,
            ..
        })
    ));

    // Last iteration's results remain in the store
    let last = harness.results("supply", &q, 2020, 2).unwrap();
    assert_eq!(last.values(), &[10.0]);
}

/// S6: a current-edge cycle is rejected before any job runs, naming the
/// cycle.
#[test]
fn test_cycle_rejection() {
    let mut harness = TestHarness::new("s6", vec![2020]);

    let out = regional_spec("out", vec!["UK"], "GWh");
    let in_ = regional_spec("in", vec!["UK"], "GWh");

    for name in ["a", "b"] {
        let spec = out.clone();
        harness.add_model(
            sector_model(name, vec![in_.clone()], vec![out.clone()]),
            move |data: &mut DataHandle| {
                data.set_results("out", &DataArray::new(spec.clone(), vec![0.0])?)?;
                Ok(())
            },
        );
    }
    harness.add_dependency("a", "out", "b", "in", false);
    harness.add_dependency("b", "out", "a", "in", false);

    let error = harness.run().unwrap_err();
    match error {
        smif_runtime::Error::CircularDependency(e) => {
            assert_eq!(e.cycle, vec!["a", "b", "a"]);
        }
        other => panic!("expected circular dependency, got {other}"),
    }

    // Nothing ran
    assert!(harness.store().available_results("s6").unwrap().is_empty());
}

/// Determinism: identical configuration and data produce byte-equal results.
#[test]
fn test_determinism_across_runs() {
    let build = || {
        let mut harness = TestHarness::new("det", vec![2020, 2025]);
        let power = regional_spec("power", vec!["UK"], "GWh");
        let spec = power.clone();
        harness.add_model(
            sector_model("gen", vec![], vec![power.clone()]),
            move |data: &mut DataHandle| {
                let t = data.current_timestep() as f64;
                data.set_results(
                    "power",
                    &DataArray::new(spec.clone(), vec![t * 0.125 + 7.0])?,
                )?;
                Ok(())
            },
        );
        harness
    };

    let first = build();
    first.run().unwrap();
    let second = build();
    second.run().unwrap();

    let power = regional_spec("power", vec!["UK"], "GWh");
    for timestep in [2020, 2025] {
        let a = first.results("gen", &power, timestep, 0).unwrap();
        let b = second.results("gen", &power, timestep, 0).unwrap();
        assert_eq!(a.values(), b.values());
    }
}

/// Idempotent rerun: running twice into the same store overwrites the same
/// keys with the same values.
#[test]
fn test_idempotent_rerun() {
    let mut harness = TestHarness::new("rerun", vec![2020]);
    let power = regional_spec("power", vec!["UK"], "GWh");
    let spec = power.clone();
    harness.add_model(
        sector_model("gen", vec![], vec![power.clone()]),
        move |data: &mut DataHandle| {
            data.set_results("power", &DataArray::new(spec.clone(), vec![42.0])?)?;
            Ok(())
        },
    );

    harness.run().unwrap();
    let first = harness.results("gen", &power, 2020, 0).unwrap();
    harness.run().unwrap();
    let second = harness.results("gen", &power, 2020, 0).unwrap();

    assert_eq!(first, second);
    assert_eq!(harness.store().available_results("rerun").unwrap().len(), 1);
}

/// Partial-failure containment: a failing model skips its descendants and
/// nothing else; completed results stay readable.
#[test]
fn test_partial_failure_containment() {
    let mut harness = TestHarness::new("contain", vec![2020]);
    let power = regional_spec("power", vec!["UK"], "GWh");

    harness.add_model(
        sector_model("alpha", vec![], vec![power.clone()]),
        |_data: &mut DataHandle| -> Result<(), ModelError> {
            Err(ModelError::simulation("alpha", "numerical blow-up"))
        },
    );

    let beta_out = regional_spec("echo", vec!["UK"], "GWh");
    let beta_spec = beta_out.clone();
    harness.add_model(
        sector_model("beta", vec![power.clone()], vec![beta_out.clone()]),
        move |data: &mut DataHandle| {
            let power = data.get_data("power")?;
            data.set_results(
                "echo",
                &DataArray::new(beta_spec.clone(), power.values().to_vec())?,
            )?;
            Ok(())
        },
    );

    let gamma_out = regional_spec("steady", vec!["UK"], "GWh");
    let gamma_spec = gamma_out.clone();
    harness.add_model(
        sector_model("gamma", vec![], vec![gamma_out.clone()]),
        move |data: &mut DataHandle| {
            data.set_results("steady", &DataArray::new(gamma_spec.clone(), vec![7.0])?)?;
            Ok(())
        },
    );
    harness.add_dependency("alpha", "power", "beta", "power", false);

    let report = harness.run().unwrap();
    assert_eq!(report.status, RunStatus::Failed);
    assert!(report
        .first_failure
        .as_deref()
        .unwrap()
        .contains("numerical blow-up"));

    let statuses: IndexMap<String, JobStatus> = harness
        .job_records(2020, 0)
        .into_iter()
        .map(|r| (r.model.clone(), r.status))
        .collect();
    assert_eq!(statuses["alpha"], JobStatus::Failed);
    assert_eq!(statuses["beta"], JobStatus::Skipped);
    assert_eq!(statuses["gamma"], JobStatus::Done);

    let steady = harness.results("gamma", &gamma_out, 2020, 0).unwrap();
    assert_eq!(steady.values(), &[7.0]);
}

/// A cancelled run aborts between jobs with statuses flushed.
#[test]
fn test_cancellation_between_jobs() {
    let mut harness = TestHarness::new("cancel", vec![2020]);
    let power = regional_spec("power", vec!["UK"], "GWh");
    let spec = power.clone();
    harness.add_model(
        sector_model("gen", vec![], vec![power.clone()]),
        move |data: &mut DataHandle| {
            data.set_results("power", &DataArray::new(spec.clone(), vec![1.0])?)?;
            Ok(())
        },
    );

    let cancel = smif_runtime::CancelToken::new();
    cancel.cancel();
    let result = harness.run_with_cancel(&cancel);
    assert!(matches!(
        result,
        Err(smif_runtime::Error::Cancelled { timestep: 2020 })
    ));
}

/// Warm start re-runs only from the latest persisted timestep.
#[test]
fn test_warm_start_resumes() {
    let invocations = Arc::new(AtomicUsize::new(0));

    let power = regional_spec("power", vec!["UK"], "GWh");
    let mut harness = TestHarness::new("warm", vec![2020, 2025]);
    let spec = power.clone();
    let counter = invocations.clone();
    harness.add_model(
        sector_model("gen", vec![], vec![power.clone()]),
        move |data: &mut DataHandle| {
            counter.fetch_add(1, Ordering::SeqCst);
            data.set_results("power", &DataArray::new(spec.clone(), vec![3.0])?)?;
            Ok(())
        },
    );

    harness.run().unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 2);

    // Resume: only the recovered (latest) timestep re-runs
    let harness = harness.with_resume(true);
    harness.run().unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
}

/// Rule-based planning: committed decisions carry forward and strategies
/// join as their build year arrives.
#[test]
fn test_rule_based_state_accumulates() {
    let mut harness = TestHarness::new("rules", vec![2020, 2025])
        .with_decision_module(DecisionModuleConfig::RuleBased)
        .with_strategies(vec![StrategyConfig {
            strategy_type: "build".to_string(),
            model_name: "water".to_string(),
            interventions: vec![
                Decision::new("pump_a", 2020),
                Decision::new("pump_b", 2025),
            ],
        }]);

    let built = regional_spec("built", vec!["UK"], "-");
    let spec = built.clone();
    harness.add_model(
        sector_model("water", vec![], vec![built.clone()]),
        move |data: &mut DataHandle| {
            let active = data.get_state()?.len() as f64;
            data.set_results("built", &DataArray::new(spec.clone(), vec![active])?)?;
            Ok(())
        },
    );

    harness.run().unwrap();
    assert_eq!(
        harness.results("water", &built, 2020, 0).unwrap().values(),
        &[1.0]
    );
    assert_eq!(
        harness.results("water", &built, 2025, 0).unwrap().values(),
        &[2.0]
    );
}

/// Narrative overrides replace parameter defaults for the models they name.
#[test]
fn test_narrative_parameter_override() {
    let mut harness = TestHarness::new("story", vec![2020]);

    let rate = Spec::scalar("efficiency_gain", "-");
    let mut config = sector_model("energy_demand", vec![], vec![]);
    config.parameters = vec![rate.clone()];
    config.outputs = vec![regional_spec("demand", vec!["UK"], "GWh")];

    let out = regional_spec("demand", vec!["UK"], "GWh");
    let out_spec = out.clone();
    harness.add_model(config, move |data: &mut DataHandle| {
        let gain = data.get_parameter("efficiency_gain")?.as_scalar().unwrap();
        data.set_results(
            "demand",
            &DataArray::new(out_spec.clone(), vec![100.0 * (1.0 - gain)])?,
        )?;
        Ok(())
    });

    harness.seed_parameter_default(
        "energy_demand",
        &DataArray::scalar(rate.clone(), 0.05).unwrap(),
    );
    harness
        .store()
        .write_narrative_variant_data(
            "technology",
            "high_tech",
            &DataArray::scalar(rate.clone(), 0.25).unwrap(),
        )
        .unwrap();
    harness.add_narrative(
        NarrativeConfig {
            name: "technology".to_string(),
            description: String::new(),
            provides: IndexMap::from([(
                "energy_demand".to_string(),
                vec!["efficiency_gain".to_string()],
            )]),
            variants: vec![NarrativeVariantConfig {
                name: "high_tech".to_string(),
                description: String::new(),
                data: IndexMap::new(),
            }],
        },
        vec!["high_tech"],
    );

    harness.run().unwrap();
    let demand = harness.results("energy_demand", &out, 2020, 0).unwrap();
    assert_eq!(demand.values(), &[75.0]);
}

/// Interval adaptation between a seasonal producer and an annual consumer.
#[test]
fn test_interval_aggregation() {
    let mut harness = TestHarness::new("seasons", vec![2020]);
    harness
        .convert_mut()
        .intervals
        .register(IntervalSet::annual("annual", "annual"));
    harness.convert_mut().intervals.register(IntervalSet::new(
        "seasons",
        vec![
            Interval::new("winter", 8016, 1416),
            Interval::new("spring", 1416, 3624),
            Interval::new("summer", 3624, 5832),
            Interval::new("autumn", 5832, 8016),
        ],
    ));

    let seasonal = Spec::new(
        "flow",
        vec![Coords::new(
            "interval",
            vec!["winter", "spring", "summer", "autumn"],
        )],
        DType::F64,
        "Ml",
    )
    .unwrap()
    .extensive(true);
    let annual = Spec::new(
        "flow",
        vec![Coords::new("interval", vec!["annual"])],
        DType::F64,
        "Ml",
    )
    .unwrap()
    .extensive(true);

    let rain_out = seasonal.clone();
    harness.add_model(
        sector_model("rainfall", vec![], vec![seasonal.clone()]),
        move |data: &mut DataHandle| {
            data.set_results(
                "flow",
                &DataArray::new(rain_out.clone(), vec![300.0, 200.0, 100.0, 250.0])?,
            )?;
            Ok(())
        },
    );

    let total = Spec::new(
        "yearly",
        vec![Coords::new("interval", vec!["annual"])],
        DType::F64,
        "Ml",
    )
    .unwrap()
    .extensive(true);
    let sink_out = total.clone();
    harness.add_model(
        sector_model("reservoir", vec![annual.clone()], vec![total.clone()]),
        move |data: &mut DataHandle| {
            let inflow = data.get_data("flow")?;
            data.set_results(
                "yearly",
                &DataArray::new(sink_out.clone(), inflow.values().to_vec())?,
            )?;
            Ok(())
        },
    );
    harness.add_dependency("rainfall", "flow", "reservoir", "flow", false);

    harness.run().unwrap();
    let yearly = harness.results("reservoir", &total, 2020, 0).unwrap();
    assert!((yearly.values()[0] - 850.0).abs() < 1e-9);
}

/// Missing scenario data fails the consuming job, not the whole process.
#[test]
fn test_missing_data_fails_job() {
    let mut harness = TestHarness::new("missing", vec![2020]);

    let population = regional_spec("population", vec!["UK"], "people");
    // Scenario declared but no data written for 2020
    harness.add_scenario("population", "central", vec![population.clone()], vec![]);

    let power = regional_spec("power", vec!["UK"], "GWh");
    let spec = power.clone();
    harness.add_model(
        sector_model("gen", vec![population.clone()], vec![power.clone()]),
        move |data: &mut DataHandle| {
            let people = data.get_data("population")?;
            data.set_results(
                "power",
                &DataArray::new(spec.clone(), vec![people.as_scalar().unwrap_or(0.0)])?,
            )?;
            Ok(())
        },
    );
    harness.add_dependency("population", "population", "gen", "population", false);

    let report = harness.run().unwrap();
    assert_eq!(report.status, RunStatus::Failed);

    let statuses: IndexMap<String, JobStatus> = harness
        .job_records(2020, 0)
        .into_iter()
        .map(|r| (r.model.clone(), r.status))
        .collect();
    // The scenario copy-through itself hits the missing key
    assert_eq!(statuses["population"], JobStatus::Failed);
    assert_eq!(statuses["gen"], JobStatus::Skipped);
}
