//! End-to-end: simulate -> sample -> diagnose -> forecast -> optimize -> compare.

use dc_core::CostScenario;
use dc_core::traits::LogDensityModel;
use dc_inference::{
    CancelToken, ComponentValues, HierarchicalDemandModel, NutsConfig, PosteriorPredictiveEngine,
    QualityGates, Seasonality, SimulationTruth, Trace, compare, diagnose, optimal_quantity,
    quality_summary, sample_nuts_multichain, simulate_observations,
};
use dc_inference::inventory::optimal_quantity_for;

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn tmp_path(filename: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("demandcast_it_{}_{}_{}", std::process::id(), nanos, filename));
    p
}

fn truth() -> SimulationTruth {
    SimulationTruth {
        noise_scale: 0.15,
        categories: vec![
            ComponentValues { level: 120.0, trend: 0.05, weekly: 8.0, monthly: 0.0 },
            ComponentValues { level: 60.0, trend: 0.0, weekly: 4.0, monthly: 2.0 },
        ],
        seasonality: Seasonality::default(),
    }
}

fn names() -> Vec<String> {
    vec!["bread".to_string(), "milk".to_string()]
}

fn fit(seed: u64) -> (HierarchicalDemandModel, Trace) {
    let data = simulate_observations(&truth(), &names(), 120, 7).unwrap();
    let model = HierarchicalDemandModel::from_data(&data).unwrap();
    let config = NutsConfig { max_treedepth: 7, ..NutsConfig::default() };
    let trace = sample_nuts_multichain(&model, 2, 300, 250, seed, &config, &CancelToken::new()).unwrap();
    (model, trace)
}

#[test]
fn test_full_pipeline() {
    let (model, trace) = fit(42);
    assert_eq!(trace.n_chains(), 2);
    assert_eq!(trace.total_draws(), 500);

    let report = diagnose(&trace);
    assert_eq!(report.parameters.len(), model.layout().dim());
    assert!(report.max_rhat().is_finite());
    let quality = quality_summary(&report, &QualityGates::default());
    assert_eq!(quality.total_draws, 500);

    let forecast = PosteriorPredictiveEngine::new(&model).forecast(&trace, 60, 3).unwrap();
    assert_eq!(forecast.day(1), 120);
    let summaries = forecast.summaries();
    assert_eq!(summaries.len(), 120);
    for cat in forecast.categories() {
        let widths: Vec<f64> =
            summaries.iter().filter(|s| &s.category == cat).map(|s| s.width).collect();
        assert!(widths.windows(2).all(|w| w[1] >= w[0]), "{} widths: {:?}", cat, widths);
    }

    // bread sells roughly twice as much as milk.
    let bread = summaries.iter().find(|s| s.category == "bread" && s.step == 1).unwrap();
    let milk = summaries.iter().find(|s| s.category == "milk" && s.step == 1).unwrap();
    assert!(bread.mean > milk.mean * 1.4, "bread {} vs milk {}", bread.mean, milk.mean);

    let cost = CostScenario::new(2.0, 5.0).unwrap();
    let day1 = forecast.samples(1, 0).unwrap().iter().map(|&v| v as f64).collect::<Vec<_>>();
    let q1 = optimal_quantity(&day1, &cost).unwrap();
    assert!(q1.quantity >= bread.q50 - 1e-9);

    let week = optimal_quantity_for(&forecast, "bread", 1..=7, &cost).unwrap();
    assert_eq!(week.category.as_deref(), Some("bread"));
    assert!(week.quantity > 5.0 * q1.quantity, "{} vs {}", week.quantity, q1.quantity);

    let cmp = compare(&trace, model.layout(), "bread", "milk", "level").unwrap();
    assert!(cmp.prob_a_greater > 0.99, "{:?}", cmp);
    assert!((cmp.mean_difference - 60.0).abs() < 10.0, "{:?}", cmp);
    assert!(cmp.difference_ci.lower > 0.0);
}

#[test]
fn test_same_seed_is_bit_identical() {
    let (model, t1) = fit(11);
    let (_, t2) = fit(11);
    assert_eq!(t1, t2);

    let engine = PosteriorPredictiveEngine::new(&model);
    assert_eq!(engine.forecast(&t1, 10, 5).unwrap(), engine.forecast(&t2, 10, 5).unwrap());

    let (_, t3) = fit(12);
    assert_ne!(t1.chains[0].draws_constrained, t3.chains[0].draws_constrained);
}

#[test]
fn test_trace_json_roundtrip_preserves_order() {
    let (model, trace) = fit(5);
    let path = tmp_path("trace.json");
    trace.write_json(&path).unwrap();
    let back = Trace::read_json(&path).unwrap();
    let _ = std::fs::remove_file(&path);

    assert_eq!(back.param_names, model.parameter_names());
    for (a, b) in trace.chains.iter().zip(&back.chains) {
        assert_eq!(a.draws_constrained, b.draws_constrained);
        assert_eq!(a.divergences, b.divergences);
    }
    assert_eq!(back, trace);
}

#[test]
fn test_cancelled_run_returns_no_trace() {
    let data = simulate_observations(&truth(), &names(), 60, 1).unwrap();
    let model = HierarchicalDemandModel::from_data(&data).unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();
    let r = sample_nuts_multichain(&model, 2, 100, 100, 1, &NutsConfig::default(), &cancel);
    assert!(matches!(r, Err(dc_core::Error::Cancelled(_))));
}
