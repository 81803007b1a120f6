//! demandcast CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use dc_core::{CostScenario, ObservationSet};
use dc_inference::hypothesis::{compare_all, compare_at};
use dc_inference::inventory::{linspace, optimal_quantity_for};
use dc_inference::{
    BootstrapOptions, CancelToken, CiMethod, ForecastDistribution, HierarchicalDemandModel,
    PosteriorPredictiveEngine, QualityGates, RunConfig, SimulationTruth, Trace,
    bootstrap_inventory, quality_summary, sample_nuts_multichain, sensitivity_surface,
    simulate_observations,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "demandcast")]
#[command(about = "demandcast - Bayesian demand forecasting and inventory decisions")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate synthetic observations from known parameters
    Simulate {
        /// Simulation input: `{"categories": [...], "truth": {...}}`
        #[arg(short, long)]
        input: PathBuf,

        /// Days to generate
        #[arg(long, default_value = "365")]
        days: u32,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Output file for observations (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fit the hierarchical model with NUTS and write the trace
    Sample {
        /// Observations (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Run configuration (JSON); flags override its fields.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of chains
        #[arg(long)]
        chains: Option<usize>,

        /// Post-warmup draws per chain
        #[arg(long)]
        draws: Option<usize>,

        /// Warm-up iterations per chain
        #[arg(long)]
        warmup: Option<usize>,

        /// Dual-averaging target acceptance
        #[arg(long)]
        target_accept: Option<f64>,

        /// Base seed
        #[arg(long)]
        seed: Option<u64>,

        /// Abort sampling after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Output file for the trace (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto).
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Convergence diagnostics and quality gates for a trace
    Diagnose {
        /// Trace (JSON)
        #[arg(short, long)]
        trace: PathBuf,

        /// Quality gate overrides (JSON)
        #[arg(long)]
        gates: Option<PathBuf>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Posterior-predictive forecast summaries
    Forecast {
        /// Observations (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Trace (JSON)
        #[arg(short, long)]
        trace: PathBuf,

        /// Run configuration (JSON) the trace was sampled with
        #[arg(long)]
        config: Option<PathBuf>,

        /// Forecast horizon in days
        #[arg(long)]
        horizon: Option<u32>,

        /// Forecast seed
        #[arg(long)]
        seed: Option<u64>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto).
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Newsvendor order quantity from the forecast of one category
    Optimize {
        /// Observations (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Trace (JSON)
        #[arg(short, long)]
        trace: PathBuf,

        /// Run configuration (JSON) the trace was sampled with
        #[arg(long)]
        config: Option<PathBuf>,

        /// Category to order for
        #[arg(long)]
        category: String,

        /// Holding cost per leftover unit
        #[arg(long)]
        holding_cost: f64,

        /// Stockout penalty per unmet unit
        #[arg(long)]
        stockout_penalty: f64,

        /// Days of demand the order must cover
        #[arg(long, default_value = "1")]
        lead_time: u32,

        /// Forecast seed
        #[arg(long)]
        seed: Option<u64>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto).
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Optimal quantity and cost over a grid of holding costs and stockout penalties
    Sensitivity {
        /// Observations (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Trace (JSON)
        #[arg(short, long)]
        trace: PathBuf,

        /// Run configuration (JSON) the trace was sampled with
        #[arg(long)]
        config: Option<PathBuf>,

        /// Category to order for
        #[arg(long)]
        category: String,

        /// Days of demand the order must cover
        #[arg(long, default_value = "1")]
        lead_time: u32,

        /// Holding-cost axis start
        #[arg(long, default_value = "0.5")]
        h_min: f64,

        /// Holding-cost axis stop
        #[arg(long, default_value = "5.0")]
        h_max: f64,

        /// Holding-cost axis points (inclusive)
        #[arg(long, default_value = "10")]
        h_points: usize,

        /// Stockout-penalty axis start
        #[arg(long, default_value = "1.0")]
        p_min: f64,

        /// Stockout-penalty axis stop
        #[arg(long, default_value = "10.0")]
        p_max: f64,

        /// Stockout-penalty axis points (inclusive)
        #[arg(long, default_value = "10")]
        p_points: usize,

        /// Forecast seed
        #[arg(long)]
        seed: Option<u64>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto).
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Bootstrap intervals for mean demand and Q* from historical demand
    Bootstrap {
        /// Observations (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Category whose history is resampled
        #[arg(long)]
        category: String,

        /// Holding cost per leftover unit
        #[arg(long)]
        holding_cost: f64,

        /// Stockout penalty per unmet unit
        #[arg(long)]
        stockout_penalty: f64,

        /// Number of resamples (>= 1000)
        #[arg(long, default_value = "1000")]
        resamples: usize,

        /// Interval coverage
        #[arg(long, default_value = "0.95")]
        conf_level: f64,

        /// Interval method: percentile or bca
        #[arg(long, default_value = "percentile")]
        method: String,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Posterior comparison of a parameter between categories
    Compare {
        /// Observations (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Trace (JSON)
        #[arg(short, long)]
        trace: PathBuf,

        /// Run configuration (JSON) the trace was sampled with
        #[arg(long)]
        config: Option<PathBuf>,

        /// First category. Omit together with `--b` to compare every pair.
        #[arg(long, requires = "b")]
        a: Option<String>,

        /// Second category
        #[arg(long, requires = "a")]
        b: Option<String>,

        /// Parameter (level, trend, weekly, monthly or z_<component>)
        #[arg(long, default_value = "level")]
        parameter: String,

        /// Credible level of the difference interval
        #[arg(long, default_value = "0.95")]
        credible_level: f64,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate { input, days, seed, output } => {
            cmd_simulate(&input, days, seed, output.as_ref())
        }
        Commands::Sample {
            input,
            config,
            chains,
            draws,
            warmup,
            target_accept,
            seed,
            timeout_secs,
            output,
            threads,
        } => {
            let mut cfg = load_config(config.as_ref())?;
            if let Some(v) = chains {
                cfg.chains = v;
            }
            if let Some(v) = draws {
                cfg.draws = v;
            }
            if let Some(v) = warmup {
                cfg.warmup = v;
            }
            if let Some(v) = target_accept {
                cfg.target_accept = v;
            }
            if let Some(v) = seed {
                cfg.seed = v;
            }
            cmd_sample(&input, &cfg, timeout_secs, output.as_ref(), threads)
        }
        Commands::Diagnose { trace, gates, output } => {
            cmd_diagnose(&trace, gates.as_ref(), output.as_ref())
        }
        Commands::Forecast { input, trace, config, horizon, seed, output, threads } => {
            let mut cfg = load_config(config.as_ref())?;
            if let Some(v) = horizon {
                cfg.horizon = v;
            }
            if let Some(v) = seed {
                cfg.seed = v;
            }
            cmd_forecast(&input, &trace, &cfg, output.as_ref(), threads)
        }
        Commands::Optimize {
            input,
            trace,
            config,
            category,
            holding_cost,
            stockout_penalty,
            lead_time,
            seed,
            output,
            threads,
        } => {
            let mut cfg = load_config(config.as_ref())?;
            if let Some(v) = seed {
                cfg.seed = v;
            }
            let cost = CostScenario::new(holding_cost, stockout_penalty)?;
            cmd_optimize(&input, &trace, &cfg, &category, &cost, lead_time, output.as_ref(), threads)
        }
        Commands::Sensitivity {
            input,
            trace,
            config,
            category,
            lead_time,
            h_min,
            h_max,
            h_points,
            p_min,
            p_max,
            p_points,
            seed,
            output,
            threads,
        } => {
            let mut cfg = load_config(config.as_ref())?;
            if let Some(v) = seed {
                cfg.seed = v;
            }
            let h_axis = linspace(h_min, h_max, h_points);
            let p_axis = linspace(p_min, p_max, p_points);
            cmd_sensitivity(&input, &trace, &cfg, &category, lead_time, &h_axis, &p_axis, output.as_ref(), threads)
        }
        Commands::Bootstrap {
            input,
            category,
            holding_cost,
            stockout_penalty,
            resamples,
            conf_level,
            method,
            seed,
            output,
        } => {
            let cost = CostScenario::new(holding_cost, stockout_penalty)?;
            let options =
                BootstrapOptions { n_resamples: resamples, conf_level, method: parse_method(&method)?, seed };
            cmd_bootstrap(&input, &category, &cost, &options, output.as_ref())
        }
        Commands::Compare { input, trace, config, a, b, parameter, credible_level, output } => {
            let cfg = load_config(config.as_ref())?;
            let pair = a.zip(b);
            cmd_compare(&input, &trace, &cfg, pair, &parameter, credible_level, output.as_ref())
        }
        Commands::Version => {
            println!("demandcast {}", dc_core::VERSION);
            Ok(())
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SimulateInput {
    categories: Vec<String>,
    truth: SimulationTruth,
}

fn cmd_simulate(input: &PathBuf, days: u32, seed: u64, output: Option<&PathBuf>) -> Result<()> {
    let json = std::fs::read_to_string(input)?;
    let sim: SimulateInput = serde_json::from_str(&json)?;
    let data = simulate_observations(&sim.truth, &sim.categories, days, seed)?;
    tracing::info!(categories = data.n_categories(), days, seed, "observations simulated");
    write_json(output, serde_json::to_value(&data)?)
}

fn cmd_sample(
    input: &PathBuf,
    cfg: &RunConfig,
    timeout_secs: Option<u64>,
    output: Option<&PathBuf>,
    threads: usize,
) -> Result<()> {
    cfg.validate()?;
    setup_threads(threads);
    let data = load_observations(input)?;
    let model = cfg.build_model(&data)?;

    let cancel = match timeout_secs {
        Some(s) => CancelToken::with_timeout(Duration::from_secs(s)),
        None => CancelToken::new(),
    };
    let trace = sample_nuts_multichain(
        &model,
        cfg.chains,
        cfg.warmup,
        cfg.draws,
        cfg.seed,
        &cfg.nuts_config(),
        &cancel,
    )?;
    let n_divergent: usize = trace.chains.iter().map(|c| c.n_divergent()).sum();
    tracing::info!(
        chains = cfg.chains,
        draws = trace.total_draws(),
        divergent = n_divergent,
        "sampling complete"
    );
    write_json(output, serde_json::to_value(&trace)?)
}

fn cmd_diagnose(trace: &PathBuf, gates: Option<&PathBuf>, output: Option<&PathBuf>) -> Result<()> {
    let trace = load_trace(trace)?;
    let gates: QualityGates = match gates {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => QualityGates::default(),
    };
    let report = dc_inference::diagnostics::diagnose_with(&trace, &gates);
    let quality = quality_summary(&report, &gates);
    tracing::info!(
        status = %quality.status,
        max_rhat = quality.max_rhat,
        min_ess_bulk = quality.min_ess_bulk,
        "diagnostics complete"
    );

    let output_json = serde_json::json!({
        "summary": trace.summary(),
        "diagnostics": report,
        "quality": quality,
    });
    write_json(output, output_json)
}

fn cmd_forecast(
    input: &PathBuf,
    trace: &PathBuf,
    cfg: &RunConfig,
    output: Option<&PathBuf>,
    threads: usize,
) -> Result<()> {
    setup_threads(threads);
    let forecast = load_forecast(input, trace, cfg, cfg.horizon)?;

    let output_json = serde_json::json!({
        "horizon": forecast.horizon(),
        "n_draws": forecast.n_draws(),
        "seed": forecast.seed(),
        "categories": forecast.categories(),
        "summaries": forecast.summaries(),
    });
    write_json(output, output_json)
}

#[allow(clippy::too_many_arguments)]
fn cmd_optimize(
    input: &PathBuf,
    trace: &PathBuf,
    cfg: &RunConfig,
    category: &str,
    cost: &CostScenario,
    lead_time: u32,
    output: Option<&PathBuf>,
    threads: usize,
) -> Result<()> {
    setup_threads(threads);
    let forecast = load_forecast(input, trace, cfg, lead_time)?;
    let decision = optimal_quantity_for(&forecast, category, 1..=lead_time, cost)?;
    tracing::info!(
        category,
        quantity = decision.quantity,
        expected_cost = decision.expected_cost,
        "order quantity computed"
    );
    write_json(output, serde_json::to_value(&decision)?)
}

#[allow(clippy::too_many_arguments)]
fn cmd_sensitivity(
    input: &PathBuf,
    trace: &PathBuf,
    cfg: &RunConfig,
    category: &str,
    lead_time: u32,
    h_axis: &[f64],
    p_axis: &[f64],
    output: Option<&PathBuf>,
    threads: usize,
) -> Result<()> {
    setup_threads(threads);
    let forecast = load_forecast(input, trace, cfg, lead_time)?;
    let c = forecast.category_index(category)?;
    let demand = forecast.aggregate(c, 1..=lead_time)?;
    let surface = sensitivity_surface(&demand, h_axis, p_axis)?;
    tracing::info!(category, cells = h_axis.len() * p_axis.len(), "sensitivity surface computed");

    let output_json = serde_json::json!({
        "category": category,
        "lead_time": lead_time,
        "surface": surface,
    });
    write_json(output, output_json)
}

fn cmd_bootstrap(
    input: &PathBuf,
    category: &str,
    cost: &CostScenario,
    options: &BootstrapOptions,
    output: Option<&PathBuf>,
) -> Result<()> {
    let data = load_observations(input)?;
    let c = data
        .category_index(category)
        .ok_or_else(|| anyhow::anyhow!("unknown category '{category}'"))?;
    let history: Vec<f64> = data.series(c).into_iter().map(|v| v as f64).collect();
    let report = bootstrap_inventory(&history, cost, options)?;
    tracing::info!(
        category,
        resamples = report.n_resamples,
        mean_lower = report.mean_demand.interval.lower,
        mean_upper = report.mean_demand.interval.upper,
        "bootstrap complete"
    );

    let mut output_json = serde_json::to_value(&report)?;
    output_json["category"] = serde_json::json!(category);
    write_json(output, output_json)
}

fn cmd_compare(
    input: &PathBuf,
    trace: &PathBuf,
    cfg: &RunConfig,
    pair: Option<(String, String)>,
    parameter: &str,
    credible_level: f64,
    output: Option<&PathBuf>,
) -> Result<()> {
    let (model, trace) = load_fit(input, trace, cfg)?;
    let comparisons = match pair {
        Some((a, b)) => vec![compare_at(&trace, model.layout(), &a, &b, parameter, credible_level)?],
        None => compare_all(&trace, model.layout(), parameter, credible_level)?,
    };
    tracing::info!(parameter, comparisons = comparisons.len(), "comparisons complete");
    write_json(output, serde_json::json!({ "comparisons": comparisons }))
}

fn setup_threads(threads: usize) {
    if threads == 0 {
        return;
    }
    if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global() {
        tracing::warn!(threads, error = %e, "could not size the rayon pool; keeping the existing one");
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<RunConfig> {
    match path {
        Some(p) => {
            tracing::info!(path = %p.display(), "loading config");
            Ok(RunConfig::from_json_file(p)?)
        }
        None => Ok(RunConfig::default()),
    }
}

fn load_observations(input: &PathBuf) -> Result<ObservationSet> {
    tracing::info!(path = %input.display(), "loading observations");
    let json = std::fs::read_to_string(input)?;
    let data: ObservationSet = serde_json::from_str(&json)?;
    tracing::info!(
        categories = data.n_categories(),
        days = data.n_days(),
        "observations loaded"
    );
    Ok(data)
}

fn load_trace(path: &PathBuf) -> Result<Trace> {
    tracing::info!(path = %path.display(), "loading trace");
    Ok(Trace::read_json(path)?)
}

fn load_fit(input: &PathBuf, trace: &PathBuf, cfg: &RunConfig) -> Result<(HierarchicalDemandModel, Trace)> {
    let data = load_observations(input)?;
    let model = cfg.build_model(&data)?;
    let trace = load_trace(trace)?;
    Ok((model, trace))
}

fn load_forecast(
    input: &PathBuf,
    trace: &PathBuf,
    cfg: &RunConfig,
    horizon: u32,
) -> Result<ForecastDistribution> {
    let (model, trace) = load_fit(input, trace, cfg)?;
    let forecast = PosteriorPredictiveEngine::new(&model).forecast(&trace, horizon, cfg.seed)?;
    tracing::info!(horizon, draws = forecast.n_draws(), "forecast complete");
    Ok(forecast)
}

fn parse_method(s: &str) -> Result<CiMethod> {
    match s {
        "percentile" => Ok(CiMethod::Percentile),
        "bca" => Ok(CiMethod::Bca),
        other => anyhow::bail!("unknown interval method '{other}' (expected percentile or bca)"),
    }
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
