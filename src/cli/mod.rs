use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::{
    AllocationPlan, AllocationTarget, DomainPolicy, Engine, EngineConfig, EngineError,
    MarketScenario, Parallelism, ScenarioSet, SimulationParams, SimulationReport, TrialOrdering,
};

const DEFAULT_FUND_SIZE: f64 = 100_000_000.0;
const DEFAULT_HORIZON_YEARS: u32 = 10;
const DEFAULT_TRIALS: usize = 10_000;
const DEFAULT_SEED: u64 = 42;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliDomainPolicy {
    Reject,
    Exclude,
}

impl From<CliDomainPolicy> for DomainPolicy {
    fn from(value: CliDomainPolicy) -> Self {
        match value {
            CliDomainPolicy::Reject => DomainPolicy::Reject,
            CliDomainPolicy::Exclude => DomainPolicy::Exclude,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliTrialOrder {
    Scenario,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RequestPayload {
    fund_size: Option<f64>,
    horizon_years: Option<u32>,
    trial_count: Option<usize>,
    seed: Option<u64>,
    plan: Vec<AllocationTarget>,
    scenarios: Vec<MarketScenario>,
    engine: Option<EngineConfig>,
    temporal_order: Option<Vec<usize>>,
}

#[derive(Parser, Debug)]
#[command(
    name = "allocsim",
    about = "Monte Carlo fund-allocation simulator (scenario-weighted returns, risk metrics, allocation recommendation)"
)]
pub struct Cli {
    #[arg(long, help = "JSON request with plan, scenarios and optional engine settings")]
    input: PathBuf,
    #[arg(long, help = "Number of trials, overrides trialCount")]
    trials: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, help = "Committed capital, overrides fundSize")]
    fund_size: Option<f64>,
    #[arg(long)]
    horizon_years: Option<u32>,
    #[arg(long, help = "Annual risk-free rate in percent, e.g. 3")]
    risk_free_rate: Option<f64>,
    #[arg(long, help = "Multiple counted as meeting target, e.g. 2")]
    target_multiple: Option<f64>,
    #[arg(long, help = "Scaling from |sampled return| to volatility proxy")]
    volatility_scaling: Option<f64>,
    #[arg(long, help = "Worker threads; defaults to the global pool")]
    threads: Option<usize>,
    #[arg(long, default_value_t = false, conflicts_with = "threads")]
    sequential: bool,
    #[arg(long, help = "Stop after this many milliseconds")]
    timeout_ms: Option<u64>,
    #[arg(
        long,
        default_value_t = false,
        help = "On timeout, report the trials completed so far instead of failing"
    )]
    allow_partial: bool,
    #[arg(long, value_enum)]
    domain_policy: Option<CliDomainPolicy>,
    #[arg(long, value_enum, help = "Also compute the drawdown statistic in this order")]
    order: Option<CliTrialOrder>,
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

#[derive(Debug)]
struct Request {
    plan: AllocationPlan,
    scenarios: ScenarioSet,
    params: SimulationParams,
    config: EngineConfig,
    allow_partial: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse<'a> {
    fund_size: f64,
    horizon_years: u32,
    degraded: bool,
    report: &'a SimulationReport,
}

/// Reads the request file, runs the engine and returns the JSON response.
pub fn run(cli: Cli) -> Result<String, String> {
    let raw = fs::read_to_string(&cli.input)
        .map_err(|e| format!("failed to read {}: {e}", cli.input.display()))?;
    let request = request_from_json(&raw, &cli)?;
    let (report, degraded) = execute(&request)?;

    let response = SimulateResponse {
        fund_size: request.params.fund_size,
        horizon_years: request.params.horizon_years,
        degraded,
        report: &report,
    };
    let json = if cli.pretty {
        serde_json::to_string_pretty(&response)
    } else {
        serde_json::to_string(&response)
    };
    json.map_err(|e| format!("failed to serialize report: {e}"))
}

fn execute(request: &Request) -> Result<(SimulationReport, bool), String> {
    let engine = Engine::new(request.config.clone());
    info!(
        categories = request.plan.len(),
        scenarios = request.scenarios.len(),
        trials = request.params.trial_count,
        seed = request.params.seed,
        "running allocation simulation"
    );

    match engine.simulate(&request.plan, &request.scenarios, &request.params, None) {
        Ok(report) => Ok((report, false)),
        Err(err @ EngineError::Timeout { .. }) if request.allow_partial => {
            warn!("{err}; building degraded report");
            let partial = err
                .into_partial()
                .ok_or_else(|| "timeout without partial results".to_string())?;
            engine
                .degraded_report(&request.plan, &request.scenarios, &request.params, &partial)
                .map(|report| (report, true))
                .map_err(|e| e.to_string())
        }
        Err(err) => Err(err.to_string()),
    }
}

fn request_from_json(json: &str, cli: &Cli) -> Result<Request, String> {
    let payload = serde_json::from_str::<RequestPayload>(json)
        .map_err(|e| format!("Invalid request JSON: {e}"))?;
    build_request(payload, cli)
}

fn build_request(payload: RequestPayload, cli: &Cli) -> Result<Request, String> {
    let mut config = payload.engine.unwrap_or_default();

    if let Some(v) = cli.risk_free_rate {
        config.risk_free_rate = v / 100.0;
    }
    if let Some(v) = cli.target_multiple {
        config.target_multiple = v;
    }
    if let Some(v) = cli.volatility_scaling {
        config.volatility_scaling = v;
    }
    if let Some(v) = cli.domain_policy {
        config.domain_policy = v.into();
    }
    if let Some(n) = cli.threads {
        config.parallelism = Parallelism::Threads(n);
    }
    if cli.sequential {
        config.parallelism = Parallelism::Sequential;
    }
    if let Some(ms) = cli.timeout_ms {
        config.time_budget = Some(Duration::from_millis(ms));
    }

    let fund_size = cli
        .fund_size
        .or(payload.fund_size)
        .unwrap_or(DEFAULT_FUND_SIZE);
    let horizon_years = cli
        .horizon_years
        .or(payload.horizon_years)
        .unwrap_or(DEFAULT_HORIZON_YEARS);
    let trial_count = cli.trials.or(payload.trial_count).unwrap_or(DEFAULT_TRIALS);
    let seed = cli.seed.or(payload.seed).unwrap_or(DEFAULT_SEED);

    if !fund_size.is_finite() || fund_size <= 0.0 {
        return Err("--fund-size must be > 0".to_string());
    }

    if horizon_years == 0 {
        return Err("--horizon-years must be > 0".to_string());
    }

    if trial_count == 0 {
        return Err("--trials must be > 0".to_string());
    }

    if cli.threads == Some(0) {
        return Err("--threads must be > 0".to_string());
    }

    if let Some(v) = cli.risk_free_rate {
        if !v.is_finite() || v <= -100.0 {
            return Err("--risk-free-rate must be > -100".to_string());
        }
    }

    if let Some(v) = cli.target_multiple {
        if !v.is_finite() || v <= 0.0 {
            return Err("--target-multiple must be > 0".to_string());
        }
    }

    if let Some(v) = cli.volatility_scaling {
        if !v.is_finite() || v <= 0.0 {
            return Err("--volatility-scaling must be > 0".to_string());
        }
    }

    if payload.temporal_order.is_some() && cli.order.is_some() {
        return Err("--order cannot be combined with temporalOrder in the request".to_string());
    }

    config.validate()?;

    let temporal_order = match (payload.temporal_order, cli.order) {
        (Some(order), _) => Some(TrialOrdering::Explicit(order)),
        (None, Some(CliTrialOrder::Scenario)) => Some(TrialOrdering::Scenario),
        (None, None) => None,
    };

    Ok(Request {
        plan: AllocationPlan::new(payload.plan),
        scenarios: ScenarioSet::new(payload.scenarios),
        params: SimulationParams {
            fund_size,
            horizon_years,
            trial_count,
            seed,
            temporal_order,
        },
        config,
        allow_partial: cli.allow_partial,
    })
}
