use std::collections::HashSet;

use tracing::debug;

use super::breakdown::scenario_breakdown;
use super::config::EngineConfig;
use super::error::{EngineError, PartialRun};
use super::risk::RiskMetrics;
use super::runner::{CancellationToken, SimulationRunner};
use super::selector::select_recommendation;
use super::stats::{Aggregator, confidence_intervals};
use super::types::{
    AllocationPlan, ExcludedTrial, ScenarioSet, SimulationParams, SimulationReport, TrialOutcome,
};

const PERCENT_SUM_SLACK: f64 = 1e-9;

/// Stateless simulation engine. Holds only configuration; every run takes its
/// inputs explicitly.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn simulate(
        &self,
        plan: &AllocationPlan,
        scenarios: &ScenarioSet,
        params: &SimulationParams,
        cancel: Option<&CancellationToken>,
    ) -> Result<SimulationReport, EngineError> {
        self.config.validate().map_err(EngineError::InvalidParameter)?;
        validate_params(params)?;
        validate_plan(plan)?;
        validate_scenarios(scenarios, plan, self.config.probability_tolerance)?;

        let runner = SimulationRunner::new(
            plan,
            scenarios,
            params.fund_size,
            params.horizon_years,
            &self.config,
        );
        let output = runner.run(params.trial_count, params.seed, cancel)?;

        self.build_report(
            plan,
            scenarios,
            params,
            params.trial_count,
            &output.outcomes,
            output.excluded,
        )
    }

    /// Builds a report from the trials a cancelled or timed-out run completed.
    /// Statistics cover only those trials; `trial_count_requested` keeps the
    /// requested count so the shortfall stays visible.
    pub fn degraded_report(
        &self,
        plan: &AllocationPlan,
        scenarios: &ScenarioSet,
        params: &SimulationParams,
        partial: &PartialRun,
    ) -> Result<SimulationReport, EngineError> {
        debug!(
            completed = partial.completed.len(),
            excluded = partial.excluded.len(),
            requested = partial.requested,
            "building degraded report from partial run"
        );
        self.build_report(
            plan,
            scenarios,
            params,
            partial.requested,
            &partial.completed,
            partial.excluded.clone(),
        )
    }

    fn build_report(
        &self,
        plan: &AllocationPlan,
        scenarios: &ScenarioSet,
        params: &SimulationParams,
        requested: usize,
        outcomes: &[TrialOutcome],
        excluded: Vec<ExcludedTrial>,
    ) -> Result<SimulationReport, EngineError> {
        let aggregator = Aggregator::from_config(&self.config);
        let no_trials = || EngineError::NoValidTrials {
            excluded: excluded.len(),
        };

        let aggregate_stats = aggregator.aggregate(outcomes).ok_or_else(no_trials)?;
        let confidence_intervals = confidence_intervals(outcomes).ok_or_else(no_trials)?;
        let recommendation = select_recommendation(outcomes, plan).ok_or_else(no_trials)?;
        let risk_metrics = RiskMetrics::from_config(&self.config)
            .compute(outcomes, params.temporal_order.as_ref())?;
        let scenario_breakdown = scenario_breakdown(outcomes, scenarios, &aggregator);

        Ok(SimulationReport {
            aggregate_stats,
            confidence_intervals,
            risk_metrics,
            scenario_breakdown,
            recommendation,
            trial_count_requested: requested,
            trial_count_used: outcomes.len(),
            seed_used: params.seed,
            committed_percentage: plan.committed_percentage(),
            excluded_trials: excluded,
        })
    }
}

/// Free-function form of [`Engine::simulate`] with default configuration
/// apart from the risk-free rate.
pub fn simulate(
    plan: &AllocationPlan,
    scenarios: &ScenarioSet,
    params: &SimulationParams,
    risk_free_rate: f64,
    cancel: Option<&CancellationToken>,
) -> Result<SimulationReport, EngineError> {
    let config = EngineConfig {
        risk_free_rate,
        ..EngineConfig::default()
    };
    Engine::new(config).simulate(plan, scenarios, params, cancel)
}

fn validate_params(params: &SimulationParams) -> Result<(), EngineError> {
    if !params.fund_size.is_finite() || params.fund_size <= 0.0 {
        return Err(EngineError::InvalidParameter(
            "fund size must be > 0".to_string(),
        ));
    }
    if params.horizon_years == 0 {
        return Err(EngineError::InvalidParameter(
            "horizon must be at least 1 year".to_string(),
        ));
    }
    if i32::try_from(params.horizon_years).is_err() {
        return Err(EngineError::InvalidParameter(format!(
            "horizon of {} years is too large",
            params.horizon_years
        )));
    }
    if params.trial_count == 0 {
        return Err(EngineError::InvalidParameter(
            "trial count must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_plan(plan: &AllocationPlan) -> Result<(), EngineError> {
    if plan.is_empty() {
        return Err(EngineError::EmptyPlan);
    }

    let mut keys = HashSet::new();
    for target in plan.iter() {
        let key = &target.category_key;
        if !keys.insert(key.as_str()) {
            return Err(EngineError::InvalidPlan(format!(
                "category `{key}` appears more than once"
            )));
        }
        for (name, value) in [
            ("target", target.target_percentage),
            ("minimum", target.minimum_percentage),
            ("maximum", target.maximum_percentage),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(EngineError::InvalidPlan(format!(
                    "category `{key}` {name} percentage {value} must be between 0 and 100"
                )));
            }
        }
        if target.target_percentage < target.minimum_percentage
            || target.target_percentage > target.maximum_percentage
        {
            return Err(EngineError::InvalidPlan(format!(
                "category `{key}` target {} is outside [{}, {}]",
                target.target_percentage, target.minimum_percentage, target.maximum_percentage
            )));
        }
    }

    let committed = plan.committed_percentage();
    if committed > 100.0 + PERCENT_SUM_SLACK {
        return Err(EngineError::InvalidPlan(format!(
            "target percentages sum to {committed}, more than 100"
        )));
    }
    Ok(())
}

fn validate_scenarios(
    scenarios: &ScenarioSet,
    plan: &AllocationPlan,
    tolerance: f64,
) -> Result<(), EngineError> {
    if scenarios.is_empty() {
        return Err(EngineError::EmptyScenarioSet);
    }

    let mut ids = HashSet::new();
    for scenario in scenarios.iter() {
        let id = &scenario.scenario_id;
        if !ids.insert(id.as_str()) {
            return Err(EngineError::InvalidScenario(format!(
                "scenario `{id}` appears more than once"
            )));
        }
        if !(0.0..=1.0).contains(&scenario.probability) {
            return Err(EngineError::InvalidScenario(format!(
                "scenario `{id}` probability {} must be between 0 and 1",
                scenario.probability
            )));
        }
        for target in plan.iter() {
            let key = &target.category_key;
            let Some((mean, vol)) = scenario.return_params(key) else {
                return Err(EngineError::MissingScenarioData {
                    scenario_id: id.clone(),
                    category_key: key.clone(),
                });
            };
            if !mean.is_finite() {
                return Err(EngineError::InvalidScenario(format!(
                    "scenario `{id}` expected return for `{key}` must be finite"
                )));
            }
            if !vol.is_finite() || vol < 0.0 {
                return Err(EngineError::InvalidScenario(format!(
                    "scenario `{id}` volatility for `{key}` must be >= 0"
                )));
            }
        }
    }

    let sum = scenarios.total_probability();
    if (sum - 1.0).abs() > tolerance {
        return Err(EngineError::InvalidProbability { sum, tolerance });
    }
    Ok(())
}
