use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationTarget {
    pub category_key: String,
    pub target_percentage: f64,
    pub minimum_percentage: f64,
    pub maximum_percentage: f64,
    #[serde(default)]
    pub target_amount: Option<f64>,
    #[serde(default)]
    pub deployed_amount: Option<f64>,
    #[serde(default)]
    pub remaining_amount: Option<f64>,
}

impl AllocationTarget {
    /// A target pinned at `percentage` with bounds of exactly that value.
    pub fn fixed(category_key: impl Into<String>, percentage: f64) -> Self {
        Self {
            category_key: category_key.into(),
            target_percentage: percentage,
            minimum_percentage: percentage,
            maximum_percentage: percentage,
            target_amount: None,
            deployed_amount: None,
            remaining_amount: None,
        }
    }

    pub fn allocation_amount(&self, fund_size: f64) -> f64 {
        fund_size * self.target_percentage / 100.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationPlan {
    pub targets: Vec<AllocationTarget>,
}

impl AllocationPlan {
    pub fn new(targets: Vec<AllocationTarget>) -> Self {
        Self { targets }
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AllocationTarget> {
        self.targets.iter()
    }

    pub fn committed_percentage(&self) -> f64 {
        self.targets.iter().map(|t| t.target_percentage).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketScenario {
    pub scenario_id: String,
    pub name: String,
    pub probability: f64,
    pub expected_return: BTreeMap<String, f64>,
    pub volatility: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_impact: Option<serde_json::Value>,
}

impl MarketScenario {
    pub fn new(scenario_id: impl Into<String>, probability: f64) -> Self {
        let scenario_id = scenario_id.into();
        Self {
            name: scenario_id.clone(),
            scenario_id,
            probability,
            expected_return: BTreeMap::new(),
            volatility: BTreeMap::new(),
            deployment_impact: None,
        }
    }

    pub fn with_category(
        mut self,
        category_key: impl Into<String>,
        expected_return: f64,
        volatility: f64,
    ) -> Self {
        let key = category_key.into();
        self.expected_return.insert(key.clone(), expected_return);
        self.volatility.insert(key, volatility);
        self
    }

    pub fn return_params(&self, category_key: &str) -> Option<(f64, f64)> {
        let mean = self.expected_return.get(category_key)?;
        let vol = self.volatility.get(category_key)?;
        Some((*mean, *vol))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScenarioSet {
    pub scenarios: Vec<MarketScenario>,
}

impl ScenarioSet {
    pub fn new(scenarios: Vec<MarketScenario>) -> Self {
        Self { scenarios }
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MarketScenario> {
        self.scenarios.iter()
    }

    pub fn total_probability(&self) -> f64 {
        self.scenarios.iter().map(|s| s.probability).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryOutcome {
    pub category_key: String,
    pub allocation_amount: f64,
    pub sampled_return: f64,
    pub final_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialOutcome {
    pub trial_index: usize,
    pub scenario_index: usize,
    pub scenario_id: String,
    pub per_category: Vec<CategoryOutcome>,
    pub final_value: f64,
    pub multiple: f64,
    pub irr: f64,
    pub risk_adjusted_return: f64,
}

impl TrialOutcome {
    pub fn allocated_capital(&self) -> f64 {
        self.per_category.iter().map(|c| c.allocation_amount).sum()
    }

    pub fn category_return(&self, category_key: &str) -> Option<f64> {
        self.per_category
            .iter()
            .find(|c| c.category_key == category_key)
            .map(|c| c.sampled_return)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrialOrdering {
    /// Scenario declaration order, trial index within a scenario.
    Scenario,
    /// Caller-supplied permutation of trial indices.
    Explicit(Vec<usize>),
}

#[derive(Debug, Clone)]
pub struct SimulationParams {
    pub fund_size: f64,
    pub horizon_years: u32,
    pub trial_count: usize,
    pub seed: u64,
    pub temporal_order: Option<TrialOrdering>,
}

impl SimulationParams {
    pub fn new(fund_size: f64, horizon_years: u32, trial_count: usize, seed: u64) -> Self {
        Self {
            fund_size,
            horizon_years,
            trial_count,
            seed,
            temporal_order: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub trial_count: usize,
    pub mean_multiple: f64,
    pub median_multiple: f64,
    pub std_dev_multiple: f64,
    pub mean_irr: f64,
    pub median_irr: f64,
    pub std_dev_irr: f64,
    pub probability_positive: f64,
    pub probability_target_met: f64,
    pub target_multiple: f64,
    pub p5_multiple: f64,
    pub p95_multiple: f64,
    pub outperformer_fraction: f64,
    pub underperformer_fraction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricIntervals {
    pub ci90: Interval,
    pub ci95: Interval,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceIntervals {
    pub multiple: MetricIntervals,
    pub irr: MetricIntervals,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskReport {
    pub volatility: f64,
    pub downside_target: f64,
    pub downside_deviation: f64,
    pub probability_of_loss: f64,
    pub expected_shortfall_5: f64,
    pub risk_free_rate: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Peak-to-trough decline of `multiple` walked in trial-index order.
    /// Trials are independent draws, so this is a reporting artifact rather
    /// than a path drawdown.
    pub max_extremum: f64,
    /// Same statistic over a caller-supplied temporal ordering.
    pub ordered_max_extremum: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSlice {
    pub name: String,
    pub declared_probability: f64,
    pub trial_count: usize,
    pub observed_frequency: f64,
    pub stats: Option<AggregateStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryContribution {
    pub category_key: String,
    pub target_percentage: f64,
    pub allocation_amount: f64,
    pub sampled_return: f64,
    pub final_value: f64,
    pub share_of_final_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub method: &'static str,
    pub trial_index: usize,
    pub scenario_id: String,
    pub contributions: Vec<CategoryContribution>,
    pub final_value: f64,
    pub multiple: f64,
    pub irr: f64,
    pub risk_adjusted_return: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcludedTrial {
    pub trial_index: usize,
    pub scenario_id: String,
    pub multiple: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub aggregate_stats: AggregateStats,
    pub confidence_intervals: ConfidenceIntervals,
    pub risk_metrics: RiskReport,
    pub scenario_breakdown: BTreeMap<String, ScenarioSlice>,
    pub recommendation: Recommendation,
    pub trial_count_requested: usize,
    pub trial_count_used: usize,
    pub seed_used: u64,
    pub committed_percentage: f64,
    pub excluded_trials: Vec<ExcludedTrial>,
}
