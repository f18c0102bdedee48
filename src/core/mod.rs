mod breakdown;
mod config;
mod engine;
mod error;
mod risk;
mod runner;
mod sampler;
mod selector;
mod stats;
#[cfg(test)]
mod testing;
mod types;

pub use breakdown::scenario_breakdown;
pub use config::{DomainPolicy, EngineConfig, Parallelism};
pub use engine::{Engine, simulate};
pub use error::{EngineError, PartialRun};
pub use risk::{RiskMetrics, downside_deviation, expected_shortfall, max_extremum, order_trials};
pub use runner::{CancellationToken, RunOutput, SimulationRunner};
pub use sampler::{TrialSampler, trial_rng};
pub use selector::{SELECTION_METHOD, select_recommendation};
pub use stats::{Aggregator, confidence_intervals, percentile_sorted};
pub use types::{
    AggregateStats, AllocationPlan, AllocationTarget, CategoryContribution, CategoryOutcome,
    ConfidenceIntervals, ExcludedTrial, Interval, MarketScenario, MetricIntervals,
    Recommendation, RiskReport, ScenarioSet, ScenarioSlice, SimulationParams, SimulationReport,
    TrialOrdering, TrialOutcome,
};
