use std::collections::BTreeMap;

use super::stats::Aggregator;
use super::types::{ScenarioSet, ScenarioSlice, TrialOutcome};

/// Per-scenario aggregate statistics. Every declared scenario gets an entry;
/// scenarios that drew no trials report `trial_count == 0` and no stats.
pub fn scenario_breakdown(
    outcomes: &[TrialOutcome],
    scenarios: &ScenarioSet,
    aggregator: &Aggregator,
) -> BTreeMap<String, ScenarioSlice> {
    let mut partitions: Vec<Vec<&TrialOutcome>> = vec![Vec::new(); scenarios.len()];
    for outcome in outcomes {
        if let Some(bucket) = partitions.get_mut(outcome.scenario_index) {
            bucket.push(outcome);
        }
    }

    let total = outcomes.len();
    scenarios
        .iter()
        .zip(partitions)
        .map(|(scenario, trials)| {
            let trial_count = trials.len();
            let observed_frequency = if total == 0 {
                0.0
            } else {
                trial_count as f64 / total as f64
            };
            let slice = ScenarioSlice {
                name: scenario.name.clone(),
                declared_probability: scenario.probability,
                trial_count,
                observed_frequency,
                stats: aggregator.aggregate(trials),
            };
            (scenario.scenario_id.clone(), slice)
        })
        .collect()
}
