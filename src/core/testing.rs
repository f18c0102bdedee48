use super::types::{CategoryOutcome, TrialOutcome};

/// Single-category trial with the given scalar metrics.
pub fn outcome(trial_index: usize, scenario_id: &str, multiple: f64, irr: f64) -> TrialOutcome {
    TrialOutcome {
        trial_index,
        scenario_index: 0,
        scenario_id: scenario_id.to_string(),
        per_category: vec![CategoryOutcome {
            category_key: "fund".to_string(),
            allocation_amount: 1.0,
            sampled_return: multiple - 1.0,
            final_value: multiple,
        }],
        final_value: multiple,
        multiple,
        irr,
        risk_adjusted_return: irr,
    }
}
