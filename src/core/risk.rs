use std::collections::HashMap;

use super::config::EngineConfig;
use super::error::EngineError;
use super::stats::{mean, percentile_sorted, sample_std_dev, sorted_values};
use super::types::{RiskReport, TrialOrdering, TrialOutcome};

#[derive(Debug, Clone, Copy)]
pub struct RiskMetrics {
    pub risk_free_rate: f64,
    pub downside_target: f64,
}

impl RiskMetrics {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            risk_free_rate: config.risk_free_rate,
            downside_target: config.downside_target,
        }
    }

    /// `outcomes` must be non-empty and in trial-index order.
    pub fn compute(
        &self,
        outcomes: &[TrialOutcome],
        ordering: Option<&TrialOrdering>,
    ) -> Result<RiskReport, EngineError> {
        let irrs: Vec<f64> = outcomes.iter().map(|o| o.irr).collect();
        let volatility = sample_std_dev(&irrs);
        let downside = downside_deviation(&irrs, self.downside_target);

        let excess: Vec<f64> = irrs.iter().map(|irr| irr - self.risk_free_rate).collect();
        let excess_std = sample_std_dev(&excess);
        let sharpe_ratio = if excess_std > 0.0 {
            mean(&excess) / excess_std
        } else {
            0.0
        };
        let sortino_ratio = if downside > 0.0 {
            (mean(&irrs) - self.downside_target) / downside
        } else {
            0.0
        };

        let loss_count = outcomes.iter().filter(|o| o.multiple < 1.0).count();

        let ordered_max_extremum = match ordering {
            Some(ordering) => {
                let ordered = order_trials(outcomes, ordering)?;
                Some(max_extremum(ordered.iter().map(|o| o.multiple)))
            }
            None => None,
        };

        Ok(RiskReport {
            volatility,
            downside_target: self.downside_target,
            downside_deviation: downside,
            probability_of_loss: loss_count as f64 / outcomes.len() as f64,
            expected_shortfall_5: expected_shortfall(outcomes, 5.0),
            risk_free_rate: self.risk_free_rate,
            sharpe_ratio,
            sortino_ratio,
            max_extremum: max_extremum(outcomes.iter().map(|o| o.multiple)),
            ordered_max_extremum,
        })
    }
}

/// Root-mean-square shortfall below `target`, over the trials that fall short.
pub fn downside_deviation(irrs: &[f64], target: f64) -> f64 {
    let shortfalls: Vec<f64> = irrs
        .iter()
        .filter(|irr| **irr < target)
        .map(|irr| (irr - target).powi(2))
        .collect();
    if shortfalls.is_empty() {
        return 0.0;
    }
    (shortfalls.iter().sum::<f64>() / shortfalls.len() as f64).sqrt()
}

/// Mean multiple over the trials at or below the `k`-th percentile multiple.
pub fn expected_shortfall(outcomes: &[TrialOutcome], k: f64) -> f64 {
    let sorted = sorted_values(outcomes.iter().map(|o| o.multiple));
    let cutoff = percentile_sorted(&sorted, k);
    let tail: Vec<f64> = sorted.into_iter().take_while(|m| *m <= cutoff).collect();
    mean(&tail)
}

/// Largest relative decline from the running peak, walking `multiples` in the
/// order given.
pub fn max_extremum(multiples: impl Iterator<Item = f64>) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for m in multiples {
        peak = peak.max(m);
        if peak > 0.0 {
            worst = worst.max((peak - m) / peak);
        }
    }
    worst
}

/// Reorders trials for the temporal drawdown variant. An explicit ordering
/// must name every trial in `outcomes` exactly once; indices of trials that
/// are not present (excluded trials) are skipped.
pub fn order_trials<'a>(
    outcomes: &'a [TrialOutcome],
    ordering: &TrialOrdering,
) -> Result<Vec<&'a TrialOutcome>, EngineError> {
    match ordering {
        TrialOrdering::Scenario => {
            let mut ordered: Vec<&TrialOutcome> = outcomes.iter().collect();
            ordered.sort_by_key(|o| (o.scenario_index, o.trial_index));
            Ok(ordered)
        }
        TrialOrdering::Explicit(order) => {
            let position: HashMap<usize, usize> = outcomes
                .iter()
                .enumerate()
                .map(|(pos, o)| (o.trial_index, pos))
                .collect();
            let mut seen = vec![false; outcomes.len()];

            let mut ordered = Vec::with_capacity(outcomes.len());
            for trial_index in order {
                let Some(&pos) = position.get(trial_index) else {
                    continue;
                };
                if seen[pos] {
                    return Err(EngineError::InvalidParameter(format!(
                        "temporal order lists trial {trial_index} more than once"
                    )));
                }
                seen[pos] = true;
                ordered.push(&outcomes[pos]);
            }

            if ordered.len() != outcomes.len() {
                return Err(EngineError::InvalidParameter(format!(
                    "temporal order covers {} of {} trials",
                    ordered.len(),
                    outcomes.len()
                )));
            }
            Ok(ordered)
        }
    }
}
