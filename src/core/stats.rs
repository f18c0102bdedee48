use super::config::EngineConfig;
use super::types::{AggregateStats, ConfidenceIntervals, Interval, MetricIntervals, TrialOutcome};

/// Lower-bound percentile over an ascending slice: `sorted[floor(k/100 * n)]`,
/// clamped to the last element. Callers guarantee a non-empty slice.
pub fn percentile_sorted(sorted: &[f64], k: f64) -> f64 {
    let n = sorted.len();
    let rank = (k * n as f64 / 100.0).floor();
    let idx = if rank <= 0.0 { 0 } else { rank as usize };
    sorted[idx.min(n - 1)]
}

pub fn sorted_values(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut values: Vec<f64> = values.collect();
    values.sort_by(|a, b| a.total_cmp(b));
    values
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample (n-1) standard deviation; 0 below two observations.
pub fn sample_std_dev(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (n as f64 - 1.0)).sqrt()
}

fn fraction(outcomes: &[&TrialOutcome], pred: impl Fn(&TrialOutcome) -> bool) -> f64 {
    outcomes.iter().filter(|o| pred(o)).count() as f64 / outcomes.len() as f64
}

#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    pub target_multiple: f64,
    pub outperformer_irr: f64,
    pub underperformer_irr: f64,
}

impl Aggregator {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            target_multiple: config.target_multiple,
            outperformer_irr: config.outperformer_irr,
            underperformer_irr: config.underperformer_irr,
        }
    }

    /// `None` for an empty trial list. Takes references so scenario slices can
    /// be aggregated without copying trials.
    pub fn aggregate<'a>(
        &self,
        outcomes: impl IntoIterator<Item = &'a TrialOutcome>,
    ) -> Option<AggregateStats> {
        let outcomes: Vec<&TrialOutcome> = outcomes.into_iter().collect();
        if outcomes.is_empty() {
            return None;
        }

        let multiples: Vec<f64> = outcomes.iter().map(|o| o.multiple).collect();
        let irrs: Vec<f64> = outcomes.iter().map(|o| o.irr).collect();
        let sorted_multiples = sorted_values(multiples.iter().copied());
        let sorted_irrs = sorted_values(irrs.iter().copied());

        Some(AggregateStats {
            trial_count: outcomes.len(),
            mean_multiple: mean(&multiples),
            median_multiple: percentile_sorted(&sorted_multiples, 50.0),
            std_dev_multiple: sample_std_dev(&multiples),
            mean_irr: mean(&irrs),
            median_irr: percentile_sorted(&sorted_irrs, 50.0),
            std_dev_irr: sample_std_dev(&irrs),
            probability_positive: fraction(&outcomes, |o| o.multiple > 1.0),
            probability_target_met: fraction(&outcomes, |o| o.multiple > self.target_multiple),
            target_multiple: self.target_multiple,
            p5_multiple: percentile_sorted(&sorted_multiples, 5.0),
            p95_multiple: percentile_sorted(&sorted_multiples, 95.0),
            outperformer_fraction: fraction(&outcomes, |o| o.irr > self.outperformer_irr),
            underperformer_fraction: fraction(&outcomes, |o| o.irr < self.underperformer_irr),
        })
    }
}

fn metric_intervals(sorted: &[f64]) -> MetricIntervals {
    MetricIntervals {
        ci90: Interval {
            lower: percentile_sorted(sorted, 5.0),
            upper: percentile_sorted(sorted, 95.0),
        },
        ci95: Interval {
            lower: percentile_sorted(sorted, 2.5),
            upper: percentile_sorted(sorted, 97.5),
        },
    }
}

/// 90% and 95% percentile intervals for `multiple` and `irr`.
pub fn confidence_intervals(outcomes: &[TrialOutcome]) -> Option<ConfidenceIntervals> {
    if outcomes.is_empty() {
        return None;
    }
    let multiples = sorted_values(outcomes.iter().map(|o| o.multiple));
    let irrs = sorted_values(outcomes.iter().map(|o| o.irr));
    Some(ConfidenceIntervals {
        multiple: metric_intervals(&multiples),
        irr: metric_intervals(&irrs),
    })
}
