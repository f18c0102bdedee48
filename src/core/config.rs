use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Parallelism {
    Sequential,
    /// Rayon's global pool.
    Parallel,
    /// A dedicated pool with this many workers.
    Threads(usize),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DomainPolicy {
    /// Fail the whole run on the first undefined trial.
    Reject,
    /// Drop undefined trials from every statistic and list them in the report.
    Exclude,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub risk_free_rate: f64,
    pub target_multiple: f64,
    /// Scales |sampled return| into the per-category volatility proxy used by
    /// `risk_adjusted_return`.
    pub volatility_scaling: f64,
    pub downside_target: f64,
    pub outperformer_irr: f64,
    pub underperformer_irr: f64,
    pub probability_tolerance: f64,
    /// Trials between cancellation / deadline checks.
    pub batch_size: usize,
    pub parallelism: Parallelism,
    pub domain_policy: DomainPolicy,
    #[serde(skip)]
    pub time_budget: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.03,
            target_multiple: 2.0,
            volatility_scaling: 0.3,
            downside_target: 0.0,
            outperformer_irr: 0.20,
            underperformer_irr: 0.10,
            probability_tolerance: 1e-6,
            batch_size: 1_000,
            parallelism: Parallelism::Parallel,
            domain_policy: DomainPolicy::Exclude,
            time_budget: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("riskFreeRate", self.risk_free_rate),
            ("targetMultiple", self.target_multiple),
            ("volatilityScaling", self.volatility_scaling),
            ("downsideTarget", self.downside_target),
            ("outperformerIrr", self.outperformer_irr),
            ("underperformerIrr", self.underperformer_irr),
        ] {
            if !value.is_finite() {
                return Err(format!("{name} must be finite"));
            }
        }

        if self.volatility_scaling <= 0.0 {
            return Err("volatilityScaling must be > 0".to_string());
        }

        if !self.probability_tolerance.is_finite() || self.probability_tolerance < 0.0 {
            return Err("probabilityTolerance must be >= 0".to_string());
        }

        if self.batch_size == 0 {
            return Err("batchSize must be > 0".to_string());
        }

        if self.parallelism == Parallelism::Threads(0) {
            return Err("thread count must be > 0".to_string());
        }

        if self.underperformer_irr > self.outperformer_irr {
            return Err("underperformerIrr cannot exceed outperformerIrr".to_string());
        }

        Ok(())
    }
}
