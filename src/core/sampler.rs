use rand::distributions::Standard;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use super::error::EngineError;
use super::types::{AllocationPlan, CategoryOutcome, MarketScenario, ScenarioSet, TrialOutcome};

/// Draws one trial: a weighted scenario, then one normal return per plan
/// category, compounded over the horizon.
#[derive(Debug, Clone, Copy)]
pub struct TrialSampler<'a> {
    plan: &'a AllocationPlan,
    scenarios: &'a ScenarioSet,
    fund_size: f64,
    horizon_years: u32,
    volatility_scaling: f64,
}

impl<'a> TrialSampler<'a> {
    pub fn new(
        plan: &'a AllocationPlan,
        scenarios: &'a ScenarioSet,
        fund_size: f64,
        horizon_years: u32,
        volatility_scaling: f64,
    ) -> Self {
        Self {
            plan,
            scenarios,
            fund_size,
            horizon_years,
            volatility_scaling,
        }
    }

    pub fn sample<R: Rng + ?Sized>(
        &self,
        trial_index: usize,
        rng: &mut R,
    ) -> Result<TrialOutcome, EngineError> {
        let scenario_index = self.draw_scenario(rng);
        let scenario = &self.scenarios.scenarios[scenario_index];
        let exponent = i32::try_from(self.horizon_years).map_err(|_| {
            EngineError::InvalidParameter(format!(
                "horizon of {} years is too large",
                self.horizon_years
            ))
        })?;

        let mut per_category = Vec::with_capacity(self.plan.len());
        let mut final_value = 0.0;
        let mut weighted_vol = 0.0;
        let mut total_weight = 0.0;

        for target in self.plan.iter() {
            let sampled_return = sample_category_return(scenario, &target.category_key, rng)?;
            let allocation_amount = target.allocation_amount(self.fund_size);
            let category_final = allocation_amount * (1.0 + sampled_return).powi(exponent);

            final_value += category_final;
            weighted_vol +=
                target.target_percentage * sampled_return.abs() * self.volatility_scaling;
            total_weight += target.target_percentage;

            per_category.push(CategoryOutcome {
                category_key: target.category_key.clone(),
                allocation_amount,
                sampled_return,
                final_value: category_final,
            });
        }

        let multiple = final_value / self.fund_size;
        if !multiple.is_finite() || multiple <= 0.0 {
            return Err(EngineError::Domain {
                trial_index,
                scenario_id: scenario.scenario_id.clone(),
                multiple,
            });
        }

        let irr = multiple.powf(1.0 / self.horizon_years as f64) - 1.0;
        let portfolio_volatility = if total_weight > 0.0 {
            weighted_vol / total_weight
        } else {
            0.0
        };
        let risk_adjusted_return = if portfolio_volatility > 0.0 {
            irr / portfolio_volatility
        } else {
            0.0
        };

        Ok(TrialOutcome {
            trial_index,
            scenario_index,
            scenario_id: scenario.scenario_id.clone(),
            per_category,
            final_value,
            multiple,
            irr,
            risk_adjusted_return,
        })
    }

    /// Cumulative-distribution draw in declaration order. Rounding that leaves
    /// the draw past the last cumulative bound lands on the last scenario with
    /// non-zero weight.
    fn draw_scenario<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let u: f64 = rng.sample(Standard);
        let mut cumulative = 0.0;
        let mut last_weighted = self.scenarios.len() - 1;
        for (idx, scenario) in self.scenarios.iter().enumerate() {
            if scenario.probability <= 0.0 {
                continue;
            }
            cumulative += scenario.probability;
            last_weighted = idx;
            if u < cumulative {
                return idx;
            }
        }
        last_weighted
    }
}

fn sample_category_return<R: Rng + ?Sized>(
    scenario: &MarketScenario,
    category_key: &str,
    rng: &mut R,
) -> Result<f64, EngineError> {
    let (mean, vol) =
        scenario
            .return_params(category_key)
            .ok_or_else(|| EngineError::MissingScenarioData {
                scenario_id: scenario.scenario_id.clone(),
                category_key: category_key.to_string(),
            })?;
    let normal = Normal::new(mean, vol).map_err(|e| {
        EngineError::InvalidScenario(format!(
            "scenario `{}` category `{category_key}`: {e}",
            scenario.scenario_id
        ))
    })?;
    Ok(normal.sample(rng))
}

/// Independent stream for one trial; depends only on `(seed, trial_index)`.
pub fn trial_rng(base_seed: u64, trial_index: usize) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(derive_seed(base_seed, trial_index))
}

fn derive_seed(base_seed: u64, trial_index: usize) -> u64 {
    let mixed = base_seed ^ splitmix64(trial_index as u64);
    splitmix64(mixed)
}

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;
const MIX_MUL_1: u64 = 0xBF58_476D_1CE4_E5B9;
const MIX_MUL_2: u64 = 0x94D0_49BB_1331_11EB;

/// One SplitMix64 step: advance by the golden gamma, then finalize.
fn splitmix64(state: u64) -> u64 {
    let z = state.wrapping_add(GOLDEN_GAMMA);
    let z = (z ^ (z >> 30)).wrapping_mul(MIX_MUL_1);
    let z = (z ^ (z >> 27)).wrapping_mul(MIX_MUL_2);
    z ^ (z >> 31)
}
