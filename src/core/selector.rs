use super::types::{AllocationPlan, CategoryContribution, Recommendation, TrialOutcome};

pub const SELECTION_METHOD: &str = "max-risk-adjusted-trial";

/// Picks the single trial with the highest `risk_adjusted_return` and reports
/// the allocation it implies. This is a point estimate over sampled trials,
/// not an optimizer: the chosen trial is the luckiest draw under the plan, and
/// nothing guarantees the allocation is optimal. Ties go to the lowest trial
/// index.
pub fn select_recommendation(
    outcomes: &[TrialOutcome],
    plan: &AllocationPlan,
) -> Option<Recommendation> {
    let mut best: Option<&TrialOutcome> = None;
    for outcome in outcomes {
        match best {
            Some(current) if outcome.risk_adjusted_return <= current.risk_adjusted_return => {}
            _ => best = Some(outcome),
        }
    }
    let best = best?;

    let contributions = best
        .per_category
        .iter()
        .map(|category| {
            let target_percentage = plan
                .iter()
                .find(|t| t.category_key == category.category_key)
                .map_or(0.0, |t| t.target_percentage);
            CategoryContribution {
                category_key: category.category_key.clone(),
                target_percentage,
                allocation_amount: category.allocation_amount,
                sampled_return: category.sampled_return,
                final_value: category.final_value,
                share_of_final_value: category.final_value / best.final_value,
            }
        })
        .collect();

    Some(Recommendation {
        method: SELECTION_METHOD,
        trial_index: best.trial_index,
        scenario_id: best.scenario_id.clone(),
        contributions,
        final_value: best.final_value,
        multiple: best.multiple,
        irr: best.irr,
        risk_adjusted_return: best.risk_adjusted_return,
    })
}
