use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, warn};

use super::config::{DomainPolicy, EngineConfig, Parallelism};
use super::error::{EngineError, PartialRun};
use super::sampler::{TrialSampler, trial_rng};
use super::types::{AllocationPlan, ExcludedTrial, ScenarioSet, TrialOutcome};

/// Cooperative cancellation flag shared between a caller and a running
/// simulation. Checked once per batch.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    /// Valid trials in trial-index order.
    pub outcomes: Vec<TrialOutcome>,
    pub excluded: Vec<ExcludedTrial>,
}

pub struct SimulationRunner<'a> {
    plan: &'a AllocationPlan,
    scenarios: &'a ScenarioSet,
    sampler: TrialSampler<'a>,
    config: &'a EngineConfig,
}

enum Executor {
    Sequential,
    Global,
    Pool(ThreadPool),
}

impl<'a> SimulationRunner<'a> {
    pub fn new(
        plan: &'a AllocationPlan,
        scenarios: &'a ScenarioSet,
        fund_size: f64,
        horizon_years: u32,
        config: &'a EngineConfig,
    ) -> Self {
        let sampler = TrialSampler::new(
            plan,
            scenarios,
            fund_size,
            horizon_years,
            config.volatility_scaling,
        );
        Self {
            plan,
            scenarios,
            sampler,
            config,
        }
    }

    pub fn run(
        &self,
        trial_count: usize,
        seed: u64,
        cancel: Option<&CancellationToken>,
    ) -> Result<RunOutput, EngineError> {
        self.run_with_progress(trial_count, seed, cancel, |_| {})
    }

    /// Like [`run`](Self::run), calling `progress` with the number of trials
    /// attempted so far after every finished batch.
    pub fn run_with_progress(
        &self,
        trial_count: usize,
        seed: u64,
        cancel: Option<&CancellationToken>,
        mut progress: impl FnMut(usize),
    ) -> Result<RunOutput, EngineError> {
        if self.plan.is_empty() {
            return Err(EngineError::EmptyPlan);
        }
        if self.scenarios.is_empty() {
            return Err(EngineError::EmptyScenarioSet);
        }
        if trial_count == 0 {
            return Err(EngineError::InvalidParameter(
                "trial count must be > 0".to_string(),
            ));
        }

        let executor = match self.config.parallelism {
            Parallelism::Sequential => Executor::Sequential,
            Parallelism::Parallel => Executor::Global,
            Parallelism::Threads(n) => {
                Executor::Pool(ThreadPoolBuilder::new().num_threads(n).build()?)
            }
        };
        let batch_size = self.config.batch_size.max(1);

        debug!(
            trial_count,
            seed,
            batch_size,
            parallelism = ?self.config.parallelism,
            "starting simulation run"
        );

        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(trial_count.min(batch_size));
        let mut excluded = Vec::new();
        let mut next = 0;

        while next < trial_count {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                warn!(completed = next, trial_count, "simulation cancelled");
                return Err(EngineError::Cancelled(PartialRun {
                    requested: trial_count,
                    completed: outcomes,
                    excluded,
                }));
            }
            if let Some(budget) = self.config.time_budget {
                if started.elapsed() >= budget {
                    warn!(completed = next, trial_count, ?budget, "simulation time budget exceeded");
                    return Err(EngineError::Timeout {
                        budget,
                        partial: PartialRun {
                            requested: trial_count,
                            completed: outcomes,
                            excluded,
                        },
                    });
                }
            }

            let end = next.saturating_add(batch_size).min(trial_count);
            for result in self.run_batch(&executor, next..end, seed) {
                match result {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(EngineError::Domain {
                        trial_index,
                        scenario_id,
                        multiple,
                    }) if self.config.domain_policy == DomainPolicy::Exclude => {
                        excluded.push(ExcludedTrial {
                            trial_index,
                            scenario_id,
                            multiple,
                        });
                    }
                    Err(err) => return Err(err),
                }
            }
            next = end;
            progress(next);
        }

        if !excluded.is_empty() {
            warn!(
                excluded = excluded.len(),
                trial_count, "excluded trials with undefined IRR"
            );
        }
        debug!(
            valid = outcomes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "simulation run finished"
        );

        Ok(RunOutput { outcomes, excluded })
    }

    /// Results come back in index order whatever the executor.
    fn run_batch(
        &self,
        executor: &Executor,
        range: Range<usize>,
        seed: u64,
    ) -> Vec<Result<TrialOutcome, EngineError>> {
        let sampler = &self.sampler;
        let sample = move |trial_index: usize| {
            let mut rng = trial_rng(seed, trial_index);
            sampler.sample(trial_index, &mut rng)
        };

        match executor {
            Executor::Sequential => range.map(sample).collect(),
            Executor::Global => range.into_par_iter().map(sample).collect(),
            Executor::Pool(pool) => pool.install(|| range.into_par_iter().map(sample).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AllocationTarget, MarketScenario};
    use std::time::Duration;

    fn sample_plan() -> AllocationPlan {
        AllocationPlan::new(vec![
            AllocationTarget::fixed("seed", 30.0),
            AllocationTarget::fixed("series-a", 45.0),
            AllocationTarget::fixed("growth", 25.0),
        ])
    }

    fn sample_scenarios() -> ScenarioSet {
        ScenarioSet::new(vec![
            MarketScenario::new("bull", 0.25)
                .with_category("seed", 0.35, 0.40)
                .with_category("series-a", 0.25, 0.30)
                .with_category("growth", 0.15, 0.20),
            MarketScenario::new("base", 0.5)
                .with_category("seed", 0.15, 0.35)
                .with_category("series-a", 0.12, 0.25)
                .with_category("growth", 0.08, 0.15),
            MarketScenario::new("bear", 0.25)
                .with_category("seed", -0.10, 0.30)
                .with_category("series-a", -0.05, 0.20)
                .with_category("growth", 0.0, 0.10),
        ])
    }

    fn config_with(parallelism: Parallelism, batch_size: usize) -> EngineConfig {
        EngineConfig {
            parallelism,
            batch_size,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn parallel_and_sequential_runs_are_identical() {
        let plan = sample_plan();
        let scenarios = sample_scenarios();

        let mut runs = Vec::new();
        for parallelism in [
            Parallelism::Sequential,
            Parallelism::Parallel,
            Parallelism::Threads(3),
        ] {
            let config = config_with(parallelism, 37);
            let runner = SimulationRunner::new(&plan, &scenarios, 50_000_000.0, 7, &config);
            runs.push(runner.run(1_000, 2024, None).expect("run should succeed"));
        }

        assert_eq!(runs[0], runs[1]);
        assert_eq!(runs[0], runs[2]);
        for (idx, outcome) in runs[0].outcomes.iter().enumerate() {
            assert_eq!(outcome.trial_index, idx);
        }
    }

    #[test]
    fn batch_size_does_not_change_outcomes() {
        let plan = sample_plan();
        let scenarios = sample_scenarios();
        let small = config_with(Parallelism::Parallel, 1);
        let large = config_with(Parallelism::Parallel, 10_000);

        let a = SimulationRunner::new(&plan, &scenarios, 1e7, 5, &small)
            .run(300, 8, None)
            .expect("run should succeed");
        let b = SimulationRunner::new(&plan, &scenarios, 1e7, 5, &large)
            .run(300, 8, None)
            .expect("run should succeed");
        assert_eq!(a, b);
    }

    #[test]
    fn single_trial_run_is_supported() {
        let plan = sample_plan();
        let scenarios = sample_scenarios();
        let config = EngineConfig::default();
        let output = SimulationRunner::new(&plan, &scenarios, 1e6, 3, &config)
            .run(1, 0, None)
            .expect("run should succeed");
        assert_eq!(output.outcomes.len() + output.excluded.len(), 1);
    }

    #[test]
    fn empty_inputs_fail_before_any_trial() {
        let config = EngineConfig::default();
        let scenarios = sample_scenarios();
        let empty_plan = AllocationPlan::default();
        let err = SimulationRunner::new(&empty_plan, &scenarios, 1e6, 3, &config)
            .run(10, 0, None)
            .expect_err("empty plan must fail");
        assert!(matches!(err, EngineError::EmptyPlan));

        let plan = sample_plan();
        let empty_scenarios = ScenarioSet::default();
        let err = SimulationRunner::new(&plan, &empty_scenarios, 1e6, 3, &config)
            .run(10, 0, None)
            .expect_err("empty scenario set must fail");
        assert!(matches!(err, EngineError::EmptyScenarioSet));
    }

    #[test]
    fn cancelled_token_stops_before_next_batch() {
        let plan = sample_plan();
        let scenarios = sample_scenarios();
        let config = config_with(Parallelism::Sequential, 100);
        let token = CancellationToken::new();
        token.cancel();

        let err = SimulationRunner::new(&plan, &scenarios, 1e6, 3, &config)
            .run(5_000, 1, Some(&token))
            .expect_err("cancelled run must fail");
        let partial = err.partial().expect("cancellation carries partial results");
        assert!(matches!(err, EngineError::Cancelled(_)));
        assert_eq!(partial.requested, 5_000);
        assert!(partial.completed.is_empty());
    }

    #[test]
    fn huge_trial_count_still_honours_cancellation() {
        let plan = sample_plan();
        let scenarios = sample_scenarios();
        let config = EngineConfig::default();
        let token = CancellationToken::new();
        token.cancel();

        let err = SimulationRunner::new(&plan, &scenarios, 1e6, 1, &config)
            .run(usize::MAX / 2, 1, Some(&token))
            .expect_err("cancelled run must fail");
        match err {
            EngineError::Cancelled(partial) => {
                assert_eq!(partial.requested, usize::MAX / 2);
                assert_eq!(partial.attempted(), 0);
            }
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }

    #[test]
    fn cancelling_mid_run_returns_completed_prefix() {
        let plan = sample_plan();
        let scenarios = sample_scenarios();
        let config = config_with(Parallelism::Parallel, 10);
        let runner = SimulationRunner::new(&plan, &scenarios, 1e6, 3, &config);
        let token = CancellationToken::new();

        let mut batches = Vec::new();
        let err = runner
            .run_with_progress(1_000, 404, Some(&token), |done| {
                batches.push(done);
                if done >= 30 {
                    token.cancel();
                }
            })
            .expect_err("cancelled run must fail");
        assert_eq!(batches, vec![10, 20, 30]);

        let partial = err.into_partial().expect("cancellation carries partial results");
        assert_eq!(partial.requested, 1_000);
        assert_eq!(partial.attempted(), 30);
        assert!(!partial.completed.is_empty());

        let mut seen: Vec<usize> = partial
            .completed
            .iter()
            .map(|o| o.trial_index)
            .chain(partial.excluded.iter().map(|e| e.trial_index))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..30).collect::<Vec<_>>());
        assert!(
            partial
                .completed
                .windows(2)
                .all(|w| w[0].trial_index < w[1].trial_index)
        );

        let full = runner.run(1_000, 404, None).expect("run should succeed");
        let prefix: Vec<TrialOutcome> = full
            .outcomes
            .into_iter()
            .filter(|o| o.trial_index < 30)
            .collect();
        assert_eq!(partial.completed, prefix);
    }

    #[test]
    fn cut_short_run_keeps_excluded_trials() {
        let plan = AllocationPlan::new(vec![AllocationTarget::fixed("a", 100.0)]);
        let scenarios = wipeout_scenarios();
        let config = config_with(Parallelism::Sequential, 50);
        let token = CancellationToken::new();

        let err = SimulationRunner::new(&plan, &scenarios, 1e6, 1, &config)
            .run_with_progress(400, 77, Some(&token), |done| {
                if done >= 200 {
                    token.cancel();
                }
            })
            .expect_err("cancelled run must fail");
        let partial = err.into_partial().expect("cancellation carries partial results");

        assert_eq!(partial.attempted(), 200);
        assert!(!partial.excluded.is_empty());
        assert!(partial.excluded.iter().all(|e| e.scenario_id == "wipeout"));
        assert!(partial.excluded.iter().all(|e| e.trial_index < 200));
    }

    #[test]
    fn zero_time_budget_reports_timeout() {
        let plan = sample_plan();
        let scenarios = sample_scenarios();
        let config = EngineConfig {
            time_budget: Some(Duration::ZERO),
            ..EngineConfig::default()
        };
        let err = SimulationRunner::new(&plan, &scenarios, 1e6, 3, &config)
            .run(5_000, 1, None)
            .expect_err("zero budget must time out");
        match err {
            EngineError::Timeout { budget, partial } => {
                assert_eq!(budget, Duration::ZERO);
                assert_eq!(partial.attempted(), 0);
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    fn wipeout_scenarios() -> ScenarioSet {
        ScenarioSet::new(vec![
            MarketScenario::new("ok", 0.5).with_category("a", 0.1, 0.0),
            MarketScenario::new("wipeout", 0.5).with_category("a", -1.5, 0.0),
        ])
    }

    #[test]
    fn exclude_policy_drops_undefined_trials() {
        let plan = AllocationPlan::new(vec![AllocationTarget::fixed("a", 100.0)]);
        let scenarios = wipeout_scenarios();
        let config = EngineConfig::default();
        let output = SimulationRunner::new(&plan, &scenarios, 1e6, 1, &config)
            .run(400, 77, None)
            .expect("run should succeed");

        assert_eq!(output.outcomes.len() + output.excluded.len(), 400);
        assert!(!output.excluded.is_empty());
        assert!(output.outcomes.iter().all(|o| o.scenario_id == "ok"));
        assert!(output.excluded.iter().all(|e| e.scenario_id == "wipeout"));
    }

    #[test]
    fn reject_policy_fails_the_run() {
        let plan = AllocationPlan::new(vec![AllocationTarget::fixed("a", 100.0)]);
        let scenarios = wipeout_scenarios();
        let config = EngineConfig {
            domain_policy: DomainPolicy::Reject,
            ..EngineConfig::default()
        };
        let err = SimulationRunner::new(&plan, &scenarios, 1e6, 1, &config)
            .run(400, 77, None)
            .expect_err("reject policy must fail");
        assert!(matches!(err, EngineError::Domain { .. }));
    }

    #[test]
    fn scenario_frequencies_converge_to_probabilities() {
        let plan = AllocationPlan::new(vec![AllocationTarget::fixed("a", 100.0)]);
        let scenarios = ScenarioSet::new(vec![
            MarketScenario::new("A", 0.3).with_category("a", 0.1, 0.1),
            MarketScenario::new("B", 0.7).with_category("a", 0.05, 0.05),
        ]);
        let config = EngineConfig::default();
        let output = SimulationRunner::new(&plan, &scenarios, 1e6, 1, &config)
            .run(100_000, 31_337, None)
            .expect("run should succeed");

        let hits_a = output
            .outcomes
            .iter()
            .filter(|o| o.scenario_id == "A")
            .count();
        let freq = hits_a as f64 / output.outcomes.len() as f64;
        assert!((freq - 0.3).abs() <= 0.01, "observed frequency {freq}");
    }
}
