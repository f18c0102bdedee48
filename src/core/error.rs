use std::time::Duration;

use thiserror::Error;

use super::types::{ExcludedTrial, TrialOutcome};

/// Trials that finished before a run was cut short, in trial-index order.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialRun {
    pub requested: usize,
    pub completed: Vec<TrialOutcome>,
    pub excluded: Vec<ExcludedTrial>,
}

impl PartialRun {
    pub fn attempted(&self) -> usize {
        self.completed.len() + self.excluded.len()
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("allocation plan has no categories")]
    EmptyPlan,

    #[error("scenario set has no scenarios")]
    EmptyScenarioSet,

    #[error("scenario probabilities sum to {sum}, expected 1 within {tolerance}")]
    InvalidProbability { sum: f64, tolerance: f64 },

    #[error("scenario `{scenario_id}` has no return/volatility entry for category `{category_key}`")]
    MissingScenarioData {
        scenario_id: String,
        category_key: String,
    },

    #[error(
        "trial {trial_index} (scenario `{scenario_id}`) produced multiple {multiple}; IRR is undefined for a non-positive multiple"
    )]
    Domain {
        trial_index: usize,
        scenario_id: String,
        multiple: f64,
    },

    #[error("run cancelled after {} of {} trials", .0.attempted(), .0.requested)]
    Cancelled(PartialRun),

    #[error("time budget of {budget:?} exceeded after {} of {} trials", .partial.attempted(), .partial.requested)]
    Timeout { budget: Duration, partial: PartialRun },

    #[error("no valid trials to report ({excluded} excluded as mathematically undefined)")]
    NoValidTrials { excluded: usize },

    #[error("invalid allocation plan: {0}")]
    InvalidPlan(String),

    #[error("invalid scenario set: {0}")]
    InvalidScenario(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl EngineError {
    /// Completed trials carried by a cancellation or timeout.
    pub fn partial(&self) -> Option<&PartialRun> {
        match self {
            EngineError::Cancelled(partial) => Some(partial),
            EngineError::Timeout { partial, .. } => Some(partial),
            _ => None,
        }
    }

    pub fn into_partial(self) -> Option<PartialRun> {
        match self {
            EngineError::Cancelled(partial) => Some(partial),
            EngineError::Timeout { partial, .. } => Some(partial),
            _ => None,
        }
    }
}
