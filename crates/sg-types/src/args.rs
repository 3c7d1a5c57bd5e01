//! Per-request snapshot of the optimization state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::experiment::{Assignments, ExperimentId};
use crate::observation::Observation;
use crate::suggestion::UnprocessedSuggestion;

/// Model hyperparameters persisted between requests, tagged with the amount
/// of history they were fitted on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredHyperparameters {
    pub experiment_id: ExperimentId,
    pub values: serde_json::Value,
    pub observation_count: u64,
    pub updated_at: DateTime<Utc>,
}

/// Immutable snapshot built fresh for every broker iteration.
#[derive(Debug, Clone)]
pub struct OptimizationArgs {
    pub experiment_id: ExperimentId,
    pub observation_count: u64,
    pub failure_count: u64,
    observations: Arc<Vec<Observation>>,
    /// Claimed suggestions that have not been observed yet.
    pub open_suggestions: Vec<UnprocessedSuggestion>,
    /// Unclaimed candidates generated by earlier requests.
    pub available_suggestions: Vec<UnprocessedSuggestion>,
    pub hyperparameters: Option<StoredHyperparameters>,
}

impl OptimizationArgs {
    /// Build a snapshot; `observations` are sorted by id so every reader sees
    /// the same order.
    pub fn new(
        experiment_id: ExperimentId,
        mut observations: Vec<Observation>,
        open_suggestions: Vec<UnprocessedSuggestion>,
        available_suggestions: Vec<UnprocessedSuggestion>,
        hyperparameters: Option<StoredHyperparameters>,
    ) -> Self {
        observations.sort_by_key(|o| o.id);
        let failure_count = observations.iter().filter(|o| o.failed).count() as u64;
        Self {
            experiment_id,
            observation_count: observations.len() as u64,
            failure_count,
            observations: Arc::new(observations),
            open_suggestions,
            available_suggestions,
            hyperparameters,
        }
    }

    /// Empty history, used for brand-new experiments.
    pub fn empty(experiment_id: ExperimentId) -> Self {
        Self::new(experiment_id, Vec::new(), Vec::new(), Vec::new(), None)
    }

    pub fn observations(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    pub fn successful_observations(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter().filter(|o| !o.failed)
    }

    /// Every point already evaluated or currently being evaluated.
    pub fn covered_points(&self) -> impl Iterator<Item = &Assignments> {
        self.observations
            .iter()
            .map(|o| &o.assignments)
            .chain(self.open_suggestions.iter().map(|s| &s.assignments))
    }

    pub fn is_open(&self, assignments: &Assignments, task: Option<&str>) -> bool {
        self.open_suggestions
            .iter()
            .any(|s| s.same_point(assignments, task))
    }
}
