//! Reported outcomes for evaluated points.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::experiment::{Assignments, ExperimentId};

/// Value reported for one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvaluation {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub value_stddev: Option<f64>,
}

/// The outcome of evaluating a point: metric values or a failure.
///
/// Observations are append-only; an update replaces the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Primary key; the store assigns ids in creation order.
    pub id: u64,
    pub experiment_id: ExperimentId,
    pub assignments: Assignments,
    #[serde(default)]
    pub values: Vec<MetricEvaluation>,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub task: Option<String>,
    /// The served suggestion this observation reports on, if any.
    #[serde(default)]
    pub suggestion_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Observation {
    /// A new, not yet persisted observation (`id` is assigned by the store).
    pub fn new(experiment_id: ExperimentId, assignments: Assignments) -> Self {
        Self {
            id: 0,
            experiment_id,
            assignments,
            values: Vec::new(),
            failed: false,
            task: None,
            suggestion_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_value(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.push(MetricEvaluation {
            name: name.into(),
            value,
            value_stddev: None,
        });
        self
    }

    pub fn with_value_stddev(mut self, name: impl Into<String>, value: f64, stddev: f64) -> Self {
        self.values.push(MetricEvaluation {
            name: name.into(),
            value,
            value_stddev: Some(stddev),
        });
        self
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn for_suggestion(mut self, suggestion_id: Uuid) -> Self {
        self.suggestion_id = Some(suggestion_id);
        self
    }

    pub fn failed(mut self) -> Self {
        self.failed = true;
        self.values.clear();
        self
    }

    pub fn value(&self, metric: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|v| v.name == metric)
            .map(|v| v.value)
    }
}
