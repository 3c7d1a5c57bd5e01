//! Broker for experiments evaluated one point at a time.

use sg_types::{Experiment, Observation, SgResult, Suggestion};
use std::sync::Arc;
use tracing::debug;

use crate::broker::Broker;

/// Holds at most one outstanding suggestion. Asking again before the
/// suggestion is observed returns the same point.
pub struct SingleSlotBroker {
    broker: Arc<Broker>,
    experiment: Experiment,
    pending: Option<Suggestion>,
}

impl SingleSlotBroker {
    pub fn new(broker: Arc<Broker>, experiment: Experiment) -> Self {
        Self {
            broker,
            experiment,
            pending: None,
        }
    }

    pub fn pending(&self) -> Option<&Suggestion> {
        self.pending.as_ref()
    }

    pub fn create_suggestion(&mut self) -> SgResult<Suggestion> {
        if let Some(pending) = &self.pending {
            return Ok(pending.clone());
        }
        let suggestion = self.broker.serve_suggestion(&self.experiment, None)?;
        self.pending = Some(suggestion.clone());
        Ok(suggestion)
    }

    /// Store `observation` and free the slot if it answers the pending
    /// suggestion.
    pub fn record_observation(&mut self, observation: Observation) -> SgResult<Observation> {
        let stored = self.broker.store().create_observation(observation)?;
        let answers = self.pending.as_ref().is_some_and(|pending| match stored.suggestion_id {
            Some(id) => id == pending.id(),
            None => pending.unprocessed.same_point(&stored.assignments, stored.task.as_deref()),
        });
        if answers {
            debug!(experiment_id = %self.experiment.id, observation_id = stored.id, "slot cleared");
            self.pending = None;
        }
        Ok(stored)
    }
}
