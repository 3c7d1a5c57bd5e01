use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use sg_types::{
    ClaimResult, Experiment, ExperimentId, Observation, OptimizationArgs, ProcessedSuggestion,
    QueuedSuggestion, SgResult, StoreError, StoredHyperparameters, UnprocessedSuggestion,
};
use tracing::debug;
use uuid::Uuid;

use crate::SuggestionStore;

/// Claim bookkeeping. Both the processed table insert and the queued index
/// are only touched while this lock is held.
#[derive(Debug, Default)]
struct ClaimIndex {
    by_queued: HashMap<u64, Uuid>,
}

/// In-memory store backed by concurrent maps.
#[derive(Debug)]
pub struct MemoryStore {
    experiments: DashMap<ExperimentId, Experiment>,
    unprocessed: DashMap<Uuid, UnprocessedSuggestion>,
    processed: DashMap<Uuid, ProcessedSuggestion>,
    observations: DashMap<u64, Observation>,
    queued: DashMap<u64, QueuedSuggestion>,
    hyperparameters: DashMap<ExperimentId, StoredHyperparameters>,
    claims: Mutex<ClaimIndex>,
    next_observation_id: AtomicU64,
    next_queued_id: AtomicU64,
    stats: RwLock<StoreStats>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            experiments: DashMap::new(),
            unprocessed: DashMap::new(),
            processed: DashMap::new(),
            observations: DashMap::new(),
            queued: DashMap::new(),
            hyperparameters: DashMap::new(),
            claims: Mutex::new(ClaimIndex::default()),
            next_observation_id: AtomicU64::new(1),
            next_queued_id: AtomicU64::new(1),
            stats: RwLock::new(StoreStats::default()),
        }
    }

    /// Register (or replace) an experiment definition.
    pub fn register_experiment(&self, experiment: Experiment) -> SgResult<()> {
        experiment.validate()?;
        self.experiments.insert(experiment.id, experiment);
        Ok(())
    }

    pub fn experiment(&self, experiment_id: ExperimentId) -> SgResult<Experiment> {
        self.experiments
            .get(&experiment_id)
            .map(|e| e.clone())
            .ok_or_else(|| StoreError::ExperimentNotFound { experiment_id }.into())
    }

    pub fn unprocessed(&self, suggestion_id: Uuid) -> Option<UnprocessedSuggestion> {
        self.unprocessed.get(&suggestion_id).map(|s| s.clone())
    }

    pub fn processed(&self, suggestion_id: Uuid) -> Option<ProcessedSuggestion> {
        self.processed.get(&suggestion_id).map(|p| p.clone())
    }

    pub fn queued(&self, queued_id: u64) -> Option<QueuedSuggestion> {
        self.queued.get(&queued_id).map(|q| q.clone())
    }

    pub fn get_stats(&self) -> StoreStats {
        self.stats.read().clone()
    }

    fn ensure_experiment(&self, experiment_id: ExperimentId) -> SgResult<()> {
        if self.experiments.contains_key(&experiment_id) {
            Ok(())
        } else {
            Err(StoreError::ExperimentNotFound { experiment_id }.into())
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SuggestionStore for MemoryStore {
    fn read_history(&self, experiment_id: ExperimentId) -> SgResult<OptimizationArgs> {
        self.ensure_experiment(experiment_id)?;

        let observations: Vec<Observation> = self
            .observations
            .iter()
            .filter(|o| o.experiment_id == experiment_id)
            .map(|o| o.clone())
            .collect();

        let mut open = Vec::new();
        let mut available = Vec::new();
        for entry in self.unprocessed.iter() {
            let suggestion = entry.value();
            if suggestion.experiment_id != experiment_id {
                continue;
            }
            // A claimed suggestion stays open until observed, tombstone or not.
            match self.processed.get(&suggestion.id) {
                Some(processed) if processed.observation_id.is_none() => open.push(suggestion.clone()),
                Some(_) => {}
                None if suggestion.deleted => {}
                None => available.push(suggestion.clone()),
            }
        }
        open.sort_by_key(|s| s.created_at);
        available.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let hyperparameters = self.hyperparameters.get(&experiment_id).map(|h| h.clone());

        Ok(OptimizationArgs::new(
            experiment_id,
            observations,
            open,
            available,
            hyperparameters,
        ))
    }

    fn insert_unprocessed(&self, suggestion: &UnprocessedSuggestion) -> SgResult<()> {
        self.ensure_experiment(suggestion.experiment_id)?;
        match self.unprocessed.entry(suggestion.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate {
                message: format!("unprocessed suggestion {}", suggestion.id),
            }
            .into()),
            Entry::Vacant(slot) => {
                slot.insert(suggestion.clone());
                Ok(())
            }
        }
    }

    fn delete_unprocessed(&self, suggestion_id: Uuid) -> SgResult<()> {
        let _index = self.claims.lock();
        match self.unprocessed.get_mut(&suggestion_id) {
            Some(_) if self.processed.contains_key(&suggestion_id) => {
                debug!(%suggestion_id, "tombstone skipped, suggestion already claimed");
                Ok(())
            }
            Some(mut suggestion) => {
                suggestion.deleted = true;
                Ok(())
            }
            None => Err(StoreError::SuggestionNotFound { suggestion_id }.into()),
        }
    }

    fn claim(&self, suggestion_id: Uuid, session: Option<&str>) -> SgResult<ClaimResult> {
        let mut index = self.claims.lock();

        let (experiment_id, queued_id, deleted) = match self.unprocessed.get(&suggestion_id) {
            Some(s) => (s.experiment_id, s.queued_id, s.deleted),
            None => return Err(StoreError::SuggestionNotFound { suggestion_id }.into()),
        };

        let taken = deleted
            || self.processed.contains_key(&suggestion_id)
            || queued_id.is_some_and(|q| index.by_queued.contains_key(&q));
        if taken {
            self.stats.write().conflicts += 1;
            debug!(%suggestion_id, "claim lost");
            return Ok(ClaimResult::AlreadyClaimed);
        }

        let processed = ProcessedSuggestion {
            suggestion_id,
            experiment_id,
            session: session.map(str::to_string),
            queued_id,
            observation_id: None,
            processed_at: Utc::now(),
        };
        if let Some(q) = queued_id {
            index.by_queued.insert(q, suggestion_id);
        }
        self.processed.insert(suggestion_id, processed.clone());
        self.stats.write().claims += 1;

        Ok(ClaimResult::Claimed(processed))
    }

    fn next_queued(&self, experiment_id: ExperimentId) -> SgResult<Option<QueuedSuggestion>> {
        let index = self.claims.lock();
        let next = self
            .queued
            .iter()
            .filter(|q| {
                q.experiment_id == experiment_id && !q.deleted && !index.by_queued.contains_key(&q.id)
            })
            .min_by_key(|q| q.id)
            .map(|q| q.clone());
        Ok(next)
    }

    fn enqueue(&self, mut queued: QueuedSuggestion) -> SgResult<QueuedSuggestion> {
        let experiment = self.experiment(queued.experiment_id)?;
        experiment.validate_assignments(&queued.assignments, queued.task.as_deref())?;

        queued.id = self.next_queued_id.fetch_add(1, Ordering::SeqCst);
        queued.deleted = false;
        self.queued.insert(queued.id, queued.clone());
        debug!(experiment_id = queued.experiment_id, queued_id = queued.id, "suggestion enqueued");
        Ok(queued)
    }

    fn delete_queued(&self, queued_id: u64) -> SgResult<()> {
        match self.queued.get_mut(&queued_id) {
            Some(mut queued) => {
                queued.deleted = true;
                Ok(())
            }
            None => Err(StoreError::QueuedNotFound { queued_id }.into()),
        }
    }

    fn create_observation(&self, mut observation: Observation) -> SgResult<Observation> {
        self.ensure_experiment(observation.experiment_id)?;
        observation.id = self.next_observation_id.fetch_add(1, Ordering::SeqCst);

        if let Some(suggestion_id) = observation.suggestion_id {
            match self.processed.get_mut(&suggestion_id) {
                Some(mut processed) => processed.observation_id = Some(observation.id),
                None => return Err(StoreError::SuggestionNotFound { suggestion_id }.into()),
            }
        }

        self.observations.insert(observation.id, observation.clone());
        self.stats.write().observations += 1;
        Ok(observation)
    }

    fn update_observation(&self, observation: Observation) -> SgResult<()> {
        match self.observations.get_mut(&observation.id) {
            Some(mut existing) => {
                *existing = observation;
                Ok(())
            }
            None => Err(StoreError::ObservationNotFound {
                observation_id: observation.id,
            }
            .into()),
        }
    }

    fn update_hyperparameters(
        &self,
        experiment_id: ExperimentId,
        values: serde_json::Value,
        observation_count: u64,
    ) -> SgResult<bool> {
        self.ensure_experiment(experiment_id)?;
        let fresh = StoredHyperparameters {
            experiment_id,
            values,
            observation_count,
            updated_at: Utc::now(),
        };
        match self.hyperparameters.entry(experiment_id) {
            Entry::Occupied(mut current) => {
                if current.get().observation_count > observation_count {
                    debug!(experiment_id, observation_count, "hyperparameters superseded");
                    return Ok(false);
                }
                current.insert(fresh);
            }
            Entry::Vacant(slot) => {
                slot.insert(fresh);
            }
        }
        Ok(true)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub claims: u64,
    pub conflicts: u64,
    pub observations: u64,
}

impl StoreStats {
    pub fn conflict_rate(&self) -> f64 {
        if self.claims + self.conflicts == 0 {
            0.0
        } else {
            self.conflicts as f64 / (self.claims + self.conflicts) as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_types::{Assignments, Parameter, ParameterValue, SuggestionSource};
    use std::sync::Arc;

    fn store_with_experiment() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .register_experiment(
                Experiment::new(1, "store-test").with_parameter(Parameter::continuous("x", 0.0, 10.0)),
            )
            .unwrap();
        store
    }

    fn point(x: f64) -> Assignments {
        let mut a = Assignments::new();
        a.insert("x".into(), ParameterValue::Float(x));
        a
    }

    #[test]
    fn claim_is_exclusive() {
        let store = store_with_experiment();
        let candidate = UnprocessedSuggestion::new(1, SuggestionSource::Random, point(1.0), None);
        store.insert_unprocessed(&candidate).unwrap();

        assert!(store.claim(candidate.id, Some("a")).unwrap().is_claimed());
        assert_eq!(store.claim(candidate.id, Some("b")).unwrap(), ClaimResult::AlreadyClaimed);

        let stats = store.get_stats();
        assert_eq!(stats.claims, 1);
        assert_eq!(stats.conflicts, 1);
        assert_eq!(stats.conflict_rate(), 0.5);
    }

    #[test]
    fn concurrent_claims_single_winner() {
        let store = Arc::new(store_with_experiment());
        let candidate = UnprocessedSuggestion::new(1, SuggestionSource::Random, point(2.0), None);
        store.insert_unprocessed(&candidate).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let id = candidate.id;
                std::thread::spawn(move || store.claim(id, Some(&format!("worker-{i}"))).unwrap())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(ClaimResult::is_claimed)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn claim_unknown_suggestion_fails() {
        let store = store_with_experiment();
        assert!(store.claim(Uuid::new_v4(), None).is_err());
    }

    #[test]
    fn deleted_candidate_cannot_be_claimed() {
        let store = store_with_experiment();
        let candidate = UnprocessedSuggestion::new(1, SuggestionSource::ModelBasedGp, point(3.0), None);
        store.insert_unprocessed(&candidate).unwrap();
        store.delete_unprocessed(candidate.id).unwrap();
        store.delete_unprocessed(candidate.id).unwrap();
        assert_eq!(store.claim(candidate.id, None).unwrap(), ClaimResult::AlreadyClaimed);
    }

    #[test]
    fn claimed_suggestion_is_never_tombstoned() {
        let store = store_with_experiment();
        let candidate = UnprocessedSuggestion::new(1, SuggestionSource::Queued, point(4.0), None);
        store.insert_unprocessed(&candidate).unwrap();
        store.claim(candidate.id, Some("winner")).unwrap();

        store.delete_unprocessed(candidate.id).unwrap();
        assert!(!store.unprocessed(candidate.id).unwrap().deleted);
        let args = store.read_history(1).unwrap();
        assert_eq!(args.open_suggestions.len(), 1);
        assert_eq!(args.open_suggestions[0].id, candidate.id);
        assert!(args.available_suggestions.is_empty());
    }

    #[test]
    fn tombstone_does_not_hide_open_suggestion() {
        let store = store_with_experiment();
        let candidate = UnprocessedSuggestion::new(1, SuggestionSource::Random, point(6.0), None);
        store.insert_unprocessed(&candidate).unwrap();
        store.claim(candidate.id, None).unwrap();
        // Force both flags, bypassing the guard in delete_unprocessed.
        store.unprocessed.get_mut(&candidate.id).unwrap().deleted = true;

        let args = store.read_history(1).unwrap();
        assert_eq!(args.open_suggestions.len(), 1);
        assert!(args.available_suggestions.is_empty());
    }

    #[test]
    fn history_splits_open_and_available() {
        let store = store_with_experiment();
        let open = UnprocessedSuggestion::new(1, SuggestionSource::Random, point(1.0), None);
        let pooled = UnprocessedSuggestion::new(1, SuggestionSource::ModelBasedGp, point(2.0), None);
        let observed = UnprocessedSuggestion::new(1, SuggestionSource::Random, point(3.0), None);
        for s in [&open, &pooled, &observed] {
            store.insert_unprocessed(s).unwrap();
        }
        store.claim(open.id, None).unwrap();
        store.claim(observed.id, None).unwrap();
        store
            .create_observation(Observation::new(1, point(3.0)).with_value("y", 1.0).for_suggestion(observed.id))
            .unwrap();

        let args = store.read_history(1).unwrap();
        assert_eq!(args.observation_count, 1);
        assert_eq!(args.open_suggestions.len(), 1);
        assert_eq!(args.open_suggestions[0].id, open.id);
        assert_eq!(args.available_suggestions.len(), 1);
        assert_eq!(args.available_suggestions[0].id, pooled.id);
    }

    #[test]
    fn queue_fifo_and_consumption() {
        let store = store_with_experiment();
        let first = store.enqueue(QueuedSuggestion::new(1, point(4.0), None)).unwrap();
        let second = store.enqueue(QueuedSuggestion::new(1, point(5.0), None)).unwrap();
        assert!(first.id < second.id);

        assert_eq!(store.next_queued(1).unwrap().unwrap().id, first.id);

        let candidate = UnprocessedSuggestion::from_queued(&first);
        store.insert_unprocessed(&candidate).unwrap();
        store.claim(candidate.id, None).unwrap();
        assert_eq!(store.next_queued(1).unwrap().unwrap().id, second.id);

        // A second candidate for an already consumed queue entry loses.
        let duplicate = UnprocessedSuggestion::from_queued(&first);
        store.insert_unprocessed(&duplicate).unwrap();
        assert_eq!(store.claim(duplicate.id, None).unwrap(), ClaimResult::AlreadyClaimed);

        store.delete_queued(second.id).unwrap();
        assert!(store.next_queued(1).unwrap().is_none());
        assert!(store.queued(second.id).unwrap().deleted);
    }

    #[test]
    fn enqueue_validates_assignments() {
        let store = store_with_experiment();
        assert!(store.enqueue(QueuedSuggestion::new(1, point(42.0), None)).is_err());
    }

    #[test]
    fn hyperparameter_freshness() {
        let store = store_with_experiment();
        assert!(store.update_hyperparameters(1, serde_json::json!({"v": 1}), 10).unwrap());
        assert!(!store.update_hyperparameters(1, serde_json::json!({"v": 0}), 5).unwrap());
        assert!(store.update_hyperparameters(1, serde_json::json!({"v": 2}), 10).unwrap());

        let args = store.read_history(1).unwrap();
        let stored = args.hyperparameters.unwrap();
        assert_eq!(stored.values["v"], 2);
        assert_eq!(stored.observation_count, 10);
    }

    #[test]
    fn update_observation_replaces_record() {
        let store = store_with_experiment();
        let created = store
            .create_observation(Observation::new(1, point(1.0)).with_value("y", 1.0))
            .unwrap();
        let replaced = Observation {
            id: created.id,
            ..Observation::new(1, point(1.0)).failed()
        };
        store.update_observation(replaced).unwrap();
        let args = store.read_history(1).unwrap();
        assert_eq!(args.failure_count, 1);

        let missing = Observation {
            id: 999,
            ..Observation::new(1, point(1.0))
        };
        assert!(store.update_observation(missing).is_err());
    }
}
