//! Suggestion broker: queue priority, strategy selection and the claim loop.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sg_store::SuggestionStore;
use sg_types::{
    internal_error, Assignments, ClaimResult, Experiment, OptimizationArgs, ProcessedSuggestion,
    SgError, SgResult, StrategyError, Suggestion, SuggestionSource, UnprocessedSuggestion,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::ComputeBackend;
use crate::config::BrokerConfig;
use crate::strategy::random::random_candidate;
use crate::strategy::{select_strategy, Strategy, StrategyContext, StrategyKind};

/// Serves suggestions for any number of experiments. Cheap to share behind
/// an `Arc`; concurrent callers only meet at the store's claim.
pub struct Broker {
    store: Arc<dyn SuggestionStore>,
    backend: Arc<dyn ComputeBackend>,
    config: BrokerConfig,
    rng: Mutex<StdRng>,
}

impl Broker {
    pub fn new(
        store: Arc<dyn SuggestionStore>,
        backend: Arc<dyn ComputeBackend>,
        config: BrokerConfig,
    ) -> Self {
        Self::from_rng(store, backend, config, StdRng::from_rng(&mut rand::rng()))
    }

    /// Deterministic local sampling, for tests.
    pub fn with_seed(
        store: Arc<dyn SuggestionStore>,
        backend: Arc<dyn ComputeBackend>,
        config: BrokerConfig,
        seed: u64,
    ) -> Self {
        Self::from_rng(store, backend, config, StdRng::seed_from_u64(seed))
    }

    fn from_rng(
        store: Arc<dyn SuggestionStore>,
        backend: Arc<dyn ComputeBackend>,
        config: BrokerConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            store,
            backend,
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SuggestionStore> {
        &self.store
    }

    /// Serve and claim the next suggestion for `experiment`.
    ///
    /// Queued suggestions win over generated ones. Generated candidates are
    /// claimed with up to `max_attempts` tries before a fallback random point
    /// is served, or `CouldNotProcessSuggestion` is returned when fallback is
    /// forbidden.
    pub fn serve_suggestion(&self, experiment: &Experiment, session: Option<&str>) -> SgResult<Suggestion> {
        if let Some(suggestion) = self.serve_queued(experiment, session)? {
            return Ok(suggestion);
        }

        let attempts = match self.claim_loop(experiment, session)? {
            LoopOutcome::Served(suggestion) => return Ok(suggestion),
            LoopOutcome::Exhausted { attempts } => attempts,
        };

        if self.config.forbid_random_fallback {
            warn!(
                experiment_id = %experiment.id,
                attempts,
                "could not process suggestion and random fallback is forbidden"
            );
            return Err(SgError::CouldNotProcessSuggestion {
                experiment_id: experiment.id,
                attempts,
            });
        }
        self.serve_fallback(experiment, session)
    }

    /// Claim a caller-supplied point. No strategy and no retry loop.
    pub fn explicit_suggestion(
        &self,
        experiment: &Experiment,
        assignments: Assignments,
        task: Option<String>,
        session: Option<&str>,
    ) -> SgResult<Suggestion> {
        experiment.validate_assignments(&assignments, task.as_deref())?;
        let candidate = UnprocessedSuggestion::new(experiment.id, SuggestionSource::UserCreated, assignments, task);
        self.store.insert_unprocessed(&candidate)?;
        match self.store.claim(candidate.id, session)? {
            ClaimResult::Claimed(processed) => Ok(served(experiment, candidate, processed)),
            ClaimResult::AlreadyClaimed => Err(internal_error!(
                "user-created suggestion {} was claimed by another caller",
                candidate.id
            )),
        }
    }

    fn serve_queued(&self, experiment: &Experiment, session: Option<&str>) -> SgResult<Option<Suggestion>> {
        for _ in 0..self.config.max_attempts {
            let Some(queued) = self.store.next_queued(experiment.id)? else {
                return Ok(None);
            };
            let candidate = UnprocessedSuggestion::from_queued(&queued);
            self.store.insert_unprocessed(&candidate)?;
            match self.store.claim(candidate.id, session)? {
                ClaimResult::Claimed(processed) => return Ok(Some(served(experiment, candidate, processed))),
                ClaimResult::AlreadyClaimed => {
                    debug!(
                        experiment_id = %experiment.id,
                        queued_id = queued.id,
                        "queued suggestion taken by a concurrent caller"
                    );
                    self.store.delete_unprocessed(candidate.id)?;
                }
            }
        }
        Ok(None)
    }

    fn claim_loop(&self, experiment: &Experiment, session: Option<&str>) -> SgResult<LoopOutcome> {
        let mut attempts = 0;
        let mut ignored = 0;
        let mut skip = 0;
        let mut high_contention = false;

        while attempts < self.config.max_attempts {
            let args = self.store.read_history(experiment.id)?;
            // Discarded pool entries drop out of the next snapshot on their own.
            let from_pool = !high_contention && !args.available_suggestions.is_empty();

            let next = if high_contention {
                self.contention_candidate(experiment)
            } else {
                self.next_candidate(experiment, &args, skip)
            };
            let candidate = match next {
                Ok(candidate) => candidate,
                Err(e) if e.is_soft() => {
                    warn!(
                        experiment_id = %experiment.id,
                        attempt = attempts,
                        error = %e,
                        "strategy failed, falling back"
                    );
                    break;
                }
                Err(e) => return Err(e),
            };

            if args.is_open(&candidate.assignments, candidate.task.as_deref()) {
                self.store.delete_unprocessed(candidate.id)?;
                if !from_pool {
                    skip += 1;
                }
                ignored += 1;
                if ignored > self.config.max_ignored_candidates {
                    attempts += 1;
                }
                debug!(
                    experiment_id = %experiment.id,
                    suggestion_id = %candidate.id,
                    skip,
                    "discarding duplicate of an open suggestion"
                );
                continue;
            }

            match self.store.claim(candidate.id, session)? {
                ClaimResult::Claimed(processed) => {
                    return Ok(LoopOutcome::Served(served(experiment, candidate, processed)));
                }
                ClaimResult::AlreadyClaimed => {
                    attempts += 1;
                    high_contention = true;
                    debug!(
                        experiment_id = %experiment.id,
                        suggestion_id = %candidate.id,
                        attempt = attempts,
                        "claim conflict"
                    );
                }
            }
        }

        Ok(LoopOutcome::Exhausted { attempts })
    }

    /// The oldest pool entry, or fresh strategy output past the first `skip`
    /// points. Extra proposed points are added to the pool.
    fn next_candidate(
        &self,
        experiment: &Experiment,
        args: &OptimizationArgs,
        skip: usize,
    ) -> SgResult<UnprocessedSuggestion> {
        if let Some(pooled) = args.available_suggestions.first() {
            debug!(experiment_id = %experiment.id, suggestion_id = %pooled.id, "using pooled candidate");
            return Ok(pooled.clone());
        }

        let kind = select_strategy(experiment.dimension(), args.observation_count, &self.config.selection);
        let mut strategy = Strategy::for_kind(kind, &self.config, args);
        let ctx = StrategyContext {
            backend: self.backend.as_ref(),
            rng: &self.rng,
        };

        if kind == StrategyKind::Gp {
            // A failed refresh leaves the strategy on backend defaults.
            if let Ok(Some(fitted)) = strategy.refresh(&ctx, experiment, args) {
                self.persist_hyperparameters(experiment, fitted, args.observation_count);
            }
        }

        let batch = self
            .config
            .batch_size
            .unwrap_or(experiment.parallel_bandwidth as usize)
            .max(1);
        let mut proposed = strategy
            .propose(&ctx, experiment, args, batch, skip)?
            .into_iter()
            .map(|c| UnprocessedSuggestion::new(experiment.id, strategy.source(), c.assignments, c.task));
        let first = proposed.next().ok_or_else(|| StrategyError::MalformedBackendOutput {
            message: format!("{kind:?} strategy returned no points"),
        })?;

        self.store.insert_unprocessed(&first)?;
        for extra in proposed {
            self.store.insert_unprocessed(&extra)?;
        }
        debug!(
            experiment_id = %experiment.id,
            strategy = ?kind,
            observation_count = args.observation_count,
            "generated candidate"
        );
        Ok(first)
    }

    fn contention_candidate(&self, experiment: &Experiment) -> SgResult<UnprocessedSuggestion> {
        let candidate = {
            let mut rng = self.rng.lock();
            random_candidate(experiment, self.config.constraint_max_tries, &mut *rng)?
        };
        let suggestion = UnprocessedSuggestion::new(
            experiment.id,
            SuggestionSource::HighContentionRandom,
            candidate.assignments,
            candidate.task,
        );
        self.store.insert_unprocessed(&suggestion)?;
        Ok(suggestion)
    }

    fn serve_fallback(&self, experiment: &Experiment, session: Option<&str>) -> SgResult<Suggestion> {
        let candidate = {
            let mut rng = self.rng.lock();
            random_candidate(experiment, self.config.constraint_max_tries, &mut *rng)?
        };
        let suggestion = UnprocessedSuggestion::new(
            experiment.id,
            SuggestionSource::FallbackRandom,
            candidate.assignments,
            candidate.task,
        );
        self.store.insert_unprocessed(&suggestion)?;
        match self.store.claim(suggestion.id, session)? {
            ClaimResult::Claimed(processed) => Ok(served(experiment, suggestion, processed)),
            ClaimResult::AlreadyClaimed => Err(internal_error!(
                "fallback suggestion {} was claimed by another caller",
                suggestion.id
            )),
        }
    }

    fn persist_hyperparameters(&self, experiment: &Experiment, fitted: serde_json::Value, observation_count: u64) {
        match self.store.update_hyperparameters(experiment.id, fitted, observation_count) {
            Ok(true) => debug!(experiment_id = %experiment.id, observation_count, "hyperparameters stored"),
            Ok(false) => debug!(experiment_id = %experiment.id, "newer hyperparameters already stored"),
            Err(e) => warn!(experiment_id = %experiment.id, error = %e, "failed to store hyperparameters"),
        }
    }
}

enum LoopOutcome {
    Served(Suggestion),
    Exhausted { attempts: usize },
}

fn served(experiment: &Experiment, unprocessed: UnprocessedSuggestion, processed: ProcessedSuggestion) -> Suggestion {
    info!(
        experiment_id = %experiment.id,
        suggestion_id = %unprocessed.id,
        source = %unprocessed.source,
        "Served suggestion"
    );
    Suggestion { unprocessed, processed }
}
