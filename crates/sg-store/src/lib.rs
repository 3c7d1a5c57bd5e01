//! # sg-store
//!
//! Persistence seam for the suggestion engine. The [`SuggestionStore`] trait
//! is everything the broker needs from a database: history snapshots, the
//! candidate pool, the user queue, hyperparameter storage and the atomic
//! claim primitive. [`MemoryStore`] implements it with concurrent in-memory
//! tables.

mod memory;

pub use memory::MemoryStore;

use sg_types::{
    ClaimResult, ExperimentId, Observation, OptimizationArgs, QueuedSuggestion, SgResult,
    UnprocessedSuggestion,
};
use uuid::Uuid;

/// Storage operations used by the broker and the queue accessor.
///
/// Implementations must be `Send + Sync`: many `serve_suggestion` calls may
/// run against one store at the same time. [`claim`](Self::claim) is the only
/// operation where concurrent callers can observe each other and must be
/// atomic and exclusive.
pub trait SuggestionStore: Send + Sync {
    /// Snapshot the experiment's history. Observations are ordered by id.
    fn read_history(&self, experiment_id: ExperimentId) -> SgResult<OptimizationArgs>;

    /// Add an unclaimed candidate to the pool.
    fn insert_unprocessed(&self, suggestion: &UnprocessedSuggestion) -> SgResult<()>;

    /// Tombstone a pool candidate. Deleting twice, or deleting a claimed
    /// candidate, is a no-op.
    fn delete_unprocessed(&self, suggestion_id: Uuid) -> SgResult<()>;

    /// Create the processed record for `suggestion_id`. Exactly one caller
    /// ever gets [`ClaimResult::Claimed`] for a given candidate, and for a
    /// given originating queued suggestion.
    fn claim(&self, suggestion_id: Uuid, session: Option<&str>) -> SgResult<ClaimResult>;

    /// Lowest-id queued suggestion that is neither deleted nor consumed.
    fn next_queued(&self, experiment_id: ExperimentId) -> SgResult<Option<QueuedSuggestion>>;

    /// Append to the experiment's queue; returns the stored record.
    fn enqueue(&self, queued: QueuedSuggestion) -> SgResult<QueuedSuggestion>;

    /// Tombstone a queued suggestion.
    fn delete_queued(&self, queued_id: u64) -> SgResult<()>;

    /// Persist an observation and link it to its suggestion; returns the
    /// stored record with its id.
    fn create_observation(&self, observation: Observation) -> SgResult<Observation>;

    /// Replace an existing observation wholesale.
    fn update_observation(&self, observation: Observation) -> SgResult<()>;

    /// Store refreshed hyperparameters unless a value fitted on more
    /// observations is already present. Returns whether the write happened.
    fn update_hyperparameters(
        &self,
        experiment_id: ExperimentId,
        values: serde_json::Value,
        observation_count: u64,
    ) -> SgResult<bool>;
}
