//! Suggestion records: generated candidates, claims and the user queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::experiment::{Assignments, ExperimentId};

/// Provenance of a generated suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuggestionSource {
    Random,
    LatinHypercube,
    ModelBasedGp,
    ModelBasedSpe,
    Queued,
    UserCreated,
    FallbackRandom,
    HighContentionRandom,
}

impl SuggestionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Random => "RANDOM",
            Self::LatinHypercube => "LATIN_HYPERCUBE",
            Self::ModelBasedGp => "MODEL_BASED_GP",
            Self::ModelBasedSpe => "MODEL_BASED_SPE",
            Self::Queued => "QUEUED",
            Self::UserCreated => "USER_CREATED",
            Self::FallbackRandom => "FALLBACK_RANDOM",
            Self::HighContentionRandom => "HIGH_CONTENTION_RANDOM",
        }
    }
}

impl std::fmt::Display for SuggestionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generated candidate. Owned by the engine until claimed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnprocessedSuggestion {
    pub id: Uuid,
    pub experiment_id: ExperimentId,
    pub source: SuggestionSource,
    pub assignments: Assignments,
    #[serde(default)]
    pub task: Option<String>,
    /// Set when the candidate was derived from a queued suggestion.
    #[serde(default)]
    pub queued_id: Option<u64>,
    #[serde(default)]
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl UnprocessedSuggestion {
    pub fn new(
        experiment_id: ExperimentId,
        source: SuggestionSource,
        assignments: Assignments,
        task: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            experiment_id,
            source,
            assignments,
            task,
            queued_id: None,
            deleted: false,
            created_at: Utc::now(),
        }
    }

    /// Candidate carrying a queued suggestion's point verbatim.
    pub fn from_queued(queued: &QueuedSuggestion) -> Self {
        let mut suggestion = Self::new(
            queued.experiment_id,
            SuggestionSource::Queued,
            queued.assignments.clone(),
            queued.task.clone(),
        );
        suggestion.queued_id = Some(queued.id);
        suggestion
    }

    /// Whether this candidate carries exactly `assignments` and `task`.
    pub fn same_point(&self, assignments: &Assignments, task: Option<&str>) -> bool {
        self.assignments == *assignments && self.task.as_deref() == task
    }
}

/// The claim record binding a served suggestion to a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedSuggestion {
    pub suggestion_id: Uuid,
    pub experiment_id: ExperimentId,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub queued_id: Option<u64>,
    #[serde(default)]
    pub observation_id: Option<u64>,
    pub processed_at: DateTime<Utc>,
}

/// Outcome of the atomic claim primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimResult {
    Claimed(ProcessedSuggestion),
    AlreadyClaimed,
}

impl ClaimResult {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimResult::Claimed(_))
    }
}

/// A user-specified point waiting to be served ahead of generated ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedSuggestion {
    /// FIFO order key, assigned by the store.
    pub id: u64,
    pub experiment_id: ExperimentId,
    pub assignments: Assignments,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl QueuedSuggestion {
    pub fn new(experiment_id: ExperimentId, assignments: Assignments, task: Option<String>) -> Self {
        Self {
            id: 0,
            experiment_id,
            assignments,
            task,
            deleted: false,
            created_at: Utc::now(),
        }
    }
}

/// A suggestion handed back to a caller: the candidate plus its claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub unprocessed: UnprocessedSuggestion,
    pub processed: ProcessedSuggestion,
}

impl Suggestion {
    pub fn id(&self) -> Uuid {
        self.unprocessed.id
    }

    pub fn source(&self) -> SuggestionSource {
        self.unprocessed.source
    }

    pub fn assignments(&self) -> &Assignments {
        &self.unprocessed.assignments
    }

    pub fn task(&self) -> Option<&str> {
        self.unprocessed.task.as_deref()
    }
}
