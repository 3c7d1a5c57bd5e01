use thiserror::Error;
use uuid::Uuid;

use crate::experiment::ExperimentId;

/// Main error type for the suggestion engine
#[derive(Error, Debug)]
pub enum SgError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Segment error: {0}")]
    Segment(#[from] SegmentError),

    #[error("Could not process suggestion for experiment {experiment_id} after {attempts} attempts")]
    CouldNotProcessSuggestion {
        experiment_id: ExperimentId,
        attempts: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl SgError {
    /// Whether the broker may log this error and keep going toward a
    /// random fallback instead of failing the request.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            SgError::Strategy(_) | SgError::Backend(_) | SgError::Segment(_)
        )
    }
}

/// Persistence errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Experiment not found: {experiment_id}")]
    ExperimentNotFound { experiment_id: ExperimentId },

    #[error("Suggestion not found: {suggestion_id}")]
    SuggestionNotFound { suggestion_id: Uuid },

    #[error("Queued suggestion not found: {queued_id}")]
    QueuedNotFound { queued_id: u64 },

    #[error("Observation not found: {observation_id}")]
    ObservationNotFound { observation_id: u64 },

    #[error("Duplicate record: {message}")]
    Duplicate { message: String },

    #[error("Store internal error: {message}")]
    Internal { message: String },
}

/// Strategy-related errors. All of these are tolerated by the broker.
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Backend call failed: {0}")]
    Backend(#[from] BackendError),

    #[error("Malformed backend output: {message}")]
    MalformedBackendOutput { message: String },

    #[error("No assignment satisfying the linear constraints after {tries} tries")]
    ConstraintsUnsatisfied { tries: usize },

    #[error("Segmenter failure: {0}")]
    Segment(#[from] SegmentError),
}

/// Errors surfaced by a compute backend.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("compute backend unavailable: {message}")]
    Unavailable { message: String },

    #[error("compute backend rejected the request: {message}")]
    Rejected { message: String },

    #[error("malformed payload: {message}")]
    MalformedPayload { message: String },
}

/// Parameter segmentation errors
#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("Parameter {parameter} has an empty domain")]
    EmptyDomain { parameter: String },

    #[error("Sampled value {value} for {parameter} lies outside its interval")]
    OutsideInterval { parameter: String, value: String },

    #[error("Interval kind does not match parameter {parameter}")]
    KindMismatch { parameter: String },
}

/// Result type alias for suggestion engine operations
pub type SgResult<T> = Result<T, SgError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::SgError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::SgError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::SgError::Config(format!($($arg)*))
    };
}
