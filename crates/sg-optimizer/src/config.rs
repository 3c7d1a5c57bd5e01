//! Broker and strategy policy configuration.

use serde::{Deserialize, Serialize};
use sg_types::{config_error, SgResult};

/// Which model-lite variant the selection policy uses once an experiment
/// outgrows the GP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelLite {
    #[default]
    Spe,
    LatinHypercube,
}

/// Thresholds for the strategy selection policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionPolicy {
    /// Above this dimension the GP is skipped.
    pub max_gp_dimension: usize,
    /// Above this many observations the GP is skipped.
    pub max_gp_observations: u64,
    /// Always use the model-lite variant once past initialization.
    pub force_model_lite: bool,
    pub model_lite: ModelLite,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            max_gp_dimension: 20,
            max_gp_observations: 1000,
            force_model_lite: false,
            model_lite: ModelLite::Spe,
        }
    }
}

/// Stencil length growth for Latin-hypercube sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StencilConfig {
    pub min_length: usize,
    /// Stencil slots per parallel worker.
    pub bandwidth_multiplier: usize,
    /// Stencil slots per numeric dimension.
    pub dimension_multiplier: usize,
}

impl Default for StencilConfig {
    fn default() -> Self {
        Self {
            min_length: 4,
            bandwidth_multiplier: 2,
            dimension_multiplier: 1,
        }
    }
}

/// Top-level configuration for a [`Broker`](crate::Broker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Claim attempts before falling back to random.
    pub max_attempts: usize,

    /// Duplicate candidates that may be discarded without consuming an
    /// attempt.
    pub max_ignored_candidates: usize,

    /// Fail with `CouldNotProcessSuggestion` instead of serving a fallback
    /// random point.
    pub forbid_random_fallback: bool,

    /// Points requested per strategy call; extras go to the candidate pool.
    /// `None` uses the experiment's parallel bandwidth.
    pub batch_size: Option<usize>,

    /// Rejection-sampling budget for linear constraints.
    pub constraint_max_tries: usize,

    pub selection: SelectionPolicy,
    pub stencil: StencilConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_ignored_candidates: 8,
            forbid_random_fallback: false,
            batch_size: None,
            constraint_max_tries: 1000,
            selection: SelectionPolicy::default(),
            stencil: StencilConfig::default(),
        }
    }
}

impl BrokerConfig {
    pub fn with_max_attempts(mut self, n: usize) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn with_forbid_random_fallback(mut self, forbid: bool) -> Self {
        self.forbid_random_fallback = forbid;
        self
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = Some(n);
        self
    }

    pub fn with_selection(mut self, selection: SelectionPolicy) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_stencil(mut self, stencil: StencilConfig) -> Self {
        self.stencil = stencil;
        self
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> SgResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `SG_*` environment variables.
    pub fn from_env() -> SgResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SgResult<Self> {
        let mut config = Self::default();
        if let Some(v) = parse_var(&lookup, "SG_MAX_ATTEMPTS")? {
            config.max_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, "SG_FORBID_RANDOM_FALLBACK")? {
            config.forbid_random_fallback = v;
        }
        if let Some(v) = parse_var(&lookup, "SG_MAX_GP_DIMENSION")? {
            config.selection.max_gp_dimension = v;
        }
        if let Some(v) = parse_var(&lookup, "SG_MAX_GP_OBSERVATIONS")? {
            config.selection.max_gp_observations = v;
        }
        if let Some(v) = parse_var(&lookup, "SG_FORCE_MODEL_LITE")? {
            config.selection.force_model_lite = v;
        }
        if let Some(v) = parse_var(&lookup, "SG_STENCIL_MIN_LENGTH")? {
            config.stencil.min_length = v;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SgResult<()> {
        if self.max_attempts == 0 {
            return Err(config_error!("max_attempts must be at least 1"));
        }
        if self.stencil.min_length == 0 {
            return Err(config_error!("stencil.min_length must be at least 1"));
        }
        if self.constraint_max_tries == 0 {
            return Err(config_error!("constraint_max_tries must be at least 1"));
        }
        if self.batch_size == Some(0) {
            return Err(config_error!("batch_size must be positive when set"));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> SgResult<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| config_error!("{key} has invalid value {raw:?}")),
    }
}
