//! Suggestion generation strategies and the policy that picks one.

pub mod latin_hypercube;
pub mod model;
pub mod random;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use sg_types::{
    Assignments, Experiment, OptimizationArgs, StrategyError, SuggestionSource,
};

use crate::backend::ComputeBackend;
use crate::config::{BrokerConfig, ModelLite, SelectionPolicy};

pub use latin_hypercube::{stencil_length, LatinHypercubeStrategy};
pub use model::{GpStrategy, SpeStrategy};
pub use random::RandomStrategy;

/// A proposed point: assignments plus the task to evaluate it on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub assignments: Assignments,
    #[serde(default)]
    pub task: Option<String>,
}

impl Candidate {
    pub fn new(assignments: Assignments, task: Option<String>) -> Self {
        Self { assignments, task }
    }
}

/// Collaborators a strategy may draw on.
pub struct StrategyContext<'a> {
    pub backend: &'a dyn ComputeBackend,
    pub rng: &'a Mutex<StdRng>,
}

/// The strategy families the selection policy chooses between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Random,
    LatinHypercube,
    Gp,
    Spe,
}

/// Pick a strategy from the experiment's dimension and history length.
///
/// Total over its inputs and re-evaluated on every broker iteration.
pub fn select_strategy(dimension: usize, observation_count: u64, policy: &SelectionPolicy) -> StrategyKind {
    let initialization = (2 * dimension).max(4) as u64;
    if observation_count <= initialization {
        StrategyKind::Random
    } else if dimension > policy.max_gp_dimension
        || observation_count > policy.max_gp_observations
        || policy.force_model_lite
    {
        match policy.model_lite {
            ModelLite::Spe => StrategyKind::Spe,
            ModelLite::LatinHypercube => StrategyKind::LatinHypercube,
        }
    } else {
        StrategyKind::Gp
    }
}

/// A configured strategy instance.
#[derive(Debug, Clone)]
pub enum Strategy {
    Random(RandomStrategy),
    LatinHypercube(LatinHypercubeStrategy),
    Gp(GpStrategy),
    Spe(SpeStrategy),
}

impl Strategy {
    pub fn for_kind(kind: StrategyKind, config: &BrokerConfig, args: &OptimizationArgs) -> Self {
        match kind {
            StrategyKind::Random => Strategy::Random(RandomStrategy::new()),
            StrategyKind::LatinHypercube => Strategy::LatinHypercube(LatinHypercubeStrategy::new(
                config.stencil.clone(),
                config.constraint_max_tries,
            )),
            StrategyKind::Gp => Strategy::Gp(GpStrategy::new(
                args.hyperparameters.as_ref().map(|h| h.values.clone()),
            )),
            StrategyKind::Spe => Strategy::Spe(SpeStrategy::new()),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Random(_) => StrategyKind::Random,
            Strategy::LatinHypercube(_) => StrategyKind::LatinHypercube,
            Strategy::Gp(_) => StrategyKind::Gp,
            Strategy::Spe(_) => StrategyKind::Spe,
        }
    }

    /// Provenance tag for points this strategy produces.
    pub fn source(&self) -> SuggestionSource {
        match self {
            Strategy::Random(_) => SuggestionSource::Random,
            Strategy::LatinHypercube(_) => SuggestionSource::LatinHypercube,
            Strategy::Gp(_) => SuggestionSource::ModelBasedGp,
            Strategy::Spe(_) => SuggestionSource::ModelBasedSpe,
        }
    }

    /// Refresh model state before proposing. Returns hyperparameters that
    /// should be persisted, if any.
    pub fn refresh(
        &mut self,
        ctx: &StrategyContext<'_>,
        experiment: &Experiment,
        args: &OptimizationArgs,
    ) -> Result<Option<serde_json::Value>, StrategyError> {
        match self {
            Strategy::Gp(gp) => gp.refresh(ctx, experiment, args).map(Some),
            _ => Ok(None),
        }
    }

    /// Produce up to `count` candidates after discarding the first `skip`
    /// the strategy would have returned.
    pub fn propose(
        &self,
        ctx: &StrategyContext<'_>,
        experiment: &Experiment,
        args: &OptimizationArgs,
        count: usize,
        skip: usize,
    ) -> Result<Vec<Candidate>, StrategyError> {
        let wanted = count + skip;
        let candidates = match self {
            Strategy::Random(s) => s.propose(ctx, experiment, wanted)?,
            Strategy::LatinHypercube(s) => s.propose(ctx, experiment, args, wanted)?,
            Strategy::Gp(s) => s.propose(ctx, experiment, args, wanted)?,
            Strategy::Spe(s) => s.propose(ctx, experiment, args, wanted)?,
        };
        Ok(candidates.into_iter().skip(skip).take(count).collect())
    }
}

/// Attach the cheapest task to multitask points the generator left without
/// one, then check every point against the experiment.
pub(crate) fn check_backend_points(
    experiment: &Experiment,
    mut points: Vec<Candidate>,
) -> Result<Vec<Candidate>, StrategyError> {
    for point in &mut points {
        if experiment.is_multitask() && point.task.is_none() {
            point.task = experiment.cheapest_task().map(|t| t.name.clone());
        }
        experiment
            .validate_assignments(&point.assignments, point.task.as_deref())
            .map_err(|e| StrategyError::MalformedBackendOutput {
                message: e.to_string(),
            })?;
    }
    Ok(points)
}
