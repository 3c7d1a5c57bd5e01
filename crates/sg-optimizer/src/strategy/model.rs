//! Model-based strategies backed by the compute backend.

use serde_json::Value;
use sg_types::{Experiment, OptimizationArgs, StrategyError};
use tracing::{debug, warn};

use super::{check_backend_points, Candidate, StrategyContext};
use crate::backend::ModelRequest;

/// Gaussian-process strategy.
#[derive(Debug, Clone, Default)]
pub struct GpStrategy {
    hyperparameters: Option<Value>,
}

impl GpStrategy {
    pub fn new(hyperparameters: Option<Value>) -> Self {
        Self { hyperparameters }
    }

    pub fn hyperparameters(&self) -> Option<&Value> {
        self.hyperparameters.as_ref()
    }

    /// Refit hyperparameters from the current history. On failure the stored
    /// values are dropped so point generation falls back to the backend's
    /// defaults.
    pub fn refresh(
        &mut self,
        ctx: &StrategyContext<'_>,
        experiment: &Experiment,
        args: &OptimizationArgs,
    ) -> Result<Value, StrategyError> {
        let request = ModelRequest::new(experiment, args, self.hyperparameters.as_ref(), 0);
        match ctx.backend.update_hyperparameters(&request) {
            Ok(fitted) => {
                debug!(
                    experiment_id = %experiment.id,
                    observation_count = args.observation_count,
                    "hyperparameters refreshed"
                );
                self.hyperparameters = Some(fitted.clone());
                Ok(fitted)
            }
            Err(e) => {
                warn!(
                    experiment_id = %experiment.id,
                    error = %e,
                    "hyperparameter refresh failed, using backend defaults"
                );
                self.hyperparameters = None;
                Err(e.into())
            }
        }
    }

    pub fn propose(
        &self,
        ctx: &StrategyContext<'_>,
        experiment: &Experiment,
        args: &OptimizationArgs,
        count: usize,
    ) -> Result<Vec<Candidate>, StrategyError> {
        let points = if experiment.requires_search_mode() {
            let request = ModelRequest::new(experiment, args, None, count);
            ctx.backend.gp_search_next_points(&request)?
        } else {
            let request = ModelRequest::new(experiment, args, self.hyperparameters.as_ref(), count);
            ctx.backend.gp_next_points(&request)?
        };
        check_backend_points(experiment, points)
    }
}

/// Sequential-pruning estimator strategy for problems too large for the GP.
#[derive(Debug, Clone, Default)]
pub struct SpeStrategy;

impl SpeStrategy {
    pub fn new() -> Self {
        Self
    }

    pub fn propose(
        &self,
        ctx: &StrategyContext<'_>,
        experiment: &Experiment,
        args: &OptimizationArgs,
        count: usize,
    ) -> Result<Vec<Candidate>, StrategyError> {
        let request = ModelRequest::new(experiment, args, None, count);
        let points = if experiment.requires_search_mode() {
            ctx.backend.spe_search_next_points(&request)?
        } else {
            ctx.backend.spe_next_points(&request)?
        };
        check_backend_points(experiment, points)
    }
}
