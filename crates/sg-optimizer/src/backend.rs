//! Compute backend seam: point generation and model refitting.
//!
//! The model mathematics lives behind [`ComputeBackend`]. The bundled
//! [`LocalComputeBackend`] implements random search exactly and answers the
//! model-based entry points with a perturbation heuristic around the
//! incumbent best observation, which is enough to drive the engine without a
//! remote service.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sg_types::{
    Assignments, BackendError, Experiment, Objective, Observation, OptimizationArgs, ParameterKind,
    ParameterValue,
};
use std::collections::HashMap;
use tracing::debug;

use crate::strategy::random::{random_candidate, sample_parameter};
use crate::strategy::Candidate;

/// Default length scale, as a fraction of each parameter's range.
const DEFAULT_LENGTH_SCALE: f64 = 0.1;
const MIN_LENGTH_SCALE: f64 = 0.05;
const MAX_LENGTH_SCALE: f64 = 0.5;
/// Share of the ranked history SPE draws its base points from.
const SPE_TOP_FRACTION: f64 = 0.25;

/// Everything a model-based entry point receives.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRequest<'a> {
    pub experiment: &'a Experiment,
    pub observations: Vec<&'a Observation>,
    pub open_suggestions: Vec<&'a Assignments>,
    pub hyperparameters: Option<&'a Value>,
    pub count: usize,
}

impl<'a> ModelRequest<'a> {
    pub fn new(
        experiment: &'a Experiment,
        args: &'a OptimizationArgs,
        hyperparameters: Option<&'a Value>,
        count: usize,
    ) -> Self {
        Self {
            experiment,
            observations: args.observations().collect(),
            open_suggestions: args.open_suggestions.iter().map(|s| &s.assignments).collect(),
            hyperparameters,
            count,
        }
    }
}

/// External point generator.
pub trait ComputeBackend: Send + Sync {
    fn random_search_next_points(
        &self,
        experiment: &Experiment,
        count: usize,
    ) -> Result<Vec<Candidate>, BackendError>;

    fn gp_next_points(&self, request: &ModelRequest<'_>) -> Result<Vec<Candidate>, BackendError>;

    fn gp_search_next_points(&self, request: &ModelRequest<'_>) -> Result<Vec<Candidate>, BackendError>;

    /// Refit GP hyperparameters; `request.hyperparameters` is the prior fit.
    fn update_hyperparameters(&self, request: &ModelRequest<'_>) -> Result<Value, BackendError>;

    fn spe_next_points(&self, request: &ModelRequest<'_>) -> Result<Vec<Candidate>, BackendError>;

    fn spe_search_next_points(&self, request: &ModelRequest<'_>) -> Result<Vec<Candidate>, BackendError>;
}

/// Hyperparameters understood by [`LocalComputeBackend`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpHyperparameters {
    /// Per-parameter length scale as a fraction of the parameter's range.
    pub length_scales: HashMap<String, f64>,
    pub observation_count: u64,
}

impl GpHyperparameters {
    pub fn parse(value: &Value) -> Result<Self, BackendError> {
        let parsed: Self = serde_json::from_value(value.clone()).map_err(|e| {
            BackendError::MalformedPayload {
                message: format!("hyperparameters: {e}"),
            }
        })?;
        if let Some((name, scale)) = parsed
            .length_scales
            .iter()
            .find(|(_, s)| !s.is_finite() || **s <= 0.0)
        {
            return Err(BackendError::MalformedPayload {
                message: format!("length scale for {name} is {scale}"),
            });
        }
        Ok(parsed)
    }

    fn scale(&self, parameter: &str) -> f64 {
        self.length_scales
            .get(parameter)
            .copied()
            .unwrap_or(DEFAULT_LENGTH_SCALE)
    }
}

/// In-process backend.
pub struct LocalComputeBackend {
    rng: Mutex<StdRng>,
    constraint_max_tries: usize,
}

impl LocalComputeBackend {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_rng(&mut rand::rng()))
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            constraint_max_tries: 1000,
        }
    }

    pub fn with_constraint_max_tries(mut self, tries: usize) -> Self {
        self.constraint_max_tries = tries;
        self
    }

    fn random_points(&self, experiment: &Experiment, count: usize) -> Result<Vec<Candidate>, BackendError> {
        let mut rng = self.rng.lock();
        (0..count)
            .map(|_| {
                random_candidate(experiment, self.constraint_max_tries, &mut *rng).map_err(|e| {
                    BackendError::Rejected {
                        message: e.to_string(),
                    }
                })
            })
            .collect()
    }

    /// Perturb `base` by `scale(parameter)` of each range. Points that break
    /// a linear constraint are replaced by constrained random samples.
    fn perturb_points(
        &self,
        experiment: &Experiment,
        bases: &[&Assignments],
        count: usize,
        scale: impl Fn(&str) -> f64,
    ) -> Result<Vec<Candidate>, BackendError> {
        let rejected = |message: String| BackendError::Rejected { message };
        let mut rng = self.rng.lock();
        let mut points = Vec::with_capacity(count);
        for _ in 0..count {
            let base = bases[rng.random_range(0..bases.len())];
            let assignments = perturb(experiment, base, &scale, &mut *rng)
                .map_err(|e| rejected(e.to_string()))?;
            let point = if experiment.satisfies_constraints(&assignments) {
                // Task left unset; callers attach the cheapest one.
                Candidate::new(assignments, None)
            } else {
                random_candidate(experiment, self.constraint_max_tries, &mut *rng)
                    .map_err(|e| rejected(e.to_string()))?
            };
            points.push(point);
        }
        Ok(points)
    }
}

impl Default for LocalComputeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for LocalComputeBackend {
    fn random_search_next_points(
        &self,
        experiment: &Experiment,
        count: usize,
    ) -> Result<Vec<Candidate>, BackendError> {
        self.random_points(experiment, count)
    }

    fn gp_next_points(&self, request: &ModelRequest<'_>) -> Result<Vec<Candidate>, BackendError> {
        let hyperparameters = request
            .hyperparameters
            .map(GpHyperparameters::parse)
            .transpose()?;
        let ranked = ranked_observations(request);
        let Some(best) = ranked.first() else {
            return self.random_points(request.experiment, request.count);
        };
        debug!(
            experiment_id = %request.experiment.id,
            observation_id = best.id,
            "perturbing incumbent"
        );
        self.perturb_points(request.experiment, &[&best.assignments], request.count, |name| {
            hyperparameters
                .as_ref()
                .map_or(DEFAULT_LENGTH_SCALE, |h| h.scale(name))
        })
    }

    fn gp_search_next_points(&self, request: &ModelRequest<'_>) -> Result<Vec<Candidate>, BackendError> {
        self.random_points(request.experiment, request.count)
    }

    fn update_hyperparameters(&self, request: &ModelRequest<'_>) -> Result<Value, BackendError> {
        if let Some(prior) = request.hyperparameters {
            GpHyperparameters::parse(prior)?;
        }
        let successful: Vec<&Observation> = request
            .observations
            .iter()
            .copied()
            .filter(|o| !o.failed)
            .collect();

        let mut length_scales = HashMap::new();
        for parameter in &request.experiment.parameters {
            let range = match parameter.kind {
                ParameterKind::Continuous { min, max } if parameter.is_log() => Some((min.ln(), max.ln())),
                ParameterKind::Continuous { min, max } => Some((min, max)),
                ParameterKind::Integer { min, max } => Some((min as f64, max as f64)),
                _ => None,
            };
            let Some((low, high)) = range else { continue };
            let width = (high - low).max(f64::EPSILON);
            let normalized: Vec<f64> = successful
                .iter()
                .filter_map(|o| o.assignments.get(&parameter.name))
                .filter_map(ParameterValue::as_f64)
                .map(|x| if parameter.is_log() { x.ln() } else { x })
                .map(|x| (x - low) / width)
                .collect();
            let scale = spread(&normalized)
                .unwrap_or(DEFAULT_LENGTH_SCALE)
                .clamp(MIN_LENGTH_SCALE, MAX_LENGTH_SCALE);
            length_scales.insert(parameter.name.clone(), scale);
        }

        let fitted = GpHyperparameters {
            length_scales,
            observation_count: request.observations.len() as u64,
        };
        serde_json::to_value(fitted).map_err(|e| BackendError::MalformedPayload {
            message: e.to_string(),
        })
    }

    fn spe_next_points(&self, request: &ModelRequest<'_>) -> Result<Vec<Candidate>, BackendError> {
        let ranked = ranked_observations(request);
        if ranked.is_empty() {
            return self.random_points(request.experiment, request.count);
        }
        let top = ((ranked.len() as f64 * SPE_TOP_FRACTION).ceil() as usize).max(1);
        let bases: Vec<&Assignments> = ranked[..top].iter().map(|o| &o.assignments).collect();
        self.perturb_points(request.experiment, &bases, request.count, |_| DEFAULT_LENGTH_SCALE)
    }

    fn spe_search_next_points(&self, request: &ModelRequest<'_>) -> Result<Vec<Candidate>, BackendError> {
        self.random_points(request.experiment, request.count)
    }
}

/// Successful observations with a value for the first optimized metric,
/// best first.
fn ranked_observations<'a>(request: &ModelRequest<'a>) -> Vec<&'a Observation> {
    let Some(metric) = request.experiment.optimized_metrics().next() else {
        return Vec::new();
    };
    let mut ranked: Vec<(&Observation, f64)> = request
        .observations
        .iter()
        .copied()
        .filter(|o| !o.failed)
        .filter_map(|o| o.value(&metric.name).map(|v| (o, v)))
        .filter(|(_, v)| v.is_finite())
        .collect();
    match metric.objective {
        Objective::Maximize => ranked.sort_by(|a, b| b.1.total_cmp(&a.1)),
        Objective::Minimize => ranked.sort_by(|a, b| a.1.total_cmp(&b.1)),
    }
    ranked.into_iter().map(|(o, _)| o).collect()
}

fn spread(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Move every active parameter of `base` by up to `scale` of its range.
/// Enumerated parameters switch to a random value with probability `scale`.
fn perturb<R: Rng + ?Sized>(
    experiment: &Experiment,
    base: &Assignments,
    scale: &impl Fn(&str) -> f64,
    rng: &mut R,
) -> Result<Assignments, sg_types::SegmentError> {
    let mut point = Assignments::new();
    for conditional in &experiment.conditionals {
        let kept = base
            .get(&conditional.name)
            .and_then(ParameterValue::as_str)
            .filter(|v| conditional.values.iter().any(|c| c == v));
        let value = match kept {
            Some(v) => v.to_string(),
            None => conditional.values[rng.random_range(0..conditional.values.len())].clone(),
        };
        point.insert(conditional.name.clone(), ParameterValue::Categorical(value));
    }

    for parameter in &experiment.parameters {
        if !parameter.is_active(&point) {
            continue;
        }
        let s = scale(&parameter.name);
        let value = match (&parameter.kind, base.get(&parameter.name)) {
            (ParameterKind::Continuous { min, max }, Some(v)) if v.as_f64().is_some() => {
                let x = v.as_f64().unwrap_or(*min);
                if parameter.is_log() && x > 0.0 {
                    let width = max.ln() - min.ln();
                    let moved = x.ln() + rng.random_range(-s..=s) * width;
                    ParameterValue::Float(moved.exp().clamp(*min, *max))
                } else {
                    let moved = x + rng.random_range(-s..=s) * (max - min);
                    ParameterValue::Float(moved.clamp(*min, *max))
                }
            }
            (ParameterKind::Integer { min, max }, Some(ParameterValue::Int(v))) => {
                let reach = (s * (max - min) as f64).round().max(1.0) as i64;
                ParameterValue::Int((v + rng.random_range(-reach..=reach)).clamp(*min, *max))
            }
            (_, Some(v)) if parameter.contains(v) && rng.random::<f64>() >= s => v.clone(),
            _ => sample_parameter(parameter, rng)?,
        };
        point.insert(parameter.name.clone(), value);
    }
    Ok(point)
}
