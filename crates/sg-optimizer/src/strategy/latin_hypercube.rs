//! Latin-hypercube style stencil sampling.
//!
//! Every parameter's domain is cut into `L` intervals. Intervals already
//! covered by an observation or an open suggestion are pruned, and each new
//! point takes one of the surviving intervals per parameter, so a batch
//! spreads across the space before any interval is revisited.

use rand::Rng;
use sg_types::{Assignments, Experiment, OptimizationArgs, Parameter, StrategyError};
use tracing::debug;

use super::random::{random_candidate, random_task, sample_parameter};
use super::{Candidate, StrategyContext};
use crate::conditionals::{from_unconditioned, to_unconditioned};
use crate::config::StencilConfig;
use crate::segmenter::{has_values, prune_intervals, sample_from_interval, segmented_intervals, Interval};

/// Number of intervals each parameter is cut into.
pub fn stencil_length(experiment: &Experiment, stencil: &StencilConfig) -> usize {
    let max_cardinality = experiment
        .parameters
        .iter()
        .filter_map(Parameter::cardinality)
        .max()
        .unwrap_or(0);
    stencil
        .min_length
        .max(max_cardinality)
        .max(experiment.parallel_bandwidth as usize * stencil.bandwidth_multiplier)
        .max(experiment.dimension() * stencil.dimension_multiplier)
}

#[derive(Debug, Clone)]
pub struct LatinHypercubeStrategy {
    stencil: StencilConfig,
    constraint_max_tries: usize,
}

impl LatinHypercubeStrategy {
    pub fn new(stencil: StencilConfig, constraint_max_tries: usize) -> Self {
        Self {
            stencil,
            constraint_max_tries,
        }
    }

    pub fn propose(
        &self,
        ctx: &StrategyContext<'_>,
        experiment: &Experiment,
        args: &OptimizationArgs,
        count: usize,
    ) -> Result<Vec<Candidate>, StrategyError> {
        let flat = to_unconditioned(experiment);
        let length = stencil_length(&flat.experiment, &self.stencil);
        let covered: Vec<_> = args.covered_points().map(|a| flat.fill(a)).collect();

        let mut stencils: Vec<(&Parameter, Vec<Interval>)> = flat
            .experiment
            .parameters
            .iter()
            .map(|parameter| {
                let mut intervals: Vec<Interval> = segmented_intervals(parameter, length)
                    .into_iter()
                    .filter(|i| has_values(parameter, i))
                    .collect();
                prune_intervals(
                    parameter,
                    &mut intervals,
                    covered.iter().filter_map(|a| a.get(&parameter.name)),
                );
                (parameter, intervals)
            })
            .collect();

        debug!(
            experiment_id = %experiment.id,
            stencil_length = length,
            covered = covered.len(),
            "latin hypercube stencil built"
        );

        let mut rng = ctx.rng.lock();
        let mut candidates = Vec::with_capacity(count);
        for _ in 0..count {
            let mut point = Assignments::new();
            for (parameter, intervals) in stencils.iter_mut() {
                let value = if intervals.is_empty() {
                    sample_parameter(parameter, &mut *rng)?
                } else {
                    let index = rng.random_range(0..intervals.len());
                    let interval = intervals.remove(index);
                    sample_from_interval(parameter, &interval, &mut *rng)?
                };
                point.insert(parameter.name.clone(), value);
            }

            let assignments = from_unconditioned(experiment, point);
            let candidate = if experiment.satisfies_constraints(&assignments) {
                Candidate::new(assignments, random_task(experiment, &mut *rng))
            } else {
                random_candidate(experiment, self.constraint_max_tries, &mut *rng)?
            };
            candidates.push(candidate);
        }
        Ok(candidates)
    }
}
