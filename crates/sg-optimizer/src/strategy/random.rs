//! Independent random sampling across the parameter space.

use rand::Rng;
use sg_types::{
    Assignments, Experiment, Parameter, ParameterKind, ParameterValue, SegmentError, StrategyError,
};

use super::{check_backend_points, Candidate, StrategyContext};

/// Uniform random search. Sampling itself is delegated to the compute
/// backend's random search entry point.
#[derive(Debug, Clone, Default)]
pub struct RandomStrategy;

impl RandomStrategy {
    pub fn new() -> Self {
        Self
    }

    pub fn propose(
        &self,
        ctx: &StrategyContext<'_>,
        experiment: &Experiment,
        count: usize,
    ) -> Result<Vec<Candidate>, StrategyError> {
        let points = ctx.backend.random_search_next_points(experiment, count)?;
        check_backend_points(experiment, points)
    }
}

/// Draw one value from the whole domain of `parameter`.
pub fn sample_parameter<R: Rng + ?Sized>(
    parameter: &Parameter,
    rng: &mut R,
) -> Result<ParameterValue, SegmentError> {
    let empty = || SegmentError::EmptyDomain {
        parameter: parameter.name.clone(),
    };
    let value = match &parameter.kind {
        ParameterKind::Continuous { min, max } => {
            if parameter.is_log() {
                let log_value: f64 = rng.random_range(min.ln()..=max.ln());
                ParameterValue::Float(log_value.exp().clamp(*min, *max))
            } else {
                ParameterValue::Float(rng.random_range(*min..=*max))
            }
        }
        ParameterKind::Integer { min, max } => ParameterValue::Int(rng.random_range(*min..=*max)),
        ParameterKind::Categorical { .. } => {
            let active = parameter.active_categories();
            if active.is_empty() {
                return Err(empty());
            }
            ParameterValue::Categorical(active[rng.random_range(0..active.len())].to_string())
        }
        ParameterKind::Grid { values } => {
            if values.is_empty() {
                return Err(empty());
            }
            ParameterValue::Float(values[rng.random_range(0..values.len())])
        }
    };
    Ok(value)
}

/// One random point ignoring linear constraints. Conditionals are drawn
/// first; only the parameters they activate receive values.
pub fn sample_unconstrained<R: Rng + ?Sized>(
    experiment: &Experiment,
    rng: &mut R,
) -> Result<Assignments, SegmentError> {
    let mut assignments = Assignments::new();
    for conditional in &experiment.conditionals {
        if conditional.values.is_empty() {
            return Err(SegmentError::EmptyDomain {
                parameter: conditional.name.clone(),
            });
        }
        let value = &conditional.values[rng.random_range(0..conditional.values.len())];
        assignments.insert(conditional.name.clone(), ParameterValue::Categorical(value.clone()));
    }
    for parameter in &experiment.parameters {
        if parameter.is_active(&assignments) {
            let value = sample_parameter(parameter, rng)?;
            assignments.insert(parameter.name.clone(), value);
        }
    }
    Ok(assignments)
}

/// Random point satisfying the linear constraints, by rejection sampling.
pub fn sample_assignments<R: Rng + ?Sized>(
    experiment: &Experiment,
    max_tries: usize,
    rng: &mut R,
) -> Result<Assignments, StrategyError> {
    for _ in 0..max_tries.max(1) {
        let assignments = sample_unconstrained(experiment, rng)?;
        if experiment.satisfies_constraints(&assignments) {
            return Ok(assignments);
        }
    }
    Err(StrategyError::ConstraintsUnsatisfied { tries: max_tries })
}

/// Uniformly chosen task name for multitask experiments.
pub fn random_task<R: Rng + ?Sized>(experiment: &Experiment, rng: &mut R) -> Option<String> {
    if experiment.tasks.is_empty() {
        return None;
    }
    Some(experiment.tasks[rng.random_range(0..experiment.tasks.len())].name.clone())
}

/// A complete random candidate.
pub fn random_candidate<R: Rng + ?Sized>(
    experiment: &Experiment,
    max_tries: usize,
    rng: &mut R,
) -> Result<Candidate, StrategyError> {
    let assignments = sample_assignments(experiment, max_tries, rng)?;
    Ok(Candidate::new(assignments, random_task(experiment, rng)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use sg_types::{Conditional, ConstraintKind, LinearConstraint, Task};

    fn sample_experiment() -> Experiment {
        Experiment::new(1, "random")
            .with_parameter(Parameter::integer("short_period", 5, 15))
            .with_parameter(Parameter::continuous("position_size", 0.5, 1.0))
            .with_parameter(Parameter::continuous("lr", 1e-5, 1e-1).with_log_transform())
            .with_parameter(Parameter::categorical("strategy", &["ma_crossover", "momentum", "mean_reversion"]))
            .with_parameter(Parameter::grid("window", vec![5.0, 10.0, 20.0]))
    }

    #[test]
    fn random_points_respect_bounds() {
        let experiment = sample_experiment();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let point = sample_assignments(&experiment, 10, &mut rng).unwrap();
            experiment.validate_assignments(&point, None).unwrap();
        }
    }

    #[test]
    fn conditional_sampling_only_assigns_active() {
        let experiment = Experiment::new(2, "cond")
            .with_conditional(Conditional::new("kernel", &["rbf", "poly"]))
            .with_parameter(Parameter::continuous("gamma", 0.0, 1.0).with_condition("kernel", &["rbf"]))
            .with_parameter(Parameter::integer("degree", 2, 5).with_condition("kernel", &["poly"]));
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let point = sample_assignments(&experiment, 10, &mut rng).unwrap();
            assert_eq!(point.len(), 2);
            experiment.validate_assignments(&point, None).unwrap();
        }
    }

    #[test]
    fn constraints_by_rejection() {
        let experiment = Experiment::new(3, "constrained")
            .with_parameter(Parameter::continuous("x", 0.0, 1.0))
            .with_parameter(Parameter::continuous("y", 0.0, 1.0))
            .with_linear_constraint(LinearConstraint::new(ConstraintKind::LessThan, &[("x", 1.0), ("y", 1.0)], 0.5));
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..50 {
            let point = sample_assignments(&experiment, 1000, &mut rng).unwrap();
            assert!(experiment.satisfies_constraints(&point));
        }
    }

    #[test]
    fn infeasible_constraints_error() {
        let experiment = Experiment::new(4, "infeasible")
            .with_parameter(Parameter::continuous("x", 0.0, 1.0))
            .with_linear_constraint(LinearConstraint::new(ConstraintKind::GreaterThan, &[("x", 1.0)], 2.0));
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            sample_assignments(&experiment, 20, &mut rng),
            Err(StrategyError::ConstraintsUnsatisfied { tries: 20 })
        ));
    }

    #[test]
    fn multitask_candidates_carry_task() {
        let experiment = sample_experiment()
            .with_task(Task::new("low", 0.2))
            .with_task(Task::new("high", 1.0));
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..20 {
            let candidate = random_candidate(&experiment, 10, &mut rng).unwrap();
            let task = candidate.task.as_deref().unwrap();
            assert!(task == "low" || task == "high");
        }
    }
}
