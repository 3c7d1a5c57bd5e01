//! Mapping between conditional experiments and a flat, unconditioned view.
//!
//! Samplers that need a fixed set of dimensions work on the unconditioned
//! view: every conditional becomes a categorical parameter and no parameter
//! is gated. Points from history are completed with replacement values for
//! the parameters their conditionals switched off; sampled points are
//! projected back by dropping the parameters that do not apply.

use sg_types::{Assignments, Experiment, Parameter, ParameterKind, ParameterValue};

/// Flat view of a conditional experiment.
#[derive(Debug, Clone)]
pub struct Unconditioned {
    pub experiment: Experiment,
    /// Stand-in values for gated parameters missing from a point.
    pub replacements: Assignments,
}

impl Unconditioned {
    /// Complete `assignments` with replacement values for absent parameters.
    pub fn fill(&self, assignments: &Assignments) -> Assignments {
        let mut filled = assignments.clone();
        for (name, value) in &self.replacements {
            filled.entry(name.clone()).or_insert_with(|| value.clone());
        }
        filled
    }
}

/// Materialize conditionals as categorical parameters.
pub fn to_unconditioned(experiment: &Experiment) -> Unconditioned {
    let mut flat = experiment.clone();
    flat.conditionals.clear();

    let mut replacements = Assignments::new();
    let mut parameters: Vec<Parameter> = experiment
        .conditionals
        .iter()
        .map(|c| {
            let values: Vec<&str> = c.values.iter().map(String::as_str).collect();
            Parameter::categorical(c.name.clone(), &values)
        })
        .collect();

    for parameter in &experiment.parameters {
        if !parameter.conditions.is_empty() {
            if let Some(value) = replacement_value(parameter) {
                replacements.insert(parameter.name.clone(), value);
            }
        }
        let mut ungated = parameter.clone();
        ungated.conditions.clear();
        parameters.push(ungated);
    }
    flat.parameters = parameters;

    Unconditioned {
        experiment: flat,
        replacements,
    }
}

/// Drop the parameters the point's conditional values switch off.
pub fn from_unconditioned(original: &Experiment, mut assignments: Assignments) -> Assignments {
    let keep: Vec<String> = original
        .conditionals
        .iter()
        .map(|c| c.name.clone())
        .chain(original.active_parameters(&assignments).map(|p| p.name.clone()))
        .collect();
    assignments.retain(|name, _| keep.contains(name));
    assignments
}

fn replacement_value(parameter: &Parameter) -> Option<ParameterValue> {
    match &parameter.kind {
        ParameterKind::Continuous { min, .. } => Some(ParameterValue::Float(*min)),
        ParameterKind::Integer { min, .. } => Some(ParameterValue::Int(*min)),
        ParameterKind::Categorical { .. } => parameter
            .active_categories()
            .into_iter()
            .min()
            .map(|c| ParameterValue::Categorical(c.to_string())),
        ParameterKind::Grid { values } => values
            .iter()
            .copied()
            .min_by(f64::total_cmp)
            .map(ParameterValue::Float),
    }
}
