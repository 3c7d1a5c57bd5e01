//! Experiment definitions: parameter space, conditionals, metrics, tasks and
//! linear constraints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::{SgError, SgResult};

/// Unique experiment identifier (primary key of the experiment table).
pub type ExperimentId = u64;

/// Parameter (and conditional) name → assigned value.
pub type Assignments = HashMap<String, ParameterValue>;

/// Tolerance used when checking linear constraints.
const CONSTRAINT_TOLERANCE: f64 = 1e-9;

/// A concrete value assigned to a parameter or conditional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Categorical(String),
}

impl ParameterValue {
    /// Numeric view of the value; `None` for categorical values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Categorical(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Categorical(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Categorical(v) => write!(f, "{v}"),
        }
    }
}

/// One enumerated value of a categorical parameter. Deleted values stay in
/// the definition so old observations still resolve, but are never suggested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalValue {
    pub name: String,
    #[serde(default)]
    pub deleted: bool,
}

impl CategoricalValue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            deleted: false,
        }
    }
}

/// Describes the domain of a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterKind {
    /// Continuous range [min, max].
    Continuous { min: f64, max: f64 },
    /// Integer range [min, max] inclusive.
    Integer { min: i64, max: i64 },
    /// Named categories.
    Categorical { values: Vec<CategoricalValue> },
    /// Enumerated numeric values.
    Grid { values: Vec<f64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transformation {
    /// Search in log space; only valid for continuous parameters with min > 0.
    Log,
}

/// Prior belief about where good values lie. Forwarded to the compute
/// backend untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Prior {
    Normal { mean: f64, scale: f64 },
    Beta { shape_a: f64, shape_b: f64 },
}

/// A parameter is active only when the named conditional takes one of
/// `values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterCondition {
    pub name: String,
    pub values: Vec<String>,
}

/// A single parameter dimension of the experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub kind: ParameterKind,
    #[serde(default)]
    pub transformation: Option<Transformation>,
    #[serde(default)]
    pub prior: Option<Prior>,
    #[serde(default)]
    pub conditions: Vec<ParameterCondition>,
}

impl Parameter {
    fn with_kind(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            transformation: None,
            prior: None,
            conditions: Vec::new(),
        }
    }

    pub fn continuous(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self::with_kind(name, ParameterKind::Continuous { min, max })
    }

    pub fn integer(name: impl Into<String>, min: i64, max: i64) -> Self {
        Self::with_kind(name, ParameterKind::Integer { min, max })
    }

    pub fn categorical(name: impl Into<String>, values: &[&str]) -> Self {
        Self::with_kind(
            name,
            ParameterKind::Categorical {
                values: values.iter().map(|v| CategoricalValue::new(*v)).collect(),
            },
        )
    }

    pub fn grid(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self::with_kind(name, ParameterKind::Grid { values })
    }

    pub fn with_log_transform(mut self) -> Self {
        self.transformation = Some(Transformation::Log);
        self
    }

    pub fn with_prior(mut self, prior: Prior) -> Self {
        self.prior = Some(prior);
        self
    }

    pub fn with_condition(mut self, conditional: impl Into<String>, values: &[&str]) -> Self {
        self.conditions.push(ParameterCondition {
            name: conditional.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
        });
        self
    }

    pub fn is_log(&self) -> bool {
        matches!(self.transformation, Some(Transformation::Log))
    }

    pub fn is_categorical(&self) -> bool {
        matches!(self.kind, ParameterKind::Categorical { .. })
    }

    /// Names of the categories that may still be suggested.
    pub fn active_categories(&self) -> Vec<&str> {
        match &self.kind {
            ParameterKind::Categorical { values } => values
                .iter()
                .filter(|v| !v.deleted)
                .map(|v| v.name.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Number of enumerated values (active categories or grid points);
    /// `None` for ranges.
    pub fn cardinality(&self) -> Option<usize> {
        match &self.kind {
            ParameterKind::Categorical { .. } => Some(self.active_categories().len()),
            ParameterKind::Grid { values } => Some(values.len()),
            _ => None,
        }
    }

    /// Width of this parameter in the model's numeric embedding.
    pub fn embedding_width(&self) -> usize {
        match &self.kind {
            ParameterKind::Categorical { .. } => self.active_categories().len(),
            _ => 1,
        }
    }

    /// Whether the parameter applies under the conditional values in
    /// `assignments`.
    pub fn is_active(&self, assignments: &Assignments) -> bool {
        self.conditions.iter().all(|condition| {
            assignments
                .get(&condition.name)
                .and_then(ParameterValue::as_str)
                .is_some_and(|value| condition.values.iter().any(|v| v == value))
        })
    }

    /// Whether `value` lies inside the parameter's domain.
    pub fn contains(&self, value: &ParameterValue) -> bool {
        match (&self.kind, value) {
            (ParameterKind::Continuous { min, max }, v) => v
                .as_f64()
                .is_some_and(|x| x.is_finite() && x >= *min && x <= *max),
            (ParameterKind::Integer { min, max }, ParameterValue::Int(v)) => v >= min && v <= max,
            (ParameterKind::Categorical { .. }, ParameterValue::Categorical(name)) => {
                self.active_categories().contains(&name.as_str())
            }
            (ParameterKind::Grid { values }, v) => {
                v.as_f64().is_some_and(|x| values.iter().any(|g| *g == x))
            }
            _ => false,
        }
    }

    fn validate(&self) -> SgResult<()> {
        match &self.kind {
            ParameterKind::Continuous { min, max } => {
                if !(min.is_finite() && max.is_finite()) || min >= max {
                    return Err(validation(format!(
                        "parameter {} has invalid bounds [{min}, {max}]",
                        self.name
                    )));
                }
                if self.is_log() && *min <= 0.0 {
                    return Err(validation(format!(
                        "log-transformed parameter {} needs a positive lower bound",
                        self.name
                    )));
                }
            }
            ParameterKind::Integer { min, max } => {
                if min > max {
                    return Err(validation(format!(
                        "parameter {} has invalid bounds [{min}, {max}]",
                        self.name
                    )));
                }
            }
            ParameterKind::Categorical { .. } => {
                if self.active_categories().is_empty() {
                    return Err(validation(format!(
                        "categorical parameter {} has no active values",
                        self.name
                    )));
                }
            }
            ParameterKind::Grid { values } => {
                if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
                    return Err(validation(format!(
                        "grid parameter {} needs finite values",
                        self.name
                    )));
                }
            }
        }
        if self.is_log() && !matches!(self.kind, ParameterKind::Continuous { .. }) {
            return Err(validation(format!(
                "log transform is only supported for continuous parameter, not {}",
                self.name
            )));
        }
        Ok(())
    }
}

/// A named discrete switch gating parameter applicability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conditional {
    pub name: String,
    pub values: Vec<String>,
}

impl Conditional {
    pub fn new(name: impl Into<String>, values: &[&str]) -> Self {
        Self {
            name: name.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

/// Whether we are maximizing or minimizing a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    #[default]
    Maximize,
    Minimize,
}

/// Role of a metric in the optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetricStrategy {
    #[default]
    Optimize,
    Constraint,
    Store,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    #[serde(default)]
    pub objective: Objective,
    #[serde(default)]
    pub strategy: MetricStrategy,
    #[serde(default)]
    pub threshold: Option<f64>,
}

impl Metric {
    pub fn optimize(name: impl Into<String>, objective: Objective) -> Self {
        Self {
            name: name.into(),
            objective,
            strategy: MetricStrategy::Optimize,
            threshold: None,
        }
    }

    pub fn constraint(name: impl Into<String>, objective: Objective, threshold: f64) -> Self {
        Self {
            name: name.into(),
            objective,
            strategy: MetricStrategy::Constraint,
            threshold: Some(threshold),
        }
    }
}

/// A multitask/multi-fidelity task with its relative cost in (0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub cost: f64,
}

impl Task {
    pub fn new(name: impl Into<String>, cost: f64) -> Self {
        Self {
            name: name.into(),
            cost,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    GreaterThan,
    LessThan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintTerm {
    pub name: String,
    pub weight: f64,
}

/// `sum(weight * value) >= threshold` (or `<=`), inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearConstraint {
    #[serde(rename = "type")]
    pub kind: ConstraintKind,
    pub terms: Vec<ConstraintTerm>,
    pub threshold: f64,
}

impl LinearConstraint {
    pub fn new(kind: ConstraintKind, terms: &[(&str, f64)], threshold: f64) -> Self {
        Self {
            kind,
            terms: terms
                .iter()
                .map(|(name, weight)| ConstraintTerm {
                    name: name.to_string(),
                    weight: *weight,
                })
                .collect(),
            threshold,
        }
    }

    /// Evaluate the constraint. Parameters missing from `assignments` do not
    /// contribute to the sum.
    pub fn is_satisfied(&self, assignments: &Assignments) -> bool {
        let total: f64 = self
            .terms
            .iter()
            .filter_map(|term| {
                assignments
                    .get(&term.name)
                    .and_then(ParameterValue::as_f64)
                    .map(|v| v * term.weight)
            })
            .sum();
        match self.kind {
            ConstraintKind::GreaterThan => total >= self.threshold - CONSTRAINT_TOLERANCE,
            ConstraintKind::LessThan => total <= self.threshold + CONSTRAINT_TOLERANCE,
        }
    }
}

fn default_num_solutions() -> u32 {
    1
}

fn default_parallel_bandwidth() -> u32 {
    1
}

/// The full experiment definition. Immutable for the duration of a
/// suggestion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: ExperimentId,
    pub name: String,
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub conditionals: Vec<Conditional>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub observation_budget: Option<u64>,
    #[serde(default = "default_num_solutions")]
    pub num_solutions: u32,
    #[serde(default)]
    pub linear_constraints: Vec<LinearConstraint>,
    #[serde(default = "default_parallel_bandwidth")]
    pub parallel_bandwidth: u32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Experiment {
    pub fn new(id: ExperimentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            parameters: Vec::new(),
            conditionals: Vec::new(),
            metrics: Vec::new(),
            tasks: Vec::new(),
            observation_budget: None,
            num_solutions: 1,
            linear_constraints: Vec::new(),
            parallel_bandwidth: 1,
            created_at: Utc::now(),
        }
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_conditional(mut self, conditional: Conditional) -> Self {
        self.conditionals.push(conditional);
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_linear_constraint(mut self, constraint: LinearConstraint) -> Self {
        self.linear_constraints.push(constraint);
        self
    }

    pub fn with_observation_budget(mut self, budget: u64) -> Self {
        self.observation_budget = Some(budget);
        self
    }

    pub fn with_num_solutions(mut self, n: u32) -> Self {
        self.num_solutions = n;
        self
    }

    pub fn with_parallel_bandwidth(mut self, n: u32) -> Self {
        self.parallel_bandwidth = n;
        self
    }

    /// Numeric dimension seen by the model: one per continuous, integer or
    /// grid parameter plus the active cardinality of every categorical.
    pub fn dimension(&self) -> usize {
        self.parameters.iter().map(Parameter::embedding_width).sum()
    }

    pub fn is_multitask(&self) -> bool {
        !self.tasks.is_empty()
    }

    pub fn is_conditional(&self) -> bool {
        !self.conditionals.is_empty()
    }

    pub fn optimized_metrics(&self) -> impl Iterator<Item = &Metric> {
        self.metrics
            .iter()
            .filter(|m| m.strategy == MetricStrategy::Optimize)
    }

    /// An experiment without any optimized metric only searches for feasible
    /// points.
    pub fn is_search(&self) -> bool {
        !self.metrics.is_empty() && self.optimized_metrics().next().is_none()
    }

    /// Search experiments, multi-solution and multi-objective experiments use
    /// the backend's search entry points.
    pub fn requires_search_mode(&self) -> bool {
        self.is_search() || self.num_solutions > 1 || self.optimized_metrics().count() > 1
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn conditional(&self, name: &str) -> Option<&Conditional> {
        self.conditionals.iter().find(|c| c.name == name)
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn cheapest_task(&self) -> Option<&Task> {
        self.tasks
            .iter()
            .min_by(|a, b| a.cost.partial_cmp(&b.cost).unwrap_or(std::cmp::Ordering::Equal))
    }

    /// Parameters that apply under the conditional values in `assignments`.
    pub fn active_parameters<'a>(
        &'a self,
        assignments: &'a Assignments,
    ) -> impl Iterator<Item = &'a Parameter> + 'a {
        self.parameters.iter().filter(|p| p.is_active(assignments))
    }

    pub fn satisfies_constraints(&self, assignments: &Assignments) -> bool {
        self.linear_constraints
            .iter()
            .all(|c| c.is_satisfied(assignments))
    }

    /// Check the experiment definition itself.
    pub fn validate(&self) -> SgResult<()> {
        if self.parameters.is_empty() {
            return Err(validation(format!("experiment {} has no parameters", self.id)));
        }
        for (i, parameter) in self.parameters.iter().enumerate() {
            parameter.validate()?;
            if self.parameters[..i].iter().any(|p| p.name == parameter.name)
                || self.conditional(&parameter.name).is_some()
            {
                return Err(validation(format!("duplicate name {}", parameter.name)));
            }
            for condition in &parameter.conditions {
                let conditional = self.conditional(&condition.name).ok_or_else(|| {
                    validation(format!(
                        "parameter {} references unknown conditional {}",
                        parameter.name, condition.name
                    ))
                })?;
                if let Some(bad) = condition
                    .values
                    .iter()
                    .find(|v| !conditional.values.contains(v))
                {
                    return Err(validation(format!(
                        "parameter {} references unknown value {bad} of conditional {}",
                        parameter.name, condition.name
                    )));
                }
            }
        }
        for conditional in &self.conditionals {
            if conditional.values.is_empty() {
                return Err(validation(format!(
                    "conditional {} has no values",
                    conditional.name
                )));
            }
        }
        for constraint in &self.linear_constraints {
            for term in &constraint.terms {
                match self.parameter(&term.name).map(|p| &p.kind) {
                    Some(ParameterKind::Continuous { .. } | ParameterKind::Integer { .. }) => {}
                    _ => {
                        return Err(validation(format!(
                            "linear constraint references non-numeric parameter {}",
                            term.name
                        )))
                    }
                }
            }
        }
        if let Some(task) = self.tasks.iter().find(|t| !(t.cost > 0.0 && t.cost <= 1.0)) {
            return Err(validation(format!(
                "task {} must have a cost in (0, 1]",
                task.name
            )));
        }
        if self.parallel_bandwidth == 0 || self.num_solutions == 0 {
            return Err(validation(
                "parallel_bandwidth and num_solutions must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Check that `assignments` (and `task`) describe a point this experiment
    /// may be evaluated at.
    pub fn validate_assignments(&self, assignments: &Assignments, task: Option<&str>) -> SgResult<()> {
        for conditional in &self.conditionals {
            match assignments.get(&conditional.name).and_then(ParameterValue::as_str) {
                Some(value) if conditional.values.iter().any(|v| v == value) => {}
                other => {
                    return Err(validation(format!(
                        "conditional {} has invalid assignment {other:?}",
                        conditional.name
                    )))
                }
            }
        }

        for parameter in &self.parameters {
            let value = assignments.get(&parameter.name);
            match (parameter.is_active(assignments), value) {
                (true, Some(v)) if parameter.contains(v) => {}
                (true, Some(v)) => {
                    return Err(validation(format!(
                        "value {v} is outside the domain of {}",
                        parameter.name
                    )))
                }
                (true, None) => {
                    return Err(validation(format!("missing assignment for {}", parameter.name)))
                }
                (false, Some(_)) => {
                    return Err(validation(format!(
                        "parameter {} is assigned but its conditions are unmet",
                        parameter.name
                    )))
                }
                (false, None) => {}
            }
        }

        if let Some(unknown) = assignments
            .keys()
            .find(|k| self.parameter(k).is_none() && self.conditional(k).is_none())
        {
            return Err(validation(format!("unknown parameter {unknown}")));
        }

        if !self.satisfies_constraints(assignments) {
            return Err(validation("assignments violate a linear constraint".to_string()));
        }

        match (self.is_multitask(), task) {
            (true, Some(name)) if self.task(name).is_some() => Ok(()),
            (true, Some(name)) => Err(validation(format!("unknown task {name}"))),
            (true, None) => Err(validation("multitask experiments require a task".to_string())),
            (false, Some(name)) => Err(validation(format!(
                "task {name} given for an experiment without tasks"
            ))),
            (false, None) => Ok(()),
        }
    }
}

fn validation(message: String) -> SgError {
    SgError::Validation(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_experiment() -> Experiment {
        Experiment::new(1, "tuning")
            .with_parameter(Parameter::continuous("lr", 1e-4, 1.0).with_log_transform())
            .with_parameter(Parameter::integer("layers", 1, 8))
            .with_parameter(Parameter::categorical("optimizer", &["adam", "sgd", "rmsprop"]))
            .with_parameter(Parameter::grid("batch", vec![16.0, 32.0, 64.0]))
            .with_metric(Metric::optimize("accuracy", Objective::Maximize))
    }

    fn assignments(pairs: &[(&str, ParameterValue)]) -> Assignments {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn dimension_counts_categorical_width() {
        let experiment = sample_experiment();
        assert_eq!(experiment.dimension(), 1 + 1 + 3 + 1);
    }

    #[test]
    fn validate_accepts_point_in_domain() {
        let experiment = sample_experiment();
        experiment.validate().unwrap();
        let point = assignments(&[
            ("lr", ParameterValue::Float(0.01)),
            ("layers", ParameterValue::Int(3)),
            ("optimizer", ParameterValue::Categorical("sgd".into())),
            ("batch", ParameterValue::Int(32)),
        ]);
        experiment.validate_assignments(&point, None).unwrap();
    }

    #[test]
    fn validate_rejects_out_of_bounds() {
        let experiment = sample_experiment();
        let point = assignments(&[
            ("lr", ParameterValue::Float(2.0)),
            ("layers", ParameterValue::Int(3)),
            ("optimizer", ParameterValue::Categorical("sgd".into())),
            ("batch", ParameterValue::Int(32)),
        ]);
        assert!(experiment.validate_assignments(&point, None).is_err());
    }

    #[test]
    fn deleted_categories_are_inactive() {
        let mut parameter = Parameter::categorical("c", &["a", "b"]);
        if let ParameterKind::Categorical { values } = &mut parameter.kind {
            values[1].deleted = true;
        }
        assert_eq!(parameter.active_categories(), vec!["a"]);
        assert!(!parameter.contains(&ParameterValue::Categorical("b".into())));
    }

    #[test]
    fn conditional_activation() {
        let experiment = Experiment::new(2, "cond")
            .with_conditional(Conditional::new("model", &["linear", "tree"]))
            .with_parameter(Parameter::continuous("alpha", 0.0, 1.0).with_condition("model", &["linear"]))
            .with_parameter(Parameter::integer("depth", 1, 10).with_condition("model", &["tree"]));
        experiment.validate().unwrap();

        let linear = assignments(&[
            ("model", ParameterValue::Categorical("linear".into())),
            ("alpha", ParameterValue::Float(0.5)),
        ]);
        experiment.validate_assignments(&linear, None).unwrap();

        let active: Vec<&str> = experiment
            .active_parameters(&linear)
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(active, vec!["alpha"]);

        let mut wrong = linear.clone();
        wrong.insert("depth".into(), ParameterValue::Int(3));
        assert!(experiment.validate_assignments(&wrong, None).is_err());
    }

    #[test]
    fn linear_constraint_checked() {
        let experiment = Experiment::new(3, "constrained")
            .with_parameter(Parameter::continuous("x", 0.0, 1.0))
            .with_parameter(Parameter::continuous("y", 0.0, 1.0))
            .with_linear_constraint(LinearConstraint::new(
                ConstraintKind::LessThan,
                &[("x", 1.0), ("y", 1.0)],
                1.0,
            ));
        let ok = assignments(&[("x", ParameterValue::Float(0.3)), ("y", ParameterValue::Float(0.6))]);
        let bad = assignments(&[("x", ParameterValue::Float(0.7)), ("y", ParameterValue::Float(0.6))]);
        assert!(experiment.validate_assignments(&ok, None).is_ok());
        assert!(experiment.validate_assignments(&bad, None).is_err());
    }

    #[test]
    fn multitask_requires_task() {
        let experiment = sample_experiment()
            .with_task(Task::new("cheap", 0.1))
            .with_task(Task::new("full", 1.0));
        let point = assignments(&[
            ("lr", ParameterValue::Float(0.01)),
            ("layers", ParameterValue::Int(3)),
            ("optimizer", ParameterValue::Categorical("adam".into())),
            ("batch", ParameterValue::Float(64.0)),
        ]);
        assert!(experiment.validate_assignments(&point, None).is_err());
        assert!(experiment.validate_assignments(&point, Some("cheap")).is_ok());
        assert_eq!(experiment.cheapest_task().unwrap().name, "cheap");
    }

    #[test]
    fn search_mode_detection() {
        let single = sample_experiment();
        assert!(!single.requires_search_mode());

        let multi = sample_experiment().with_metric(Metric::optimize("latency", Objective::Minimize));
        assert!(multi.requires_search_mode());

        let search = Experiment::new(4, "search")
            .with_parameter(Parameter::continuous("x", 0.0, 1.0))
            .with_metric(Metric::constraint("loss", Objective::Minimize, 0.2));
        assert!(search.is_search());
        assert!(search.requires_search_mode());
    }

    #[test]
    fn experiment_serde_defaults() {
        let json = serde_json::json!({
            "id": 9,
            "name": "from-json",
            "parameters": [
                {"name": "x", "kind": {"type": "continuous", "min": 0.0, "max": 10.0}},
                {"name": "c", "kind": {"type": "categorical", "values": [{"name": "a"}, {"name": "b"}]}}
            ]
        });
        let experiment: Experiment = serde_json::from_value(json).unwrap();
        assert_eq!(experiment.num_solutions, 1);
        assert_eq!(experiment.parallel_bandwidth, 1);
        assert_eq!(experiment.dimension(), 3);
    }
}
