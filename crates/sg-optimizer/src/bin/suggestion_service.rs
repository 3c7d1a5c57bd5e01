use std::sync::Arc;

use anyhow::Context;
use sg_optimizer::{Broker, BrokerConfig, LocalComputeBackend};
use sg_store::{MemoryStore, SuggestionStore};
use sg_types::{Experiment, Metric, Objective, Observation, Parameter, Suggestion};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn demo_experiment() -> Experiment {
    Experiment::new(1, "demo")
        .with_parameter(Parameter::continuous("learning_rate", 1e-4, 1e-1).with_log_transform())
        .with_parameter(Parameter::integer("depth", 2, 12))
        .with_metric(Metric::optimize("score", Objective::Maximize))
        .with_parallel_bandwidth(4)
}

fn load_experiment() -> anyhow::Result<Experiment> {
    match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing experiment from {path}"))
        }
        None => Ok(demo_experiment()),
    }
}

fn env_usize(key: &str, default: usize) -> anyhow::Result<usize> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().with_context(|| format!("{key} must be a non-negative integer")),
        Err(_) => Ok(default),
    }
}

/// Synthetic objective: a smooth bump over the numeric assignments.
fn synthetic_score(suggestion: &Suggestion) -> f64 {
    let sum: f64 = suggestion
        .assignments()
        .values()
        .filter_map(|v| v.as_f64())
        .map(|x| (x.abs() + 1.0).ln())
        .sum();
    (-(sum - 1.5).powi(2)).exp()
}

fn run_worker(
    broker: Arc<Broker>,
    store: Arc<MemoryStore>,
    experiment: Arc<Experiment>,
    worker: usize,
    rounds: usize,
) -> anyhow::Result<()> {
    let session = format!("worker-{worker}");
    for round in 0..rounds {
        let suggestion = broker.serve_suggestion(&experiment, Some(&session))?;
        info!(
            worker,
            round,
            suggestion_id = %suggestion.id(),
            source = %suggestion.source(),
            "claimed {:?}",
            suggestion.assignments()
        );

        let mut observation = Observation::new(experiment.id, suggestion.assignments().clone())
            .for_suggestion(suggestion.id());
        for metric in &experiment.metrics {
            observation = observation.with_value(metric.name.clone(), synthetic_score(&suggestion));
        }
        if let Some(task) = suggestion.task() {
            observation = observation.with_task(task);
        }
        store.create_observation(observation)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let experiment = load_experiment()?;
    let config = BrokerConfig::from_env()?;
    let workers = env_usize("SG_WORKERS", 4)?;
    let rounds = env_usize("SG_ROUNDS", 10)?;

    let store = Arc::new(MemoryStore::new());
    store.register_experiment(experiment.clone())?;
    let broker = Arc::new(Broker::new(
        store.clone(),
        Arc::new(LocalComputeBackend::new().with_constraint_max_tries(config.constraint_max_tries)),
        config,
    ));
    let experiment = Arc::new(experiment);

    info!(
        experiment_id = %experiment.id,
        workers,
        rounds,
        "Starting suggestion service"
    );

    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let broker = broker.clone();
            let store = store.clone();
            let experiment = experiment.clone();
            tokio::task::spawn_blocking(move || run_worker(broker, store, experiment, worker, rounds))
        })
        .collect();

    for handle in handles {
        if let Err(e) = handle.await? {
            warn!(error = %e, "worker stopped early");
        }
    }

    let stats = store.get_stats();
    let history = store.read_history(experiment.id)?;
    info!(
        claims = stats.claims,
        conflicts = stats.conflicts,
        conflict_rate = stats.conflict_rate(),
        observations = history.observation_count,
        "Suggestion service finished"
    );
    Ok(())
}
