use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use sg_optimizer::{Broker, BrokerConfig, LocalComputeBackend};
use sg_store::{MemoryStore, SuggestionStore};
use sg_types::{
    Assignments, Experiment, Parameter, ParameterValue, QueuedSuggestion, Suggestion, SuggestionSource,
};

const THREADS: usize = 8;

fn experiment() -> Experiment {
    Experiment::new(1, "race")
        .with_parameter(Parameter::continuous("x", 0.0, 1.0))
        .with_parameter(Parameter::integer("k", 0, 100))
        .with_parallel_bandwidth(THREADS as u32)
}

fn setup(config: BrokerConfig) -> (Arc<MemoryStore>, Arc<Broker>) {
    let store = Arc::new(MemoryStore::new());
    store.register_experiment(experiment()).unwrap();
    let broker = Arc::new(Broker::new(
        store.clone(),
        Arc::new(LocalComputeBackend::with_seed(21)),
        config,
    ));
    (store, broker)
}

fn race(broker: &Arc<Broker>, per_thread: usize) -> Vec<Suggestion> {
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let broker = broker.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let experiment = experiment();
                let session = format!("thread-{i}");
                barrier.wait();
                (0..per_thread)
                    .map(|_| broker.serve_suggestion(&experiment, Some(&session)).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect()
}

#[test]
fn racing_callers_never_share_a_suggestion() {
    let (store, broker) = setup(BrokerConfig::default());
    let served = race(&broker, 5);

    let ids: HashSet<_> = served.iter().map(Suggestion::id).collect();
    assert_eq!(ids.len(), THREADS * 5);
    for suggestion in &served {
        let processed = store.processed(suggestion.id()).unwrap();
        assert_eq!(processed.session, suggestion.processed.session);
        experiment().validate_assignments(suggestion.assignments(), None).unwrap();
    }
    let stats = store.get_stats();
    assert_eq!(stats.claims as usize, THREADS * 5);
}

#[test]
fn pooled_candidates_are_claimed_once() {
    let (store, broker) = setup(BrokerConfig::default().with_batch_size(THREADS));
    let served = race(&broker, 3);

    let ids: HashSet<_> = served.iter().map(Suggestion::id).collect();
    assert_eq!(ids.len(), served.len());
    let args = store.read_history(1).unwrap();
    assert_eq!(args.open_suggestions.len(), served.len());
    assert!(args
        .available_suggestions
        .iter()
        .all(|s| store.processed(s.id).is_none()));
}

#[test]
fn queued_suggestions_are_consumed_once() {
    let (store, broker) = setup(BrokerConfig::default());
    let mut queued_ids = HashSet::new();
    for k in 0..3 {
        let mut assignments = Assignments::new();
        assignments.insert("x".into(), ParameterValue::Float(0.5));
        assignments.insert("k".into(), ParameterValue::Int(k));
        queued_ids.insert(store.enqueue(QueuedSuggestion::new(1, assignments, None)).unwrap().id);
    }

    let served = race(&broker, 1);
    let from_queue: Vec<_> = served
        .iter()
        .filter(|s| s.source() == SuggestionSource::Queued)
        .collect();
    assert_eq!(from_queue.len(), 3);

    let consumed: HashSet<_> = from_queue
        .iter()
        .filter_map(|s| s.processed.queued_id)
        .collect();
    assert_eq!(consumed, queued_ids);
    assert!(store.next_queued(1).unwrap().is_none());
}
