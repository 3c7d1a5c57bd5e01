//! # sg-optimizer
//!
//! Suggestion generation for experiment optimization.
//!
//! Provides the parameter segmenter, conditional flattening, the random,
//! Latin-hypercube and model-based strategies with their selection policy,
//! the compute backend seam, and the [`Broker`] that serves and claims
//! suggestions under concurrency.

pub mod backend;
mod broker;
pub mod conditionals;
mod config;
pub mod segmenter;
mod single_slot;
pub mod strategy;

pub use backend::{ComputeBackend, GpHyperparameters, LocalComputeBackend, ModelRequest};
pub use broker::Broker;
pub use config::{BrokerConfig, ModelLite, SelectionPolicy, StencilConfig};
pub use segmenter::Interval;
pub use single_slot::SingleSlotBroker;
pub use strategy::{select_strategy, Candidate, Strategy, StrategyKind};
