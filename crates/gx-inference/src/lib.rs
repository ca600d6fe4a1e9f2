//! # gx-inference
//!
//! Batched inference of gene-regulation weights.
//!
//! This crate provides:
//! - Inference tasks, search configuration and results
//! - Local search (L-BFGS) and stochastic search (simulated annealing)
//! - The lockstep batch engine
//! - CSV export of results
//!
//! ## Architecture
//!
//! The engine depends on the `TaskMonitor` and `EnvironmentCheck` seams from
//! gx-core and on the device runtime from gx-compute. It never talks to a host
//! application directly.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod annealing;
/// Lockstep batch engine.
pub mod engine;
/// CSV export of results.
pub mod export;
mod lbfgs;
/// Tasks, search configuration, results.
pub mod task;

pub use engine::{InferenceEngine, validate_batch};
pub use export::{ResultsWriter, UNRESOLVED_STATUS, additive_header, results_header};
pub use task::{
    AnnealingSchedule, Divergence, FitStatus, InferenceResult, InferenceTask, SearchConfig,
    SearchMethod,
};
