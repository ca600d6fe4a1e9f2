//! # gx-core
//!
//! Core types for genexpi.
//!
//! This crate provides:
//! - the error taxonomy shared by every crate ([`Error`], [`Result`])
//! - gene and task identifiers
//! - the immutable [`ExpressionDataset`]
//! - collaborator traits for progress/cancellation and the configuration gate
//!
//! ## Architecture
//!
//! The inference engine (gx-inference) depends on these seams, NOT on any host
//! application. Hosts plug in through [`TaskMonitor`] and [`EnvironmentCheck`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dataset;
pub mod error;
pub mod traits;
pub mod types;

pub use dataset::ExpressionDataset;
pub use error::{Error, Result};
pub use traits::{CancellationToken, EnvironmentCheck, NoopMonitor, TaskMonitor};
pub use types::{GeneId, TaskId};
