//! # gx-compute
//!
//! Numeric kernels and the execution runtime for genexpi.
//!
//! This crate provides:
//! - **Regulation models** ([`model`]) - tagged model variants, zero-allocation prediction
//! - **Objective kernels** ([`objective`]) - error, loss, regularization, occupation policy
//! - **Device runtime** ([`device`]) - Rayon pool, scoped sessions, per-task buffers
//!
//! ## Architecture
//!
//! Search strategies (gx-inference) drive [`objective::Objective`] through the
//! buffers of a [`device::DeviceSession`]. Everything stays `f64`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod model;
pub mod objective;

pub use device::{
    BufferLayout, Device, DeviceConfig, DeviceSession, HistoryBuffers, RuntimeProbe, TaskBuffers,
};
pub use model::{ModelKind, RegulationModel, RegulatorProfiles};
pub use objective::{ErrorFunction, LossFunction, Objective, ObjectiveSpec, Scratch, TaskData};
