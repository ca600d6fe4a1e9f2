//! Common identifier types for genexpi

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense gene identifier: the row index of a gene in an [`crate::ExpressionDataset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneId(pub usize);

impl GeneId {
    /// Row index in the dataset.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for GeneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Caller-chosen task identity.
///
/// Results are correlated to tasks through this id, never through submission
/// order. It also salts the per-task seed for fixed-seed searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
