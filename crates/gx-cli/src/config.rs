//! JSON run spec for `genexpi infer`.
//!
//! ```json
//! {
//!   "dataset": "expression.csv",
//!   "model": { "n_regulators": 1, "constitutive": true },
//!   "search": { "regularization_weight": 0.01, "iterations": 200 },
//!   "device": { "threads": 4 },
//!   "tasks": [ { "target": "geneA", "regulators": ["geneB"] } ]
//! }
//! ```
//!
//! Relative dataset paths resolve against the directory holding the run spec.
//! Pairings naming a gene the dataset lacks are set aside, not fitted.

use anyhow::{Context, Result};
use gx_compute::{DeviceConfig, RegulationModel};
use gx_core::{ExpressionDataset, GeneId, TaskId};
use gx_inference::{InferenceTask, SearchConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Shape shared by every task of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    /// Regulators per task.
    #[serde(default)]
    pub n_regulators: usize,
    /// Fit a constitutive level alongside the weights.
    #[serde(default)]
    pub constitutive: bool,
}

impl ModelSpec {
    /// Model every task of the run is fitted with.
    pub fn model(&self) -> RegulationModel {
        RegulationModel::additive(self.n_regulators, self.constitutive)
    }
}

/// One target/regulators pairing, by gene name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskSpec {
    /// Task id; defaults to the position in `tasks`.
    #[serde(default)]
    pub id: Option<u64>,
    /// Target gene name, as in the dataset's first column.
    pub target: String,
    /// Regulator gene names; their count must match `model.n_regulators`.
    #[serde(default)]
    pub regulators: Vec<String>,
}

/// Everything one `genexpi infer` run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSpec {
    /// Expression CSV (`gene,t0,t1,...`).
    pub dataset: PathBuf,
    /// Model shape shared by all tasks.
    #[serde(default)]
    pub model: ModelSpec,
    /// Search settings shared by all tasks.
    #[serde(default)]
    pub search: SearchConfig,
    /// Thread count and memory budget of the device.
    #[serde(default)]
    pub device: DeviceConfig,
    /// Pairings to fit, in output order.
    pub tasks: Vec<TaskSpec>,
}

/// Pairings split by whether every gene name was found.
#[derive(Debug, Default)]
pub struct ResolvedTasks {
    /// Engine tasks, in run-spec order.
    pub tasks: Vec<InferenceTask>,
    /// Pairings left out, with their task ids.
    pub unresolved: Vec<(u64, TaskSpec)>,
}

impl RunSpec {
    /// Read a run spec, resolving `dataset` against the directory holding it.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read run spec {}", path.display()))?;
        let mut spec: RunSpec = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse run spec {}", path.display()))?;
        if spec.dataset.is_relative()
            && let Some(dir) = path.parent()
        {
            spec.dataset = dir.join(&spec.dataset);
        }
        Ok(spec)
    }

    /// Settings that are wrong regardless of the dataset.
    pub fn check(&self) -> Result<()> {
        let problems = self.device.problems();
        if !problems.is_empty() {
            anyhow::bail!("invalid device config: {}", problems.join("; "));
        }
        self.search.validate().context("invalid search config")?;

        let expected = self.model.n_regulators;
        let mut seen = HashSet::new();
        for (id, t) in self.task_ids().zip(&self.tasks) {
            if !seen.insert(id) {
                anyhow::bail!("duplicate task id {id}");
            }
            if t.regulators.len() != expected {
                anyhow::bail!(
                    "task {id}: model expects {expected} regulators, task lists {}",
                    t.regulators.len()
                );
            }
        }
        Ok(())
    }

    fn task_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.tasks.iter().enumerate().map(|(i, t)| t.id.unwrap_or(i as u64))
    }

    /// Turn gene-name pairings into engine tasks against `dataset`. A pairing
    /// with any unknown gene is logged and returned in `unresolved`.
    pub fn tasks(&self, dataset: &ExpressionDataset) -> ResolvedTasks {
        let model = self.model.model();
        let mut out = ResolvedTasks::default();
        for (id, t) in self.task_ids().zip(&self.tasks) {
            let mut missing = None;
            let mut lookup = |name: &str| {
                let found = dataset.gene_id(name);
                if found.is_none() && missing.is_none() {
                    missing = Some(name.to_string());
                }
                found
            };
            let target = lookup(t.target.as_str());
            let regulators: Option<Vec<GeneId>> =
                t.regulators.iter().map(|r| lookup(r.as_str())).collect();
            match (target, regulators) {
                (Some(target), Some(regulators)) => out.tasks.push(InferenceTask::new(
                    TaskId(id),
                    target,
                    regulators,
                    model,
                    self.search.clone(),
                )),
                _ => {
                    let gene = missing.unwrap_or_default();
                    tracing::warn!(task = id, gene = %gene, "gene is not in the dataset, skipping");
                    out.unresolved.push((id, t.clone()));
                }
            }
        }
        out
    }
}
