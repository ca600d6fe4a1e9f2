//! Units of work and their outcomes.

use gx_compute::{ErrorFunction, LossFunction, ObjectiveSpec, RegulationModel};
use gx_core::{Error, GeneId, Result, TaskId};
use serde::{Deserialize, Serialize};

/// Search strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    /// Gradient-based local optimization (L-BFGS, Armijo backtracking).
    #[default]
    Local,
    /// Simulated annealing with Metropolis acceptance.
    Annealing,
}

/// Temperature schedule and proposal width for [`SearchMethod::Annealing`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnealingSchedule {
    /// Temperature at the first iteration.
    pub initial_temperature: f64,
    /// Temperature at the last iteration.
    pub final_temperature: f64,
    /// Proposal standard deviation at `initial_temperature`.
    pub step_scale: f64,
}

impl Default for AnnealingSchedule {
    fn default() -> Self {
        Self { initial_temperature: 1.0, final_temperature: 1e-4, step_scale: 0.1 }
    }
}

impl AnnealingSchedule {
    /// Temperature at `iteration` out of `budget`, decaying geometrically.
    pub fn temperature(&self, iteration: usize, budget: usize) -> f64 {
        if budget <= 1 {
            return self.initial_temperature;
        }
        let frac = iteration.min(budget - 1) as f64 / (budget - 1) as f64;
        let ratio = self.final_temperature / self.initial_temperature;
        self.initial_temperature * ratio.powf(frac)
    }

    fn validate(&self) -> Result<()> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.initial_temperature) || !positive(self.final_temperature) {
            return Err(Error::Validation(format!(
                "annealing temperatures must be finite and positive, got {} -> {}",
                self.initial_temperature, self.final_temperature
            )));
        }
        if self.final_temperature > self.initial_temperature {
            return Err(Error::Validation(
                "annealing final_temperature must not exceed initial_temperature".to_string(),
            ));
        }
        if !positive(self.step_scale) {
            return Err(Error::Validation(format!(
                "annealing step_scale must be finite and positive, got {}",
                self.step_scale
            )));
        }
        Ok(())
    }
}

/// Search configuration for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Search strategy.
    pub method: SearchMethod,
    /// Pointwise error.
    pub error_function: ErrorFunction,
    /// Loss on each pointwise error.
    pub loss_function: LossFunction,
    /// Weight of the squared-weight penalty (finite, `>= 0`).
    pub regularization_weight: f64,
    /// Iteration budget.
    pub iterations: usize,
    /// Use this step between every pair of samples instead of the dataset's time grid.
    pub time_step: Option<f64>,
    /// Penalize fits that keep the regulatory input saturated over the whole window.
    pub prevent_full_occupation: bool,
    /// Derive a reproducible per-task seed from `fixed_seed`.
    pub use_fixed_seed: bool,
    /// Base seed when `use_fixed_seed` is set.
    pub fixed_seed: u64,
    /// Start from a random perturbation of the default start point.
    pub randomize_start: bool,
    /// Convergence tolerance (gradient norm and relative cost change).
    pub tolerance: f64,
    /// L-BFGS history depth.
    pub history: usize,
    /// Annealing schedule; ignored by the local search.
    pub annealing: AnnealingSchedule,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            method: SearchMethod::Local,
            error_function: ErrorFunction::Squared,
            loss_function: LossFunction::Identity,
            regularization_weight: 0.0,
            iterations: 100,
            time_step: None,
            prevent_full_occupation: false,
            use_fixed_seed: false,
            fixed_seed: 0,
            randomize_start: false,
            tolerance: 1e-9,
            history: 10,
            annealing: AnnealingSchedule::default(),
        }
    }
}

impl SearchConfig {
    /// Reject configurations no search can run with.
    pub fn validate(&self) -> Result<()> {
        let lambda = self.regularization_weight;
        if !(lambda.is_finite() && lambda >= 0.0) {
            return Err(Error::Validation(format!(
                "regularization_weight must be finite and >= 0, got {lambda}"
            )));
        }
        if self.iterations == 0 {
            return Err(Error::Validation("iterations must be positive".to_string()));
        }
        if let Some(dt) = self.time_step
            && !(dt.is_finite() && dt > 0.0)
        {
            return Err(Error::Validation(format!("time_step must be finite and > 0, got {dt}")));
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(Error::Validation(format!(
                "tolerance must be finite and >= 0, got {}",
                self.tolerance
            )));
        }
        if self.history == 0 {
            return Err(Error::Validation("history must be positive".to_string()));
        }
        self.loss_function.validate()?;
        self.annealing.validate()
    }

    /// Objective settings carried by this configuration.
    pub fn objective_spec(&self) -> ObjectiveSpec {
        ObjectiveSpec {
            error: self.error_function,
            loss: self.loss_function,
            regularization_weight: self.regularization_weight,
            prevent_full_occupation: self.prevent_full_occupation,
        }
    }

    /// Seed for a task, or `None` when the task should draw from OS entropy.
    pub fn task_seed(&self, id: TaskId) -> Option<u64> {
        self.use_fixed_seed.then(|| self.fixed_seed.wrapping_add(id.0))
    }
}

/// One (target, regulator set) problem. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceTask {
    id: TaskId,
    target: GeneId,
    regulators: Vec<GeneId>,
    model: RegulationModel,
    search: SearchConfig,
}

impl InferenceTask {
    /// Build a task. Consistency with a dataset is checked at submission.
    pub fn new(
        id: TaskId,
        target: GeneId,
        regulators: Vec<GeneId>,
        model: RegulationModel,
        search: SearchConfig,
    ) -> Self {
        Self { id, target, regulators, model, search }
    }

    /// Task with an additive model sized to `regulators`.
    pub fn additive(
        id: TaskId,
        target: GeneId,
        regulators: Vec<GeneId>,
        constitutive: bool,
        search: SearchConfig,
    ) -> Self {
        let model = RegulationModel::additive(regulators.len(), constitutive);
        Self::new(id, target, regulators, model, search)
    }

    /// Caller-chosen identifier.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Target gene.
    pub fn target(&self) -> GeneId {
        self.target
    }

    /// Regulator genes in parameter order.
    pub fn regulators(&self) -> &[GeneId] {
        &self.regulators
    }

    /// Model shape.
    pub fn model(&self) -> &RegulationModel {
        &self.model
    }

    /// Search configuration.
    pub fn search(&self) -> &SearchConfig {
        &self.search
    }
}

/// Diagnostics of a numerically diverged task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Divergence {
    /// Iteration at which the cost went non-finite.
    pub iteration: usize,
    /// Last finite cost seen, if any.
    pub last_finite_cost: Option<f64>,
}

/// Terminal state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FitStatus {
    /// Convergence criterion met.
    Converged,
    /// Iteration budget used up.
    Exhausted,
    /// Stopped early by a cancellation request.
    Cancelled,
    /// Cost became non-finite.
    Failed(Divergence),
}

impl FitStatus {
    /// Short lowercase label for tabular output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Converged => "converged",
            Self::Exhausted => "exhausted",
            Self::Cancelled => "cancelled",
            Self::Failed(_) => "failed",
        }
    }
}

/// Outcome of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    /// Originating task.
    pub task_id: TaskId,
    /// Target gene of the task.
    pub target: GeneId,
    /// Regulator genes of the task, in parameter order.
    pub regulators: Vec<GeneId>,
    /// Model shape of the task.
    pub model: RegulationModel,
    /// Best parameter vector observed.
    pub params: Vec<f64>,
    /// Cost at `params`.
    pub cost: f64,
    /// Iterations actually performed.
    pub iterations: usize,
    /// How the search ended.
    pub status: FitStatus,
}

impl InferenceResult {
    /// Fitted regulator weights.
    pub fn weights(&self) -> &[f64] {
        self.model.weights(&self.params)
    }

    /// Fitted constitutive level, if the model has one.
    pub fn constitutive(&self) -> Option<f64> {
        self.model.constitutive_value(&self.params)
    }

    /// Whether the task diverged.
    pub fn is_failed(&self) -> bool {
        matches!(self.status, FitStatus::Failed(_))
    }

    /// Divergence diagnostics of a failed task.
    pub fn divergence(&self) -> Option<&Divergence> {
        match &self.status {
            FitStatus::Failed(d) => Some(d),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn default_config_is_valid() {
        SearchConfig::default().validate().unwrap();
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let bad = [
            SearchConfig { regularization_weight: -1.0, ..Default::default() },
            SearchConfig { regularization_weight: f64::NAN, ..Default::default() },
            SearchConfig { iterations: 0, ..Default::default() },
            SearchConfig { time_step: Some(0.0), ..Default::default() },
            SearchConfig { history: 0, ..Default::default() },
            SearchConfig {
                loss_function: LossFunction::Clipped { max: 0.0 },
                ..Default::default()
            },
            SearchConfig {
                annealing: AnnealingSchedule {
                    initial_temperature: 1.0,
                    final_temperature: 2.0,
                    step_scale: 0.1,
                },
                ..Default::default()
            },
        ];
        for cfg in bad {
            assert!(matches!(cfg.validate(), Err(Error::Validation(_))), "{cfg:?}");
        }
    }

    #[test]
    fn fixed_seed_is_offset_by_task_id() {
        let cfg = SearchConfig { use_fixed_seed: true, fixed_seed: u64::MAX, ..Default::default() };
        assert_eq!(cfg.task_seed(TaskId(0)), Some(u64::MAX));
        assert_eq!(cfg.task_seed(TaskId(2)), Some(1));
        assert_eq!(SearchConfig::default().task_seed(TaskId(7)), None);
    }

    #[test]
    fn temperature_decays_geometrically() {
        let s = AnnealingSchedule {
            initial_temperature: 1.0,
            final_temperature: 0.01,
            step_scale: 1.0,
        };
        assert_relative_eq!(s.temperature(0, 3), 1.0);
        assert_relative_eq!(s.temperature(1, 3), 0.1, epsilon = 1e-12);
        assert_relative_eq!(s.temperature(2, 3), 0.01, epsilon = 1e-12);
        assert_relative_eq!(s.temperature(0, 1), 1.0);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let cfg: SearchConfig = serde_json::from_str(
            r#"{"method": "annealing", "loss_function": {"kind": "clipped", "max": 4.0}}"#,
        )
        .unwrap();
        assert_eq!(cfg.method, SearchMethod::Annealing);
        assert_eq!(cfg.loss_function, LossFunction::Clipped { max: 4.0 });
        assert_eq!(cfg.iterations, 100);
    }

    #[test]
    fn result_accessors() {
        let model = RegulationModel::additive(2, true);
        let r = InferenceResult {
            task_id: TaskId(1),
            target: GeneId(0),
            regulators: vec![GeneId(1), GeneId(2)],
            model,
            params: vec![0.5, -0.25, 3.0],
            cost: 1.0,
            iterations: 4,
            status: FitStatus::Failed(Divergence { iteration: 4, last_finite_cost: Some(1.0) }),
        };
        assert_eq!(r.weights(), &[0.5, -0.25]);
        assert_eq!(r.constitutive(), Some(3.0));
        assert!(r.is_failed());
        assert_eq!(r.divergence().unwrap().iteration, 4);
        assert_eq!(r.status.label(), "failed");
    }
}
