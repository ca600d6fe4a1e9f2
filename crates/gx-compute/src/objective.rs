//! Objective kernels: error, loss, regularization and the full-occupation policy.
//!
//! For a parameter vector `p`:
//!
//! ```text
//! cost(p) = sum_k loss(error(y_hat_k - y_k))       data term
//!         + lambda * sum_i w_i^2                    regularization (weights only)
//!         + occupation penalty                      only when enabled and triggered
//! ```
//!
//! [`Objective::cost`] and [`Objective::cost_and_gradient`] work entirely in the
//! caller-provided [`Scratch`], so they can run once per iteration per task
//! without allocating.

use crate::model::{RegulationModel, RegulatorProfiles, occupation};
use gx_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Occupation at or above which a sample counts as fully occupied.
pub const FULL_OCCUPATION_THRESHOLD: f64 = 0.99;

/// Flat cost added when every sample is fully occupied.
pub const FULL_OCCUPATION_PENALTY: f64 = 1e6;

/// Slope of the penalty past the threshold, so the search is pushed back out.
const FULL_OCCUPATION_SLOPE: f64 = 1e3;

/// Pointwise comparison of predicted vs observed expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorFunction {
    /// `r^2`
    #[default]
    Squared,
    /// `|r|`
    Absolute,
}

impl ErrorFunction {
    /// Error of a residual `r = predicted - observed`.
    #[inline]
    pub fn value(self, r: f64) -> f64 {
        match self {
            Self::Squared => r * r,
            Self::Absolute => r.abs(),
        }
    }

    /// (Sub-)derivative with respect to the residual.
    #[inline]
    pub fn derivative(self, r: f64) -> f64 {
        match self {
            Self::Squared => 2.0 * r,
            Self::Absolute => {
                if r > 0.0 {
                    1.0
                } else if r < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Transform applied to every pointwise error before summation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LossFunction {
    /// `e`
    #[default]
    Identity,
    /// `ln(1 + e)`; grows slowly for outliers.
    Cauchy,
    /// `min(e, max)`; outliers contribute at most `max`.
    Clipped {
        /// Cap on a single sample's contribution.
        max: f64,
    },
}

impl LossFunction {
    /// Loss of a non-negative error value.
    #[inline]
    pub fn value(self, e: f64) -> f64 {
        match self {
            Self::Identity => e,
            Self::Cauchy => e.ln_1p(),
            Self::Clipped { max } => e.min(max),
        }
    }

    /// Derivative with respect to the error value.
    #[inline]
    pub fn derivative(self, e: f64) -> f64 {
        match self {
            Self::Identity => 1.0,
            Self::Cauchy => 1.0 / (1.0 + e),
            Self::Clipped { max } => {
                if e < max {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Reject parameters that make the loss meaningless.
    pub fn validate(&self) -> Result<()> {
        if let Self::Clipped { max } = *self
            && !(max.is_finite() && max > 0.0)
        {
            return Err(Error::Validation(format!(
                "clipped loss needs a finite positive cap, got {max}"
            )));
        }
        Ok(())
    }
}

/// Everything about the objective that does not depend on the data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectiveSpec {
    /// Pointwise error.
    pub error: ErrorFunction,
    /// Loss on each pointwise error.
    pub loss: LossFunction,
    /// Weight of the `sum_i w_i^2` penalty.
    pub regularization_weight: f64,
    /// Penalize fits whose regulatory input is saturated across the whole window.
    pub prevent_full_occupation: bool,
}

impl Default for ObjectiveSpec {
    fn default() -> Self {
        Self {
            error: ErrorFunction::Squared,
            loss: LossFunction::Identity,
            regularization_weight: 0.0,
            prevent_full_occupation: false,
        }
    }
}

/// Observed data for one task: target profile, regulator profiles, time steps.
#[derive(Debug, Clone, Copy)]
pub struct TaskData<'a> {
    /// Observed target trajectory.
    pub target: &'a [f64],
    /// Regulator profiles, in regulator-list order.
    pub regulators: RegulatorProfiles<'a>,
    /// Step from sample `k` to `k + 1`.
    pub steps: &'a [f64],
}

/// Per-evaluation working memory.
#[derive(Debug, Clone, Default)]
pub struct Scratch {
    /// Predicted trajectory.
    pub prediction: Vec<f64>,
    /// Running per-regulator integrals (gradient only).
    pub integrals: Vec<f64>,
}

impl Scratch {
    /// Scratch sized for `n_times` samples and `n_regulators` regulators.
    pub fn new(n_times: usize, n_regulators: usize) -> Self {
        Self { prediction: vec![0.0; n_times], integrals: vec![0.0; n_regulators] }
    }

    /// Number of `f64` slots held.
    pub fn len(&self) -> usize {
        self.prediction.len() + self.integrals.len()
    }

    /// Whether the scratch holds no slots.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Objective for one (target, regulator-set) problem.
#[derive(Debug, Clone, Copy)]
pub struct Objective<'a> {
    model: RegulationModel,
    spec: ObjectiveSpec,
    data: TaskData<'a>,
    /// `logit(FULL_OCCUPATION_THRESHOLD)`
    input_threshold: f64,
}

impl<'a> Objective<'a> {
    /// Bind a model and objective spec to one task's data.
    pub fn new(model: RegulationModel, spec: ObjectiveSpec, data: TaskData<'a>) -> Self {
        debug_assert_eq!(data.regulators.n_regulators(), model.n_regulators);
        debug_assert_eq!(data.steps.len() + 1, data.target.len());
        let t = FULL_OCCUPATION_THRESHOLD;
        Self { model, spec, data, input_threshold: (t / (1.0 - t)).ln() }
    }

    /// The bound model.
    pub fn model(&self) -> &RegulationModel {
        &self.model
    }

    /// Observed target trajectory.
    pub fn target(&self) -> &'a [f64] {
        self.data.target
    }

    /// Number of parameters.
    pub fn n_params(&self) -> usize {
        self.model.n_params()
    }

    /// Number of observed samples.
    pub fn n_times(&self) -> usize {
        self.data.target.len()
    }

    /// Predict the target trajectory into `scratch.prediction`.
    pub fn predict(&self, params: &[f64], scratch: &mut Scratch) {
        self.model.predict(
            params,
            &self.data.regulators,
            self.data.steps,
            self.data.target[0],
            &mut scratch.prediction,
        );
    }

    /// Regularization term alone.
    pub fn regularization(&self, params: &[f64]) -> f64 {
        let lambda = self.spec.regularization_weight;
        if lambda == 0.0 {
            return 0.0;
        }
        lambda * self.model.weights(params).iter().map(|w| w * w).sum::<f64>()
    }

    /// Whether every sample's regulatory input is at or past full occupation.
    pub fn is_fully_occupied(&self, params: &[f64]) -> bool {
        if self.model.n_regulators == 0 {
            return false;
        }
        (0..self.n_times()).all(|k| {
            occupation(self.model.regulatory_input(params, &self.data.regulators, k))
                >= FULL_OCCUPATION_THRESHOLD
        })
    }

    fn occupation_penalty(&self, params: &[f64]) -> f64 {
        if !self.spec.prevent_full_occupation || !self.is_fully_occupied(params) {
            return 0.0;
        }
        let n = self.n_times() as f64;
        let mut excess = 0.0;
        for k in 0..self.n_times() {
            let d = self.model.regulatory_input(params, &self.data.regulators, k)
                - self.input_threshold;
            excess += d * d;
        }
        FULL_OCCUPATION_PENALTY + FULL_OCCUPATION_SLOPE * excess / n
    }

    /// Objective value at `params`.
    pub fn cost(&self, params: &[f64], scratch: &mut Scratch) -> f64 {
        self.predict(params, scratch);
        let (error, loss) = (self.spec.error, self.spec.loss);
        let mut data_term = 0.0;
        for (&y_hat, &y) in scratch.prediction.iter().zip(self.data.target) {
            data_term += loss.value(error.value(y_hat - y));
        }
        data_term + self.regularization(params) + self.occupation_penalty(params)
    }

    /// Objective value and analytic (sub-)gradient at `params`.
    pub fn cost_and_gradient(
        &self,
        params: &[f64],
        scratch: &mut Scratch,
        grad: &mut [f64],
    ) -> f64 {
        debug_assert_eq!(grad.len(), self.n_params());
        self.predict(params, scratch);

        let n_reg = self.model.n_regulators;
        let (error, loss) = (self.spec.error, self.spec.loss);
        let regulators = &self.data.regulators;
        grad.fill(0.0);
        scratch.integrals.fill(0.0);

        let mut data_term = 0.0;
        for k in 0..self.n_times() {
            let r = scratch.prediction[k] - self.data.target[k];
            let e = error.value(r);
            data_term += loss.value(e);
            let g = loss.derivative(e) * error.derivative(r);

            // dy_k/dw_i is the integral of r_i up to t_k.
            for i in 0..n_reg {
                grad[i] += g * scratch.integrals[i];
            }
            if self.model.constitutive {
                grad[n_reg] += g;
            }
            if let Some(&dt) = self.data.steps.get(k) {
                for i in 0..n_reg {
                    scratch.integrals[i] += dt * regulators.value(i, k);
                }
            }
        }

        let lambda = self.spec.regularization_weight;
        for i in 0..n_reg {
            grad[i] += 2.0 * lambda * params[i];
        }

        let penalty = self.occupation_penalty(params);
        if penalty > 0.0 {
            let scale = 2.0 * FULL_OCCUPATION_SLOPE / self.n_times() as f64;
            for k in 0..self.n_times() {
                let d = self.model.regulatory_input(params, regulators, k) - self.input_threshold;
                for i in 0..n_reg {
                    grad[i] += scale * d * regulators.value(i, k);
                }
            }
        }

        data_term + self.regularization(params) + penalty
    }
}
