//! Regulation models.
//!
//! A model maps a parameter vector and regulator expression profiles to a
//! predicted target trajectory. Models are plain data: the variant is a tag and
//! [`RegulationModel::predict`] dispatches over it, so the hot loop runs without
//! allocation or dynamic dispatch.
//!
//! Parameter layout is fixed by the model shape:
//!
//! ```text
//! [ w_1, w_2, ..., w_N, (constitutive) ]
//! ```
//!
//! The trajectory is integrated with explicit Euler steps over the time grid:
//! `y_0 = base`, `y_{k+1} = y_k + dt_k * rate(t_k)`, where `base` is the
//! constitutive level when present and the observed target at `t_0` otherwise.

use serde::{Deserialize, Serialize};

/// Variant tag: how the per-regulator weighted inputs combine into a rate.
///
/// Every variant carries exactly one free weight per regulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// `rate(t) = sum_i w_i * r_i(t)`
    #[default]
    Additive,
}

/// Shape of a regulation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegulationModel {
    /// Combination rule.
    #[serde(default)]
    pub kind: ModelKind,
    /// Number of regulators (and regulator weights).
    pub n_regulators: usize,
    /// Whether a constitutive (baseline) expression level is fitted.
    #[serde(default)]
    pub constitutive: bool,
}

impl RegulationModel {
    /// Additive model with `n_regulators` weights.
    pub fn additive(n_regulators: usize, constitutive: bool) -> Self {
        Self { kind: ModelKind::Additive, n_regulators, constitutive }
    }

    /// Length of the parameter vector.
    pub fn n_params(&self) -> usize {
        self.n_regulators + usize::from(self.constitutive)
    }

    /// Regulator weights inside a parameter vector.
    #[inline]
    pub fn weights<'a>(&self, params: &'a [f64]) -> &'a [f64] {
        &params[..self.n_regulators]
    }

    /// Constitutive level inside a parameter vector, if the model has one.
    #[inline]
    pub fn constitutive_value(&self, params: &[f64]) -> Option<f64> {
        self.constitutive.then(|| params[self.n_regulators])
    }

    /// Column names of the parameter vector in layout order.
    pub fn parameter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = if self.n_regulators == 1 {
            vec!["w".to_string()]
        } else {
            (1..=self.n_regulators).map(|i| format!("w{i}")).collect()
        };
        if self.constitutive {
            names.push("constitutive".to_string());
        }
        names
    }

    /// Weighted regulatory input `u(t_k) = sum_i w_i * r_i(t_k)`.
    #[inline]
    pub fn regulatory_input(
        &self,
        params: &[f64],
        regulators: &RegulatorProfiles<'_>,
        k: usize,
    ) -> f64 {
        let mut u = 0.0;
        for (i, &w) in self.weights(params).iter().enumerate() {
            u += w * regulators.value(i, k);
        }
        u
    }

    /// Instantaneous rate of change of the target at sample `k`.
    #[inline]
    pub fn rate(&self, params: &[f64], regulators: &RegulatorProfiles<'_>, k: usize) -> f64 {
        match self.kind {
            ModelKind::Additive => self.regulatory_input(params, regulators, k),
        }
    }

    /// Starting level of the predicted trajectory.
    #[inline]
    pub fn base_level(&self, params: &[f64], anchor: f64) -> f64 {
        self.constitutive_value(params).unwrap_or(anchor)
    }

    /// Predict the target trajectory into `out` (length = number of samples).
    ///
    /// `steps[k]` is the step from sample `k` to `k + 1`; `anchor` is the observed
    /// target value at the first sample.
    pub fn predict(
        &self,
        params: &[f64],
        regulators: &RegulatorProfiles<'_>,
        steps: &[f64],
        anchor: f64,
        out: &mut [f64],
    ) {
        debug_assert_eq!(params.len(), self.n_params());
        debug_assert_eq!(regulators.n_regulators(), self.n_regulators);
        debug_assert_eq!(steps.len() + 1, out.len());

        let Some(first) = out.first_mut() else {
            return;
        };
        let mut y = self.base_level(params, anchor);
        *first = y;
        for (k, &dt) in steps.iter().enumerate() {
            y += dt * self.rate(params, regulators, k);
            out[k + 1] = y;
        }
    }
}

/// Logistic occupation of a regulatory input, in `(0, 1)`.
#[inline]
pub fn occupation(u: f64) -> f64 {
    1.0 / (1.0 + (-u).exp())
}

/// Read-only view over regulator profiles, stored regulator-major.
#[derive(Debug, Clone, Copy)]
pub struct RegulatorProfiles<'a> {
    data: &'a [f64],
    n_times: usize,
}

impl<'a> RegulatorProfiles<'a> {
    /// Wrap a flat `n_regulators x n_times` buffer.
    pub fn new(data: &'a [f64], n_times: usize) -> Self {
        debug_assert!(n_times > 0);
        debug_assert_eq!(data.len() % n_times, 0);
        Self { data, n_times }
    }

    /// Number of regulators in the view.
    pub fn n_regulators(&self) -> usize {
        self.data.len() / self.n_times
    }

    /// Number of samples per regulator.
    pub fn n_times(&self) -> usize {
        self.n_times
    }

    /// Expression of regulator `i` at sample `k`.
    #[inline]
    pub fn value(&self, i: usize, k: usize) -> f64 {
        self.data[i * self.n_times + k]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn parameter_layout() {
        let m = RegulationModel::additive(3, true);
        assert_eq!(m.n_params(), 4);
        assert_eq!(m.parameter_names(), vec!["w1", "w2", "w3", "constitutive"]);
        let p = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(m.weights(&p), &[1.0, 2.0, 3.0]);
        assert_eq!(m.constitutive_value(&p), Some(4.0));

        let single = RegulationModel::additive(1, false);
        assert_eq!(single.parameter_names(), vec!["w"]);
        assert_eq!(single.constitutive_value(&[0.5]), None);

        let none = RegulationModel::additive(0, true);
        assert_eq!(none.n_params(), 1);
        assert_eq!(none.parameter_names(), vec!["constitutive"]);
    }

    #[test]
    fn additive_prediction_integrates_rate() {
        let m = RegulationModel::additive(2, false);
        let regs = [1.0, 1.0, 1.0, 0.0, 2.0, 4.0];
        let view = RegulatorProfiles::new(&regs, 3);
        let mut out = [0.0; 3];
        m.predict(&[2.0, 0.5], &view, &[1.0, 0.5], 10.0, &mut out);
        // rate_0 = 2, rate_1 = 2 + 1 = 3
        assert_relative_eq!(out[0], 10.0);
        assert_relative_eq!(out[1], 12.0);
        assert_relative_eq!(out[2], 13.5);
    }

    #[test]
    fn constitutive_level_replaces_anchor() {
        let m = RegulationModel::additive(0, true);
        let view = RegulatorProfiles::new(&[], 4);
        let mut out = [0.0; 4];
        m.predict(&[3.25], &view, &[1.0, 1.0, 1.0], 100.0, &mut out);
        assert_eq!(out, [3.25; 4]);
    }

    #[test]
    fn negative_weights_repress() {
        let m = RegulationModel::additive(1, false);
        let regs = [1.0, 1.0];
        let view = RegulatorProfiles::new(&regs, 2);
        let mut out = [0.0; 2];
        m.predict(&[-1.5], &view, &[2.0], 5.0, &mut out);
        assert_relative_eq!(out[1], 2.0);
    }

    #[test]
    fn occupation_is_logistic() {
        assert_relative_eq!(occupation(0.0), 0.5);
        assert!(occupation(50.0) > 0.999_999);
        assert!(occupation(-50.0) < 1e-6);
    }
}
