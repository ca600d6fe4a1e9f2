//! Simulated annealing with Metropolis acceptance.
//!
//! Each iteration draws one Gaussian proposal around the current point with
//! standard deviation `step_scale * sqrt(T / T0)` and accepts it with
//! probability `min(1, exp(-(f_new - f) / T))`. The temperature decays
//! geometrically over the task's whole budget; there is no early stop.

use crate::lbfgs::StepOutcome;
use crate::task::AnnealingSchedule;
use gx_compute::{Objective, TaskBuffers};
use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;

/// Stochastic search state for one task; owns nothing but the schedule.
pub(crate) struct AnnealingSearch {
    schedule: AnnealingSchedule,
    budget: usize,
    accepted: usize,
}

impl AnnealingSearch {
    pub fn new(schedule: AnnealingSchedule, budget: usize) -> Self {
        Self { schedule, budget, accepted: 0 }
    }

    /// Proposals accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted
    }

    pub fn start(&mut self, objective: &Objective<'_>, buf: &mut TaskBuffers) -> f64 {
        objective.cost(&buf.params, &mut buf.scratch)
    }

    /// Propose, evaluate, accept or reject. Always consumes the same number of
    /// random draws so the stream stays aligned across runs.
    pub fn step(
        &mut self,
        objective: &Objective<'_>,
        buf: &mut TaskBuffers,
        cost: &mut f64,
        iteration: usize,
        rng: &mut StdRng,
    ) -> StepOutcome {
        let t = self.schedule.temperature(iteration, self.budget);
        let width = self.schedule.step_scale * (t / self.schedule.initial_temperature).sqrt();

        let TaskBuffers { params, trial, direction, scratch, .. } = buf;
        for ((d, y), &x) in direction.iter_mut().zip(trial.iter_mut()).zip(params.iter()) {
            let z: f64 = rng.sample(StandardNormal);
            *d = width * z;
            *y = x + *d;
        }
        let f = objective.cost(trial, scratch);
        let u: f64 = rng.random();

        let w = (f - *cost) / t;
        if w.is_finite() && (w <= 0.0 || u < (-w).exp()) {
            params.copy_from_slice(trial);
            *cost = f;
            self.accepted += 1;
        }
        StepOutcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gx_compute::{BufferLayout, ObjectiveSpec, RegulationModel, RegulatorProfiles, TaskData};
    use rand::SeedableRng;

    #[test]
    fn annealing_finds_constant_level() {
        let target = [2.0, 2.0, 2.0, 2.0];
        let steps = [1.0; 3];
        let model = RegulationModel::additive(0, true);
        let data = TaskData {
            target: &target,
            regulators: RegulatorProfiles::new(&[], 4),
            steps: &steps,
        };
        let obj = Objective::new(model, ObjectiveSpec::default(), data);
        let layout = BufferLayout { n_params: 1, n_times: 4, n_regulators: 0, history: 0 };
        let mut buf = TaskBuffers::allocate(&layout).unwrap();
        let budget = 2000;
        let mut search = AnnealingSearch::new(
            AnnealingSchedule {
                initial_temperature: 1.0,
                final_temperature: 1e-6,
                step_scale: 0.5,
            },
            budget,
        );
        let mut rng = StdRng::seed_from_u64(7);
        let mut cost = search.start(&obj, &mut buf);
        assert_eq!(cost, 16.0);
        for it in 0..budget {
            search.step(&obj, &mut buf, &mut cost, it, &mut rng);
        }
        assert!(search.accepted() > 0);
        assert!((buf.params[0] - 2.0).abs() < 0.05, "c = {}", buf.params[0]);
        assert!(cost < 0.01);
    }

    #[test]
    fn non_finite_proposals_are_rejected() {
        let target = [1e200, 1e200];
        let steps = [1.0];
        let model = RegulationModel::additive(0, true);
        let data = TaskData {
            target: &target,
            regulators: RegulatorProfiles::new(&[], 2),
            steps: &steps,
        };
        let obj = Objective::new(model, ObjectiveSpec::default(), data);
        let layout = BufferLayout { n_params: 1, n_times: 2, n_regulators: 0, history: 0 };
        let mut buf = TaskBuffers::allocate(&layout).unwrap();
        let mut search = AnnealingSearch::new(AnnealingSchedule::default(), 10);
        let mut rng = StdRng::seed_from_u64(1);
        let mut cost = search.start(&obj, &mut buf);
        assert!(cost.is_infinite());
        for it in 0..10 {
            search.step(&obj, &mut buf, &mut cost, it, &mut rng);
        }
        assert_eq!(search.accepted(), 0);
    }
}
