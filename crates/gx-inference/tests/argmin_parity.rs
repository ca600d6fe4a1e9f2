//! Parity of the lockstep local search against argmin's L-BFGS on the same objective.

use argmin::core::{CostFunction, Executor, Gradient, State};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use gx_compute::{
    Device, DeviceConfig, LossFunction, Objective, ObjectiveSpec, RegulationModel,
    RegulatorProfiles, Scratch, TaskData,
};
use gx_core::{ExpressionDataset, NoopMonitor, TaskId};
use gx_inference::{InferenceEngine, InferenceTask, SearchConfig};
use std::cell::RefCell;

struct Problem<'a> {
    objective: Objective<'a>,
    scratch: RefCell<Scratch>,
}

impl CostFunction for Problem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, p: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok(self.objective.cost(p, &mut self.scratch.borrow_mut()))
    }
}

impl Gradient for Problem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, p: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        let mut grad = vec![0.0; p.len()];
        self.objective.cost_and_gradient(p, &mut self.scratch.borrow_mut(), &mut grad);
        Ok(grad)
    }
}

fn dataset() -> ExpressionDataset {
    ExpressionDataset::new(
        vec![0.0, 0.5, 1.5, 2.0, 3.0, 4.5, 5.0],
        vec![
            ("T".into(), vec![2.0, 2.4, 3.5, 3.4, 4.6, 5.9, 5.7]),
            ("R1".into(), vec![0.8, 1.2, 0.4, 0.9, 1.1, 0.2, 0.6]),
            ("R2".into(), vec![0.3, -0.2, 0.5, 0.7, -0.1, 0.4, 0.0]),
        ],
    )
    .unwrap()
}

fn reference_fit(
    ds: &ExpressionDataset,
    spec: ObjectiveSpec,
    constitutive: bool,
) -> (Vec<f64>, f64) {
    let n = ds.n_times();
    let mut regulators = Vec::new();
    for name in ["R1", "R2"] {
        regulators.extend_from_slice(ds.profile(ds.gene_id(name).unwrap()).unwrap());
    }
    let steps = ds.time_steps();
    let target = ds.profile(ds.gene_id("T").unwrap()).unwrap();
    let model = RegulationModel::additive(2, constitutive);
    let data =
        TaskData { target, regulators: RegulatorProfiles::new(&regulators, n), steps: &steps };
    let problem = Problem {
        objective: Objective::new(model, spec, data),
        scratch: RefCell::new(Scratch::new(n, 2)),
    };

    let mut init = vec![0.0; model.n_params()];
    if constitutive {
        init[2] = target[0];
    }
    let solver = LBFGS::new(MoreThuenteLineSearch::new(), 10);
    let res = Executor::new(problem, solver)
        .configure(|state| state.param(init).max_iters(500))
        .run()
        .unwrap();
    let state = res.state();
    (state.get_best_param().unwrap().clone(), state.get_best_cost())
}

fn engine_fit(ds: &ExpressionDataset, cfg: SearchConfig, constitutive: bool) -> (Vec<f64>, f64) {
    let dev = Device::new(DeviceConfig { threads: 1, memory_budget_bytes: None }).unwrap();
    let regs = vec![ds.gene_id("R1").unwrap(), ds.gene_id("R2").unwrap()];
    let task =
        InferenceTask::additive(TaskId(0), ds.gene_id("T").unwrap(), regs, constitutive, cfg);
    let r = InferenceEngine::new(&dev, || true).submit(ds, &[task], &NoopMonitor).unwrap();
    (r[0].params.clone(), r[0].cost)
}

#[test]
fn least_squares_matches_argmin() {
    let ds = dataset();
    let cfg = SearchConfig {
        regularization_weight: 0.05,
        iterations: 500,
        tolerance: 1e-12,
        ..Default::default()
    };
    for constitutive in [false, true] {
        let (ours, our_cost) = engine_fit(&ds, cfg.clone(), constitutive);
        let (theirs, their_cost) = reference_fit(&ds, cfg.objective_spec(), constitutive);
        assert!(
            (our_cost - their_cost).abs() <= 1e-8 * their_cost.abs().max(1.0),
            "cost {our_cost} vs {their_cost}"
        );
        for (a, b) in ours.iter().zip(&theirs) {
            assert!((a - b).abs() < 1e-4, "{ours:?} vs {theirs:?}");
        }
    }
}

#[test]
fn cauchy_loss_matches_argmin_cost() {
    let ds = dataset();
    let cfg = SearchConfig {
        loss_function: LossFunction::Cauchy,
        iterations: 500,
        tolerance: 1e-12,
        ..Default::default()
    };
    let (_, our_cost) = engine_fit(&ds, cfg.clone(), false);
    let (_, their_cost) = reference_fit(&ds, cfg.objective_spec(), false);
    assert!(our_cost <= their_cost + 1e-6, "{our_cost} vs {their_cost}");
}
