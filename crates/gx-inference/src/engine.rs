//! Batched inference engine.
//!
//! Every task is optimized independently, but all of them advance in lockstep:
//! one iteration per task per barrier, on the device pool.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │  env check        → Error::Configuration, nothing runs         │
//! │  validate tasks   → Error::Validation, nothing runs            │
//! │  acquire session  → Error::ResourceExhausted, nothing runs     │
//! │                                                                │
//! │  Loop (lockstep, one barrier per iteration):                   │
//! │    cancellation requested? → mark active tasks Cancelled       │
//! │    Rayon: step every active task (own buffers, own RNG)        │
//! │    report progress                                             │
//! │                                                                │
//! │  collect one result per task, input order, best-so-far params  │
//! └───────────────────────────────────────────────────────────────┘
//! ```

use crate::annealing::AnnealingSearch;
use crate::lbfgs::{LocalSearch, StepOutcome};
use crate::task::{Divergence, FitStatus, InferenceResult, InferenceTask, SearchMethod};
use gx_compute::{BufferLayout, Device, Objective, RegulatorProfiles, TaskBuffers, TaskData};
use gx_core::{EnvironmentCheck, Error, ExpressionDataset, Result, TaskMonitor, TaskId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::collections::HashSet;

/// Standard deviation of the perturbation applied by `randomize_start`.
const RANDOM_START_SCALE: f64 = 1.0;

/// Runs batches of [`InferenceTask`]s on a [`Device`].
pub struct InferenceEngine<'d, E> {
    device: &'d Device,
    env: E,
}

impl<'d, E: EnvironmentCheck> InferenceEngine<'d, E> {
    /// Engine bound to `device`, gated by `env`.
    pub fn new(device: &'d Device, env: E) -> Self {
        Self { device, env }
    }

    /// Device batches run on.
    pub fn device(&self) -> &'d Device {
        self.device
    }

    /// Run every task to completion (or cancellation) and return one result per
    /// task, in input order.
    ///
    /// Per-task numerical divergence is reported as [`FitStatus::Failed`] and
    /// never aborts the batch. Cancellation is checked before every iteration;
    /// cancelled tasks report their best point so far.
    pub fn submit(
        &self,
        dataset: &ExpressionDataset,
        tasks: &[InferenceTask],
        monitor: &dyn TaskMonitor,
    ) -> Result<Vec<InferenceResult>> {
        if !self.env.is_configured() {
            return Err(Error::Configuration(
                "runtime environment is not configured for batch execution".to_string(),
            ));
        }
        validate_batch(dataset, tasks)?;
        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let inputs: Vec<TaskInput> =
            tasks.iter().map(|t| TaskInput::gather(dataset, t)).collect::<Result<_>>()?;
        let layouts: Vec<BufferLayout> = tasks
            .iter()
            .map(|t| BufferLayout {
                n_params: t.model().n_params(),
                n_times: dataset.n_times(),
                n_regulators: t.regulators().len(),
                history: match t.search().method {
                    SearchMethod::Local => t.search().history,
                    SearchMethod::Annealing => 0,
                },
            })
            .collect();

        let mut session = self.device.acquire(&layouts)?;
        log::debug!(
            "batch: {} tasks, {} time points, session {} on {} threads",
            tasks.len(),
            dataset.n_times(),
            session.id(),
            self.device.threads()
        );

        let mut runs: Vec<TaskRun<'_>> = tasks
            .iter()
            .zip(&inputs)
            .map(|(task, input)| TaskRun::new(task, input, dataset))
            .collect::<Result<_>>()?;

        session.for_each_active(&mut runs, TaskRun::is_active, |_, buf, run| run.initialize(buf));

        let max_budget = runs.iter().map(|r| r.budget).max().unwrap_or(0);
        for round in 0..max_budget {
            if !runs.iter().any(TaskRun::is_active) {
                break;
            }
            if monitor.is_cancellation_requested() {
                let mut n_cancelled = 0;
                for run in runs.iter_mut().filter(|r| r.is_active()) {
                    run.status = Some(FitStatus::Cancelled);
                    n_cancelled += 1;
                }
                log::warn!("batch cancelled before iteration {round}: {n_cancelled} tasks stopped");
                break;
            }
            session.for_each_active(&mut runs, TaskRun::is_active, |_, buf, run| run.advance(buf));
            monitor.report_progress(progress(&runs));
        }

        let results: Vec<InferenceResult> =
            runs.into_iter().zip(session.buffers()).map(|(run, buf)| run.finish(buf)).collect();
        drop(session);

        let failed = results.iter().filter(|r| r.is_failed()).count();
        log::debug!("batch done: {} results, {failed} failed", results.len());
        Ok(results)
    }
}

/// Check the whole batch against the dataset before anything runs.
pub fn validate_batch(dataset: &ExpressionDataset, tasks: &[InferenceTask]) -> Result<()> {
    let mut seen: HashSet<TaskId> = HashSet::with_capacity(tasks.len());
    for task in tasks {
        let id = task.id();
        if !seen.insert(id) {
            return Err(Error::Validation(format!("duplicate task id {id}")));
        }
        if !dataset.contains(task.target()) {
            return Err(Error::Validation(format!(
                "task {id}: target gene {} is not in the dataset",
                task.target()
            )));
        }
        if let Some(missing) = task.regulators().iter().find(|g| !dataset.contains(**g)) {
            return Err(Error::Validation(format!(
                "task {id}: regulator gene {missing} is not in the dataset"
            )));
        }
        let expected = task.model().n_regulators;
        if task.regulators().len() != expected {
            return Err(Error::Validation(format!(
                "task {id}: model expects {expected} regulators, task lists {}",
                task.regulators().len()
            )));
        }
        task.search().validate().map_err(|e| match e {
            Error::Validation(msg) => Error::Validation(format!("task {id}: {msg}")),
            other => other,
        })?;
    }
    Ok(())
}

/// Owned per-task inputs: regulator profiles packed regulator-major, time steps.
struct TaskInput {
    regulators: Vec<f64>,
    steps: Vec<f64>,
}

impl TaskInput {
    fn gather(dataset: &ExpressionDataset, task: &InferenceTask) -> Result<Self> {
        let n = dataset.n_times();
        let mut regulators = Vec::with_capacity(task.regulators().len() * n);
        for &g in task.regulators() {
            let profile = dataset.profile(g).ok_or_else(|| {
                Error::Validation(format!(
                    "task {}: regulator gene {g} is not in the dataset",
                    task.id()
                ))
            })?;
            regulators.extend_from_slice(profile);
        }
        let steps = match task.search().time_step {
            Some(dt) => vec![dt; n - 1],
            None => dataset.time_steps(),
        };
        Ok(Self { regulators, steps })
    }
}

enum Search {
    Local(LocalSearch),
    Annealing(AnnealingSearch),
}

/// Per-task state machine: initialized → iterating → terminal `status`.
struct TaskRun<'a> {
    task: &'a InferenceTask,
    objective: Objective<'a>,
    search: Search,
    rng: StdRng,
    cost: f64,
    best_cost: f64,
    last_finite_cost: Option<f64>,
    iterations: usize,
    budget: usize,
    status: Option<FitStatus>,
}

impl<'a> TaskRun<'a> {
    fn new(
        task: &'a InferenceTask,
        input: &'a TaskInput,
        dataset: &'a ExpressionDataset,
    ) -> Result<Self> {
        let target = dataset.profile(task.target()).ok_or_else(|| {
            Error::Validation(format!(
                "task {}: target gene {} is not in the dataset",
                task.id(),
                task.target()
            ))
        })?;
        let data = TaskData {
            target,
            regulators: RegulatorProfiles::new(&input.regulators, dataset.n_times()),
            steps: &input.steps,
        };
        let config = task.search();
        let objective = Objective::new(*task.model(), config.objective_spec(), data);
        let search = match config.method {
            SearchMethod::Local => Search::Local(LocalSearch::new(
                task.model().n_params(),
                config.history,
                config.tolerance,
            )),
            SearchMethod::Annealing => {
                Search::Annealing(AnnealingSearch::new(config.annealing, config.iterations))
            }
        };
        let rng = match config.task_seed(task.id()) {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self {
            task,
            objective,
            search,
            rng,
            cost: f64::INFINITY,
            best_cost: f64::INFINITY,
            last_finite_cost: None,
            iterations: 0,
            budget: config.iterations,
            status: None,
        })
    }

    fn is_active(&self) -> bool {
        self.status.is_none()
    }

    /// Set the start point and evaluate it.
    fn initialize(&mut self, buf: &mut TaskBuffers) {
        let model = *self.objective.model();
        buf.params.fill(0.0);
        if model.constitutive {
            let anchor = self.objective.target().first().copied().unwrap_or(0.0);
            buf.params[model.n_regulators] = anchor;
        }
        if self.task.search().randomize_start {
            for p in buf.params.iter_mut() {
                let z: f64 = self.rng.sample(StandardNormal);
                *p += RANDOM_START_SCALE * z;
            }
        }

        self.cost = match &mut self.search {
            Search::Local(s) => s.start(&self.objective, buf),
            Search::Annealing(s) => s.start(&self.objective, buf),
        };
        buf.best.copy_from_slice(&buf.params);
        self.best_cost = self.cost;

        if !self.cost.is_finite() || buf.grad.iter().any(|g| !g.is_finite()) {
            self.diverge(0);
        } else {
            self.last_finite_cost = Some(self.cost);
        }
    }

    /// Perform one iteration.
    fn advance(&mut self, buf: &mut TaskBuffers) {
        let outcome = match &mut self.search {
            Search::Local(s) => s.step(&self.objective, buf, &mut self.cost),
            Search::Annealing(s) => {
                s.step(&self.objective, buf, &mut self.cost, self.iterations, &mut self.rng)
            }
        };
        match outcome {
            StepOutcome::Continue => {
                self.iterations += 1;
                if self.cost < self.best_cost {
                    self.best_cost = self.cost;
                    buf.best.copy_from_slice(&buf.params);
                }
                self.last_finite_cost = Some(self.cost);
                if self.iterations >= self.budget {
                    self.status = Some(FitStatus::Exhausted);
                }
            }
            StepOutcome::Converged => self.status = Some(FitStatus::Converged),
            StepOutcome::Diverged => {
                self.iterations += 1;
                self.diverge(self.iterations);
            }
        }
    }

    fn diverge(&mut self, iteration: usize) {
        log::warn!(
            "task {} diverged at iteration {iteration} (cost = {})",
            self.task.id(),
            self.cost
        );
        let divergence = Divergence { iteration, last_finite_cost: self.last_finite_cost };
        self.status = Some(FitStatus::Failed(divergence));
    }

    fn progress(&self) -> f64 {
        if self.status.is_some() {
            1.0
        } else {
            self.iterations as f64 / self.budget as f64
        }
    }

    fn finish(self, buf: &TaskBuffers) -> InferenceResult {
        if let Search::Annealing(s) = &self.search {
            log::debug!(
                "task {}: accepted {} of {} proposals",
                self.task.id(),
                s.accepted(),
                self.iterations
            );
        }
        InferenceResult {
            task_id: self.task.id(),
            target: self.task.target(),
            regulators: self.task.regulators().to_vec(),
            model: *self.task.model(),
            params: buf.best.clone(),
            cost: self.best_cost,
            iterations: self.iterations,
            status: self.status.unwrap_or(FitStatus::Exhausted),
        }
    }
}

fn progress(runs: &[TaskRun<'_>]) -> f64 {
    runs.iter().map(TaskRun::progress).sum::<f64>() / runs.len() as f64
}
