//! L-BFGS state machine for lockstep local search.
//!
//! One call to [`LocalSearch::step`] is one iteration: a two-loop recursion for
//! the direction, Armijo backtracking along it, then a fresh cost + gradient at
//! the accepted point. Every vector lives in the task's
//! [`TaskBuffers`](gx_compute::TaskBuffers), allocated once by the device session;
//! this module only keeps ring cursors and scalars.

use gx_compute::{HistoryBuffers, Objective, TaskBuffers};

/// Sufficient-decrease constant.
const ARMIJO_C1: f64 = 1e-4;
/// Step shrink factor per backtracking round.
const BACKTRACK_SHRINK: f64 = 0.5;
/// Backtracking rounds before the line search gives up.
const MAX_BACKTRACK: usize = 40;
/// Curvature pairs with `s.y` at or below this are skipped.
const MIN_CURVATURE: f64 = 1e-12;

/// Cursor over a ring of `m` curvature pairs `(s, y, rho)` held in
/// [`HistoryBuffers`].
struct RingHistory {
    n: usize,
    m: usize,
    head: usize,
    len: usize,
}

impl RingHistory {
    fn new(m: usize, n: usize) -> Self {
        debug_assert!(m > 0);
        Self { n, m, head: 0, len: 0 }
    }

    /// Ring slot backing logical index `i` (0 = oldest).
    #[inline]
    fn slot(&self, i: usize) -> usize {
        (self.head + i) % self.m
    }

    /// Write `s = x - x_prev`, `y = g - g_prev` straight into the next slot and
    /// commit it only if the pair has positive curvature.
    fn push_difference(&mut self, mem: &mut HistoryBuffers, x: &[f64], g: &[f64]) -> bool {
        let slot = if self.len < self.m { self.slot(self.len) } else { self.head };
        let off = slot * self.n;
        let HistoryBuffers { s, y, rho, prev_params, prev_grad, .. } = mem;
        let s = &mut s[off..off + self.n];
        let y = &mut y[off..off + self.n];
        let mut sy = 0.0;
        for j in 0..self.n {
            s[j] = x[j] - prev_params[j];
            y[j] = g[j] - prev_grad[j];
            sy += s[j] * y[j];
        }
        if !(sy > MIN_CURVATURE) {
            return false;
        }
        rho[slot] = 1.0 / sy;
        if self.len < self.m {
            self.len += 1;
        } else {
            self.head = (self.head + 1) % self.m;
        }
        true
    }

    #[inline]
    fn len(&self) -> usize {
        self.len
    }

    #[inline]
    fn s<'m>(&self, mem: &'m HistoryBuffers, i: usize) -> &'m [f64] {
        let off = self.slot(i) * self.n;
        &mem.s[off..off + self.n]
    }

    #[inline]
    fn y<'m>(&self, mem: &'m HistoryBuffers, i: usize) -> &'m [f64] {
        let off = self.slot(i) * self.n;
        &mem.y[off..off + self.n]
    }

    #[inline]
    fn rho(&self, mem: &HistoryBuffers, i: usize) -> f64 {
        mem.rho[self.slot(i)]
    }
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Quasi-Newton cursor plus convergence bookkeeping for one problem. The
/// vectors themselves live in the task's [`HistoryBuffers`].
pub(crate) struct LbfgsState {
    history: RingHistory,
    has_prev: bool,
    prev_cost: Option<f64>,
    tol: f64,
    /// Convergence criterion met (or numerics went bad).
    pub converged: bool,
    /// Cost or gradient was non-finite.
    pub failed: bool,
}

impl LbfgsState {
    pub fn new(n: usize, m: usize, tol: f64) -> Self {
        Self {
            history: RingHistory::new(m, n),
            has_prev: false,
            prev_cost: None,
            tol,
            converged: false,
            failed: false,
        }
    }

    /// Gradient tolerance scaled by `sqrt(|cost|)` so larger residual sums are
    /// not held to an absolute threshold.
    fn effective_tol(&self, cost: f64) -> f64 {
        self.tol * cost.abs().max(1.0).sqrt()
    }

    fn relative_change(prev: f64, curr: f64) -> f64 {
        (prev - curr).abs() / prev.abs().max(curr.abs()).max(1.0)
    }

    /// Begin an iteration at `x` with `cost` and `grad` evaluated there.
    ///
    /// Writes a descent direction into `direction` and returns the directional
    /// derivative `grad . direction` (negative), or `None` when the state is done.
    pub fn begin_iter(
        &mut self,
        mem: &mut HistoryBuffers,
        x: &[f64],
        cost: f64,
        grad: &[f64],
        direction: &mut [f64],
    ) -> Option<f64> {
        if self.converged {
            return None;
        }
        if !cost.is_finite() || grad.iter().any(|g| !g.is_finite()) {
            self.failed = true;
            self.converged = true;
            return None;
        }

        if dot(grad, grad).sqrt() < self.effective_tol(cost) {
            self.converged = true;
            return None;
        }
        if let Some(prev) = self.prev_cost
            && Self::relative_change(prev, cost) < self.tol
        {
            self.converged = true;
            return None;
        }
        self.prev_cost = Some(cost);

        if self.has_prev {
            self.history.push_difference(mem, x, grad);
        }
        mem.prev_params.copy_from_slice(x);
        mem.prev_grad.copy_from_slice(grad);
        self.has_prev = true;

        self.two_loop(mem, grad, direction);
        let mut dir_deriv = dot(grad, direction);
        if !(dir_deriv < 0.0) {
            for (d, &g) in direction.iter_mut().zip(grad) {
                *d = -g;
            }
            dir_deriv = -dot(grad, grad);
        }
        Some(dir_deriv)
    }

    /// `out = -H * grad` via the two-loop recursion.
    fn two_loop(&self, mem: &mut HistoryBuffers, grad: &[f64], out: &mut [f64]) {
        out.copy_from_slice(grad);
        let ring = &self.history;
        let k = ring.len();
        if k == 0 {
            out.iter_mut().for_each(|v| *v = -*v);
            return;
        }

        for i in (0..k).rev() {
            let a = ring.rho(mem, i) * dot(ring.s(mem, i), out);
            mem.alpha[i] = a;
            for (q, &y) in out.iter_mut().zip(ring.y(mem, i)) {
                *q -= a * y;
            }
        }

        let (s_last, y_last) = (ring.s(mem, k - 1), ring.y(mem, k - 1));
        let yy = dot(y_last, y_last);
        let gamma = if yy > 1e-30 { dot(s_last, y_last) / yy } else { 1.0 };
        out.iter_mut().for_each(|v| *v *= gamma);

        for i in 0..k {
            let beta = ring.rho(mem, i) * dot(ring.y(mem, i), out);
            let coef = mem.alpha[i] - beta;
            for (r, &s) in out.iter_mut().zip(ring.s(mem, i)) {
                *r += coef * s;
            }
        }

        out.iter_mut().for_each(|v| *v = -*v);
    }
}

/// Result of one lockstep iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepOutcome {
    /// An iteration was performed; keep going.
    Continue,
    /// Done without performing an iteration.
    Converged,
    /// Cost or gradient became non-finite.
    Diverged,
}

/// Gradient-based local search driving an [`LbfgsState`].
pub(crate) struct LocalSearch {
    state: LbfgsState,
}

impl LocalSearch {
    pub fn new(n_params: usize, history: usize, tol: f64) -> Self {
        Self { state: LbfgsState::new(n_params, history, tol) }
    }

    /// Evaluate cost + gradient at the start point, filling `buf.grad`.
    pub fn start(&mut self, objective: &Objective<'_>, buf: &mut TaskBuffers) -> f64 {
        objective.cost_and_gradient(&buf.params, &mut buf.scratch, &mut buf.grad)
    }

    /// One iteration from `buf.params` (cost `*cost`, gradient `buf.grad`).
    pub fn step(
        &mut self,
        objective: &Objective<'_>,
        buf: &mut TaskBuffers,
        cost: &mut f64,
    ) -> StepOutcome {
        let TaskBuffers { params, grad, trial, direction, scratch, history, .. } = buf;
        let Some(dir_deriv) = self.state.begin_iter(history, params, *cost, grad, direction)
        else {
            return if self.state.failed { StepOutcome::Diverged } else { StepOutcome::Converged };
        };

        let mut step = 1.0;
        let mut accepted = None;
        for _ in 0..MAX_BACKTRACK {
            for ((t, &x), &d) in trial.iter_mut().zip(params.iter()).zip(direction.iter()) {
                *t = x + step * d;
            }
            let f = objective.cost(trial, scratch);
            if f.is_finite() && f <= *cost + ARMIJO_C1 * step * dir_deriv {
                accepted = Some(f);
                break;
            }
            step *= BACKTRACK_SHRINK;
        }
        if accepted.is_none() {
            // No decrease representable along a descent direction: stationary.
            self.state.converged = true;
            return StepOutcome::Converged;
        }

        params.copy_from_slice(trial);
        *cost = objective.cost_and_gradient(params, scratch, grad);
        if !cost.is_finite() || grad.iter().any(|g| !g.is_finite()) {
            self.state.failed = true;
            return StepOutcome::Diverged;
        }
        StepOutcome::Continue
    }
}
