//! Device runtime: execution domain, scoped sessions, per-task buffers.
//!
//! ```text
//! Device (process-wide: thread pool + exclusive lock)
//!   └── acquire(layouts) ──► DeviceSession (one per batch)
//!         ├── TaskBuffers[0]   params / best / grad / trial / direction / scratch / history
//!         ├── TaskBuffers[1]
//!         └── ...
//!       Drop ──► buffers freed, lock released
//! ```
//!
//! A session allocates every task's buffers up front. Either all of them fit
//! (memory budget and allocator both agree) or the acquisition fails with
//! [`Error::ResourceExhausted`] and nothing is handed out.

use crate::objective::Scratch;
use gx_core::{EnvironmentCheck, Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

/// Upper bound on worker threads a device will accept.
pub const MAX_THREADS: usize = 4096;

/// Device construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Worker threads; `0` picks the number of available cores.
    #[serde(default)]
    pub threads: usize,
    /// Cap on bytes a single session may allocate for task buffers.
    #[serde(default)]
    pub memory_budget_bytes: Option<usize>,
}

impl DeviceConfig {
    /// Problems that make this configuration unusable, empty when it is fine.
    pub fn problems(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.threads > MAX_THREADS {
            out.push(format!("threads = {} exceeds the limit of {MAX_THREADS}", self.threads));
        }
        if self.memory_budget_bytes == Some(0) {
            out.push("memory_budget_bytes must be positive when set".to_string());
        }
        out
    }
}

/// Buffer shape for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    /// Parameter-vector length.
    pub n_params: usize,
    /// Samples in the target trajectory.
    pub n_times: usize,
    /// Regulators in the task.
    pub n_regulators: usize,
    /// Quasi-Newton memory depth; `0` when the search keeps no curvature pairs.
    pub history: usize,
}

impl BufferLayout {
    /// Parameter-sized vectors held per task.
    const PARAM_VECTORS: usize = 5;

    /// Number of `f64` slots a task needs, `None` if the count overflows.
    pub fn f64_slots(&self) -> Option<usize> {
        let (n, m) = (self.n_params, self.history);
        let working = Self::PARAM_VECTORS
            .checked_mul(n)?
            .checked_add(self.n_times)?
            .checked_add(self.n_regulators)?;
        let pairs = m.checked_mul(n)?.checked_mul(2)?;
        let history = pairs.checked_add(m.checked_mul(2)?)?.checked_add(n.checked_mul(2)?)?;
        working.checked_add(history)
    }

    /// Bytes a task needs, `None` if the count overflows.
    pub fn bytes(&self) -> Option<usize> {
        self.f64_slots()?.checked_mul(std::mem::size_of::<f64>())
    }
}

/// Quasi-Newton memory of depth `m` over `n` parameters, stored flat.
#[derive(Debug, Clone, Default)]
pub struct HistoryBuffers {
    /// Step differences, `m x n`.
    pub s: Vec<f64>,
    /// Gradient differences, `m x n`.
    pub y: Vec<f64>,
    /// `1 / (s . y)` per pair.
    pub rho: Vec<f64>,
    /// Two-loop coefficients per pair.
    pub alpha: Vec<f64>,
    /// Parameters at the previous iteration.
    pub prev_params: Vec<f64>,
    /// Gradient at the previous iteration.
    pub prev_grad: Vec<f64>,
}

impl HistoryBuffers {
    /// Zeroed memory for depth `m` over `n` parameters.
    pub fn allocate(m: usize, n: usize) -> Result<Self> {
        let pair_len = m.checked_mul(n).ok_or_else(|| {
            Error::ResourceExhausted(format!("history of {m} pairs x {n} params overflows"))
        })?;
        Ok(Self {
            s: alloc_zeroed(pair_len)?,
            y: alloc_zeroed(pair_len)?,
            rho: alloc_zeroed(m)?,
            alpha: alloc_zeroed(m)?,
            prev_params: alloc_zeroed(n)?,
            prev_grad: alloc_zeroed(n)?,
        })
    }

    /// Total `f64` slots held.
    pub fn len(&self) -> usize {
        self.s.len()
            + self.y.len()
            + self.rho.len()
            + self.alpha.len()
            + self.prev_params.len()
            + self.prev_grad.len()
    }

    /// Whether no memory is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Working memory owned by exactly one task for the lifetime of a session.
#[derive(Debug, Clone, Default)]
pub struct TaskBuffers {
    /// Current parameter vector.
    pub params: Vec<f64>,
    /// Best parameter vector observed so far.
    pub best: Vec<f64>,
    /// Gradient at `params`.
    pub grad: Vec<f64>,
    /// Trial point under evaluation.
    pub trial: Vec<f64>,
    /// Search direction (local) or proposal offsets (annealing).
    pub direction: Vec<f64>,
    /// Objective scratch.
    pub scratch: Scratch,
    /// Quasi-Newton memory (local search only).
    pub history: HistoryBuffers,
}

impl TaskBuffers {
    /// Allocate zeroed buffers for `layout`, failing instead of aborting on OOM.
    pub fn allocate(layout: &BufferLayout) -> Result<Self> {
        let n = layout.n_params;
        Ok(Self {
            params: alloc_zeroed(n)?,
            best: alloc_zeroed(n)?,
            grad: alloc_zeroed(n)?,
            trial: alloc_zeroed(n)?,
            direction: alloc_zeroed(n)?,
            scratch: Scratch {
                prediction: alloc_zeroed(layout.n_times)?,
                integrals: alloc_zeroed(layout.n_regulators)?,
            },
            history: HistoryBuffers::allocate(layout.history, n)?,
        })
    }
}

/// Zero-filled vector, or `ResourceExhausted` if the allocator refuses.
pub fn alloc_zeroed(len: usize) -> Result<Vec<f64>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|e| {
        Error::ResourceExhausted(format!("cannot allocate {len} f64 slots: {e}"))
    })?;
    v.resize(len, 0.0);
    Ok(v)
}

/// Process-wide execution context.
pub struct Device {
    pool: rayon::ThreadPool,
    config: DeviceConfig,
    lock: Mutex<()>,
    next_session: AtomicU64,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("threads", &self.pool.current_num_threads())
            .field("config", &self.config)
            .finish()
    }
}

static GLOBAL: OnceLock<std::result::Result<Device, String>> = OnceLock::new();

impl Device {
    /// Build a device with its own worker pool.
    pub fn new(config: DeviceConfig) -> Result<Self> {
        let problems = config.problems();
        if !problems.is_empty() {
            return Err(Error::Configuration(problems.join("; ")));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("gx-worker-{i}"))
            .build()
            .map_err(|e| Error::ResourceExhausted(format!("failed to start worker pool: {e}")))?;
        log::debug!("device ready: {} worker threads", pool.current_num_threads());
        Ok(Self { pool, config, lock: Mutex::new(()), next_session: AtomicU64::new(1) })
    }

    /// Lazily created shared device with default configuration.
    pub fn global() -> Result<&'static Device> {
        GLOBAL
            .get_or_init(|| Device::new(DeviceConfig::default()).map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|msg| Error::ResourceExhausted(msg.clone()))
    }

    /// Worker threads in the pool.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Configuration the device was built with.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Acquire the device exclusively and allocate one buffer set per layout.
    ///
    /// Blocks while another session is alive. Calling this again on the same
    /// thread before the first session is dropped deadlocks.
    pub fn acquire(&self, layouts: &[BufferLayout]) -> Result<DeviceSession<'_>> {
        let requested = layouts
            .iter()
            .try_fold(0usize, |acc, l| l.bytes().and_then(|b| acc.checked_add(b)))
            .ok_or_else(|| {
                Error::ResourceExhausted(format!(
                    "batch of {} tasks needs more bytes than the address space holds",
                    layouts.len()
                ))
            })?;
        if let Some(budget) = self.config.memory_budget_bytes
            && requested > budget
        {
            return Err(Error::ResourceExhausted(format!(
                "batch of {} tasks needs {requested} bytes, budget is {budget}",
                layouts.len()
            )));
        }

        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut buffers = Vec::new();
        buffers.try_reserve_exact(layouts.len()).map_err(|e| {
            Error::ResourceExhausted(format!("cannot allocate {} task slots: {e}", layouts.len()))
        })?;
        for layout in layouts {
            buffers.push(TaskBuffers::allocate(layout)?);
        }

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        log::debug!("device session {id} acquired: {} tasks, {requested} bytes", layouts.len());
        Ok(DeviceSession { pool: &self.pool, _guard: guard, buffers, id })
    }
}

/// Exclusive, scoped use of a [`Device`] for one batch.
#[derive(Debug)]
pub struct DeviceSession<'d> {
    pool: &'d rayon::ThreadPool,
    _guard: MutexGuard<'d, ()>,
    buffers: Vec<TaskBuffers>,
    id: u64,
}

impl DeviceSession<'_> {
    /// Session number, unique per device.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the session holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Buffers of every task, in acquisition order.
    pub fn buffers(&self) -> &[TaskBuffers] {
        &self.buffers
    }

    /// Run `f` on every task whose state passes `is_active`, in parallel on the
    /// device pool. Returns once all of them are done (one barrier).
    ///
    /// `states[i]` is paired with the buffers of task `i`.
    pub fn for_each_active<S, A, F>(&mut self, states: &mut [S], is_active: A, f: F)
    where
        S: Send,
        A: Fn(&S) -> bool + Sync,
        F: Fn(usize, &mut TaskBuffers, &mut S) + Sync,
    {
        debug_assert_eq!(states.len(), self.buffers.len());
        let buffers = &mut self.buffers;
        self.pool.install(|| {
            buffers.par_iter_mut().zip(states.par_iter_mut()).enumerate().for_each(
                |(i, (buf, state))| {
                    if is_active(state) {
                        f(i, buf, state);
                    }
                },
            );
        });
    }
}

impl Drop for DeviceSession<'_> {
    fn drop(&mut self) {
        log::debug!("device session {} released: {} tasks", self.id, self.buffers.len());
    }
}

/// Environment probe for the CPU execution domain.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeProbe {
    config: DeviceConfig,
}

impl RuntimeProbe {
    /// Probe for a device built with `config`.
    pub fn new(config: DeviceConfig) -> Self {
        Self { config }
    }

    /// Human-readable reasons the environment is not ready.
    pub fn diagnose(&self) -> Vec<String> {
        let mut out = self.config.problems();
        if let Err(e) = std::thread::available_parallelism() {
            out.push(format!("cannot query available parallelism: {e}"));
        }
        out
    }
}

impl EnvironmentCheck for RuntimeProbe {
    fn is_configured(&self) -> bool {
        self.diagnose().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> BufferLayout {
        BufferLayout { n_params: 3, n_times: 10, n_regulators: 2, history: 4 }
    }

    #[test]
    fn layout_accounts_for_every_buffer() {
        let l = layout();
        assert_eq!(l.f64_slots(), Some(5 * 3 + 10 + 2 + 2 * 4 * 3 + 2 * 4 + 2 * 3));
        let b = TaskBuffers::allocate(&l).unwrap();
        let slots = b.params.len()
            + b.best.len()
            + b.grad.len()
            + b.trial.len()
            + b.direction.len()
            + b.scratch.len()
            + b.history.len();
        assert_eq!(Some(slots), l.f64_slots());
        assert_eq!(b.history.s.len(), 12);
        assert_eq!(b.history.rho.len(), 4);
    }

    #[test]
    fn session_allocates_all_tasks() {
        let dev = Device::new(DeviceConfig { threads: 2, memory_budget_bytes: None }).unwrap();
        assert_eq!(dev.threads(), 2);
        let session = dev.acquire(&[layout(); 4]).unwrap();
        assert_eq!(session.len(), 4);
        assert!(session.buffers().iter().all(|b| b.params == vec![0.0; 3]));
    }

    #[test]
    fn budget_overflow_is_resource_exhaustion() {
        let l = layout();
        let budget = l.bytes().unwrap() * 2;
        let dev = Device::new(DeviceConfig { threads: 1, memory_budget_bytes: Some(budget) })
            .unwrap();
        assert!(dev.acquire(&[l; 2]).is_ok());
        let err = dev.acquire(&[l; 3]).unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)), "{err}");
    }

    #[test]
    fn history_without_budget_fails_cleanly() {
        let dev = Device::new(DeviceConfig { threads: 1, memory_budget_bytes: None }).unwrap();
        let huge = BufferLayout { history: usize::MAX / 4, ..layout() };
        assert_eq!(huge.f64_slots(), None);
        let err = dev.acquire(&[layout(), huge]).unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)), "{err}");

        let large = BufferLayout { n_params: 1, history: usize::MAX / 64, ..layout() };
        assert!(large.bytes().is_some());
        let err = dev.acquire(&[large]).unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)), "{err}");
    }

    #[test]
    fn history_counts_against_the_budget() {
        let shallow = BufferLayout { history: 0, ..layout() };
        let deep = BufferLayout { history: 64, ..layout() };
        let budget = shallow.bytes().unwrap() * 2;
        let dev = Device::new(DeviceConfig { threads: 1, memory_budget_bytes: Some(budget) })
            .unwrap();
        assert!(dev.acquire(&[shallow; 2]).is_ok());
        assert!(matches!(dev.acquire(&[deep]), Err(Error::ResourceExhausted(_))));
    }

    #[test]
    fn sessions_are_released_on_drop() {
        let dev = Device::new(DeviceConfig { threads: 1, memory_budget_bytes: None }).unwrap();
        let first = dev.acquire(&[layout()]).unwrap().id();
        // The first session was dropped at the end of the statement above.
        let second = dev.acquire(&[layout()]).unwrap();
        assert!(second.id() > first);
    }

    #[test]
    fn for_each_active_skips_inactive_states() {
        let dev = Device::new(DeviceConfig { threads: 3, memory_budget_bytes: None }).unwrap();
        let mut session = dev.acquire(&[layout(); 5]).unwrap();
        let mut states = vec![true, false, true, false, true];
        session.for_each_active(&mut states, |active| *active, |i, buf, _| {
            buf.params.fill(i as f64 + 1.0);
        });
        let firsts: Vec<f64> = session.buffers().iter().map(|b| b.params[0]).collect();
        assert_eq!(firsts, vec![1.0, 0.0, 3.0, 0.0, 5.0]);
    }

    #[test]
    fn bad_config_is_rejected() {
        let cfg = DeviceConfig { threads: MAX_THREADS + 1, memory_budget_bytes: Some(0) };
        assert_eq!(cfg.problems().len(), 2);
        assert!(!RuntimeProbe::new(cfg).is_configured());
        assert!(matches!(Device::new(cfg), Err(Error::Configuration(_))));
        assert!(RuntimeProbe::default().is_configured());
    }

    #[test]
    fn global_device_is_shared() {
        let a = Device::global().unwrap();
        let b = Device::global().unwrap();
        assert!(std::ptr::eq(a, b));
    }
}
