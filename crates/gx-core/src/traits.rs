//! Collaborator seams for genexpi
//!
//! The engine never talks to a host application directly. It calls into a
//! [`TaskMonitor`] for progress and cancellation and asks an
//! [`EnvironmentCheck`] whether it may run at all. Hosts implement these however
//! their own runtime requires.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Progress / cancellation channel polled by the engine at every iteration barrier.
pub trait TaskMonitor: Send + Sync {
    /// Advisory completion fraction in `[0, 1]`.
    fn report_progress(&self, fraction: f64);

    /// Whether the caller asked the batch to stop.
    fn is_cancellation_requested(&self) -> bool;
}

/// Monitor that ignores progress and never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

impl TaskMonitor for NoopMonitor {
    fn report_progress(&self, _fraction: f64) {}

    fn is_cancellation_requested(&self) -> bool {
        false
    }
}

/// Shared cancellation flag plus last reported progress.
///
/// Clones share state, so one clone can be handed to the engine while another
/// stays with whoever decides to cancel.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancel_requested: Arc<AtomicBool>,
    progress_bits: Arc<AtomicU64>,
}

impl CancellationToken {
    /// Create a fresh, non-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::Relaxed)
    }

    /// Last progress fraction reported by the engine.
    pub fn progress(&self) -> f64 {
        f64::from_bits(self.progress_bits.load(Ordering::Relaxed))
    }
}

impl TaskMonitor for CancellationToken {
    fn report_progress(&self, fraction: f64) {
        self.progress_bits.store(fraction.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn is_cancellation_requested(&self) -> bool {
        self.is_cancelled()
    }
}

/// Configuration gate: "is the runtime environment ready for batch execution".
pub trait EnvironmentCheck: Send + Sync {
    /// `false` makes the engine refuse batches with a configuration error.
    fn is_configured(&self) -> bool;
}

impl<F> EnvironmentCheck for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_configured(&self) -> bool {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_clones_share_state() {
        let token = CancellationToken::new();
        let engine_side = token.clone();
        assert!(!engine_side.is_cancellation_requested());
        engine_side.report_progress(0.25);
        assert_eq!(token.progress(), 0.25);
        token.cancel();
        assert!(engine_side.is_cancellation_requested());
    }

    #[test]
    fn progress_is_clamped() {
        let token = CancellationToken::new();
        token.report_progress(1.5);
        assert_eq!(token.progress(), 1.0);
    }

    #[test]
    fn environment_check_impls() {
        let ready = || true;
        assert!(ready.is_configured());
        let probe = || false;
        assert!(!probe.is_configured());
        assert!(!NoopMonitor.is_cancellation_requested());
    }
}
