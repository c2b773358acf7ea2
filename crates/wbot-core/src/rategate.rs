//! Interval control for recurring tasks.
//!
//! The orchestrator launches every poll task on every tick; the gate decides
//! which of them actually run. A skip is a deliberate no-op, not a failure.
//! This limits control rate (how often a task body executes), not data
//! volume.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Bookkeeping for one named recurring task. Owned exclusively by the gate;
/// task bodies never see it.
#[derive(Debug)]
struct PollTaskDescriptor {
    interval: Duration,
    last_run_at: Option<Instant>,
}

/// Ensures a named recurring task executes at most once per configured
/// interval. Each name maps to exactly one descriptor for the process
/// lifetime; the interval is fixed on first use.
#[derive(Default)]
pub struct RateGate {
    tasks: Mutex<HashMap<String, PollTaskDescriptor>>,
}

impl RateGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` if `name`'s interval has elapsed (or it never ran),
    /// recording the start time; otherwise skip and return `None`.
    pub async fn guard<F, Fut, T>(&self, name: &str, interval: Duration, task: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        {
            let mut tasks = self.tasks.lock().await;
            let desc = tasks
                .entry(name.to_string())
                .or_insert_with(|| PollTaskDescriptor {
                    interval,
                    last_run_at: None,
                });
            let now = Instant::now();
            if let Some(last) = desc.last_run_at {
                if now.duration_since(last) < desc.interval {
                    return None;
                }
            }
            desc.last_run_at = Some(now);
        }
        Some(task().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn interval_gating_runs_skips_runs() {
        let gate = RateGate::new();
        let runs = AtomicUsize::new(0);
        let body = || async {
            runs.fetch_add(1, Ordering::SeqCst);
        };

        // t=0 runs
        assert!(gate.guard("scan", Duration::from_secs(5), body).await.is_some());
        // t=3s skipped
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(gate.guard("scan", Duration::from_secs(5), body).await.is_none());
        // t=6s runs again
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(gate.guard("scan", Duration::from_secs(5), body).await.is_some());

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn names_are_gated_independently() {
        let gate = RateGate::new();
        assert!(gate.guard("a", Duration::from_secs(5), || async { 1 }).await.is_some());
        assert!(gate.guard("b", Duration::from_secs(5), || async { 2 }).await.is_some());
        assert!(gate.guard("a", Duration::from_secs(5), || async { 1 }).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn result_is_returned_on_run() {
        let gate = RateGate::new();
        let got = gate
            .guard("t", Duration::from_secs(1), || async { "done" })
            .await;
        assert_eq!(got, Some("done"));
    }
}
