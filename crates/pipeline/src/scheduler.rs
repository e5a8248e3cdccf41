//! Fixed-interval poll loop with overlap prevention.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::cycle::{CycleOutcome, PipelineState};

/// Held for the duration of one cycle.  Dropping it (including on panic or
/// abort) returns the scheduler to idle.
pub struct CycleGuard {
    running: Arc<AtomicBool>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

pub struct Scheduler {
    state: Arc<Mutex<PipelineState>>,
    running: Arc<AtomicBool>,
    skipped_ticks: AtomicU64,
    interval: Duration,
}

impl Scheduler {
    pub fn new(state: PipelineState, interval: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            running: Arc::new(AtomicBool::new(false)),
            skipped_ticks: AtomicU64::new(0),
            interval,
        }
    }

    pub fn state(&self) -> Arc<Mutex<PipelineState>> {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ticks dropped because a cycle was still in progress.
    pub fn skipped_ticks(&self) -> u64 {
        self.skipped_ticks.load(Ordering::SeqCst)
    }

    /// Move from idle to running.  `None` when a cycle is already running.
    pub fn try_begin(&self) -> Option<CycleGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| CycleGuard {
                running: self.running.clone(),
            })
    }

    /// Run a single cycle on the caller's task.
    pub async fn run_once(&self) -> Result<CycleOutcome> {
        let Some(_guard) = self.try_begin() else {
            bail!("a cycle is already in progress");
        };
        let mut state = self.state.lock().await;
        state.run_cycle().await
    }

    /// Tick every interval until `shutdown` flips to `true` (or its sender is
    /// dropped).  Each cycle runs on its own task; ticks that fire while it is
    /// still running are skipped.  A cycle still in flight at shutdown is
    /// aborted.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;
        info!(interval_ms = self.interval.as_millis() as u64, "scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(guard) = self.try_begin() else {
                        let skipped = self.skipped_ticks.fetch_add(1, Ordering::SeqCst) + 1;
                        info!(skipped, "previous cycle still running, tick skipped");
                        continue;
                    };
                    let state = self.state.clone();
                    in_flight = Some(tokio::spawn(async move {
                        let _guard = guard;
                        let mut state = state.lock().await;
                        match state.run_cycle().await {
                            Ok(outcome) => debug!(?outcome, "cycle finished"),
                            Err(err) => error!(error = %format!("{err:#}"), "cycle failed"),
                        }
                    }));
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Some(handle) = in_flight {
            if !handle.is_finished() {
                handle.abort();
                info!("in-flight cycle aborted");
            }
            let _ = handle.await;
        }
        info!("scheduler stopped");
    }
}
