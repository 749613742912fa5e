//! Invocation guard: one convergence run at a time, at most one success.
//!
//! Independent read paths may all discover a missing list at once. The guard
//! folds their `provision()` calls into a single run whose outcome every
//! caller shares.
//!
//! ```text
//! Idle --provision()--> InFlight --ok--> Completed
//!   ^                      |
//!   +-------- err ---------+
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ProvisionError, Result};
use crate::orchestrator::ConvergenceRunner;
use crate::report::ConvergenceReport;

/// Outcome of a run, awaitable by any number of callers.
pub type SharedOutcome = Shared<BoxFuture<'static, Result<Arc<ConvergenceReport>>>>;

/// Observable state of the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPhase {
    /// No run yet, or the last run failed.
    Idle,
    /// A run is executing.
    InFlight,
    /// A run succeeded; no further runs start.
    Completed,
}

impl fmt::Display for GuardPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::InFlight => write!(f, "in-flight"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

enum GuardState {
    Idle,
    InFlight { run_id: u64, outcome: SharedOutcome },
    Completed { outcome: SharedOutcome },
}

impl GuardState {
    const fn phase(&self) -> GuardPhase {
        match self {
            Self::Idle => GuardPhase::Idle,
            Self::InFlight { .. } => GuardPhase::InFlight,
            Self::Completed { .. } => GuardPhase::Completed,
        }
    }
}

/// Deduplicates concurrent provisioning requests.
///
/// Construct one per process and share it (it is cheap to wrap in an
/// [`Arc`]). Must be used from within a tokio runtime.
pub struct ProvisionGuard {
    runner: Arc<dyn ConvergenceRunner>,
    state: Arc<Mutex<GuardState>>,
    next_run: AtomicU64,
}

impl ProvisionGuard {
    /// Create a guard around `runner`.
    pub fn new(runner: Arc<dyn ConvergenceRunner>) -> Self {
        Self {
            runner,
            state: Arc::new(Mutex::new(GuardState::Idle)),
            next_run: AtomicU64::new(1),
        }
    }

    /// Create a guard wrapped in an Arc.
    pub fn new_arc(runner: Arc<dyn ConvergenceRunner>) -> Arc<Self> {
        Arc::new(Self::new(runner))
    }

    /// Get the outcome of the current, last successful, or a fresh run.
    ///
    /// Idle starts a run; InFlight and Completed hand out the stored outcome
    /// without starting anything.
    pub async fn provision(&self) -> SharedOutcome {
        let mut state = self.state.lock().await;
        match &*state {
            GuardState::Completed { outcome } => {
                debug!("Provisioning already completed");
                outcome.clone()
            }
            GuardState::InFlight { run_id, outcome } => {
                debug!(run_id, "Joining in-flight provisioning run");
                outcome.clone()
            }
            GuardState::Idle => {
                let run_id = self.next_run.fetch_add(1, Ordering::Relaxed);
                let outcome = self.launch(run_id);
                *state = GuardState::InFlight {
                    run_id,
                    outcome: outcome.clone(),
                };
                outcome
            }
        }
    }

    /// Provision and wait for the outcome.
    ///
    /// # Errors
    ///
    /// Returns the error of the run this call joined or started.
    pub async fn ensure_provisioned(&self) -> Result<Arc<ConvergenceReport>> {
        self.provision().await.await
    }

    /// Forget a completed run so the next call converges again.
    ///
    /// An in-flight run is left alone. Returns whether the state changed.
    pub async fn reset(&self) -> bool {
        let mut state = self.state.lock().await;
        if matches!(*state, GuardState::Completed { .. }) {
            info!("Provisioning guard reset");
            *state = GuardState::Idle;
            true
        } else {
            false
        }
    }

    /// Current phase.
    pub async fn phase(&self) -> GuardPhase {
        self.state.lock().await.phase()
    }

    fn launch(&self, run_id: u64) -> SharedOutcome {
        info!(run_id, "Starting provisioning run");

        let runner = self.runner.clone();
        let task = tokio::spawn(async move { runner.run().await });
        let state = self.state.clone();

        let outcome = async move {
            let result = match task.await {
                Ok(Ok(report)) => Ok(Arc::new(report)),
                Ok(Err(err)) => Err(err),
                Err(join) => Err(ProvisionError::aborted(join.to_string())),
            };
            settle(&state, run_id, &result).await;
            result
        }
        .boxed()
        .shared();

        // Drive the run to settlement even if every caller drops its handle.
        tokio::spawn(outcome.clone().map(|_| ()));
        outcome
    }
}

async fn settle(
    state: &Mutex<GuardState>,
    run_id: u64,
    result: &Result<Arc<ConvergenceReport>>,
) {
    let mut state = state.lock().await;
    let current = match &*state {
        GuardState::InFlight {
            run_id: current,
            outcome,
        } if *current == run_id => outcome.clone(),
        _ => return,
    };

    match result {
        Ok(report) => {
            info!(
                run_id,
                converged = report.converged(),
                failed = report.actions_failed.len(),
                "Provisioning run completed"
            );
            *state = GuardState::Completed { outcome: current };
        }
        Err(err) => {
            warn!(run_id, error = %err, "Provisioning run failed, guard reset");
            *state = GuardState::Idle;
        }
    }
}
