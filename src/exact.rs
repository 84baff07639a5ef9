//! Exact-time captures.
//!
//! Loading and adapting the page takes a variable ~12 s, so the browser is
//! started `lead` ahead of the target and the screenshot is held until the
//! target itself.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::capture::{CaptureResult, CaptureRoutine};
use crate::clock::Clock;
use crate::guard::{self, DualTimerGuard, GuardConfig, GuardError};

pub struct ExactScheduler {
    routine: Arc<CaptureRoutine>,
    clock: Arc<dyn Clock>,
    guard_config: GuardConfig,
}

impl ExactScheduler {
    pub fn new(routine: Arc<CaptureRoutine>, clock: Arc<dyn Clock>, guard_config: GuardConfig) -> Self {
        Self {
            routine,
            clock,
            guard_config,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn lead(&self) -> Duration {
        self.guard_config.lead
    }

    pub fn lead_instant(&self, target: DateTime<Utc>) -> Result<DateTime<Utc>, GuardError> {
        guard::lead_instant(target, self.guard_config.lead)
    }

    /// An idle guard configured with this scheduler's lead.
    pub fn new_guard(&self) -> DualTimerGuard {
        DualTimerGuard::new(self.clock.clone(), self.guard_config.clone())
    }

    /// Pre-warms now and shoots at `target`. Called when a guard fires.
    pub async fn run(&self, target: DateTime<Utc>) -> CaptureResult {
        let started = self.clock.now();
        info!(
            %target,
            head_start_ms = (target - started).num_milliseconds(),
            "pre-warm starting"
        );

        let result = self.routine.capture_at(Some(target)).await;

        match (&result.error, result.captured_at) {
            (None, Some(at)) => info!(
                skew_ms = (at - target).num_milliseconds(),
                prewarm_ms = (at - started).num_milliseconds(),
                "exact capture taken"
            ),
            (Some(e), _) => error!(%target, "exact capture failed: {e}"),
            _ => {}
        }
        result
    }

    /// Waits for `target - lead` behind a dual-timer guard, then [`run`]s.
    ///
    /// [`run`]: ExactScheduler::run
    pub async fn schedule_exact(&self, target: DateTime<Utc>) -> CaptureResult {
        let guard = self.new_guard();
        let (tx, rx) = oneshot::channel();
        if let Err(e) = guard.arm(target, move || {
            let _ = tx.send(());
        }) {
            return CaptureResult::failure(e.to_string());
        }
        if rx.await.is_err() {
            return CaptureResult::failure("guard stopped before firing");
        }
        self.run(target).await
    }
}
