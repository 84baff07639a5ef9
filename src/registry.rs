//! In-memory job registry.
//!
//! Each job owns one dual-timer guard. One-shot jobs leave the registry when
//! their capture finishes; recurring jobs are re-armed for the same time on
//! the next day. Nothing survives a restart.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::exact::ExactScheduler;
use crate::guard::{DualTimerGuard, GuardError};

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

fn recurrence_period() -> TimeDelta {
    TimeDelta::days(1)
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Invalid datetime '{0}': expected ISO 8601, e.g. 2026-10-16T09:30:00+09:00")]
    InvalidTimestamp(String),

    #[error("Scheduled time {target} is not in the future (now {now})")]
    NotInFuture {
        target: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error(transparent)]
    Guard(#[from] GuardError),
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJob {
    pub id: String,
    pub target_instant: DateTime<Utc>,
    pub recurring: bool,
    pub created_at: DateTime<Utc>,
}

struct JobEntry {
    job: ScheduledJob,
    guard: Arc<DualTimerGuard>,
}

pub struct JobRegistry {
    jobs: Mutex<HashMap<String, JobEntry>>,
    scheduler: Arc<ExactScheduler>,
    me: Weak<JobRegistry>,
}

impl JobRegistry {
    pub fn new(scheduler: Arc<ExactScheduler>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            jobs: Mutex::new(HashMap::new()),
            scheduler,
            me: me.clone(),
        })
    }

    fn clock(&self) -> &Arc<dyn Clock> {
        self.scheduler.clock()
    }

    /// Registers a capture at `target`. Must be called inside a tokio
    /// runtime.
    pub fn schedule(
        &self,
        target: DateTime<Utc>,
        recurring: bool,
    ) -> Result<ScheduledJob, ScheduleError> {
        let now = self.clock().now();
        if target <= now {
            return Err(ScheduleError::NotInFuture { target, now });
        }

        let job = ScheduledJob {
            id: Uuid::new_v4().to_string(),
            target_instant: target,
            recurring,
            created_at: now,
        };
        let guard = Arc::new(self.scheduler.new_guard());

        let mut jobs = self.jobs.lock();
        self.arm(&job.id, &guard, target)?;
        jobs.insert(
            job.id.clone(),
            JobEntry {
                job: job.clone(),
                guard,
            },
        );
        info!(job_id = %job.id, %target, recurring, "job scheduled");
        Ok(job)
    }

    /// Sorted by target instant.
    pub fn list(&self) -> Vec<ScheduledJob> {
        let mut jobs: Vec<_> = self.jobs.lock().values().map(|e| e.job.clone()).collect();
        jobs.sort_by_key(|j| j.target_instant);
        jobs
    }

    pub fn get(&self, id: &str) -> Option<ScheduledJob> {
        self.jobs.lock().get(id).map(|e| e.job.clone())
    }

    /// Removes the job and stops its guard. A capture that already started
    /// runs to completion.
    pub fn cancel(&self, id: &str) -> Result<ScheduledJob, ScheduleError> {
        let entry = self
            .jobs
            .lock()
            .remove(id)
            .ok_or_else(|| ScheduleError::JobNotFound(id.to_string()))?;
        if entry.guard.cancel() {
            info!(job_id = id, "job cancelled");
        } else {
            info!(job_id = id, "job removed; its capture is already running");
        }
        Ok(entry.job)
    }

    fn arm(
        &self,
        id: &str,
        guard: &DualTimerGuard,
        target: DateTime<Utc>,
    ) -> Result<(), GuardError> {
        let me = self.me.clone();
        let id = id.to_string();
        guard.arm(target, move || {
            tokio::spawn(async move {
                if let Some(registry) = me.upgrade() {
                    registry.fire(&id, target).await;
                }
            });
        })?;
        Ok(())
    }

    async fn fire(&self, id: &str, target: DateTime<Utc>) {
        info!(job_id = id, %target, "job fired");
        let result = self.scheduler.run(target).await;
        if !result.success {
            warn!(job_id = id, "job capture failed");
        }
        self.complete(id, target);
    }

    fn complete(&self, id: &str, target: DateTime<Utc>) {
        let mut jobs = self.jobs.lock();
        let Some(entry) = jobs.get_mut(id) else {
            return;
        };
        if !entry.job.recurring {
            jobs.remove(id);
            info!(job_id = id, "job finished");
            return;
        }

        let now = self.clock().now();
        let mut next = target + recurrence_period();
        while matches!(self.scheduler.lead_instant(next), Ok(lead) if lead <= now) {
            next += recurrence_period();
        }
        if let Err(e) = entry.guard.reset() {
            error!(job_id = id, "cannot re-arm recurring job: {e}");
            return;
        }
        entry.job.target_instant = next;
        let guard = entry.guard.clone();
        if let Err(e) = self.arm(id, &guard, next) {
            error!(job_id = id, "cannot re-arm recurring job: {e}");
            jobs.remove(id);
            return;
        }
        info!(job_id = id, next = %next, "recurring job re-armed");
    }
}

/// Parses a client-supplied instant. RFC 3339 with an offset is taken as
/// is; a bare `YYYY-MM-DDTHH:MM[:SS]` is read as local time.
pub fn parse_instant(s: &str) -> Result<DateTime<Utc>, ScheduleError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .and_then(|naive| naive.and_local_timezone(Local).earliest())
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| ScheduleError::InvalidTimestamp(s.to_string()))
}
