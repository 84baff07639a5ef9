//! Dual-timer guard.
//!
//! Fires a callback once at `target - lead`. Two triggers race for it: a
//! 1 s polling loop that compares wall-clock time, and a single deferred
//! timer set for the exact delta. The polling loop catches what a long
//! single-shot timer misses across host sleep; the deferred timer covers a
//! stalled poller. Both go through one compare-and-set, so the callback runs
//! at most once.
//!
//! ```text
//! Idle --arm--> Armed --trigger--> Fired --reset--> Idle
//!                 \--cancel--> Cancelled --reset--> Idle
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clock::{self, Clock};

pub const DEFAULT_LEAD: Duration = Duration::from_millis(crate::config::DEFAULT_LEAD_MS);
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const COUNTDOWN_INTERVAL: Duration = Duration::from_secs(30);

const ARMED: u8 = 1;
const FIRED: u8 = 2;
const CANCELLED: u8 = 3;

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub lead: Duration,
    pub poll_interval: Duration,
    pub countdown_interval: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            lead: DEFAULT_LEAD,
            poll_interval: POLL_INTERVAL,
            countdown_interval: COUNTDOWN_INTERVAL,
        }
    }
}

impl GuardConfig {
    pub fn with_lead(lead: Duration) -> Self {
        Self {
            lead,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Idle,
    Armed,
    Fired,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Polling,
    Deferred,
}

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Guard is {0:?}, not idle")]
    NotIdle(GuardState),

    #[error("Lead of {lead:?} before {target} is out of range")]
    LeadOutOfRange {
        target: DateTime<Utc>,
        lead: Duration,
    },
}

/// `target - lead`, or an error when that falls off chrono's range.
pub fn lead_instant(target: DateTime<Utc>, lead: Duration) -> Result<DateTime<Utc>, GuardError> {
    target
        .checked_sub_signed(clock::delta(lead))
        .ok_or(GuardError::LeadOutOfRange { target, lead })
}

type FireFn = Box<dyn FnOnce() + Send>;

/// One arm/fire cycle. Triggers from an earlier cycle can never touch a
/// later one because each cycle owns its own state word.
struct Arming {
    lead_instant: DateTime<Utc>,
    state: AtomicU8,
    on_fire: Mutex<Option<FireFn>>,
    stop: CancellationToken,
}

impl Arming {
    fn state(&self) -> GuardState {
        match self.state.load(Ordering::Acquire) {
            ARMED => GuardState::Armed,
            FIRED => GuardState::Fired,
            _ => GuardState::Cancelled,
        }
    }

    fn try_fire(&self, trigger: Trigger) -> bool {
        if self
            .state
            .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(?trigger, "guard already settled, ignoring trigger");
            return false;
        }
        self.stop.cancel();
        info!(?trigger, lead_instant = %self.lead_instant, "guard fired");
        if let Some(on_fire) = self.on_fire.lock().take() {
            on_fire();
        }
        true
    }

    fn cancel(&self) -> bool {
        let won = self
            .state
            .compare_exchange(ARMED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.stop.cancel();
            self.on_fire.lock().take();
        }
        won
    }
}

pub struct DualTimerGuard {
    clock: Arc<dyn Clock>,
    config: GuardConfig,
    current: Mutex<Option<Arc<Arming>>>,
}

impl fmt::Debug for DualTimerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DualTimerGuard")
            .field("state", &self.state())
            .field("lead_instant", &self.lead_instant())
            .finish()
    }
}

impl DualTimerGuard {
    pub fn new(clock: Arc<dyn Clock>, config: GuardConfig) -> Self {
        Self {
            clock,
            config,
            current: Mutex::new(None),
        }
    }

    pub fn state(&self) -> GuardState {
        self.current
            .lock()
            .as_ref()
            .map_or(GuardState::Idle, |a| a.state())
    }

    pub fn lead_instant(&self) -> Option<DateTime<Utc>> {
        self.current.lock().as_ref().map(|a| a.lead_instant)
    }

    /// Arms both triggers for `target - lead` and returns that instant. A
    /// lead instant already in the past fires on the first check.
    ///
    /// Must be called inside a tokio runtime.
    pub fn arm<F>(&self, target: DateTime<Utc>, on_fire: F) -> Result<DateTime<Utc>, GuardError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut current = self.current.lock();
        if let Some(existing) = current.as_ref() {
            return Err(GuardError::NotIdle(existing.state()));
        }

        let lead_instant = lead_instant(target, self.config.lead)?;
        let arming = Arc::new(Arming {
            lead_instant,
            state: AtomicU8::new(ARMED),
            on_fire: Mutex::new(Some(Box::new(on_fire) as FireFn)),
            stop: CancellationToken::new(),
        });

        tokio::spawn(poll(
            arming.clone(),
            self.clock.clone(),
            self.config.clone(),
        ));
        tokio::spawn(deferred(arming.clone(), self.clock.clone()));
        *current = Some(arming);

        info!(%target, %lead_instant, "guard armed");
        Ok(lead_instant)
    }

    /// Stops both triggers. Returns `false` when there was nothing armed,
    /// including when the guard already fired.
    pub fn cancel(&self) -> bool {
        self.current.lock().as_ref().is_some_and(|a| a.cancel())
    }

    /// Returns a fired or cancelled guard to `Idle`.
    pub fn reset(&self) -> Result<(), GuardError> {
        let mut current = self.current.lock();
        if let Some(arming) = current.as_ref() {
            if arming.state() == GuardState::Armed {
                return Err(GuardError::NotIdle(GuardState::Armed));
            }
        }
        *current = None;
        Ok(())
    }
}

impl Drop for DualTimerGuard {
    fn drop(&mut self) {
        if let Some(arming) = self.current.get_mut().take() {
            arming.stop.cancel();
        }
    }
}

async fn poll(arming: Arc<Arming>, clock: Arc<dyn Clock>, config: GuardConfig) {
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut next_countdown = clock.now();

    loop {
        tokio::select! {
            _ = arming.stop.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let now = clock.now();
        if now >= arming.lead_instant {
            arming.try_fire(Trigger::Polling);
            return;
        }
        if now >= next_countdown {
            info!(
                remaining_secs = (arming.lead_instant - now).num_seconds(),
                lead_instant = %arming.lead_instant,
                "waiting to start pre-warm"
            );
            next_countdown = now + clock::delta(config.countdown_interval);
        }
    }
}

async fn deferred(arming: Arc<Arming>, clock: Arc<dyn Clock>) {
    let delay = clock.duration_until(arming.lead_instant);
    tokio::select! {
        _ = arming.stop.cancelled() => {}
        _ = tokio::time::sleep(delay) => {
            arming.try_fire(Trigger::Deferred);
        }
    }
}
