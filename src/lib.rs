//! Pre-warmed, exact-time page captures with headless Chrome.
//!
//! A [`guard::DualTimerGuard`] wakes [`exact::ExactScheduler`] `lead` before
//! the target instant; the scheduler drives [`capture::CaptureRoutine`]
//! through page load and adaptation early, then holds the screenshot until
//! the instant itself. [`registry::JobRegistry`] and [`server`] expose this
//! over HTTP.

pub mod browser;
pub mod capture;
pub mod clock;
pub mod config;
pub mod exact;
pub mod guard;
pub mod logging;
pub mod registry;
pub mod screenshots;
pub mod server;

pub use capture::{CaptureResult, CaptureRoutine};
pub use clock::{Clock, SystemClock};
pub use config::CaptureSettings;
pub use exact::ExactScheduler;
pub use guard::{DualTimerGuard, GuardConfig, GuardState};
pub use registry::{JobRegistry, ScheduleError, ScheduledJob};
