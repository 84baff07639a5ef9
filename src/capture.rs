//! One end-to-end capture: navigate, adapt the page, scroll, overlay the
//! time, screenshot, save.
//!
//! Errors stop at this boundary. Callers get a [`CaptureResult`] and only
//! look at `success`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::browser::{BrowserDriver, BrowserError, PageSession, WaitUntil};
use crate::clock::Clock;
use crate::config::CaptureSettings;
use crate::screenshots;

const PRIMARY_NAV_TIMEOUT: Duration = Duration::from_secs(60);
const FALLBACK_NAV_TIMEOUT: Duration = Duration::from_secs(30);
const CLICK_TIMEOUT: Duration = Duration::from_secs(2);
const MENU_OPEN_DELAY: Duration = Duration::from_millis(500);
const SCROLL_SETTLE_DELAY: Duration = Duration::from_secs(2);
const OVERLAY_RENDER_DELAY: Duration = Duration::from_millis(500);

const LANGUAGE_TOGGLE: &str = "KR";
const LANGUAGE_OPTION: &str = "EN";
/// The exchange picker shows whichever market is currently selected.
const EXCHANGE_SELECTORS: &[&str] = &[
    "Binance USDT",
    "Binance USDT Futures",
    "Bybit USDT",
    "OKX USDT",
    "Bitget USDT",
];
const EXCHANGE_OPTION: &str = "Upbit KRW";

const SCROLL_SCRIPT: &str = "window.scrollBy(0, Math.floor(window.innerHeight / 2))";

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("Failed to write screenshot {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filepath: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub captured_at: Option<DateTime<Utc>>,
}

impl CaptureResult {
    pub fn saved(path: PathBuf, captured_at: DateTime<Utc>) -> Self {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        Self {
            success: true,
            filepath: Some(path),
            filename,
            error: None,
            captured_at: Some(captured_at),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            filepath: None,
            filename: None,
            error: Some(message.into()),
            captured_at: None,
        }
    }
}

/// Outcome of one optional page adaptation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    Skipped(&'static str),
    Failed(String),
}

pub struct CaptureRoutine {
    driver: Arc<dyn BrowserDriver>,
    settings: CaptureSettings,
    clock: Arc<dyn Clock>,
}

impl CaptureRoutine {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        settings: CaptureSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            driver,
            settings,
            clock,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.settings.output_dir
    }

    /// Captures right away.
    pub async fn capture(&self) -> CaptureResult {
        self.capture_at(None).await
    }

    /// Prepares the page, then holds the overlay and screenshot until `at`
    /// when one is given.
    pub async fn capture_at(&self, at: Option<DateTime<Utc>>) -> CaptureResult {
        let session = match self.prepare().await {
            Ok(session) => session,
            Err(e) => {
                error!(url = %self.settings.url, "capture failed during preparation: {e}");
                return CaptureResult::failure(e.to_string());
            }
        };

        if let Some(at) = at {
            self.hold_until(at).await;
        }

        let outcome = self.shoot(session.as_ref()).await;
        close(session.as_ref()).await;

        match outcome {
            Ok((path, captured_at)) => {
                info!(path = %path.display(), "screenshot saved");
                CaptureResult::saved(path, captured_at)
            }
            Err(e) => {
                error!("capture failed: {e}");
                CaptureResult::failure(e.to_string())
            }
        }
    }

    /// Output directory, browser session, navigation, page adaptation and
    /// scrolling. The session is closed again if navigation fails.
    async fn prepare(&self) -> Result<Box<dyn PageSession>, CaptureError> {
        let dir = &self.settings.output_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| CaptureError::OutputDir {
                path: dir.clone(),
                source,
            })?;

        let session = self.driver.open(self.settings.viewport()).await?;

        if let Err(e) = self.navigate(session.as_ref()).await {
            close(session.as_ref()).await;
            return Err(e.into());
        }

        record("language switch", switch_language(session.as_ref()).await);
        record("exchange selection", select_exchange(session.as_ref()).await);

        if self.settings.scroll_count > 0 {
            record("scroll", self.scroll(session.as_ref()).await);
        }

        Ok(session)
    }

    async fn navigate(&self, session: &dyn PageSession) -> Result<(), BrowserError> {
        let url = self.settings.url.as_str();
        let primary = self.settings.wait_until;
        info!(url, wait = ?primary, "navigating");
        match session.navigate(url, primary, PRIMARY_NAV_TIMEOUT).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("primary navigation failed, retrying with load event: {e}");
                session
                    .navigate(url, WaitUntil::Load, FALLBACK_NAV_TIMEOUT)
                    .await
            }
        }
    }

    async fn scroll(&self, session: &dyn PageSession) -> Result<StepOutcome, BrowserError> {
        for i in 0..self.settings.scroll_count {
            if i > 0 {
                tokio::time::sleep(self.settings.scroll_delay()).await;
            }
            session.evaluate(SCROLL_SCRIPT).await?;
        }
        tokio::time::sleep(SCROLL_SETTLE_DELAY).await;
        Ok(StepOutcome::Done)
    }

    async fn hold_until(&self, at: DateTime<Utc>) {
        let now = self.clock.now();
        match (at - now).to_std() {
            Ok(remaining) if !remaining.is_zero() => {
                debug!(remaining_ms = remaining.as_millis() as u64, "holding for capture instant");
                tokio::time::sleep(remaining).await;
            }
            _ => warn!(
                overrun_ms = (now - at).num_milliseconds(),
                "pre-warm overran the capture instant, shooting immediately"
            ),
        }
    }

    async fn shoot(
        &self,
        session: &dyn PageSession,
    ) -> Result<(PathBuf, DateTime<Utc>), CaptureError> {
        let stamp = self.clock.now();
        record("overlay", overlay(session, stamp).await);

        let png = session.screenshot(self.settings.full_page).await?;
        let path = self
            .settings
            .output_dir
            .join(screenshots::file_name_for(stamp));
        tokio::fs::write(&path, &png)
            .await
            .map_err(|source| CaptureError::Write {
                path: path.clone(),
                source,
            })?;
        Ok((path, stamp))
    }
}

async fn close(session: &dyn PageSession) {
    if let Err(e) = session.close().await {
        warn!("{e}");
    }
}

fn record(step: &str, result: Result<StepOutcome, BrowserError>) -> StepOutcome {
    let outcome = result.unwrap_or_else(|e| StepOutcome::Failed(e.to_string()));
    match &outcome {
        StepOutcome::Done => info!(step, "done"),
        StepOutcome::Skipped(why) => debug!(step, why, "skipped"),
        StepOutcome::Failed(e) => warn!(step, "failed, continuing: {e}"),
    }
    outcome
}

async fn switch_language(session: &dyn PageSession) -> Result<StepOutcome, BrowserError> {
    if !session.click_text(LANGUAGE_TOGGLE, CLICK_TIMEOUT).await? {
        return Ok(StepOutcome::Skipped("language toggle not found"));
    }
    tokio::time::sleep(MENU_OPEN_DELAY).await;
    if !session.click_text(LANGUAGE_OPTION, CLICK_TIMEOUT).await? {
        return Ok(StepOutcome::Skipped("EN option not found"));
    }
    Ok(StepOutcome::Done)
}

async fn select_exchange(session: &dyn PageSession) -> Result<StepOutcome, BrowserError> {
    let mut opened = false;
    for label in EXCHANGE_SELECTORS {
        if session.click_text(label, CLICK_TIMEOUT).await? {
            debug!(label, "exchange selector opened");
            opened = true;
            break;
        }
    }
    if !opened {
        return Ok(StepOutcome::Skipped("exchange selector not found"));
    }
    tokio::time::sleep(MENU_OPEN_DELAY).await;
    if !session.click_text(EXCHANGE_OPTION, CLICK_TIMEOUT).await? {
        return Ok(StepOutcome::Skipped("Upbit KRW option not found"));
    }
    Ok(StepOutcome::Done)
}

async fn overlay(
    session: &dyn PageSession,
    stamp: DateTime<Utc>,
) -> Result<StepOutcome, BrowserError> {
    let tz = session.evaluate(&overlay_script(stamp)).await?;
    if let Some(tz) = tz.as_str() {
        debug!(tz, "overlay injected");
    }
    tokio::time::sleep(OVERLAY_RENDER_DELAY).await;
    Ok(StepOutcome::Done)
}

/// Script that pins the capture time to the right edge of the viewport and
/// evaluates to the browser's timezone name.
pub(crate) fn overlay_script(stamp: DateTime<Utc>) -> String {
    let local = stamp.with_timezone(&Local);
    let date = serde_json::to_string(&local.format("%Y-%m-%d").to_string()).unwrap_or_default();
    let time = serde_json::to_string(&local.format("%H:%M:%S").to_string()).unwrap_or_default();
    format!(
        r#"(() => {{
  const id = '__timeshot_overlay';
  const old = document.getElementById(id);
  if (old) old.remove();
  const tz = Intl.DateTimeFormat().resolvedOptions().timeZone || '';
  const el = document.createElement('div');
  el.id = id;
  el.textContent = {date} + '\n' + {time} + (tz ? '\n' + tz : '');
  Object.assign(el.style, {{
    position: 'fixed',
    top: '50%',
    right: '24px',
    transform: 'translateY(-50%)',
    zIndex: '2147483647',
    padding: '12px 18px',
    borderRadius: '8px',
    background: 'rgba(0, 0, 0, 0.78)',
    color: '#ffffff',
    font: '600 26px/1.35 -apple-system, "Segoe UI", Roboto, sans-serif',
    textAlign: 'right',
    whiteSpace: 'pre',
    pointerEvents: 'none',
    boxShadow: '0 4px 14px rgba(0, 0, 0, 0.35)',
  }});
  document.body.appendChild(el);
  return tz;
}})()"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{Call, FakeDriver, FAKE_PNG};
    use crate::clock::TokioClock;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()
    }

    fn settings(dir: &Path) -> CaptureSettings {
        CaptureSettings {
            output_dir: dir.join("shots"),
            scroll_count: 2,
            ..CaptureSettings::default()
        }
    }

    fn routine(driver: &FakeDriver, clock: Arc<dyn Clock>, dir: &Path) -> CaptureRoutine {
        CaptureRoutine::new(Arc::new(driver.clone()), settings(dir), clock)
    }

    #[tokio::test(start_paused = true)]
    async fn capture_writes_png_and_closes_session() {
        let tmp = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(base()));
        let driver = FakeDriver::new(clock.clone());

        let result = routine(&driver, clock, tmp.path()).capture().await;

        assert!(result.success, "{:?}", result.error);
        let path = result.filepath.unwrap();
        assert!(path.starts_with(tmp.path().join("shots")));
        assert_eq!(std::fs::read(&path).unwrap(), FAKE_PNG);
        assert!(result.filename.unwrap().starts_with("screenshot-2026-10-16T09-00-"));
        assert_eq!(driver.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_load_event_once() {
        let tmp = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(base()));
        let driver = FakeDriver::new(clock.clone()).fail_navigation(WaitUntil::DomContentLoaded);

        let result = routine(&driver, clock, tmp.path()).capture().await;

        assert!(result.success);
        let navigations: Vec<_> = driver
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Navigate(_)))
            .collect();
        assert_eq!(
            navigations,
            vec![
                Call::Navigate(WaitUntil::DomContentLoaded),
                Call::Navigate(WaitUntil::Load)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_page_fails_and_still_closes() {
        let tmp = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(base()));
        let driver = FakeDriver::new(clock.clone())
            .fail_navigation(WaitUntil::DomContentLoaded)
            .fail_navigation(WaitUntil::Load);

        let result = routine(&driver, clock, tmp.path()).capture().await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("ERR_NAME_NOT_RESOLVED"));
        assert!(driver.shot_at().is_empty());
        assert_eq!(driver.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn launch_failure_is_a_failed_result() {
        let tmp = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(base()));
        let driver = FakeDriver::new(clock.clone()).fail_launch();

        let result = routine(&driver, clock, tmp.path()).capture().await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("Failed to launch browser"));
    }

    #[tokio::test(start_paused = true)]
    async fn adapts_page_when_controls_are_present() {
        let tmp = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(base()));
        let driver = FakeDriver::new(clock.clone()).with_labels(&[
            "KR",
            "EN",
            "Bybit USDT",
            "Upbit KRW",
        ]);

        assert!(routine(&driver, clock, tmp.path()).capture().await.success);
        assert_eq!(driver.clicked(), vec!["KR", "EN", "Bybit USDT", "Upbit KRW"]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_controls_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(base()));
        let driver = FakeDriver::new(clock.clone()).with_labels(&["KR"]);

        assert!(routine(&driver, clock, tmp.path()).capture().await.success);
        assert_eq!(driver.clicked(), vec!["KR"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_control_does_not_abort_capture() {
        let tmp = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(base()));
        let driver = FakeDriver::new(clock.clone())
            .with_labels(&["Bybit USDT", "Upbit KRW"])
            .fail_click("KR");

        let result = routine(&driver, clock, tmp.path()).capture().await;

        assert!(result.success, "{:?}", result.error);
        assert!(driver.calls().contains(&Call::Click("KR".into(), false)));
        assert_eq!(driver.clicked(), vec!["Bybit USDT", "Upbit KRW"]);
        assert_eq!(driver.shot_at().len(), 1);
        assert_eq!(driver.close_count(), 1);
    }

    #[test]
    fn step_errors_are_recorded_as_failed() {
        let outcome = record(
            "language",
            Err(BrowserError::ClickFailed("KR: node detached".into())),
        );
        assert!(matches!(outcome, StepOutcome::Failed(e) if e.contains("node detached")));
    }

    #[tokio::test(start_paused = true)]
    async fn holds_screenshot_until_requested_instant() {
        let tmp = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(base()));
        let driver = FakeDriver::new(clock.clone()).with_load_time(Duration::from_secs(3));
        let at = base() + chrono::TimeDelta::seconds(30);

        let result = routine(&driver, clock, tmp.path()).capture_at(Some(at)).await;

        assert!(result.success);
        assert_eq!(result.captured_at, Some(at));
        assert_eq!(driver.shot_at(), vec![at + chrono::TimeDelta::milliseconds(500)]);
    }

    #[tokio::test(start_paused = true)]
    async fn overrun_shoots_immediately() {
        let tmp = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(base()));
        let driver = FakeDriver::new(clock.clone()).with_load_time(Duration::from_secs(20));
        let at = base() + chrono::TimeDelta::seconds(5);

        let result = routine(&driver, clock, tmp.path()).capture_at(Some(at)).await;

        assert!(result.success);
        assert!(driver.shot_at()[0] > at);
    }

    #[tokio::test(start_paused = true)]
    async fn scrolls_requested_number_of_times() {
        let tmp = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(base()));
        let driver = FakeDriver::new(clock.clone());

        routine(&driver, clock, tmp.path()).capture().await;

        let scrolls = driver
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Evaluate(s) if s == SCROLL_SCRIPT))
            .count();
        assert_eq!(scrolls, 2);
    }

    #[test]
    fn overlay_script_embeds_local_time() {
        let script = overlay_script(base());
        let local = base().with_timezone(&Local);
        assert!(script.contains(&format!("\"{}\"", local.format("%H:%M:%S"))));
        assert!(script.contains("position: 'fixed'"));
    }

    #[test]
    fn failed_result_serializes_error_only() {
        let json = serde_json::to_value(CaptureResult::failure("boom")).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "error": "boom"}));
    }
}
