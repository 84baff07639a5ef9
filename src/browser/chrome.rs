use std::ffi::{OsStr, OsString};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use headless_chrome::{
    protocol::cdp::Page::{CaptureScreenshotFormatOption, Viewport as Clip},
    Browser, LaunchOptionsBuilder, Tab,
};
use tracing::debug;

use super::{BrowserDriver, BrowserError, PageSession, Viewport, WaitUntil};

/// Chrome stops talking to an idle transport after this long; an exact-time
/// capture can sit idle for the whole lead window.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(600);
const READY_STATE_POLL: Duration = Duration::from_millis(100);

/// Launches one headless Chrome process per session. Each process gets a
/// throwaway profile, which is what keeps sessions isolated.
#[derive(Debug, Clone)]
pub struct ChromeDriver {
    headless: bool,
}

impl ChromeDriver {
    pub fn new(headless: bool) -> Self {
        Self { headless }
    }
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn open(&self, viewport: Viewport) -> Result<Box<dyn PageSession>, BrowserError> {
        let headless = self.headless;
        let session = tokio::task::spawn_blocking(move || launch(headless, viewport))
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?
            .map_err(|e| BrowserError::LaunchFailed(format!("{e:#}")))?;
        Ok(Box::new(session))
    }
}

fn launch(headless: bool, viewport: Viewport) -> Result<ChromeSession> {
    let mut arg_vec: Vec<OsString> = vec![
        OsString::from("--disable-gpu"),
        OsString::from("--disable-dev-shm-usage"),
        OsString::from("--no-first-run"),
        OsString::from("--no-default-browser-check"),
        OsString::from("--hide-scrollbars"),
        OsString::from(format!(
            "--force-device-scale-factor={}",
            viewport.device_scale_factor
        )),
    ];
    if headless {
        arg_vec.push(OsString::from("--headless=new"));
    }

    let launch_opts = LaunchOptionsBuilder::default()
        .headless(headless)
        .window_size(Some((viewport.width, viewport.height)))
        .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
        .args(
            arg_vec
                .iter()
                .map(|s| s.as_os_str())
                .collect::<Vec<&OsStr>>(),
        )
        .build()
        .map_err(|e| anyhow!("invalid launch options: {e}"))?;

    let browser = Browser::new(launch_opts).context("failed to start chrome")?;
    let tab = browser.new_tab().context("failed to open tab")?;
    tab.set_user_agent(&ua_generator::ua::spoof_ua(), None, None)?;
    debug!(
        width = viewport.width,
        height = viewport.height,
        scale = viewport.device_scale_factor,
        "chrome session opened"
    );

    Ok(ChromeSession {
        _browser: browser,
        tab,
    })
}

struct ChromeSession {
    // Dropping the last handle kills the chrome process.
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeSession {
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Tab) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || f(&tab))
            .await
            .context("browser task panicked")?
    }
}

#[async_trait]
impl PageSession for ChromeSession {
    async fn navigate(
        &self,
        url: &str,
        wait: WaitUntil,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let target = url.to_string();
        self.run(move |tab| {
            tab.set_default_timeout(timeout);
            tab.navigate_to(&target)?;
            match wait {
                WaitUntil::Load => {
                    tab.wait_until_navigated()?;
                }
                WaitUntil::DomContentLoaded => wait_for_dom(tab, timeout)?,
            }
            Ok(())
        })
        .await
        .map_err(|e| BrowserError::NavigationFailed {
            url: url.to_string(),
            reason: format!("{e:#}"),
        })
    }

    async fn click_text(&self, label: &str, timeout: Duration) -> Result<bool, BrowserError> {
        let xpath = format!("//*[normalize-space(text())={}]", xpath_literal(label));
        self.run(move |tab| match tab.wait_for_xpath_with_custom_timeout(&xpath, timeout) {
            Ok(element) => {
                element.click()?;
                Ok(true)
            }
            Err(_) => Ok(false),
        })
        .await
        .map_err(|e| BrowserError::ClickFailed(format!("{label}: {e:#}")))
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, BrowserError> {
        let script = script.to_string();
        self.run(move |tab| {
            let remote = tab.evaluate(&script, false)?;
            Ok(remote.value.unwrap_or(serde_json::Value::Null))
        })
        .await
        .map_err(|e| BrowserError::Script(format!("{e:#}")))
    }

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>, BrowserError> {
        self.run(move |tab| {
            let clip = if full_page {
                Some(document_clip(tab)?)
            } else {
                None
            };
            tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, clip, true)
        })
        .await
        .map_err(|e| BrowserError::ScreenshotFailed(format!("{e:#}")))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.run(|tab| tab.close(true).map(|_| ()))
            .await
            .map_err(|e| BrowserError::CloseFailed(format!("{e:#}")))
    }
}

/// Blocks until `document.readyState` leaves `loading`.
fn wait_for_dom(tab: &Tab, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let state = tab
            .evaluate("document.readyState", false)?
            .value
            .and_then(|v| v.as_str().map(str::to_owned));
        if matches!(state.as_deref(), Some("interactive") | Some("complete")) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!(BrowserError::Timeout(timeout, "DOMContentLoaded".into()));
        }
        std::thread::sleep(READY_STATE_POLL);
    }
}

fn document_clip(tab: &Tab) -> Result<Clip> {
    let dimension = |expr: &str| -> Result<f64> {
        tab.evaluate(expr, false)?
            .value
            .and_then(|v| v.as_f64())
            .ok_or_else(|| anyhow!("could not read {expr}"))
    };
    let width = dimension(
        "Math.max(document.documentElement.scrollWidth, document.body ? document.body.scrollWidth : 0)",
    )?;
    let height = dimension(
        "Math.max(document.documentElement.scrollHeight, document.body ? document.body.scrollHeight : 0)",
    )?;
    Ok(Clip {
        x: 0.0,
        y: 0.0,
        width,
        height,
        scale: 1.0,
    })
}

fn xpath_literal(s: &str) -> String {
    if s.contains('\'') {
        format!("\"{s}\"")
    } else {
        format!("'{s}'")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xpath_literal_picks_a_safe_quote() {
        assert_eq!(xpath_literal("Upbit KRW"), "'Upbit KRW'");
        assert_eq!(xpath_literal("Bybit's"), "\"Bybit's\"");
    }
}
