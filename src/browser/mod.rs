//! Browser automation seam.
//!
//! The capture routine only needs a handful of page operations, so the
//! headless Chrome backend sits behind [`BrowserDriver`] / [`PageSession`].

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

mod chrome;
#[cfg(test)]
pub(crate) mod fake;

pub use chrome::ChromeDriver;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("Navigation to {url} failed: {reason}")]
    NavigationFailed { url: String, reason: String },

    #[error("Timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[error("Click failed: {0}")]
    ClickFailed(String),

    #[error("Screenshot failed: {0}")]
    ScreenshotFailed(String),

    #[error("Failed to close browser session: {0}")]
    CloseFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
}

/// How long navigation waits before the page counts as loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WaitUntil {
    /// `DOMContentLoaded`: the document is parsed.
    DomContentLoaded,
    /// The full `load` event, including subresources.
    Load,
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Opens a fresh, isolated browsing session.
    async fn open(&self, viewport: Viewport) -> Result<Box<dyn PageSession>, BrowserError>;
}

#[async_trait]
pub trait PageSession: Send + Sync {
    async fn navigate(&self, url: &str, wait: WaitUntil, timeout: Duration)
        -> Result<(), BrowserError>;

    /// Clicks the first element whose visible text is exactly `label`.
    /// Returns `Ok(false)` when no such element shows up within `timeout`.
    async fn click_text(&self, label: &str, timeout: Duration) -> Result<bool, BrowserError>;

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, BrowserError>;

    /// PNG bytes of the viewport, or of the whole document when `full_page`.
    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>, BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}
