//! Capture settings shared by both binaries.
//!
//! Every setting is a flag with an environment override, fixed for the life
//! of the process.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use url::Url;

use crate::browser::{Viewport, WaitUntil};

pub const DEFAULT_URL: &str = "https://kimpga.com/";
pub const DEFAULT_OUTPUT_DIR: &str = "screenshots";
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1920;
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 1080;
pub const DEFAULT_DEVICE_SCALE_FACTOR: f64 = 2.0;
pub const DEFAULT_SCROLL_COUNT: u32 = 1;
pub const DEFAULT_SCROLL_DELAY_MS: u64 = 1000;
pub const DEFAULT_LEAD_MS: u64 = 15_000;
pub const MAX_LEAD_MS: u64 = 3_600_000;

#[derive(Args, Debug, Clone)]
pub struct CaptureSettings {
    /// Page to capture
    #[arg(long, env = "TIMESHOT_URL", default_value = DEFAULT_URL)]
    pub url: Url,
    /// Directory screenshots are written to
    #[arg(long, env = "TIMESHOT_OUTPUT_DIR", default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,
    /// Viewport width in CSS pixels
    #[arg(long, env = "TIMESHOT_VIEWPORT_WIDTH", default_value_t = DEFAULT_VIEWPORT_WIDTH)]
    pub viewport_width: u32,
    /// Viewport height in CSS pixels
    #[arg(long, env = "TIMESHOT_VIEWPORT_HEIGHT", default_value_t = DEFAULT_VIEWPORT_HEIGHT)]
    pub viewport_height: u32,
    /// Pixel-density multiplier
    #[arg(long, env = "TIMESHOT_DEVICE_SCALE_FACTOR", default_value_t = DEFAULT_DEVICE_SCALE_FACTOR)]
    pub device_scale_factor: f64,
    /// Half-viewport scrolls before the shot
    #[arg(long, env = "TIMESHOT_SCROLL_COUNT", default_value_t = DEFAULT_SCROLL_COUNT)]
    pub scroll_count: u32,
    /// Milliseconds between scrolls
    #[arg(long, env = "TIMESHOT_SCROLL_DELAY_MS", default_value_t = DEFAULT_SCROLL_DELAY_MS)]
    pub scroll_delay_ms: u64,
    /// Capture the whole document instead of the viewport
    #[arg(long, env = "TIMESHOT_FULL_PAGE")]
    pub full_page: bool,
    /// Primary navigation wait condition
    #[arg(long, env = "TIMESHOT_WAIT_UNTIL", value_enum, default_value_t = WaitUntil::DomContentLoaded)]
    pub wait_until: WaitUntil,
    /// Milliseconds of pre-warm before an exact-time capture
    #[arg(
        long,
        env = "TIMESHOT_LEAD_MS",
        default_value_t = DEFAULT_LEAD_MS,
        value_parser = clap::value_parser!(u64).range(..=MAX_LEAD_MS)
    )]
    pub lead_ms: u64,
    /// Run Chrome in headful mode
    #[arg(long, env = "TIMESHOT_HEADFUL")]
    pub headful: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            url: Url::parse(DEFAULT_URL).expect("default url is valid"),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
            device_scale_factor: DEFAULT_DEVICE_SCALE_FACTOR,
            scroll_count: DEFAULT_SCROLL_COUNT,
            scroll_delay_ms: DEFAULT_SCROLL_DELAY_MS,
            full_page: false,
            wait_until: WaitUntil::DomContentLoaded,
            lead_ms: DEFAULT_LEAD_MS,
            headful: false,
        }
    }
}

impl CaptureSettings {
    pub fn viewport(&self) -> Viewport {
        Viewport {
            width: self.viewport_width,
            height: self.viewport_height,
            device_scale_factor: self.device_scale_factor,
        }
    }

    pub fn lead(&self) -> Duration {
        Duration::from_millis(self.lead_ms)
    }

    pub fn scroll_delay(&self) -> Duration {
        Duration::from_millis(self.scroll_delay_ms)
    }
}

pub fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".timeshot")
        .join("logs")
}
