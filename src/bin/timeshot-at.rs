use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::{error, info};

use timeshot::browser::ChromeDriver;
use timeshot::config::default_log_dir;
use timeshot::{CaptureRoutine, CaptureSettings, Clock, ExactScheduler, GuardConfig, SystemClock};

const LOG_FILE: &str = "timeshot-at.log";

/// Capture the page once, exactly at TIMESTAMP
#[derive(Parser, Debug)]
#[command(
    name = "timeshot-at",
    version,
    after_help = "Example:\n  timeshot-at 2026-10-16T18:30:00+09:00"
)]
struct Cli {
    /// Capture instant, RFC 3339 with an explicit UTC offset
    timestamp: String,
    /// Directory for the append-only log file
    #[arg(long, env = "TIMESHOT_LOG_DIR")]
    log_dir: Option<PathBuf>,
    #[command(flatten)]
    capture: CaptureSettings,
}

fn parse_target(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let target = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp '{raw}', expected e.g. 2026-10-16T18:30:00+09:00"))?
        .with_timezone(&Utc);
    if target <= now {
        bail!("timestamp {target} is in the past (now {now})");
    }
    Ok(target)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let target = match parse_target(&args.timestamp, clock.now()) {
        Ok(target) => target,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let log_dir = args.log_dir.clone().unwrap_or_else(default_log_dir);
    let _log_guard = match timeshot::logging::init_with_file(&log_dir, LOG_FILE) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let lead = args.capture.lead();
    info!(
        %target,
        lead_ms = args.capture.lead_ms,
        url = %args.capture.url,
        log = %log_dir.join(LOG_FILE).display(),
        "exact capture scheduled"
    );

    let driver = Arc::new(ChromeDriver::new(!args.capture.headful));
    let routine = Arc::new(CaptureRoutine::new(driver, args.capture, clock.clone()));
    let scheduler = ExactScheduler::new(routine, clock, GuardConfig::with_lead(lead));

    let result = scheduler.schedule_exact(target).await;
    match (result.success, &result.filepath, &result.error) {
        (true, Some(path), _) => {
            info!(path = %path.display(), "capture complete");
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        (_, _, error) => {
            error!("capture failed: {}", error.as_deref().unwrap_or("unknown error"));
            ExitCode::FAILURE
        }
    }
}
