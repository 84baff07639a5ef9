use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use timeshot::browser::ChromeDriver;
use timeshot::server::{self, AppState};
use timeshot::{
    CaptureRoutine, CaptureSettings, Clock, ExactScheduler, GuardConfig, JobRegistry, SystemClock,
};

/// Schedule exact-time page captures over HTTP
#[derive(Parser, Debug)]
#[command(name = "timeshot", version)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "TIMESHOT_HOST", default_value = "127.0.0.1")]
    host: IpAddr,
    /// Port to listen on
    #[arg(long, env = "TIMESHOT_PORT", default_value_t = 3000)]
    port: u16,
    /// Directory holding the browser UI
    #[arg(long, env = "TIMESHOT_PUBLIC_DIR", default_value = "public")]
    public_dir: PathBuf,
    #[command(flatten)]
    capture: CaptureSettings,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    timeshot::logging::init_console()?;

    info!(
        url = %args.capture.url,
        output_dir = %args.capture.output_dir.display(),
        lead_ms = args.capture.lead_ms,
        "starting timeshot v{}",
        env!("CARGO_PKG_VERSION")
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let driver = Arc::new(ChromeDriver::new(!args.capture.headful));
    let routine = Arc::new(CaptureRoutine::new(
        driver,
        args.capture.clone(),
        clock.clone(),
    ));
    let scheduler = Arc::new(ExactScheduler::new(
        routine.clone(),
        clock,
        GuardConfig::with_lead(args.capture.lead()),
    ));
    let state = Arc::new(AppState {
        registry: JobRegistry::new(scheduler),
        routine,
    });

    let public_dir = if args.public_dir.is_dir() {
        Some(args.public_dir.as_path())
    } else {
        warn!(dir = %args.public_dir.display(), "public directory missing, serving API only");
        None
    };
    let app = server::router(state, public_dir);

    server::serve(SocketAddr::new(args.host, args.port), app).await
}
