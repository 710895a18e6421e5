// Follow loop: replays recorded detections and steers the robot through the
// command service
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tank_follow_runtime::client::HttpCommandLink;
use tank_follow_runtime::config::{
    FollowConfig, COMMAND_TIMEOUT, DWELL, FOLLOW_PERIOD, MAX_BACKOFF, MIN_SCORE, SERVER_URL,
};
use tank_follow_runtime::perception::{RecordedDetector, ReplaySource, SteeringThresholds};
use tank_follow_runtime::runtime::{shutdown_on_ctrl_c, FollowLoop};

#[derive(Parser, Debug)]
#[command(about = "Follow a target object with the tank base")]
struct Args {
    /// JSONL file of recorded frames
    #[arg(long)]
    replay: PathBuf,

    #[arg(long, default_value = SERVER_URL)]
    server: String,

    /// Labels to follow (comma separated); empty follows anything
    #[arg(long, value_delimiter = ',')]
    targets: Option<Vec<String>>,

    #[arg(long, default_value_t = FOLLOW_PERIOD.as_millis() as u64)]
    period_ms: u64,

    #[arg(long, default_value_t = DWELL.as_millis() as u64)]
    dwell_ms: u64,

    #[arg(long, default_value_t = COMMAND_TIMEOUT.as_millis() as u64)]
    timeout_ms: u64,

    #[arg(long, default_value_t = MAX_BACKOFF.as_millis() as u64)]
    max_backoff_ms: u64,

    #[arg(long, default_value_t = MIN_SCORE)]
    min_score: f64,

    /// Exit after this many cycles
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Relative box width at which the robot stops approaching
    #[arg(long)]
    stop_width: Option<f64>,
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut config = FollowConfig {
        period: Duration::from_millis(args.period_ms),
        dwell: Duration::from_millis(args.dwell_ms),
        max_backoff: Duration::from_millis(args.max_backoff_ms),
        min_score: args.min_score,
        max_cycles: args.max_cycles,
        ..FollowConfig::default()
    };
    if let Some(targets) = args.targets {
        config.targets = targets;
    }

    let mut thresholds = SteeringThresholds::default();
    if let Some(stop_width) = args.stop_width {
        thresholds.stop_width = stop_width;
    }

    let source = ReplaySource::open(&args.replay)?;
    let link = HttpCommandLink::new(&args.server, Duration::from_millis(args.timeout_ms))?;
    info!("Sending commands to {}", link.base_url());

    let stats = FollowLoop::new(source, RecordedDetector, link, config)
        .with_thresholds(thresholds)
        .run(shutdown_on_ctrl_c())
        .await;

    info!(
        "Done: {} cycles, {} commands sent, {} skipped, {} transport failures ({:?})",
        stats.cycles, stats.commands_sent, stats.skipped, stats.transport_failures, stats.exit
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    if let Err(e) = run(Args::parse()).await {
        eprintln!("Follow error: {}", e);
        std::process::exit(1);
    }
}
