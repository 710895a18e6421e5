// On-robot command service: owns the motors and serves /move, /stop, /health
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tank_follow_runtime::config::{
    ServerConfig, WiringConvention, LOW_SPEED_CUTOFF, PWM_FREQUENCY_HZ, SERVER_BIND,
};
use tank_follow_runtime::motor::gpio::open_pin_bank;
use tank_follow_runtime::runtime::shutdown_on_ctrl_c;
use tank_follow_runtime::server;

#[derive(Parser, Debug)]
#[command(about = "Tank-drive command service")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = SERVER_BIND)]
    bind: String,

    /// Drive simulated pins even when built for the Raspberry Pi
    #[arg(long)]
    simulate: bool,

    /// Wire `forward` drives the wheels backward and vice versa
    #[arg(long)]
    swap_forward_backward: bool,

    /// Wire `left` rotates clockwise and vice versa
    #[arg(long)]
    swap_left_right: bool,

    /// Stop the motors when no command arrives for this long (disabled by default)
    #[arg(long)]
    watchdog_ms: Option<u64>,

    /// Speeds at or below this are treated as stop
    #[arg(long, default_value_t = LOW_SPEED_CUTOFF)]
    low_speed_cutoff: u8,

    #[arg(long, default_value_t = PWM_FREQUENCY_HZ)]
    pwm_hz: f64,
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = ServerConfig {
        bind: args.bind,
        pwm_frequency_hz: args.pwm_hz,
        wiring: WiringConvention {
            swap_forward_backward: args.swap_forward_backward,
            swap_left_right: args.swap_left_right,
        },
        low_speed_cutoff: args.low_speed_cutoff,
        watchdog: args.watchdog_ms.map(Duration::from_millis),
        ..ServerConfig::default()
    };

    // Motors come up stopped; without them there is nothing to serve
    let mut bank = open_pin_bank(args.simulate)?;
    let svc = Arc::new(server::build_service(bank.as_mut(), &config)?);

    let shutdown = shutdown_on_ctrl_c();
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    let result = server::serve(listener, svc, shutdown).await;
    info!("Command service stopped");
    Ok(result?)
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    if let Err(e) = run(Args::parse()).await {
        eprintln!("Command service error: {}", e);
        std::process::exit(1);
    }
}
