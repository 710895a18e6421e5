// HTTP front end of the command service
//
//   POST /move    {"direction": "...", "speed": N}
//   POST /stop
//   GET  /health

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, warn};

use crate::config::{ServerConfig, WATCHDOG_HZ};
use crate::messages::{ErrorBody, HealthReport, MoveRequest, MoveResponse};
use crate::motor::{DriveCoordinator, HardwareContext, PinBank};
use crate::runtime::wait_for_shutdown;
use crate::service::{CommandError, CommandService};

impl IntoResponse for CommandError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

async fn handle_move(
    State(svc): State<Arc<CommandService>>,
    payload: Result<Json<MoveRequest>, JsonRejection>,
) -> Result<Json<MoveResponse>, Response> {
    let Json(req) = payload.map_err(|rejection| {
        warn!("Bad /move body: {}", rejection.body_text());
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: rejection.body_text(),
            }),
        )
            .into_response()
    })?;

    let (Some(direction), Some(speed)) = (req.direction, req.speed) else {
        return Err(CommandError::MissingField.into_response());
    };

    svc.move_robot(&direction, speed)
        .map(|applied| Json(MoveResponse::success(applied)))
        .map_err(IntoResponse::into_response)
}

async fn handle_stop(
    State(svc): State<Arc<CommandService>>,
) -> Result<Json<MoveResponse>, CommandError> {
    let applied = svc.stop()?;
    Ok(Json(MoveResponse::success(applied)))
}

async fn handle_health(State(svc): State<Arc<CommandService>>) -> Json<HealthReport> {
    Json(svc.health())
}

pub fn router(svc: Arc<CommandService>) -> Router {
    Router::new()
        .route("/move", post(handle_move))
        .route("/stop", post(handle_stop))
        .route("/health", get(handle_health))
        .with_state(svc)
}

/// Build the drive stack on top of a pin bank. Pin failures here are fatal.
pub fn build_service(
    bank: &mut dyn PinBank,
    config: &ServerConfig,
) -> Result<CommandService, CommandError> {
    let hw = HardwareContext::open(bank, config.pins, config.pwm_frequency_hz)?;
    let drive = DriveCoordinator::new(hw, config.wiring);
    Ok(CommandService::new(drive, config.low_speed_cutoff, config.watchdog))
}

async fn run_watchdog(svc: Arc<CommandService>, mut shutdown: watch::Receiver<bool>) {
    let mut tick = interval(Duration::from_millis(1000 / WATCHDOG_HZ));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                svc.check_watchdog(Instant::now());
            }
            _ = wait_for_shutdown(&mut shutdown) => break,
        }
    }
}

/// Serve on an already-bound listener until `shutdown` flips to true.
/// Motors are stopped on the way out whether serving succeeded or not.
pub async fn serve(
    listener: TcpListener,
    svc: Arc<CommandService>,
    shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    info!("Command service listening on {}", listener.local_addr()?);

    let watchdog = svc.watchdog().map(|timeout| {
        info!("Command watchdog: {}ms", timeout.as_millis());
        tokio::spawn(run_watchdog(svc.clone(), shutdown.clone()))
    });

    let mut signal = shutdown.clone();
    let result = axum::serve(listener, router(svc.clone()))
        .with_graceful_shutdown(async move { wait_for_shutdown(&mut signal).await })
        .await;

    if let Some(handle) = watchdog {
        handle.abort();
    }
    info!("Command service shutting down");
    if let Err(e) = svc.stop() {
        warn!("Final stop failed: {}", e);
    }
    result
}
