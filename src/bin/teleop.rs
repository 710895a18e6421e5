// Keyboard teleop over the command service: WASD move, space stop, R/F speed, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use tank_follow_runtime::client::{CommandLink, HttpCommandLink};
use tank_follow_runtime::config::{COMMAND_TIMEOUT, SERVER_URL};
use tank_follow_runtime::messages::{Direction, SteeringDecision};

const SPEEDS: [u8; 3] = [30, 60, 100];
const INPUT_TIMEOUT_MS: u64 = 250; // Stop after this much time with no movement key

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let server = std::env::args().nth(1).unwrap_or_else(|| SERVER_URL.to_string());
    let mut link = HttpCommandLink::new(&server, COMMAND_TIMEOUT)?;
    info!("Driving {}", link.base_url());
    info!("Controls: WASD=move, SPACE=stop, R/F=speed, Q=quit");
    print_speed(0);

    enable_raw_mode()?;
    let result = run_teleop(&mut link).await;

    // Stop the robot before anything else can fail
    if let Err(e) = link.halt().await {
        warn!("Final stop failed: {}", e);
    }
    if let Err(e) = disable_raw_mode() {
        warn!("Failed to restore terminal: {}", e);
    }
    result
}

async fn run_teleop(
    link: &mut HttpCommandLink,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;
    let mut direction = Direction::Stop;
    let mut last_movement_input = Instant::now();
    let mut last_sent: Option<SteeringDecision> = None;

    loop {
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                let movement = match code {
                    KeyCode::Char('w') => Some(Direction::Forward),
                    KeyCode::Char('s') => Some(Direction::Backward),
                    KeyCode::Char('a') => Some(Direction::Left),
                    KeyCode::Char('d') => Some(Direction::Right),
                    KeyCode::Char(' ') => Some(Direction::Stop),
                    _ => None,
                };

                match (code, movement) {
                    (_, Some(next)) if pressed => {
                        direction = next;
                        last_movement_input = Instant::now();
                    }
                    (KeyCode::Char('r'), _) if pressed => {
                        speed_idx = (speed_idx + 1).min(SPEEDS.len() - 1);
                        print_speed(speed_idx);
                    }
                    (KeyCode::Char('f'), _) if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }
                    (KeyCode::Char('q') | KeyCode::Esc, _) if pressed => break,
                    _ => {}
                }
            }
        }

        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            direction = Direction::Stop;
        }

        let decision = match direction {
            Direction::Stop => SteeringDecision::STOP,
            d => SteeringDecision::new(d, SPEEDS[speed_idx]),
        };

        // Only talk to the service when the command changes
        if last_sent != Some(decision) {
            match link.send(decision).await {
                Ok(_) => last_sent = Some(decision),
                Err(e) if e.is_retryable() => warn!("Sending {} failed: {}", decision, e),
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {} ({})", label, SPEEDS[idx]);
}
