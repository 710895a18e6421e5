// Command service: validates whole-robot commands and applies them
//
// All hardware access goes through one mutex around the drive coordinator, so
// concurrent requests are applied one at a time in arrival order.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::messages::{Direction, HealthReport, RuntimeHealth, SteeringDecision};
use crate::motor::{DriveCoordinator, GpioError};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Missing speed or direction")]
    MissingField,

    #[error("Invalid direction")]
    InvalidDirection(String),

    #[error("Speed must be between 0 and 100")]
    SpeedOutOfRange(i64),

    #[error("Motor actuation failed: {0}")]
    Actuation(#[from] GpioError),
}

impl CommandError {
    /// True when the request itself was bad; false when the robot failed to
    /// carry out a valid request
    pub fn is_client_error(&self) -> bool {
        !matches!(self, CommandError::Actuation(_))
    }
}

struct Inner {
    drive: DriveCoordinator,
    last_command: Option<SteeringDecision>,
    last_command_at: Instant,
    health: RuntimeHealth,
}

pub struct CommandService {
    inner: Mutex<Inner>,
    low_speed_cutoff: u8,
    watchdog: Option<Duration>,
}

impl CommandService {
    pub fn new(drive: DriveCoordinator, low_speed_cutoff: u8, watchdog: Option<Duration>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                drive,
                last_command: None,
                last_command_at: Instant::now(),
                health: RuntimeHealth::Idle,
            }),
            low_speed_cutoff,
            watchdog,
        }
    }

    // A panic mid-command leaves the motors in some state; recovering the
    // guard lets the next stop still reach them.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| {
            warn!("Drive lock poisoned, recovering");
            e.into_inner()
        })
    }

    /// Validate a raw command into what the motors should do
    pub fn resolve(&self, direction: &str, speed: i64) -> Result<SteeringDecision, CommandError> {
        if !(0..=100).contains(&speed) {
            return Err(CommandError::SpeedOutOfRange(speed));
        }
        let speed = speed as u8;

        let lowered = direction.trim().to_ascii_lowercase();
        if lowered == "center" {
            return Ok(SteeringDecision::STOP);
        }
        let direction: Direction = lowered
            .parse()
            .map_err(|_| CommandError::InvalidDirection(direction.to_string()))?;

        if direction == Direction::Stop || speed <= self.low_speed_cutoff {
            return Ok(SteeringDecision::STOP);
        }
        Ok(SteeringDecision::new(direction, speed))
    }

    /// Handle a `move` request. On validation failure the hardware is not
    /// touched.
    pub fn move_robot(
        &self,
        direction: &str,
        speed: i64,
    ) -> Result<SteeringDecision, CommandError> {
        let decision = match self.resolve(direction, speed) {
            Ok(d) => d,
            Err(e) => {
                warn!("Rejected move {:?} at {}: {}", direction, speed, e);
                return Err(e);
            }
        };

        let mut inner = self.lock();
        let result = match decision.direction {
            Direction::Stop => inner.drive.stop(),
            d => inner.drive.apply(d, decision.speed).map(|_| ()),
        };
        inner.last_command_at = Instant::now();
        match result {
            Ok(()) => {
                info!("Applied {} (requested {} at {})", decision, direction, speed);
                inner.last_command = Some(decision);
                inner.health = health_for(decision);
                Ok(decision)
            }
            Err(e) => {
                error!("Failed to apply {}: {}", decision, e);
                // The coordinator stops the base on a failed command
                inner.last_command = Some(SteeringDecision::STOP);
                inner.health = RuntimeHealth::Idle;
                Err(e.into())
            }
        }
    }

    /// Stop all motors. Never validated.
    pub fn stop(&self) -> Result<SteeringDecision, CommandError> {
        let mut inner = self.lock();
        inner.last_command_at = Instant::now();
        inner.last_command = Some(SteeringDecision::STOP);
        inner.health = RuntimeHealth::Idle;
        match inner.drive.stop() {
            Ok(()) => Ok(SteeringDecision::STOP),
            Err(e) => {
                error!("Stop failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Stop the base if it has been moving longer than the watchdog timeout
    /// without a new command. Returns true when the watchdog fired.
    pub fn check_watchdog(&self, now: Instant) -> bool {
        let Some(timeout) = self.watchdog else {
            return false;
        };
        let mut inner = self.lock();
        if inner.health != RuntimeHealth::Moving {
            return false;
        }
        let age = now.saturating_duration_since(inner.last_command_at);
        if age <= timeout {
            return false;
        }

        warn!("Command stale ({:?} old), stopping robot", age);
        if let Err(e) = inner.drive.stop() {
            error!("Watchdog stop failed: {}", e);
        }
        inner.last_command = Some(SteeringDecision::STOP);
        inner.health = RuntimeHealth::CmdStale;
        true
    }

    pub fn health(&self) -> HealthReport {
        let inner = self.lock();
        HealthReport {
            health: inner.health,
            last_command: inner.last_command,
            watchdog_ms: self.watchdog.map(|w| w.as_millis() as u64),
        }
    }

    pub fn watchdog(&self) -> Option<Duration> {
        self.watchdog
    }
}

fn health_for(applied: SteeringDecision) -> RuntimeHealth {
    match applied.direction {
        Direction::Stop => RuntimeHealth::Idle,
        _ => RuntimeHealth::Moving,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PinMap, WiringConvention, FRONT_LEFT_PINS, REAR_RIGHT_PINS};
    use crate::motor::{tank_drive, HardwareContext, Level, SimulatedPins};

    fn service(watchdog: Option<Duration>) -> (CommandService, SimulatedPins) {
        let mut bank = SimulatedPins::new();
        let hw = HardwareContext::open(&mut bank, PinMap::default(), 1000.0).unwrap();
        let drive = DriveCoordinator::new(hw, WiringConvention::default());
        (CommandService::new(drive, 10, watchdog), bank)
    }

    type WheelState = [(Level, Level, f64); 4];

    fn wheel_state(bank: &SimulatedPins) -> WheelState {
        let pins = PinMap::default();
        [pins.front_left, pins.front_right, pins.rear_left, pins.rear_right]
            .map(|p| (bank.level(p.dir_a), bank.level(p.dir_b), bank.duty_cycle(p.pwm)))
    }

    fn expected_state(direction: Direction, speed: u8) -> WheelState {
        tank_drive(direction, speed).as_array().map(|c| {
            let (a, b) = c.rotation.levels();
            (a, b, c.duty_cycle)
        })
    }

    fn pwm_writes(bank: &SimulatedPins) -> u32 {
        bank.pin(FRONT_LEFT_PINS.pwm).unwrap().writes
    }

    #[test]
    fn test_speed_bounds() {
        let (svc, bank) = service(None);
        let before = pwm_writes(&bank);

        for bad in [101, -1, 1000] {
            let err = svc.move_robot("forward", bad).unwrap_err();
            assert!(matches!(err, CommandError::SpeedOutOfRange(_)));
            assert!(err.is_client_error());
        }
        assert_eq!(pwm_writes(&bank), before, "rejected commands must not touch hardware");

        assert_eq!(
            svc.move_robot("forward", 100).unwrap(),
            SteeringDecision::new(Direction::Forward, 100)
        );
        assert_eq!(bank.duty_cycle(FRONT_LEFT_PINS.pwm), 100.0);
        assert_eq!(svc.move_robot("forward", 0).unwrap(), SteeringDecision::STOP);
        assert_eq!(bank.duty_cycle(FRONT_LEFT_PINS.pwm), 0.0);
    }

    #[test]
    fn test_invalid_direction_rejected() {
        let (svc, bank) = service(None);
        let before = pwm_writes(&bank);
        let err = svc.move_robot("up", 50).unwrap_err();
        assert!(matches!(err, CommandError::InvalidDirection(_)));
        assert!(err.is_client_error());
        assert_eq!(err.to_string(), "Invalid direction");
        assert_eq!(pwm_writes(&bank), before);
    }

    #[test]
    fn test_direction_case_insensitive() {
        let (svc, _bank) = service(None);
        assert_eq!(svc.move_robot("LEFT", 40).unwrap(), SteeringDecision::new(Direction::Left, 40));
        assert_eq!(svc.move_robot("Backward", 15).unwrap().direction, Direction::Backward);
    }

    #[test]
    fn test_center_and_low_speed_stop() {
        let (svc, bank) = service(None);
        svc.move_robot("forward", 60).unwrap();

        assert_eq!(svc.move_robot("center", 50).unwrap(), SteeringDecision::STOP);
        assert_eq!(bank.duty_cycle(REAR_RIGHT_PINS.pwm), 0.0);

        svc.move_robot("forward", 60).unwrap();
        for speed in [0, 5, 10] {
            assert_eq!(
                svc.move_robot("right", speed).unwrap(),
                SteeringDecision::STOP,
                "speed {speed}"
            );
        }
        assert_eq!(
            svc.move_robot("right", 11).unwrap(),
            SteeringDecision::new(Direction::Right, 11)
        );
    }

    #[test]
    fn test_actuation_failure_then_stop() {
        let (svc, bank) = service(None);
        bank.fail_next_write(FRONT_LEFT_PINS.pwm);

        let err = svc.move_robot("forward", 50).unwrap_err();
        assert!(matches!(err, CommandError::Actuation(_)));
        assert!(!err.is_client_error());

        assert_eq!(svc.stop().unwrap(), SteeringDecision::STOP);
        assert_eq!(bank.duty_cycle(FRONT_LEFT_PINS.pwm), 0.0);
        assert_eq!(svc.health().health, RuntimeHealth::Idle);
    }

    #[test]
    fn test_health_tracks_commands() {
        let (svc, _bank) = service(None);
        assert_eq!(svc.health().health, RuntimeHealth::Idle);
        assert_eq!(svc.health().last_command, None);

        svc.move_robot("left", 15).unwrap();
        let report = svc.health();
        assert_eq!(report.health, RuntimeHealth::Moving);
        assert_eq!(report.last_command, Some(SteeringDecision::new(Direction::Left, 15)));

        svc.stop().unwrap();
        assert_eq!(svc.health().health, RuntimeHealth::Idle);
    }

    #[test]
    fn test_watchdog_stops_stale_motion() {
        let timeout = Duration::from_millis(250);
        let (svc, bank) = service(Some(timeout));
        svc.move_robot("forward", 50).unwrap();

        let now = Instant::now();
        assert!(!svc.check_watchdog(now));
        assert_eq!(bank.duty_cycle(FRONT_LEFT_PINS.pwm), 50.0);

        assert!(svc.check_watchdog(now + Duration::from_secs(1)));
        assert_eq!(bank.duty_cycle(FRONT_LEFT_PINS.pwm), 0.0);
        assert_eq!(svc.health().health, RuntimeHealth::CmdStale);

        // Already stopped, nothing more to do
        assert!(!svc.check_watchdog(now + Duration::from_secs(2)));
    }

    #[test]
    fn test_watchdog_disabled_holds_last_state() {
        let (svc, bank) = service(None);
        svc.move_robot("forward", 50).unwrap();
        assert!(!svc.check_watchdog(Instant::now() + Duration::from_secs(60)));
        assert_eq!(bank.duty_cycle(FRONT_LEFT_PINS.pwm), 50.0);
    }

    #[test]
    fn test_concurrent_moves_are_serialized() {
        const COMMANDS: [(Direction, u8); 6] = [
            (Direction::Forward, 20),
            (Direction::Backward, 35),
            (Direction::Left, 50),
            (Direction::Right, 65),
            (Direction::Left, 80),
            (Direction::Right, 95),
        ];
        let (svc, bank) = service(None);
        let allowed: Vec<WheelState> = COMMANDS
            .iter()
            .map(|&(d, speed)| expected_state(d, speed))
            .chain([expected_state(Direction::Stop, 0)])
            .collect();

        for round in 0..20 {
            std::thread::scope(|s| {
                for (direction, speed) in COMMANDS {
                    let svc = &svc;
                    s.spawn(move || {
                        for _ in 0..25 {
                            svc.move_robot(direction.as_str(), speed as i64).unwrap();
                        }
                    });
                }
                // Whenever no command holds the lock, all four wheels show one command
                s.spawn(|| {
                    for _ in 0..50 {
                        let _guard = svc.lock();
                        let state = wheel_state(&bank);
                        assert!(allowed.contains(&state), "round {round}: mixed wheels {state:?}");
                    }
                });
            });

            let state = wheel_state(&bank);
            let last = svc.health().last_command.unwrap();
            assert_eq!(
                state,
                expected_state(last.direction, last.speed),
                "round {round}: wheels disagree with last applied command {last}"
            );
        }
    }
}
