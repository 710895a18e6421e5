// Timeouts, loop timing, pin map, wiring convention
use std::time::Duration;

use crate::messages::Direction;

// Perception loop period (one capture/detect/decide/dispatch cycle per tick)
pub const FOLLOW_PERIOD: Duration = Duration::from_millis(100);

// How long a corrective or approach command runs before the loop sends stop
pub const DWELL: Duration = Duration::from_secs(1);

// Upper bound on a single request from the loop to the command service
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

// Ceiling for the extra wait added after consecutive transport failures
pub const MAX_BACKOFF: Duration = Duration::from_secs(2);

// Default labels the loop follows
pub const DEFAULT_TARGETS: [&str; 2] = ["a bottle", "a notebook"];

// Detections scoring below this are ignored
pub const MIN_SCORE: f64 = 0.1;

// Command service
pub const SERVER_BIND: &str = "0.0.0.0:5000";
pub const SERVER_URL: &str = "http://127.0.0.1:5000";

// Commands at or below this speed are treated as noise and stop the robot
pub const LOW_SPEED_CUTOFF: u8 = 10;

// Watchdog check rate (only used when a watchdog timeout is configured)
pub const WATCHDOG_HZ: u64 = 20;

// Software PWM frequency for the motor enable lines
pub const PWM_FREQUENCY_HZ: f64 = 1000.0;

/// BCM pin numbers for one motor: two direction lines and the PWM/enable line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorPins {
    pub dir_a: u8,
    pub dir_b: u8,
    pub pwm: u8,
}

pub const FRONT_LEFT_PINS: MotorPins = MotorPins { dir_a: 27, dir_b: 17, pwm: 22 };
pub const FRONT_RIGHT_PINS: MotorPins = MotorPins { dir_a: 10, dir_b: 9, pwm: 11 };
pub const REAR_LEFT_PINS: MotorPins = MotorPins { dir_a: 5, dir_b: 6, pwm: 13 };
pub const REAR_RIGHT_PINS: MotorPins = MotorPins { dir_a: 26, dir_b: 19, pwm: 21 };

/// Pin assignment for the four wheel corners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinMap {
    pub front_left: MotorPins,
    pub front_right: MotorPins,
    pub rear_left: MotorPins,
    pub rear_right: MotorPins,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            front_left: FRONT_LEFT_PINS,
            front_right: FRONT_RIGHT_PINS,
            rear_left: REAR_LEFT_PINS,
            rear_right: REAR_RIGHT_PINS,
        }
    }
}

/// Maps wire-protocol direction labels onto physical motion.
///
/// The default is the literal mapping: `forward` drives all wheels forward and
/// `left` rotates counter-clockwise in place. Robots whose motors are mounted
/// the other way round flip one or both pairs here; the choice has to be
/// confirmed on the real chassis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WiringConvention {
    pub swap_forward_backward: bool,
    pub swap_left_right: bool,
}

impl WiringConvention {
    /// Physical direction to drive for a logical command
    pub fn resolve(&self, direction: Direction) -> Direction {
        match direction {
            Direction::Forward if self.swap_forward_backward => Direction::Backward,
            Direction::Backward if self.swap_forward_backward => Direction::Forward,
            Direction::Left if self.swap_left_right => Direction::Right,
            Direction::Right if self.swap_left_right => Direction::Left,
            other => other,
        }
    }
}

/// Command service settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub pins: PinMap,
    pub pwm_frequency_hz: f64,
    pub wiring: WiringConvention,
    pub low_speed_cutoff: u8,
    /// Stop the motors if no command arrives for this long while moving
    pub watchdog: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SERVER_BIND.to_string(),
            pins: PinMap::default(),
            pwm_frequency_hz: PWM_FREQUENCY_HZ,
            wiring: WiringConvention::default(),
            low_speed_cutoff: LOW_SPEED_CUTOFF,
            watchdog: None,
        }
    }
}

/// Perception loop settings
#[derive(Debug, Clone)]
pub struct FollowConfig {
    pub period: Duration,
    pub dwell: Duration,
    pub max_backoff: Duration,
    pub targets: Vec<String>,
    pub min_score: f64,
    /// Stop after this many cycles (runs until shutdown when unset)
    pub max_cycles: Option<u64>,
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            period: FOLLOW_PERIOD,
            dwell: DWELL,
            max_backoff: MAX_BACKOFF,
            targets: DEFAULT_TARGETS.iter().map(|t| t.to_string()).collect(),
            min_score: MIN_SCORE,
            max_cycles: None,
        }
    }
}
