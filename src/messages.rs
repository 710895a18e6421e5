// Message types shared by the perception loop and the command service

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Whole-robot motion command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
}

impl Direction {
    pub const ALL: [Direction; 5] = [
        Direction::Forward,
        Direction::Backward,
        Direction::Left,
        Direction::Right,
        Direction::Stop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Stop => "stop",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid direction: {0}")]
pub struct UnknownDirection(pub String);

/// Case-insensitive, surrounding whitespace ignored
impl FromStr for Direction {
    type Err = UnknownDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Direction::ALL
            .into_iter()
            .find(|d| d.as_str() == lowered)
            .ok_or_else(|| UnknownDirection(s.to_string()))
    }
}

/// One steering/throttle decision. Also the JSON body of `POST /move`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SteeringDecision {
    pub direction: Direction,
    pub speed: u8,
}

impl SteeringDecision {
    pub const STOP: SteeringDecision = SteeringDecision {
        direction: Direction::Stop,
        speed: 0,
    };

    pub fn new(direction: Direction, speed: u8) -> Self {
        Self { direction, speed }
    }
}

impl fmt::Display for SteeringDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}, {}}}", self.direction, self.speed)
    }
}

// Inbound `POST /move` body as received. Fields stay loose so the service can
// report exactly what is wrong with a request instead of a generic parse error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoveRequest {
    pub direction: Option<String>,
    pub speed: Option<i64>,
}

/// Success body for `/move` and `/stop`, echoing what the motors received
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveResponse {
    pub status: String,
    pub direction: Direction,
    pub speed: u8,
    pub message: String,
}

impl MoveResponse {
    pub fn success(applied: SteeringDecision) -> Self {
        let message = match applied.direction {
            Direction::Stop => "All motors stopped".to_string(),
            d => format!("Moving {} at speed {}", d, applied.speed),
        };
        Self {
            status: "success".to_string(),
            direction: applied.direction,
            speed: applied.speed,
            message,
        }
    }

    pub fn applied(&self) -> SteeringDecision {
        SteeringDecision::new(self.direction, self.speed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Health status reported by the command service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Idle,
    Moving,
    CmdStale,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthReport {
    pub health: RuntimeHealth,
    pub last_command: Option<SteeringDecision>,
    pub watchdog_ms: Option<u64>,
}

/// Line commands accepted by the local drive console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Move { speed: u8, direction: Direction },
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsoleParseError {
    #[error("Invalid command format. Use 'MOVE <speed> <direction>'.")]
    Format,
    #[error("Invalid speed. Enter a number between 0 and 100.")]
    Speed,
    #[error("Invalid direction. Use 'forward', 'backward', 'left', or 'right'.")]
    Direction,
    #[error("Invalid command. Use 'MOVE <speed> <direction>' or 'STOP'.")]
    Unknown,
}

impl FromStr for ConsoleCommand {
    type Err = ConsoleParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["STOP"] => Ok(ConsoleCommand::Stop),
            ["MOVE", speed, direction] => {
                let speed: u8 = speed.parse().map_err(|_| ConsoleParseError::Speed)?;
                if speed > 100 {
                    return Err(ConsoleParseError::Speed);
                }
                let direction: Direction =
                    direction.parse().map_err(|_| ConsoleParseError::Direction)?;
                if direction == Direction::Stop {
                    return Err(ConsoleParseError::Direction);
                }
                Ok(ConsoleCommand::Move { speed, direction })
            }
            ["MOVE", ..] => Err(ConsoleParseError::Format),
            _ => Err(ConsoleParseError::Unknown),
        }
    }
}
