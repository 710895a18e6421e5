// Tank-drive kinematics for the 4-wheel base
// Converts a whole-robot direction and speed into per-wheel motor commands.
// Turns rotate in place: the two sides spin in opposite directions.

use super::actuator::{MotorCommand, Rotation};
use crate::messages::Direction;

/// Motor commands for the four wheel corners
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelCommands {
    pub front_left: MotorCommand,
    pub front_right: MotorCommand,
    pub rear_left: MotorCommand,
    pub rear_right: MotorCommand,
}

impl WheelCommands {
    pub fn stopped() -> Self {
        Self::sides(Rotation::Stopped, Rotation::Stopped, 0.0)
    }

    fn sides(left: Rotation, right: Rotation, duty_cycle: f64) -> Self {
        let left = MotorCommand {
            rotation: left,
            duty_cycle,
        };
        let right = MotorCommand {
            rotation: right,
            duty_cycle,
        };
        Self {
            front_left: left,
            front_right: right,
            rear_left: left,
            rear_right: right,
        }
    }

    /// Returns commands as array [front_left, front_right, rear_left, rear_right]
    pub fn as_array(&self) -> [MotorCommand; 4] {
        [self.front_left, self.front_right, self.rear_left, self.rear_right]
    }
}

/// Convert a robot command into wheel commands
///
/// # Arguments
/// * `direction` - Physical direction (wiring convention already applied)
/// * `speed` - Duty cycle in percent, 0-100; ignored for `Stop`
pub fn tank_drive(direction: Direction, speed: u8) -> WheelCommands {
    use Rotation::{Backward, Forward};

    let duty = speed as f64;
    match direction {
        Direction::Forward => WheelCommands::sides(Forward, Forward, duty),
        Direction::Backward => WheelCommands::sides(Backward, Backward, duty),
        // Counter-clockwise: left side back, right side forward
        Direction::Left => WheelCommands::sides(Backward, Forward, duty),
        Direction::Right => WheelCommands::sides(Forward, Backward, duty),
        Direction::Stop => WheelCommands::stopped(),
    }
}
