// Motor control module for the 4-wheel tank base
//
// Provides:
// - GPIO pin access (simulated, or Raspberry Pi with the `rpi` feature)
// - Single-motor H-bridge actuator
// - Tank-drive kinematics (direction + speed -> wheel commands)
// - Hardware context and drive coordinator

pub mod actuator;
mod driver;
pub mod gpio;
pub mod kinematics;

pub use actuator::{Motor, MotorCommand, Rotation};
pub use driver::{DriveCoordinator, HardwareContext};
pub use gpio::{GpioError, Level, PinBank, SimulatedPins};
pub use kinematics::{tank_drive, WheelCommands};
