// High-level motor driver for the tank base
//
// `HardwareContext` owns the four motors for the life of the process and stops
// them when dropped. `DriveCoordinator` is the only thing that talks to it.

use tracing::{debug, info, warn};

use super::actuator::Motor;
use super::gpio::{GpioError, PinBank};
use super::kinematics::{tank_drive, WheelCommands};
use crate::config::{PinMap, WiringConvention};
use crate::messages::Direction;

/// The four wheel motors, configured once at startup
pub struct HardwareContext {
    front_left: Motor,
    front_right: Motor,
    rear_left: Motor,
    rear_right: Motor,
}

impl HardwareContext {
    /// Claim all motor pins from `bank`. Any failure here is fatal for the
    /// caller; motors configured before the failure were left stopped.
    pub fn open(
        bank: &mut dyn PinBank,
        pins: PinMap,
        pwm_frequency_hz: f64,
    ) -> Result<Self, GpioError> {
        info!("Configuring motors at {} Hz PWM", pwm_frequency_hz);
        let hw = Self {
            front_left: Motor::configure("front-left", bank, pins.front_left, pwm_frequency_hz)?,
            front_right: Motor::configure("front-right", bank, pins.front_right, pwm_frequency_hz)?,
            rear_left: Motor::configure("rear-left", bank, pins.rear_left, pwm_frequency_hz)?,
            rear_right: Motor::configure("rear-right", bank, pins.rear_right, pwm_frequency_hz)?,
        };
        info!("All motors initialized");
        Ok(hw)
    }

    fn motors_mut(&mut self) -> [&mut Motor; 4] {
        [
            &mut self.front_left,
            &mut self.front_right,
            &mut self.rear_left,
            &mut self.rear_right,
        ]
    }

    pub fn motors(&self) -> [&Motor; 4] {
        [&self.front_left, &self.front_right, &self.rear_left, &self.rear_right]
    }

    /// Send one command per wheel. Stops at the first failing motor.
    pub fn apply(&mut self, wheels: &WheelCommands) -> Result<(), GpioError> {
        for (motor, command) in self.motors_mut().into_iter().zip(wheels.as_array()) {
            motor.apply(command)?;
        }
        Ok(())
    }

    /// Stop every motor, attempting all four even if some fail
    pub fn stop_all(&mut self) -> Result<(), GpioError> {
        let mut first_err = None;
        for motor in self.motors_mut() {
            if let Err(e) = motor.stop() {
                warn!("Failed to stop {} motor: {}", motor.name(), e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for HardwareContext {
    fn drop(&mut self) {
        info!("Releasing motors");
        if let Err(e) = self.stop_all() {
            warn!("Failed to stop motors on drop: {}", e);
        }
    }
}

/// Maps whole-robot commands onto the four motors
pub struct DriveCoordinator {
    hw: HardwareContext,
    wiring: WiringConvention,
}

impl DriveCoordinator {
    pub fn new(hw: HardwareContext, wiring: WiringConvention) -> Self {
        info!(
            "Drive wiring: swap_forward_backward={}, swap_left_right={}",
            wiring.swap_forward_backward, wiring.swap_left_right
        );
        Self { hw, wiring }
    }

    /// Drive the robot. `speed` must be within 0-100.
    ///
    /// If any motor rejects its command the whole base is stopped before the
    /// error is returned, so the wheels never keep a half-applied command.
    pub fn apply(&mut self, direction: Direction, speed: u8) -> Result<WheelCommands, GpioError> {
        let physical = self.wiring.resolve(direction);
        let wheels = tank_drive(physical, speed);
        debug!("{} -> {} at {}: {:?}", direction, physical, speed, wheels);

        if let Err(e) = self.hw.apply(&wheels) {
            warn!("Motor command failed ({}), stopping base", e);
            if let Err(stop_err) = self.hw.stop_all() {
                warn!("Stop after failed command also failed: {}", stop_err);
            }
            return Err(e);
        }
        Ok(wheels)
    }

    /// Stop all motors immediately
    pub fn stop(&mut self) -> Result<(), GpioError> {
        info!("Stopping all motors");
        self.hw.stop_all()
    }

    pub fn hardware(&self) -> &HardwareContext {
        &self.hw
    }
}
