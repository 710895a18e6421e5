// Single DC motor behind an H-bridge: two direction lines plus PWM enable

use tracing::{debug, info, warn};

use super::gpio::{GpioError, Level, OutputLine, PinBank, PwmLine};
use crate::config::MotorPins;

/// Rotation sense of one motor, as encoded on its direction pins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Forward,
    Backward,
    Stopped,
}

impl Rotation {
    /// (direction-A, direction-B) pin levels
    pub fn levels(&self) -> (Level, Level) {
        match self {
            Rotation::Forward => (Level::High, Level::Low),
            Rotation::Backward => (Level::Low, Level::High),
            Rotation::Stopped => (Level::Low, Level::Low),
        }
    }
}

/// Physical-layer instruction for one motor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorCommand {
    pub rotation: Rotation,
    pub duty_cycle: f64,
}

impl MotorCommand {
    pub fn stopped() -> Self {
        Self {
            rotation: Rotation::Stopped,
            duty_cycle: 0.0,
        }
    }
}

pub struct Motor {
    name: &'static str,
    dir_a: Box<dyn OutputLine>,
    dir_b: Box<dyn OutputLine>,
    pwm: Box<dyn PwmLine>,
    rotation: Rotation,
    duty_cycle: f64,
}

impl Motor {
    /// Claim the motor's three pins and start it stopped (PWM at 0%)
    pub fn configure(
        name: &'static str,
        bank: &mut dyn PinBank,
        pins: MotorPins,
        pwm_frequency_hz: f64,
    ) -> Result<Self, GpioError> {
        debug!(
            "Configuring {} motor: dir_a={}, dir_b={}, pwm={}",
            name, pins.dir_a, pins.dir_b, pins.pwm
        );
        let dir_a = bank.claim_output(pins.dir_a)?;
        let dir_b = bank.claim_output(pins.dir_b)?;
        let pwm = bank.claim_pwm(pins.pwm, pwm_frequency_hz)?;

        let mut motor = Self {
            name,
            dir_a,
            dir_b,
            pwm,
            rotation: Rotation::Stopped,
            duty_cycle: 0.0,
        };
        motor.stop()?;
        info!("{} motor ready", name);
        Ok(motor)
    }

    /// Set direction pins from `forward` and duty cycle to `|speed|`.
    ///
    /// `|speed|` must be within 0-100 (no clamping). A rejected speed leaves
    /// the motor untouched; a write that fails part-way stops the motor.
    pub fn set_speed(&mut self, speed: f64, forward: bool) -> Result<(), GpioError> {
        let duty = speed.abs();
        if !(0.0..=100.0).contains(&duty) {
            return Err(GpioError::InvalidDutyCycle {
                pin: self.pwm.pin(),
                duty,
            });
        }
        let rotation = if forward {
            Rotation::Forward
        } else {
            Rotation::Backward
        };

        if let Err(e) = self.drive(rotation, duty) {
            warn!(
                "{} motor write failed (pins {}/{}/{}): {}, stopping it",
                self.name,
                self.dir_a.pin(),
                self.dir_b.pin(),
                self.pwm.pin(),
                e
            );
            if let Err(stop_err) = self.stop() {
                warn!("{} motor stop also failed: {}", self.name, stop_err);
            }
            return Err(e);
        }
        debug!("{} motor {:?} at {}%", self.name, rotation, duty);
        Ok(())
    }

    fn drive(&mut self, rotation: Rotation, duty: f64) -> Result<(), GpioError> {
        let (a, b) = rotation.levels();
        self.dir_a.set_level(a)?;
        self.dir_b.set_level(b)?;
        self.rotation = rotation;
        self.pwm.set_duty_cycle(duty)?;
        self.duty_cycle = duty;
        Ok(())
    }

    /// Both direction lines low, duty cycle 0. Every line is written even if
    /// an earlier one fails; the first error is returned.
    pub fn stop(&mut self) -> Result<(), GpioError> {
        let a = self.dir_a.set_level(Level::Low);
        let b = self.dir_b.set_level(Level::Low);
        let pwm = self.pwm.set_duty_cycle(0.0);
        if pwm.is_ok() {
            self.duty_cycle = 0.0;
        }
        if a.is_ok() && b.is_ok() {
            self.rotation = Rotation::Stopped;
        }
        a.and(b).and(pwm)
    }

    pub fn apply(&mut self, command: MotorCommand) -> Result<(), GpioError> {
        match command.rotation {
            Rotation::Stopped => self.stop(),
            Rotation::Forward => self.set_speed(command.duty_cycle, true),
            Rotation::Backward => self.set_speed(command.duty_cycle, false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn duty_cycle(&self) -> f64 {
        self.duty_cycle
    }
}
