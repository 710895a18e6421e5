// GPIO pin access for the motor driver boards
//
// Each motor uses two digital direction lines and one PWM line on the enable
// input. Pins are claimed from a `PinBank`; the bank decides whether they are
// real Raspberry Pi pins or simulated ones.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

/// Logic level of a digital output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    #[default]
    Low,
    High,
}

/// Error types for pin access
#[derive(Debug, thiserror::Error)]
pub enum GpioError {
    #[error("Pin {pin} is already claimed")]
    PinInUse { pin: u8 },

    #[error("Duty cycle {duty} out of range for pin {pin}")]
    InvalidDutyCycle { pin: u8, duty: f64 },

    #[error("Write to pin {pin} failed: {reason}")]
    WriteFailed { pin: u8, reason: String },

    #[cfg(feature = "rpi")]
    #[error("GPIO error: {0}")]
    Rpi(#[from] rppal::gpio::Error),
}

pub type Result<T> = std::result::Result<T, GpioError>;

/// A digital output line
pub trait OutputLine: Send {
    fn pin(&self) -> u8;
    fn set_level(&mut self, level: Level) -> Result<()>;
}

/// A PWM output line, duty cycle in percent (0-100)
pub trait PwmLine: Send {
    fn pin(&self) -> u8;
    fn set_duty_cycle(&mut self, percent: f64) -> Result<()>;
}

/// Source of output pins
pub trait PinBank {
    fn claim_output(&mut self, pin: u8) -> Result<Box<dyn OutputLine>>;

    /// Claim a PWM line, started at 0% duty cycle
    fn claim_pwm(&mut self, pin: u8, frequency_hz: f64) -> Result<Box<dyn PwmLine>>;
}

/// Observable state of one simulated pin
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SimPinState {
    pub level: Level,
    pub duty_cycle: f64,
    pub frequency_hz: f64,
    pub writes: u32,
}

#[derive(Debug, Default)]
struct SimState {
    pins: HashMap<u8, SimPinState>,
    fail_next: Vec<u8>,
}

/// In-memory pin bank for running without hardware.
///
/// Clones share state, so a test can keep one handle and inspect the pins a
/// motor driver is writing to.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPins {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedPins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of a claimed pin
    pub fn pin(&self, pin: u8) -> Option<SimPinState> {
        lock(&self.state).pins.get(&pin).copied()
    }

    pub fn level(&self, pin: u8) -> Level {
        self.pin(pin).map(|p| p.level).unwrap_or_default()
    }

    pub fn duty_cycle(&self, pin: u8) -> f64 {
        self.pin(pin).map(|p| p.duty_cycle).unwrap_or_default()
    }

    /// Make the next write to `pin` fail once
    pub fn fail_next_write(&self, pin: u8) {
        lock(&self.state).fail_next.push(pin);
    }

    fn claim(&self, pin: u8, frequency_hz: f64) -> Result<()> {
        let mut state = lock(&self.state);
        if state.pins.contains_key(&pin) {
            return Err(GpioError::PinInUse { pin });
        }
        state.pins.insert(
            pin,
            SimPinState {
                frequency_hz,
                ..SimPinState::default()
            },
        );
        Ok(())
    }

    fn write(&self, pin: u8, update: impl FnOnce(&mut SimPinState)) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(pos) = state.fail_next.iter().position(|&p| p == pin) {
            state.fail_next.remove(pos);
            return Err(GpioError::WriteFailed {
                pin,
                reason: "injected fault".to_string(),
            });
        }
        let entry = state.pins.entry(pin).or_default();
        update(entry);
        entry.writes += 1;
        Ok(())
    }
}

// A panic while holding the lock cannot leave a pin half-written, so poisoning
// is ignored.
fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

struct SimOutput {
    pin: u8,
    bank: SimulatedPins,
}

impl OutputLine for SimOutput {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn set_level(&mut self, level: Level) -> Result<()> {
        debug!("sim pin {} -> {:?}", self.pin, level);
        self.bank.write(self.pin, |p| p.level = level)
    }
}

struct SimPwm {
    pin: u8,
    bank: SimulatedPins,
}

impl PwmLine for SimPwm {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn set_duty_cycle(&mut self, percent: f64) -> Result<()> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(GpioError::InvalidDutyCycle {
                pin: self.pin,
                duty: percent,
            });
        }
        debug!("sim pin {} duty {}%", self.pin, percent);
        self.bank.write(self.pin, |p| p.duty_cycle = percent)
    }
}

impl PinBank for SimulatedPins {
    fn claim_output(&mut self, pin: u8) -> Result<Box<dyn OutputLine>> {
        self.claim(pin, 0.0)?;
        Ok(Box::new(SimOutput {
            pin,
            bank: self.clone(),
        }))
    }

    fn claim_pwm(&mut self, pin: u8, frequency_hz: f64) -> Result<Box<dyn PwmLine>> {
        self.claim(pin, frequency_hz)?;
        Ok(Box::new(SimPwm {
            pin,
            bank: self.clone(),
        }))
    }
}

#[cfg(feature = "rpi")]
pub use rpi::RppalPins;

/// Real GPIO when built with the `rpi` feature, simulated pins otherwise or
/// when `simulate` is set
pub fn open_pin_bank(simulate: bool) -> Result<Box<dyn PinBank>> {
    #[cfg(feature = "rpi")]
    if !simulate {
        tracing::info!("Opening Raspberry Pi GPIO");
        return Ok(Box::new(RppalPins::open()?));
    }

    if !simulate {
        tracing::warn!("Built without the `rpi` feature, motors are simulated");
    }
    Ok(Box::new(SimulatedPins::new()))
}

#[cfg(feature = "rpi")]
mod rpi {
    use rppal::gpio::{Gpio, OutputPin};

    use super::{GpioError, Level, OutputLine, PinBank, PwmLine, Result};

    /// Raspberry Pi GPIO (BCM numbering) with software PWM on the enable lines
    pub struct RppalPins {
        gpio: Gpio,
    }

    impl RppalPins {
        pub fn open() -> Result<Self> {
            Ok(Self { gpio: Gpio::new()? })
        }
    }

    struct RppalOutput {
        pin: OutputPin,
    }

    impl OutputLine for RppalOutput {
        fn pin(&self) -> u8 {
            self.pin.pin()
        }

        fn set_level(&mut self, level: Level) -> Result<()> {
            match level {
                Level::High => self.pin.set_high(),
                Level::Low => self.pin.set_low(),
            }
            Ok(())
        }
    }

    struct RppalPwm {
        pin: OutputPin,
        frequency_hz: f64,
    }

    impl PwmLine for RppalPwm {
        fn pin(&self) -> u8 {
            self.pin.pin()
        }

        fn set_duty_cycle(&mut self, percent: f64) -> Result<()> {
            if !(0.0..=100.0).contains(&percent) {
                return Err(GpioError::InvalidDutyCycle {
                    pin: self.pin.pin(),
                    duty: percent,
                });
            }
            self.pin
                .set_pwm_frequency(self.frequency_hz, percent / 100.0)?;
            Ok(())
        }
    }

    impl PinBank for RppalPins {
        fn claim_output(&mut self, pin: u8) -> Result<Box<dyn OutputLine>> {
            let pin = self.gpio.get(pin)?.into_output_low();
            Ok(Box::new(RppalOutput { pin }))
        }

        fn claim_pwm(&mut self, pin: u8, frequency_hz: f64) -> Result<Box<dyn PwmLine>> {
            let mut pin = self.gpio.get(pin)?.into_output_low();
            pin.set_pwm_frequency(frequency_hz, 0.0)?;
            Ok(Box::new(RppalPwm { pin, frequency_hz }))
        }
    }
}
