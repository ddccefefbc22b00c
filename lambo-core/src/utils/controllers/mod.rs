//! Module Exports
//!
//! This file exports the actuation and orchestration layer of the car.
//!
//! - `actuators`: DC motors and steering servo behind the `Drive` trait.
//! - `i2c`: PCA9685 PWM chip and bring-up of every device on the I2C bus.
//! - `maneuvers`: open-loop step sequences (U-turn, circle, figure eight...).
//! - `vehicle`: the orchestrator running races, avoidance and maneuvers.

pub mod actuators;
/// Module for managing I2C-connected devices.
pub mod i2c;
pub mod maneuvers;
pub mod vehicle;

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use serde::{Deserialize, Serialize};

use crate::utils::sensors::{ColorReading, DistanceReading, LineError, PowerReading};

pub use actuators::{Actuators, DcMotor, Drive, DriveError};
pub use i2c::{DeviceError, I2cPeripherals, Pca9685Output, PwmOutput};
pub use maneuvers::{Maneuver, Step, Turn};
pub use vehicle::Vehicle;

/// Raised by the operator (or a timer) to interrupt the foreground command.
pub type StopSignal = Signal<CriticalSectionRawMutex, ()>;

/// Lifecycle of the car.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleState {
    Idle,
    Racing,
    Avoiding,
    Stopped,
}

/// Counts laps on rising edges of the line signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LapCounter {
    laps: u32,
    on_line: bool,
}

impl LapCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A counter whose previous sample is `on_line`, so a car parked on the
    /// line does not score a lap when it starts.
    pub fn primed(on_line: bool) -> Self {
        Self { laps: 0, on_line }
    }

    /// Feed one line sample; returns true when it completes a lap.
    pub fn observe(
        &mut self,
        on_line: bool,
    ) -> bool {
        let rising = on_line && !self.on_line;
        self.on_line = on_line;
        if rising {
            self.laps = self.laps.saturating_add(1);
        }
        rising
    }

    pub fn laps(&self) -> u32 {
        self.laps
    }

    pub fn on_line(&self) -> bool {
        self.on_line
    }
}

/// Errors surfaced by vehicle operations.
#[derive(Debug)]
pub enum VehicleError<E: core::fmt::Debug> {
    /// An actuator command failed; the car was stopped on a best-effort basis.
    Drive(E),
    /// The line sensor answered with something that is not a line level.
    Line(LineError),
    /// A command argument was rejected (e.g. an unknown turn direction).
    InvalidArgument,
    /// Another foreground operation already owns the car.
    Busy(VehicleState),
}

/// Everything the self test measured. Sensor failures are values here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelfTestReport {
    pub distances: DistanceReading,
    pub power: Option<PowerReading>,
    pub color: Option<ColorReading>,
    pub line: Result<bool, LineError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "ct", rename_all = "snake_case")] // ct = command type
pub enum VehicleCommand {
    Test,
    Start { laps: u32 },
    Green { laps: u32 },
    Avoid,
    StartCar,
    ReverseGear,
    UTurn,
    EightTurn { loops: u8 },
    Circle { direction: Turn },
    TurnLeft,
    TurnRight,
    Stop,
}

/// What a finished command produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandOutcome {
    Done,
    Laps(u32),
    Report(SelfTestReport),
    /// The self test was interrupted before the sensors were read.
    Cancelled,
}
