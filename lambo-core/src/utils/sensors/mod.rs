//! Sensor interfaces and aggregators.
//!
//! - `distance`: three-channel ultrasonic ranging with per-channel averaging
//! - `perception`: line, color and current sensing with fault containment
//! - `i2c`: TCS34725 color and INA219 current drivers on the shared bus

pub mod distance;
pub mod i2c;
pub mod perception;

use embassy_time::Duration;
use serde::{Deserialize, Serialize};

pub use distance::{DistanceAggregator, Hcsr04};
pub use i2c::{Ina219, Tcs34725};
pub use perception::{DigitalLineSensor, LineError, PerceptionAggregator};

/// Shortest distance (cm) the ultrasonic rangers resolve.
pub const MIN_RANGE_CM: f32 = 2.0;
/// Longest distance (cm) the ultrasonic rangers resolve.
pub const MAX_RANGE_CM: f32 = 400.0;

/// A recoverable sensor-level failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorFault {
    /// No edge or stable level within the allotted time.
    Timeout,
    /// A measurement outside the sensor's usable range.
    OutOfRange(f32),
    /// The I2C transaction failed.
    Bus,
    /// A GPIO read or write failed.
    Pin,
}

/// Fused distances (cm) of the three rangers for one polling cycle.
///
/// Each field is `None` when the channel faulted on every sample, otherwise it
/// lies within [`MIN_RANGE_CM`, `MAX_RANGE_CM`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DistanceReading {
    pub front: Option<f32>,
    pub left: Option<f32>,
    pub right: Option<f32>,
}

impl DistanceReading {
    pub fn new(
        front: Option<f32>,
        left: Option<f32>,
        right: Option<f32>,
    ) -> Self {
        Self { front, left, right }
    }
}

/// Gamma-corrected color snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorReading {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

/// Bus voltage (V), shunt voltage (V) and current (mA) of the power rail.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerReading {
    pub bus_voltage: f32,
    pub shunt_voltage: f32,
    pub current: f32,
}

/// Distance ranger (ultrasonic time of flight).
#[allow(async_fn_in_trait)]
pub trait RangingSensor {
    /// Take one measurement in cm.
    async fn measure(&mut self) -> Result<f32, SensorFault>;
}

/// Reflective line sensor.
#[allow(async_fn_in_trait)]
pub trait LineSensor {
    /// Wait up to `timeout` for a stable raw level (0 = line, 1 = no line).
    async fn read(
        &mut self,
        timeout: Duration,
    ) -> Result<u8, SensorFault>;
}

/// RGB color sensor.
pub trait ColorSensor {
    fn read(&mut self) -> Result<ColorReading, SensorFault>;
}

/// Power rail monitor.
pub trait CurrentSensor {
    fn read(&mut self) -> Result<PowerReading, SensorFault>;
}
