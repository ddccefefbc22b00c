//! Line, color and current sensing.
//!
//! The line sensor is the only input whose failures propagate: lap counting
//! must tell a confirmed "off the line" apart from a broken sensor. Color and
//! current failures degrade to `None` and a log record.

use embassy_time::{Duration, Instant, Timer};
use embedded_hal::digital::InputPin;

use super::{
    ColorReading, ColorSensor, CurrentSensor, LineSensor, PowerReading, SensorFault,
};
use crate::utils::config::ColorThresholds;

/// Raw level reported while the sensor sits over the line.
const ON_LINE: u8 = 0;
/// Raw level reported over bare track.
const OFF_LINE: u8 = 1;

/// Why a line reading could not be interpreted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineError {
    /// The sensor itself failed (typically a timeout).
    Sensor(SensorFault),
    /// The sensor answered with a level that is neither "line" nor "no line".
    UnexpectedEncoding(u8),
}

impl ColorReading {
    pub fn new(
        red: u8,
        green: u8,
        blue: u8,
    ) -> Self {
        Self { red, green, blue }
    }

    /// Red dominates: bright enough and clearly ahead of green.
    pub fn is_red(
        &self,
        thresholds: &ColorThresholds,
    ) -> bool {
        self.red >= thresholds.red_min
            && i16::from(self.red) - i16::from(self.green) >= i16::from(thresholds.red_delta)
    }

    /// Green dominates: bright enough and clearly ahead of red.
    pub fn is_green(
        &self,
        thresholds: &ColorThresholds,
    ) -> bool {
        self.green >= thresholds.green_min
            && i16::from(self.green) - i16::from(self.red) >= i16::from(thresholds.green_delta)
    }
}

/// Wraps the line, color and current sensors behind fault-contained accessors.
pub struct PerceptionAggregator<L, C, I> {
    line: L,
    color: C,
    current: I,
    thresholds: ColorThresholds,
    on_line: bool,
}

impl<L, C, I> PerceptionAggregator<L, C, I>
where
    L: LineSensor,
    C: ColorSensor,
    I: CurrentSensor,
{
    pub fn new(
        line: L,
        color: C,
        current: I,
        thresholds: ColorThresholds,
    ) -> Self {
        Self {
            line,
            color,
            current,
            thresholds,
            on_line: false,
        }
    }

    /// Whether the car is over the line.
    ///
    /// Timeouts and unknown raw levels are returned as errors, never folded
    /// into `false`. The latch keeps its last value on error.
    pub async fn detect_line(
        &mut self,
        timeout: Duration,
    ) -> Result<bool, LineError> {
        let raw = self.line.read(timeout).await.map_err(LineError::Sensor)?;
        let on_line = match raw {
            ON_LINE => true,
            OFF_LINE => false,
            other => return Err(LineError::UnexpectedEncoding(other)),
        };
        self.on_line = on_line;
        Ok(on_line)
    }

    /// Result of the last successful `detect_line`; primes the race lap counter.
    pub fn was_on_line(&self) -> bool {
        self.on_line
    }

    pub fn read_color(&mut self) -> Option<ColorReading> {
        match self.color.read() {
            Ok(color) => Some(color),
            Err(fault) => {
                tracing::error!(?fault, "color sensor read failed");
                None
            }
        }
    }

    pub fn power(&mut self) -> Option<PowerReading> {
        match self.current.read() {
            Ok(power) => Some(power),
            Err(fault) => {
                tracing::error!(?fault, "current sensor read failed");
                None
            }
        }
    }

    /// Instantaneous current draw (mA), or `None` if the sensor failed.
    pub fn current(&mut self) -> Option<f32> {
        self.power().map(|p| p.current)
    }

    pub fn thresholds(&self) -> &ColorThresholds {
        &self.thresholds
    }

    pub fn sees_red(&mut self) -> bool {
        let thresholds = self.thresholds;
        self.sees_red_with(&thresholds)
    }

    pub fn sees_red_with(
        &mut self,
        thresholds: &ColorThresholds,
    ) -> bool {
        self.read_color().is_some_and(|c| c.is_red(thresholds))
    }

    pub fn sees_green(&mut self) -> bool {
        let thresholds = self.thresholds;
        self.sees_green_with(&thresholds)
    }

    pub fn sees_green_with(
        &mut self,
        thresholds: &ColorThresholds,
    ) -> bool {
        self.read_color().is_some_and(|c| c.is_green(thresholds))
    }
}

/// Reflective line sensor on a digital input; low means "over the line".
pub struct DigitalLineSensor<P> {
    pin: P,
}

impl<P: InputPin> DigitalLineSensor<P> {
    pub fn new(pin: P) -> Self {
        Self { pin }
    }
}

impl<P: InputPin> LineSensor for DigitalLineSensor<P> {
    async fn read(
        &mut self,
        timeout: Duration,
    ) -> Result<u8, SensorFault> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.pin.is_low() {
                Ok(true) => return Ok(ON_LINE),
                Ok(false) => return Ok(OFF_LINE),
                Err(_) if Instant::now() >= deadline => return Err(SensorFault::Timeout),
                Err(_) => Timer::after_millis(1).await,
            }
        }
    }
}
