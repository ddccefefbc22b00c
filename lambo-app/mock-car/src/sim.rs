//! Simulated LamboCar board.
//!
//! The I2C bus answers as the PCA9685, TCS34725 and INA219; the rangers and the
//! line sensor follow a scripted track so races finish and obstacles show up.

use std::convert::Infallible;

use embassy_time::{Duration, Instant, Timer};
use embedded_hal::{
    digital::{ErrorType as PinErrorType, InputPin, OutputPin},
    i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation},
};
use lambo_core::utils::{
    config::VehicleConfig,
    sensors::{
        distance::{echo_to_distance, Side},
        RangingSensor, SensorFault,
    },
};
use rand_core::{OsRng, TryRngCore};
use tracing::trace;

/// Time the car needs to go around the track once.
const LAP_MS: u64 = 3000;
/// Time the line sensor spends over the finish line each lap.
const LINE_MS: u64 = 150;
/// The traffic light turns green this long after boot.
const GREEN_AFTER_MS: u64 = 2000;
/// A box shows up in front of the car once per period.
const OBSTACLE_PERIOD_MS: u64 = 5000;
const OBSTACLE_MS: u64 = 300;

fn since(boot: Instant) -> u64 {
    boot.elapsed().as_millis()
}

/// Random value in [0, 1); zero if the OS source fails.
fn unit_noise() -> f32 {
    OsRng.try_next_u32().map_or(0.0, |r| r as f32 / u32::MAX as f32)
}

/// An I2C bus with the three chips of the car on it.
pub struct SimI2c {
    boot: Instant,
    pwm: u8,
    color: u8,
    current: u8,
}

impl SimI2c {
    pub fn new(config: &VehicleConfig) -> Self {
        Self {
            boot: Instant::now(),
            pwm: config.pwm.address,
            color: config.sensors.color,
            current: config.sensors.current,
        }
    }

    fn answer(
        &self,
        address: u8,
        register: Option<u8>,
        buf: &mut [u8],
    ) {
        buf.fill(0);
        let bytes: Vec<u8> = if address == self.color {
            match register {
                // ID register
                Some(0x92) => vec![0x44],
                // clear, red, green, blue counts
                Some(0xB4) => {
                    let [c, r, g, b] = if since(self.boot) < GREEN_AFTER_MS {
                        [1000u16, 900, 300, 100]
                    } else {
                        [1000u16, 200, 900, 150]
                    };
                    [c, r, g, b].iter().flat_map(|v| v.to_le_bytes()).collect()
                }
                _ => Vec::new(),
            }
        } else if address == self.current {
            let draw = 4000.0 + 800.0 * unit_noise();
            match register {
                // 7.4 V bus
                Some(0x02) => (1850u16 << 3).to_be_bytes().to_vec(),
                Some(0x01) => (draw as u16).to_be_bytes().to_vec(),
                Some(0x04) => (draw as u16).to_be_bytes().to_vec(),
                _ => Vec::new(),
            }
        } else {
            Vec::new()
        };
        for (slot, byte) in buf.iter_mut().zip(bytes) {
            *slot = byte;
        }
    }
}

impl ErrorType for SimI2c {
    type Error = ErrorKind;
}

impl I2c for SimI2c {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if ![self.pwm, self.color, self.current].contains(&address) {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }
        let mut register = None;
        for op in operations {
            match op {
                Operation::Write(bytes) => {
                    trace!(address, ?bytes, "i2c write");
                    register = bytes.first().copied();
                }
                Operation::Read(buf) => self.answer(address, register, buf),
            }
        }
        Ok(())
    }
}

/// A GPIO output that only logs.
pub struct SimPin {
    name: &'static str,
}

impl SimPin {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl PinErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        trace!(pin = self.name, "low");
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        trace!(pin = self.name, "high");
        Ok(())
    }
}

/// Reflective line sensor crossing the finish line once per lap.
pub struct SimLinePin {
    boot: Instant,
}

impl SimLinePin {
    pub fn new() -> Self {
        Self {
            boot: Instant::now(),
        }
    }
}

impl PinErrorType for SimLinePin {
    type Error = Infallible;
}

impl InputPin for SimLinePin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.is_low().map(|low| !low)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        // Start just past the line so the first lap is a full one.
        Ok((since(self.boot) + LINE_MS) % LAP_MS < LINE_MS)
    }
}

/// Ultrasonic ranger with a few cm of jitter and the odd lost echo.
pub struct SimRanger {
    side: Side,
    boot: Instant,
}

impl SimRanger {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            boot: Instant::now(),
        }
    }

    fn true_distance(&self) -> f32 {
        match self.side {
            Side::Front if since(self.boot) % OBSTACLE_PERIOD_MS < OBSTACLE_MS => 22.0,
            Side::Front => 150.0,
            Side::Left => 40.0,
            Side::Right => 32.0,
        }
    }
}

impl RangingSensor for SimRanger {
    async fn measure(&mut self) -> Result<f32, SensorFault> {
        if unit_noise() < 0.02 {
            Timer::after_millis(50).await;
            return Err(SensorFault::Timeout);
        }
        let cm = self.true_distance() + 4.0 * (unit_noise() - 0.5);
        let echo = Duration::from_micros((cm / 17_150.0 * 1_000_000.0) as u64);
        Timer::after(echo).await;
        echo_to_distance(echo)
    }
}
