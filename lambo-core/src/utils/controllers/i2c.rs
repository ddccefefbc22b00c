//! I2C device management for the LamboCar.
//!
//! This module drives the PCA9685 PWM chip behind the `PwmOutput` seam and
//! brings up every device sharing the I2C bus: the PWM chip, the TCS34725 color
//! sensor and the INA219 current monitor.

use core::cell::RefCell;

use embedded_hal::{delay::DelayNs, i2c::I2c};
use embedded_hal_bus::i2c::RefCellDevice;
use pwm_pca9685::{Address as PwmAddress, Channel, Error as PwmError, Pca9685};

use crate::utils::{
    config::{PwmConfig, VehicleConfig},
    sensors::{Ina219, SensorFault, Tcs34725},
};

/// Internal oscillator of the PCA9685 (Hz).
const PCA9685_OSCILLATOR_HZ: f32 = 25_000_000.0;
/// Resolution of one PCA9685 PWM period.
const PCA9685_STEPS: f32 = 4096.0;

const CHANNELS: [Channel; 16] = [
    Channel::C0,
    Channel::C1,
    Channel::C2,
    Channel::C3,
    Channel::C4,
    Channel::C5,
    Channel::C6,
    Channel::C7,
    Channel::C8,
    Channel::C9,
    Channel::C10,
    Channel::C11,
    Channel::C12,
    Channel::C13,
    Channel::C14,
    Channel::C15,
];

/// Errors that can occur when interacting with I2C-based devices.
#[derive(Debug)]
pub enum DeviceError<E: core::fmt::Debug> {
    PwmError(PwmError<E>),
    InvalidChannel(u8),
    ColorSensor(SensorFault),
    CurrentSensor(SensorFault),
}

/// A bank of PWM outputs taking 16-bit duty cycles (0 = off, 65535 = always on).
pub trait PwmOutput {
    type Error: core::fmt::Debug;

    fn set_duty_cycle(
        &mut self,
        channel: u8,
        duty: u16,
    ) -> Result<(), Self::Error>;
}

/// Prescale register value producing `frequency_hz` from the internal oscillator.
pub fn prescale_for(frequency_hz: f32) -> u8 {
    let prescale = libm::roundf(PCA9685_OSCILLATOR_HZ / (PCA9685_STEPS * frequency_hz)) - 1.0;
    prescale.clamp(3.0, 255.0) as u8
}

/// PCA9685 exposed as 16-bit duty cycle channels.
pub struct Pca9685Output<I2C> {
    pca: Pca9685<I2C>,
    active_low: bool,
}

impl<I2C, E> Pca9685Output<I2C>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
{
    pub fn new(
        i2c: I2C,
        config: &PwmConfig,
    ) -> Result<Self, DeviceError<E>> {
        let pca = Pca9685::new(i2c, PwmAddress::from(config.address))
            .map_err(DeviceError::PwmError)?;
        Ok(Self {
            pca,
            active_low: config.active_low,
        })
    }

    /// Enable the oscillator and set the PWM frequency.
    pub fn configure(
        &mut self,
        frequency_hz: f32,
    ) -> Result<(), DeviceError<E>> {
        self.pca.enable().map_err(DeviceError::PwmError)?;
        tracing::info!("PWM enabled");
        let prescale = prescale_for(frequency_hz);
        self.pca
            .set_prescale(prescale)
            .map_err(DeviceError::PwmError)?;
        tracing::info!(prescale, frequency_hz, "PWM prescale set");
        Ok(())
    }

    /// Put the chip to sleep; every output goes low.
    pub fn disable(&mut self) -> Result<(), DeviceError<E>> {
        self.pca.disable().map_err(DeviceError::PwmError)
    }
}

impl<I2C, E> PwmOutput for Pca9685Output<I2C>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
{
    type Error = DeviceError<E>;

    fn set_duty_cycle(
        &mut self,
        channel: u8,
        duty: u16,
    ) -> Result<(), Self::Error> {
        let pin = *CHANNELS
            .get(usize::from(channel))
            .ok_or(DeviceError::InvalidChannel(channel))?;
        let duty = if self.active_low { u16::MAX - duty } else { duty };

        let written = match duty {
            0 => self.pca.set_channel_full_off(pin),
            u16::MAX => self.pca.set_channel_full_on(pin, 0),
            duty => self.pca.set_channel_on_off(pin, 0, duty >> 4),
        };
        written.map_err(DeviceError::PwmError)
    }
}

/// Every device on the shared I2C bus, initialized and ready.
pub struct I2cPeripherals<'a, I2C> {
    pub pwm: Pca9685Output<RefCellDevice<'a, I2C>>,
    pub color: Tcs34725<RefCellDevice<'a, I2C>>,
    pub current: Ina219<RefCellDevice<'a, I2C>>,
}

impl<'a, I2C, E> I2cPeripherals<'a, I2C>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
{
    /// Bring up the PWM chip, color sensor and current monitor.
    ///
    /// When any device fails to initialize, the bus is scanned and the
    /// responding addresses are logged before the error is returned.
    pub fn new<D: DelayNs>(
        i2c_bus: &'a RefCell<I2C>,
        config: &VehicleConfig,
        delay: &mut D,
    ) -> Result<Self, DeviceError<E>> {
        match Self::init_devices(i2c_bus, config, delay) {
            Ok(devices) => Ok(devices),
            Err(e) => {
                tracing::warn!("I2C init failed, scanning instead: {:?}", e);
                scan_bus(i2c_bus);
                Err(e)
            }
        }
    }

    fn init_devices<D: DelayNs>(
        i2c_bus: &'a RefCell<I2C>,
        config: &VehicleConfig,
        delay: &mut D,
    ) -> Result<Self, DeviceError<E>> {
        let mut pwm = Pca9685Output::new(RefCellDevice::new(i2c_bus), &config.pwm)?;
        pwm.configure(config.pwm.frequency_hz)?;

        let mut color = Tcs34725::new(RefCellDevice::new(i2c_bus), config.sensors.color);
        color.init(delay).map_err(DeviceError::ColorSensor)?;

        let mut current = Ina219::new(RefCellDevice::new(i2c_bus), config.sensors.current);
        current.init().map_err(DeviceError::CurrentSensor)?;

        tracing::info!("I2C peripherals initialized");
        Ok(Self {
            pwm,
            color,
            current,
        })
    }
}

/// Probe every 7-bit address and log the ones that acknowledge.
pub fn scan_bus<I2C: I2c>(i2c_bus: &RefCell<I2C>) -> heapless::Vec<u8, 16> {
    let mut found = heapless::Vec::new();
    let mut bus = i2c_bus.borrow_mut();
    for addr in 0x03..0x78 {
        if bus.write(addr, &[]).is_ok() {
            tracing::warn!("I2C device found at 0x{:02X}", addr);
            if found.push(addr).is_err() {
                break;
            }
        }
    }
    found
}
