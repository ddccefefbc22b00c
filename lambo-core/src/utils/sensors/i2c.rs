//! Color (TCS34725) and current (INA219) sensors on the shared I2C bus.
//!
//! Both drivers take any `embedded_hal::i2c::I2c`, typically a
//! `RefCellDevice` handed out by `I2cPeripherals`.

use embedded_hal::{delay::DelayNs, i2c::I2c};

use super::{ColorReading, ColorSensor, CurrentSensor, PowerReading, SensorFault};

const TCS_COMMAND: u8 = 0x80;
const TCS_AUTO_INCREMENT: u8 = 0x20;
const TCS_ENABLE: u8 = 0x00;
const TCS_ATIME: u8 = 0x01;
const TCS_CONTROL: u8 = 0x0F;
const TCS_ID: u8 = 0x12;
const TCS_CDATAL: u8 = 0x14;
const TCS_PON: u8 = 0x01;
const TCS_AEN: u8 = 0x02;
/// 50 ms integration time.
const TCS_ATIME_50MS: u8 = 0xEB;
/// 4x analog gain.
const TCS_GAIN_4X: u8 = 0x01;

const INA_CONFIG: u8 = 0x00;
const INA_SHUNT_VOLTAGE: u8 = 0x01;
const INA_BUS_VOLTAGE: u8 = 0x02;
const INA_CURRENT: u8 = 0x04;
const INA_CALIBRATION: u8 = 0x05;
/// 32 V bus range, ±320 mV shunt range, 12-bit continuous conversions.
const INA_CONFIG_32V_2A: u16 = 0x399F;
/// Calibration giving a 0.1 mA current LSB with a 0.1 Ω shunt.
const INA_CALIBRATION_32V_2A: u16 = 4096;
const INA_CURRENT_LSB_MA: f32 = 0.1;
const INA_SHUNT_LSB_V: f32 = 0.000_01;
const INA_BUS_LSB_V: f32 = 0.004;

/// TCS34725 RGB color sensor.
pub struct Tcs34725<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> Tcs34725<I2C> {
    pub fn new(
        i2c: I2C,
        address: u8,
    ) -> Self {
        Self { i2c, address }
    }

    /// Check the chip id, set integration time and gain, then power up the ADC.
    pub fn init<D: DelayNs>(
        &mut self,
        delay: &mut D,
    ) -> Result<(), SensorFault> {
        let mut id = [0u8; 1];
        self.i2c
            .write_read(self.address, &[TCS_COMMAND | TCS_ID], &mut id)
            .map_err(bus_fault)?;
        tracing::info!(id = id[0], "TCS34725 found");

        self.write_register(TCS_ATIME, TCS_ATIME_50MS)?;
        self.write_register(TCS_CONTROL, TCS_GAIN_4X)?;
        self.write_register(TCS_ENABLE, TCS_PON)?;
        delay.delay_ms(3);
        self.write_register(TCS_ENABLE, TCS_PON | TCS_AEN)
    }

    /// Raw clear, red, green and blue counts.
    pub fn read_raw(&mut self) -> Result<[u16; 4], SensorFault> {
        let mut buf = [0u8; 8];
        self.i2c
            .write_read(
                self.address,
                &[TCS_COMMAND | TCS_AUTO_INCREMENT | TCS_CDATAL],
                &mut buf,
            )
            .map_err(bus_fault)?;
        Ok([
            u16::from_le_bytes([buf[0], buf[1]]),
            u16::from_le_bytes([buf[2], buf[3]]),
            u16::from_le_bytes([buf[4], buf[5]]),
            u16::from_le_bytes([buf[6], buf[7]]),
        ])
    }

    fn write_register(
        &mut self,
        register: u8,
        value: u8,
    ) -> Result<(), SensorFault> {
        self.i2c
            .write(self.address, &[TCS_COMMAND | register, value])
            .map_err(bus_fault)
    }
}

impl<I2C: I2c> ColorSensor for Tcs34725<I2C> {
    fn read(&mut self) -> Result<ColorReading, SensorFault> {
        let [clear, red, green, blue] = self.read_raw()?;
        Ok(rgb_bytes(clear, red, green, blue))
    }
}

/// Normalize raw counts to the clear channel and apply a 2.5 gamma.
pub fn rgb_bytes(
    clear: u16,
    red: u16,
    green: u16,
    blue: u16,
) -> ColorReading {
    if clear == 0 {
        return ColorReading {
            red: 0,
            green: 0,
            blue: 0,
        };
    }
    let channel = |raw: u16| {
        let scaled = ((raw as f32 / clear as f32) * 256.0) as u32 as f32 / 255.0;
        (libm::powf(scaled, 2.5) * 255.0).min(255.0) as u8
    };
    ColorReading {
        red: channel(red),
        green: channel(green),
        blue: channel(blue),
    }
}

/// INA219 bus voltage and current monitor.
pub struct Ina219<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> Ina219<I2C> {
    pub fn new(
        i2c: I2C,
        address: u8,
    ) -> Self {
        Self { i2c, address }
    }

    /// Program the 32 V / 2 A calibration and continuous conversion mode.
    pub fn init(&mut self) -> Result<(), SensorFault> {
        self.write_register(INA_CALIBRATION, INA_CALIBRATION_32V_2A)?;
        self.write_register(INA_CONFIG, INA_CONFIG_32V_2A)
    }

    fn write_register(
        &mut self,
        register: u8,
        value: u16,
    ) -> Result<(), SensorFault> {
        let [hi, lo] = value.to_be_bytes();
        self.i2c
            .write(self.address, &[register, hi, lo])
            .map_err(bus_fault)
    }

    fn read_register(
        &mut self,
        register: u8,
    ) -> Result<u16, SensorFault> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(self.address, &[register], &mut buf)
            .map_err(bus_fault)?;
        Ok(u16::from_be_bytes(buf))
    }
}

impl<I2C: I2c> CurrentSensor for Ina219<I2C> {
    fn read(&mut self) -> Result<PowerReading, SensorFault> {
        let bus = self.read_register(INA_BUS_VOLTAGE)?;
        let shunt = self.read_register(INA_SHUNT_VOLTAGE)? as i16;
        let current = self.read_register(INA_CURRENT)? as i16;

        Ok(PowerReading {
            bus_voltage: (bus >> 3) as f32 * INA_BUS_LSB_V,
            shunt_voltage: shunt as f32 * INA_SHUNT_LSB_V,
            current: current as f32 * INA_CURRENT_LSB_MA,
        })
    }
}

fn bus_fault<E: core::fmt::Debug>(error: E) -> SensorFault {
    tracing::debug!(?error, "I2C sensor transaction failed");
    SensorFault::Bus
}
