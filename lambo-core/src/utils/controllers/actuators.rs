//! Propulsion and steering actuation.
//!
//! `Actuators` turns normalized speed and steering commands into H-bridge
//! direction levels and PWM duty cycles. The duty conversions are plain
//! functions so they can be checked without touching hardware.

use embedded_hal::digital::{OutputPin, PinState};

use super::i2c::PwmOutput;
use crate::utils::{
    config::{MotorProfile, ServoProfile},
    math::centering::FULL_SCALE,
};

/// Full-scale 16-bit duty cycle.
pub const MAX_DUTY: u16 = u16::MAX;

/// Anything that can take speed and steering commands.
pub trait Drive {
    type Error: core::fmt::Debug;

    /// `speed` in [-100, 100]; the sign selects the direction, zero brakes.
    fn set_speed(
        &mut self,
        speed: f32,
    ) -> Result<(), Self::Error>;

    /// `steering` in [-100, 100]; -100 is full left, 100 full right.
    fn set_steering(
        &mut self,
        steering: f32,
    ) -> Result<(), Self::Error>;
}

/// Errors raised while applying a command to the actuators.
#[derive(Debug)]
pub enum DriveError<E: core::fmt::Debug> {
    /// The command was not a finite number.
    InvalidCommand(f32),
    /// The PWM chip rejected the duty cycle.
    Pwm(E),
    /// A motor direction pin could not be driven.
    DirectionPin,
}

/// Duty cycle for a throttle percentage; the sign is ignored.
pub fn speed_to_duty(speed: f32) -> u16 {
    let magnitude = f64::from(libm::fabsf(speed).min(FULL_SCALE));
    libm::round(magnitude / f64::from(FULL_SCALE) * f64::from(MAX_DUTY)) as u16
}

impl ServoProfile {
    /// Duty cycle placing the servo at `steering` percent of its mechanical range.
    ///
    /// Pure function of the command and the calibration; out-of-range commands
    /// are clamped.
    pub fn steering_to_duty(
        &self,
        steering: f32,
    ) -> u16 {
        let steering = steering.clamp(-FULL_SCALE, FULL_SCALE);
        let period_ms = 1000.0 / self.frequency_hz;
        let min_duty = self.min_pulse_ms / period_ms;
        let max_duty = self.max_pulse_ms / period_ms;

        let angle = self.center_angle + (steering / FULL_SCALE) * self.range_degrees;
        let fraction = (min_duty + (max_duty - min_duty) * (angle / 180.0)).clamp(0.0, 1.0);

        (fraction * MAX_DUTY as f32) as u16
    }
}

/// H-bridge input state of a DC motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
    Brake,
}

impl Direction {
    fn levels(self) -> (PinState, PinState) {
        match self {
            Direction::Forward => (PinState::Low, PinState::High),
            Direction::Backward => (PinState::High, PinState::Low),
            Direction::Brake => (PinState::High, PinState::High),
        }
    }
}

/// A DC motor: two direction inputs plus an enable channel on the PWM chip.
pub struct DcMotor<O> {
    enable_channel: u8,
    in1: O,
    in2: O,
}

impl<O: OutputPin> DcMotor<O> {
    pub fn new(
        profile: MotorProfile,
        in1: O,
        in2: O,
    ) -> Self {
        Self {
            enable_channel: profile.enable_channel,
            in1,
            in2,
        }
    }

    pub fn enable_channel(&self) -> u8 {
        self.enable_channel
    }

    fn set_direction(
        &mut self,
        direction: Direction,
    ) -> Result<(), O::Error> {
        let (in1, in2) = direction.levels();
        self.in1.set_state(in1)?;
        self.in2.set_state(in2)
    }

    /// Give back the direction pins.
    pub fn release(self) -> (O, O) {
        (self.in1, self.in2)
    }
}

/// Two propulsion motors and the steering servo sharing one PWM chip.
pub struct Actuators<P, O> {
    pwm: P,
    motors: [DcMotor<O>; 2],
    servo: ServoProfile,
}

impl<P, O> Actuators<P, O>
where
    P: PwmOutput,
    O: OutputPin,
{
    pub fn new(
        pwm: P,
        motors: [DcMotor<O>; 2],
        servo: ServoProfile,
    ) -> Self {
        Self { pwm, motors, servo }
    }

    pub fn servo(&self) -> &ServoProfile {
        &self.servo
    }

    /// Give back the PWM bank and the motors.
    pub fn release(self) -> (P, [DcMotor<O>; 2]) {
        (self.pwm, self.motors)
    }
}

fn checked<E: core::fmt::Debug>(value: f32) -> Result<f32, DriveError<E>> {
    if !value.is_finite() {
        tracing::error!(value, "rejecting non-finite actuator command");
        return Err(DriveError::InvalidCommand(value));
    }
    Ok(value.clamp(-FULL_SCALE, FULL_SCALE))
}

impl<P, O> Drive for Actuators<P, O>
where
    P: PwmOutput,
    O: OutputPin,
{
    type Error = DriveError<P::Error>;

    fn set_speed(
        &mut self,
        speed: f32,
    ) -> Result<(), Self::Error> {
        let speed = checked(speed)?;
        let (direction, duty) = if speed == 0.0 {
            (Direction::Brake, MAX_DUTY)
        } else if speed > 0.0 {
            (Direction::Forward, speed_to_duty(speed))
        } else {
            (Direction::Backward, speed_to_duty(speed))
        };

        for motor in self.motors.iter_mut() {
            // Direction settles before power is applied.
            motor.set_direction(direction).map_err(|e| {
                tracing::error!(?e, "motor direction pin failed");
                DriveError::DirectionPin
            })?;
            self.pwm
                .set_duty_cycle(motor.enable_channel, duty)
                .map_err(DriveError::Pwm)?;
        }
        tracing::debug!(speed, ?direction, duty, "speed applied");
        Ok(())
    }

    fn set_steering(
        &mut self,
        steering: f32,
    ) -> Result<(), Self::Error> {
        let steering = checked(steering)?;
        let duty = self.servo.steering_to_duty(steering);
        self.pwm
            .set_duty_cycle(self.servo.channel, duty)
            .map_err(DriveError::Pwm)?;
        tracing::debug!(steering, duty, "steering applied");
        Ok(())
    }
}
