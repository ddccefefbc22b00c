//! Calibration and tuning for the LamboCar.
//!
//! Every section implements `Default` with the values the car was tuned with on
//! the bench, and deserializes with `#[serde(default)]` so a JSON file only has
//! to carry the fields it overrides.

use embassy_time::Duration;
use serde::{Deserialize, Serialize};

/// Full vehicle configuration, loaded once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    pub servo: ServoProfile,
    pub motors: [MotorProfile; 2],
    pub pwm: PwmConfig,
    pub sensors: SensorAddresses,
    pub sampling: SamplingConfig,
    pub centering: CenteringGains,
    pub avoidance: AvoidanceConfig,
    pub race: RaceConfig,
    pub colors: ColorThresholds,
    pub timings: ManeuverTimings,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            servo: ServoProfile::default(),
            motors: [
                MotorProfile { enable_channel: 5 },
                MotorProfile { enable_channel: 4 },
            ],
            pwm: PwmConfig::default(),
            sensors: SensorAddresses::default(),
            sampling: SamplingConfig::default(),
            centering: CenteringGains::default(),
            avoidance: AvoidanceConfig::default(),
            race: RaceConfig::default(),
            colors: ColorThresholds::default(),
            timings: ManeuverTimings::default(),
        }
    }
}

impl VehicleConfig {
    /// Parse a configuration from JSON, filling omitted fields with defaults.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Static calibration of the steering servo.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoProfile {
    /// PWM chip channel driving the servo signal.
    pub channel: u8,
    /// Servo angle (deg) that points the wheels straight ahead.
    pub center_angle: f32,
    /// Deviation from center (deg) reached at full lock.
    pub range_degrees: f32,
    /// Pulse width (ms) for 0° over the servo's full travel.
    pub min_pulse_ms: f32,
    /// Pulse width (ms) for 180° over the servo's full travel.
    pub max_pulse_ms: f32,
    /// PWM signal frequency (Hz).
    pub frequency_hz: f32,
}

impl Default for ServoProfile {
    fn default() -> Self {
        Self {
            channel: 0,
            center_angle: 90.0,
            range_degrees: 45.0,
            min_pulse_ms: 1.0,
            max_pulse_ms: 2.0,
            frequency_hz: 60.0,
        }
    }
}

/// A DC propulsion motor's enable channel on the PWM chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorProfile {
    pub enable_channel: u8,
}

/// PWM chip settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PwmConfig {
    pub address: u8,
    pub frequency_hz: f32,
    /// Invert every duty cycle before it reaches the chip (active-low wiring).
    pub active_low: bool,
}

impl Default for PwmConfig {
    fn default() -> Self {
        Self {
            address: 0x40,
            frequency_hz: 60.0,
            active_low: true,
        }
    }
}

/// I2C addresses of the color and current sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorAddresses {
    pub color: u8,
    pub current: u8,
}

impl Default for SensorAddresses {
    fn default() -> Self {
        Self {
            color: 0x29,
            current: 0x41,
        }
    }
}

/// Distance sampling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Raw readings averaged per channel and poll.
    pub samples: u8,
    /// Settling delay between two raw readings (ms).
    pub sample_interval_ms: u64,
    /// Upper bound on a single echo edge wait (ms).
    pub echo_timeout_ms: u64,
}

impl SamplingConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            samples: 5,
            sample_interval_ms: 10,
            echo_timeout_ms: 50,
        }
    }
}

/// Gains and limits of the proportional centering controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CenteringGains {
    /// Steering per cm of left/right imbalance.
    pub kp: f32,
    /// Below this front distance (cm) the car backs off.
    pub min_front_cm: f32,
    /// At or beyond this front distance (cm) the speed ramp saturates.
    pub max_front_cm: f32,
    /// Lowest forward throttle the motors sustain without stalling.
    pub speed_floor: f32,
    /// Speed commanded while backing away from a close front obstacle.
    pub reverse_creep_speed: f32,
    /// Fraction of speed removed at full steering lock.
    pub max_corner_penalty: f32,
}

impl Default for CenteringGains {
    fn default() -> Self {
        Self {
            kp: 10.0,
            min_front_cm: 20.0,
            max_front_cm: 100.0,
            speed_floor: 25.0,
            reverse_creep_speed: -25.0,
            max_corner_penalty: 0.5,
        }
    }
}

/// Thresholds and choreography of the background avoidance loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvoidanceConfig {
    pub front_threshold_cm: f32,
    pub side_threshold_cm: f32,
    pub cruise_speed: f32,
    pub reverse_speed: f32,
    pub reverse_ms: u64,
    pub turn_speed: f32,
    pub turn_ms: u64,
    pub period_ms: u64,
}

impl Default for AvoidanceConfig {
    fn default() -> Self {
        Self {
            front_threshold_cm: 30.0,
            side_threshold_cm: 15.0,
            cruise_speed: 50.0,
            reverse_speed: -40.0,
            reverse_ms: 500,
            turn_speed: 40.0,
            turn_ms: 700,
            period_ms: 50,
        }
    }
}

/// Cadence of the foreground race loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceConfig {
    pub poll_period_ms: u64,
    pub line_timeout_ms: u64,
}

impl RaceConfig {
    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }

    pub fn line_timeout(&self) -> Duration {
        Duration::from_millis(self.line_timeout_ms)
    }
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            poll_period_ms: 20,
            line_timeout_ms: 50,
        }
    }
}

/// Red/green classification thresholds, calibrated for the track lighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorThresholds {
    pub red_min: u8,
    pub red_delta: u8,
    pub green_min: u8,
    pub green_delta: u8,
}

impl Default for ColorThresholds {
    fn default() -> Self {
        Self {
            red_min: 150,
            red_delta: 30,
            green_min: 150,
            green_delta: 50,
        }
    }
}

/// Hold durations (ms) of the open-loop maneuvers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManeuverTimings {
    pub step_ms: u64,
    pub reverse_step_ms: u64,
    pub u_turn_ms: u64,
    pub circle_ms: u64,
    pub eight_half_ms: u64,
    pub turn_ms: u64,
    pub eight_loops: u8,
}

impl Default for ManeuverTimings {
    fn default() -> Self {
        Self {
            step_ms: 1000,
            reverse_step_ms: 2000,
            u_turn_ms: 5000,
            circle_ms: 10_000,
            eight_half_ms: 5000,
            turn_ms: 1000,
            eight_loops: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_bench_calibration() {
        let cfg = VehicleConfig::default();
        assert_eq!(cfg.servo.center_angle, 90.0);
        assert_eq!(cfg.colors.red_min, 150);
        assert_eq!(cfg.colors.green_delta, 50);
        assert_eq!(cfg.sampling.samples, 5);
        assert_eq!(cfg.motors[0].enable_channel, 5);
        assert_eq!(cfg.motors[1].enable_channel, 4);
        assert!(cfg.pwm.active_low);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = br#"{ "colors": { "red_min": 120 }, "race": { "poll_period_ms": 5 } }"#;
        let cfg = VehicleConfig::from_json(json).unwrap();
        assert_eq!(cfg.colors.red_min, 120);
        assert_eq!(cfg.colors.red_delta, 30);
        assert_eq!(cfg.race.poll_period_ms, 5);
        assert_eq!(cfg.race.line_timeout_ms, 50);
        assert_eq!(cfg.servo, ServoProfile::default());
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(VehicleConfig::from_json(b"{ \"servo\": 3 }").is_err());
    }
}
