//! Proportional corridor centering.
//!
//! `CenteringController` keeps the car between two walls: it steers toward the
//! side with more room, slows down as the front wall approaches and in tight
//! corners, and backs off when something sits right in front of the bumper.
//!
//! # Example
//! ```rust
//! use lambo_core::utils::config::CenteringGains;
//! use lambo_core::utils::math::centering::CenteringController;
//! use lambo_core::utils::sensors::DistanceReading;
//!
//! let ctrl = CenteringController::new(CenteringGains::default());
//! let cmd = ctrl.decide(&DistanceReading::new(Some(50.0), Some(30.0), Some(10.0)));
//! assert_eq!(cmd.steering, -100.0);
//! ```

use serde::{Deserialize, Serialize};

use crate::utils::{
    config::CenteringGains,
    sensors::{DistanceReading, MAX_RANGE_CM, MIN_RANGE_CM},
};

/// Normalized command magnitude limit for both speed and steering.
pub const FULL_SCALE: f32 = 100.0;

/// A speed and steering pair, both normalized to [-100, 100].
///
/// Positive speed drives forward; positive steering turns right.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DriveCommand {
    pub speed: f32,
    pub steering: f32,
}

impl DriveCommand {
    pub const STOP: Self = Self {
        speed: 0.0,
        steering: 0.0,
    };

    pub fn new(
        speed: f32,
        steering: f32,
    ) -> Self {
        Self { speed, steering }
    }
}

/// Stateless proportional controller over a `DistanceReading`.
#[derive(Debug, Clone, Copy)]
pub struct CenteringController {
    gains: CenteringGains,
}

impl CenteringController {
    pub fn new(gains: CenteringGains) -> Self {
        Self { gains }
    }

    pub fn gains(&self) -> &CenteringGains {
        &self.gains
    }

    /// Compute the command for one set of distances.
    ///
    /// A missing side counts as open space; a missing front is treated like a
    /// wall at the bumper, since the ranger goes blind right up close too.
    pub fn decide(
        &self,
        distances: &DistanceReading,
    ) -> DriveCommand {
        let g = &self.gains;

        let front = match distances.front.map(clamp_range) {
            Some(front) if front >= g.min_front_cm => front,
            _ => return DriveCommand::new(g.reverse_creep_speed, 0.0),
        };
        let left = distances.left.map_or(MAX_RANGE_CM, clamp_range);
        let right = distances.right.map_or(MAX_RANGE_CM, clamp_range);

        let steering = (g.kp * (right - left)).clamp(-FULL_SCALE, FULL_SCALE);
        let speed = self.speed_for(front, steering);

        DriveCommand::new(speed, steering)
    }

    fn speed_for(
        &self,
        front: f32,
        steering: f32,
    ) -> f32 {
        let g = &self.gains;
        let span = (g.max_front_cm - g.min_front_cm).max(f32::EPSILON);
        let ramp = ((front - g.min_front_cm) / span).clamp(0.0, 1.0) * FULL_SCALE;
        let corner = 1.0 - g.max_corner_penalty * libm::fabsf(steering) / FULL_SCALE;
        (ramp * corner).max(g.speed_floor).min(FULL_SCALE)
    }
}

fn clamp_range(cm: f32) -> f32 {
    cm.clamp(MIN_RANGE_CM, MAX_RANGE_CM)
}
