//! Open-loop maneuver library.
//!
//! A maneuver is a fixed list of `Step`s derived from `ManeuverTimings`. The
//! vehicle applies each step under the drive lock and then holds it, so a
//! maneuver never keeps the drive locked across a hold.

use core::str::FromStr;

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::utils::config::ManeuverTimings;

/// Upper bound on the loops of a figure eight.
pub const MAX_EIGHT_LOOPS: u8 = 8;
/// Capacity of a step list; the longest maneuver is a maximal figure eight.
pub const MAX_STEPS: usize = 24;

const CRUISE: f32 = 50.0;
const EXIT: f32 = 75.0;
const CREEP: f32 = 25.0;

/// One actuator update followed by a hold. `None` leaves that output as is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub speed: Option<f32>,
    pub steering: Option<f32>,
    pub hold_ms: u64,
}

impl Step {
    const fn speed(
        speed: f32,
        hold_ms: u64,
    ) -> Self {
        Self {
            speed: Some(speed),
            steering: None,
            hold_ms,
        }
    }

    const fn steer(
        steering: f32,
        hold_ms: u64,
    ) -> Self {
        Self {
            speed: None,
            steering: Some(steering),
            hold_ms,
        }
    }

    const fn both(
        speed: f32,
        steering: f32,
        hold_ms: u64,
    ) -> Self {
        Self {
            speed: Some(speed),
            steering: Some(steering),
            hold_ms,
        }
    }

    const STOP: Self = Self::both(0.0, 0.0, 0);
}

/// Direction of a turn or circle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Turn {
    Left,
    Right,
}

impl Turn {
    /// Steering command at full lock in this direction.
    pub fn lock(self) -> f32 {
        match self {
            Turn::Left => -100.0,
            Turn::Right => 100.0,
        }
    }
}

/// A direction string that is neither "left" nor "right".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownTurn;

impl FromStr for Turn {
    type Err = UnknownTurn;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("left") {
            Ok(Turn::Left)
        } else if s.eq_ignore_ascii_case("right") {
            Ok(Turn::Right)
        } else {
            Err(UnknownTurn)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Maneuver {
    /// Steering sweep, forward and backward creep, stop.
    SelfTest,
    /// Throttle ramp 25, 50, 75.
    StartCar,
    /// Forward ramp, stop, reverse ramp, stop.
    ReverseGear,
    UTurn,
    Circle(Turn),
    /// Figure eight with the given number of loops (capped).
    EightTurn(u8),
    Turn(Turn),
}

impl Maneuver {
    pub fn name(&self) -> &'static str {
        match self {
            Maneuver::SelfTest => "self_test",
            Maneuver::StartCar => "start_car",
            Maneuver::ReverseGear => "reverse_gear",
            Maneuver::UTurn => "u_turn",
            Maneuver::Circle(_) => "circle",
            Maneuver::EightTurn(_) => "eight_turn",
            Maneuver::Turn(Turn::Left) => "turn_left",
            Maneuver::Turn(Turn::Right) => "turn_right",
        }
    }

    /// The steps of this maneuver for the given timings.
    pub fn steps(
        &self,
        t: &ManeuverTimings,
    ) -> Vec<Step, MAX_STEPS> {
        match *self {
            Maneuver::SelfTest => collect([
                Step::steer(-100.0, t.step_ms),
                Step::steer(100.0, t.step_ms),
                Step::steer(0.0, t.step_ms),
                Step::speed(CREEP, t.step_ms),
                Step::speed(-CREEP, t.step_ms),
                Step::STOP,
            ]),
            Maneuver::StartCar => collect([
                Step::speed(CREEP, t.step_ms),
                Step::speed(CRUISE, t.step_ms),
                Step::speed(EXIT, 0),
            ]),
            Maneuver::ReverseGear => collect([
                Step::speed(CREEP, t.reverse_step_ms),
                Step::speed(CRUISE, t.reverse_step_ms),
                Step::speed(EXIT, t.step_ms),
                Step::speed(0.0, t.reverse_step_ms),
                Step::speed(-CREEP, t.reverse_step_ms),
                Step::speed(-CRUISE, t.reverse_step_ms),
                Step::speed(-EXIT, t.step_ms),
                Step::speed(0.0, 0),
            ]),
            Maneuver::UTurn => collect([
                Step::both(CRUISE, Turn::Left.lock(), t.u_turn_ms),
                Step::both(EXIT, 0.0, 0),
            ]),
            Maneuver::Circle(turn) => {
                collect([Step::both(CRUISE, turn.lock(), t.circle_ms), Step::STOP])
            }
            Maneuver::EightTurn(loops) => {
                let half = t.eight_half_ms;
                let figure = [
                    Step::steer(Turn::Left.lock(), half),
                    Step::steer(Turn::Right.lock(), half),
                ];
                core::iter::once(Step::speed(CRUISE, 0))
                    .chain(
                        (0..loops.min(MAX_EIGHT_LOOPS))
                            .flat_map(move |_| figure),
                    )
                    .chain(core::iter::once(Step::STOP))
                    .take(MAX_STEPS)
                    .collect()
            }
            Maneuver::Turn(turn) => collect([
                Step::both(CRUISE, turn.lock(), t.turn_ms),
                Step::both(EXIT, 0.0, 0),
            ]),
        }
    }
}

fn collect<const N: usize>(steps: [Step; N]) -> Vec<Step, MAX_STEPS> {
    steps.into_iter().take(MAX_STEPS).collect()
}
