//! Utility re-exports and helper macros for the LamboCar.
//!
//! - `config`: serde-backed calibration and tuning for every component
//! - `controllers`: actuators, PWM chip, maneuvers and the vehicle orchestrator
//! - `math`: the proportional centering controller
//! - `sensors`: distance and perception aggregators plus chip drivers
//!
//! The `mk_static!` macro simplifies static initialization in no-std contexts.

pub mod config;
pub mod controllers;
pub mod math;
pub mod sensors;

pub use config::VehicleConfig;
pub use controllers::{Vehicle, VehicleCommand, VehicleState};
pub use embassy_time::*;
pub use math::centering::CenteringController;

#[macro_export]
/// Initialize a no-std static cell and write the given value into it.
///
/// This macro creates a `static_cell::StaticCell` for type `$t` and initializes
/// it with `$val`, returning a mutable reference to the stored value.
macro_rules! mk_static {
    ($t:ty, $val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        STATIC_CELL.uninit().write($val)
    }};
}
