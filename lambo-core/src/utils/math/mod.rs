//! Math utilities for the LamboCar.
//!
//! This module provides the proportional centering ("stay-mid") controller that
//! turns a fused distance reading into a speed and steering command.

pub mod centering;

pub use centering::{CenteringController, DriveCommand};
