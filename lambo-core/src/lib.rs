//! Core sensor fusion, motion control and maneuvers for the LamboCar on no-std
//! embedded platforms.
//!
//! For a runnable simulated board, see the `lambo-app/mock-car` binary.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod utils;
