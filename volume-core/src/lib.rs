#![no_std]

// Shared logic for the volume presser.
//
// This crate stays portable across the MCU firmware and the host emulator by
// avoiding the Rust standard library. Clocks, GPIO and transports are supplied
// by the embedding crate through the traits exposed here.

pub mod controller;
pub mod link;
pub mod presses;
pub mod repl;
pub mod scheduler;
pub mod sync;
pub mod telemetry;

pub use controller::{ControllerSettings, VolumeController};
pub use presses::Volume;
