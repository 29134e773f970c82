#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]
#![cfg_attr(not(target_os = "none"), allow(dead_code))]

#[cfg(target_os = "none")]
use panic_halt as _;

mod clock;
mod link;
mod status;
mod telemetry;

#[cfg(target_os = "none")]
mod lines;
#[cfg(target_os = "none")]
mod runtime;
#[cfg(target_os = "none")]
mod usb;

#[cfg(not(target_os = "none"))]
fn main() {}
