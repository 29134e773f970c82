//! Shared status storage for the firmware target.
//!
//! The control task owns the controller outright; these atomics mirror the
//! bits the USB task reports when a host attaches.

use portable_atomic::{AtomicBool, AtomicU8, Ordering};
use volume_core::Volume;
use volume_core::presses::PressLine;

/// Bitmask of asserted press lines (1 == pulled low).
static LINE_MASK: AtomicU8 = AtomicU8::new(0);
/// Last volume reported by the controller.
static VOLUME: AtomicU8 = AtomicU8::new(0);
/// Tracks whether the activity indicator is lit.
static INDICATOR: AtomicBool = AtomicBool::new(false);

fn bit_for(line: PressLine) -> u8 {
    1 << line.as_index()
}

/// Records the logical level for a press line.
pub fn record_line_asserted(line: PressLine, asserted: bool) {
    let bit = bit_for(line);
    if asserted {
        LINE_MASK.fetch_or(bit, Ordering::Relaxed);
    } else {
        LINE_MASK.fetch_and(!bit, Ordering::Relaxed);
    }
}

/// Clears every line bit, marking them as released.
pub fn reset_line_states() {
    LINE_MASK.store(0, Ordering::Relaxed);
}

pub fn line_asserted(line: PressLine) -> bool {
    LINE_MASK.load(Ordering::Relaxed) & bit_for(line) != 0
}

pub fn record_indicator(active: bool) {
    INDICATOR.store(active, Ordering::Relaxed);
}

pub fn indicator() -> bool {
    INDICATOR.load(Ordering::Relaxed)
}

pub fn record_volume(volume: Volume) {
    VOLUME.store(volume.get(), Ordering::Relaxed);
}

pub fn volume() -> Volume {
    Volume::new(VOLUME.load(Ordering::Relaxed)).unwrap_or(Volume::MIN)
}
