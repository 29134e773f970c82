//! Press line catalog, volume model and pulse timing shared by firmware and host targets.
//!
//! The device exposes two momentary buttons wired to open-drain outputs. Driving
//! a line low is equivalent to holding the button; floating it releases the
//! button. Lines are never driven high.

use core::fmt;
use core::time::Duration;


pub use self_test::{
    SELF_TEST_STEPS, SELF_TEST_TAIL_PAUSE, SelfTestStep, TEST_HOLD, TEST_LINE_GAP,
};

/// Highest volume step the device accepts.
pub const MAX_VOLUME: u8 = 15;
/// Volume restored by `SYNC` and by the boot resync.
pub const DEFAULT_VOLUME: u8 = 9;
/// Time a line stays asserted for a single press.
pub const PRESS_HOLD: Duration = Duration::from_millis(100);
/// Time a line stays released after each press before the next one may begin.
pub const PRESS_PAUSE: Duration = Duration::from_millis(100);
/// Down-presses issued by a resync sweep. Reaches the floor from any reachable level.
pub const SWEEP_PRESSES: u8 = MAX_VOLUME + 1;
/// Pause between the sweep and the climb during the boot resync.
pub const BOOT_SETTLE: Duration = Duration::from_millis(500);

/// Mirrored device volume, always within `0..=MAX_VOLUME`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Volume(u8);

impl Volume {
    pub const MIN: Self = Self(0);
    pub const MAX: Self = Self(MAX_VOLUME);
    pub const DEFAULT: Self = Self(DEFAULT_VOLUME);

    /// Returns `None` when `level` exceeds [`MAX_VOLUME`].
    #[must_use]
    pub const fn new(level: u8) -> Option<Self> {
        if level <= MAX_VOLUME {
            Some(Self(level))
        } else {
            None
        }
    }

    /// Validates a level parsed from client input, which may be negative or huge.
    #[must_use]
    pub fn from_level(level: i64) -> Option<Self> {
        u8::try_from(level).ok().and_then(Self::new)
    }

    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Level one press above `self`, if any.
    #[must_use]
    pub const fn step_up(self) -> Option<Self> {
        Self::new(self.0 + 1)
    }

    /// Level one press below `self`, if any.
    #[must_use]
    pub const fn step_down(self) -> Option<Self> {
        match self.0.checked_sub(1) {
            Some(level) => Some(Self(level)),
            None => None,
        }
    }

    /// Up-presses required to reach `self` from the floor after a sweep.
    ///
    /// The first up-press after a full down-sweep is absorbed by the device, so
    /// every non-zero target needs one extra press.
    #[must_use]
    pub const fn climb_presses(self) -> u8 {
        if self.0 == 0 { 0 } else { self.0 + 1 }
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical button lines.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PressLine {
    Down,
    Up,
}

impl PressLine {
    pub const COUNT: usize = 2;

    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            PressLine::Down => 0,
            PressLine::Up => 1,
        }
    }

    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(PressLine::Down),
            1 => Some(PressLine::Up),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            PressLine::Down => "down",
            PressLine::Up => "up",
        }
    }

    #[must_use]
    pub const fn wiring(self) -> LineWiring {
        LINE_CATALOG[self.as_index()]
    }
}

impl fmt::Display for PressLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Electrical action applied to a press line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LineAction {
    /// Pull the line low (button held).
    Assert,
    /// Float the line (button released).
    Release,
}

impl fmt::Display for LineAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LineAction::Assert => "assert",
            LineAction::Release => "release",
        })
    }
}

/// Board wiring metadata for a press line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LineWiring {
    pub line: PressLine,
    pub mcu_pin: &'static str,
    pub board_label: &'static str,
}

/// Wiring used by the reference board, indexed by [`PressLine::as_index`].
pub const LINE_CATALOG: [LineWiring; PressLine::COUNT] = [
    LineWiring {
        line: PressLine::Down,
        mcu_pin: "PA4",
        board_label: "VOL-",
    },
    LineWiring {
        line: PressLine::Up,
        mcu_pin: "PA5",
        board_label: "VOL+",
    },
];
