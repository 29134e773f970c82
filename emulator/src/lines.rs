//! Simulated open-drain press lines.

use tracing::trace;
use volume_core::presses::{LineAction, PressLine};
use volume_core::scheduler::LineDriver;

/// Tracks line levels in memory and traces every transition.
#[derive(Debug, Default)]
pub struct SimulatedLines {
    asserted: [bool; PressLine::COUNT],
    presses: [u64; PressLine::COUNT],
    indicator: bool,
}

impl SimulatedLines {
    pub fn is_asserted(&self, line: PressLine) -> bool {
        self.asserted[line.as_index()]
    }

    /// Presses issued on `line` since start-up.
    pub fn presses(&self, line: PressLine) -> u64 {
        self.presses[line.as_index()]
    }

    pub fn indicator(&self) -> bool {
        self.indicator
    }
}

impl LineDriver for SimulatedLines {
    fn apply(&mut self, line: PressLine, action: LineAction) {
        let wiring = line.wiring();
        let index = line.as_index();
        match action {
            LineAction::Assert => {
                self.asserted[index] = true;
                self.presses[index] += 1;
                trace!(line = %line, pin = wiring.mcu_pin, "pulled low");
            }
            LineAction::Release => {
                self.asserted[index] = false;
                trace!(line = %line, pin = wiring.mcu_pin, "floating");
            }
        }
    }

    fn release_all(&mut self) {
        self.asserted = [false; PressLine::COUNT];
    }

    fn set_indicator(&mut self, active: bool) {
        self.indicator = active;
    }
}
