//! GPIO driver for the press lines and the activity LED.

use embassy_stm32::gpio::{Output, OutputOpenDrain};
use volume_core::presses::{LineAction, PressLine};
use volume_core::scheduler::LineDriver;

use crate::clock::FirmwareInstant;
use crate::status;

/// Open-drain press outputs plus an active-low indicator LED.
pub struct HardwareLines<'d> {
    down: OutputOpenDrain<'d>,
    up: OutputOpenDrain<'d>,
    indicator: Output<'d>,
}

impl<'d> HardwareLines<'d> {
    pub fn new(down: OutputOpenDrain<'d>, up: OutputOpenDrain<'d>, indicator: Output<'d>) -> Self {
        Self {
            down,
            up,
            indicator,
        }
    }

    fn output_mut(&mut self, line: PressLine) -> &mut OutputOpenDrain<'d> {
        match line {
            PressLine::Down => &mut self.down,
            PressLine::Up => &mut self.up,
        }
    }
}

impl LineDriver for HardwareLines<'_> {
    fn apply(&mut self, line: PressLine, action: LineAction) {
        let output = self.output_mut(line);
        match action {
            LineAction::Assert => output.set_low(),
            LineAction::Release => output.set_high(),
        }
        status::record_line_asserted(line, action == LineAction::Assert);
        log_line_drive(line, action);
    }

    fn release_all(&mut self) {
        self.down.set_high();
        self.up.set_high();
        status::reset_line_states();
    }

    fn set_indicator(&mut self, active: bool) {
        if active {
            self.indicator.set_low();
        } else {
            self.indicator.set_high();
        }
        status::record_indicator(active);
    }
}

fn log_line_drive(line: PressLine, action: LineAction) {
    let wiring = line.wiring();
    defmt::trace!(
        "lines:{} {} pin={} label={} t={}us",
        line.name(),
        defmt::Display2Format(&action),
        wiring.mcu_pin,
        wiring.board_label,
        FirmwareInstant::now().as_micros()
    );
}
