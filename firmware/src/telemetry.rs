//! Forwards controller telemetry to defmt (or stdout on the host).

use volume_core::telemetry::{EventId, TelemetryRecord, TelemetryRecorder};

use crate::clock::FirmwareInstant;

/// Tracks which telemetry records have already been logged.
#[derive(Debug, Default)]
pub struct TelemetryDrain {
    cursor: EventId,
}

impl TelemetryDrain {
    pub const fn new() -> Self {
        Self { cursor: 0 }
    }

    /// Hands every record newer than the last drain to `emit`, oldest first.
    ///
    /// Returns the number of records the ring overwrote before they could be
    /// drained.
    pub fn drain<F, const CAPACITY: usize>(
        &mut self,
        recorder: &TelemetryRecorder<FirmwareInstant, CAPACITY>,
        mut emit: F,
    ) -> u32
    where
        F: FnMut(&TelemetryRecord<FirmwareInstant>),
    {
        let mut dropped = 0;
        let mut expected = self.cursor;
        for record in recorder.since(self.cursor) {
            dropped += record.id.wrapping_sub(expected);
            emit(record);
            expected = record.id.wrapping_add(1);
        }
        self.cursor = recorder.next_event_id();
        dropped
    }
}

#[cfg(target_os = "none")]
pub fn log_record(record: &TelemetryRecord<FirmwareInstant>) {
    let timestamp_us = record.timestamp.as_micros();
    if record.event.is_warning() {
        defmt::warn!("telemetry {} t={}us", defmt::Display2Format(record), timestamp_us);
    } else if record.event.is_line_level() {
        defmt::debug!("telemetry {} t={}us", defmt::Display2Format(record), timestamp_us);
    } else {
        defmt::info!("telemetry {} t={}us", defmt::Display2Format(record), timestamp_us);
    }
}

#[cfg(not(target_os = "none"))]
pub fn log_record(record: &TelemetryRecord<FirmwareInstant>) {
    println!("telemetry {record} t={}us", record.timestamp.as_micros());
}
