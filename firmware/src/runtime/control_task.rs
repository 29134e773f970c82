use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Timer};

use super::{Controller, HOST_QUEUE, RESPONSE_QUEUE};
use crate::clock::FirmwareInstant;
use crate::link::{self, UsbSink};
use crate::status;
use crate::telemetry::{self, TelemetryDrain};

/// Upper bound on how long a pending press deadline can go unnoticed.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[embassy_executor::task]
pub async fn run(mut controller: Controller) -> ! {
    let host = HOST_QUEUE.receiver();
    let mut sink = UsbSink::new(RESPONSE_QUEUE.sender());
    let mut drain = TelemetryDrain::new();

    loop {
        if let Either::First(message) = select(host.receive(), Timer::after(POLL_INTERVAL)).await {
            if let Err(error) =
                link::route(&mut controller, &mut sink, &message, FirmwareInstant::now())
            {
                defmt::warn!(
                    "control: dropped host message ({})",
                    defmt::Display2Format(&error)
                );
            }
        }

        controller.tick(FirmwareInstant::now(), &mut sink);
        status::record_volume(controller.volume());

        let dropped = drain.drain(controller.telemetry(), telemetry::log_record);
        if dropped > 0 {
            defmt::warn!("telemetry: {} records overwritten before logging", dropped);
        }
    }
}
