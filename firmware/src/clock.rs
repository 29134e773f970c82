//! Embassy clock adapter for `volume-core`.

use core::ops::Add;
use core::time::Duration;

use embassy_time::Instant;
use volume_core::telemetry::TelemetryInstant;

/// Embassy instant that offsets by `core::time::Duration`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    #[cfg(target_os = "none")]
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub fn as_micros(self) -> u64 {
        self.0.as_micros()
    }
}

impl From<Instant> for FirmwareInstant {
    fn from(instant: Instant) -> Self {
        Self(instant)
    }
}

impl Add<Duration> for FirmwareInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + to_embassy(rhs))
    }
}

impl TelemetryInstant for FirmwareInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        let micros = self
            .0
            .checked_duration_since(earlier.0)
            .map_or(0, |elapsed| elapsed.as_micros());
        Duration::from_micros(micros)
    }
}

/// Converts to Embassy's tick-based duration, saturating on overflow.
pub fn to_embassy(duration: Duration) -> embassy_time::Duration {
    let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
    embassy_time::Duration::from_micros(micros)
}
