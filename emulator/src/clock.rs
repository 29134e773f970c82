use std::ops::Add;
use std::time::{Duration, Instant};

use volume_core::telemetry::TelemetryInstant;

/// Monotonic host clock handed to the controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct HostInstant(Instant);

impl HostInstant {
    pub fn now() -> Self {
        Self(Instant::now())
    }
}

impl Add<Duration> for HostInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl TelemetryInstant for HostInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }
}
