//! Full resync: sweep to the floor, then climb to an absolute target.
//!
//! The device volume cannot be read back, so `SET:` and `SYNC` recover it by
//! pressing down [`SWEEP_PRESSES`] times (enough to reach zero from anywhere)
//! and then pressing up [`Volume::climb_presses`] times. Both phases run as
//! ordinary scheduler jobs; the orchestrator only sequences them.

use core::time::Duration;

use crate::link::ConnectionId;
use crate::presses::{PressLine, SWEEP_PRESSES, Volume};
use crate::scheduler::{Completion, LineDriver, MonotonicInstant, PressScheduler, SchedulerError};
use crate::telemetry::{TelemetryEventKind, TelemetryPayload, TelemetryRecorder};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SyncPhase<I> {
    None,
    /// Sweep job running.
    Down,
    /// Sweep finished; climb starts once `until` passes.
    Settle { until: I },
    /// Climb job running.
    Up,
}

impl<I> SyncPhase<I> {
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, SyncPhase::None)
    }
}

/// Target and reply address held until the climb starts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct PendingSync {
    target: Volume,
    respondent: Option<ConnectionId>,
}

/// Sequences the sweep and climb jobs of a resync.
pub struct ResyncOrchestrator<I> {
    phase: SyncPhase<I>,
    pending: Option<PendingSync>,
    settle: Duration,
}

impl<I> ResyncOrchestrator<I>
where
    I: MonotonicInstant,
{
    /// `settle` is inserted between the sweep and the climb; zero skips the pause.
    #[must_use]
    pub const fn new(settle: Duration) -> Self {
        Self {
            phase: SyncPhase::None,
            pending: None,
            settle,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> SyncPhase<I> {
        self.phase
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.phase.is_active()
    }

    #[must_use]
    pub const fn settle(&self) -> Duration {
        self.settle
    }

    pub fn set_settle(&mut self, settle: Duration) {
        self.settle = settle;
    }

    /// Raises the indicator and starts the sweep toward the floor.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Busy`] when a resync or press job is already running.
    pub fn start<D, const T: usize>(
        &mut self,
        scheduler: &mut PressScheduler<D, I>,
        target: Volume,
        respondent: Option<ConnectionId>,
        now: I,
        telemetry: &mut TelemetryRecorder<I, T>,
    ) -> Result<(), SchedulerError>
    where
        D: LineDriver,
    {
        if self.is_active() || !scheduler.is_idle() {
            return Err(SchedulerError::Busy);
        }

        telemetry.record_volume(TelemetryEventKind::SyncStarted, target, now);
        scheduler.driver_mut().set_indicator(true);
        telemetry.record(TelemetryEventKind::IndicatorChanged(true), TelemetryPayload::None, now);

        scheduler.start(PressLine::Down, SWEEP_PRESSES, Volume::MIN, None, now, telemetry)?;
        self.pending = Some(PendingSync { target, respondent });
        self.phase = SyncPhase::Down;
        Ok(())
    }

    /// Advances the resync once the scheduler has gone idle.
    ///
    /// Call after [`PressScheduler::tick`]. Returns a completion only when the
    /// climb needs no presses and therefore finishes on the spot.
    pub fn tick<D, const T: usize>(
        &mut self,
        scheduler: &mut PressScheduler<D, I>,
        now: I,
        telemetry: &mut TelemetryRecorder<I, T>,
    ) -> Option<Completion>
    where
        D: LineDriver,
    {
        if !self.is_active() || !scheduler.is_idle() {
            return None;
        }

        match self.phase {
            SyncPhase::None => None,
            SyncPhase::Down if self.settle.is_zero() => self.climb(scheduler, now, telemetry),
            SyncPhase::Down => {
                self.phase = SyncPhase::Settle {
                    until: now + self.settle,
                };
                None
            }
            SyncPhase::Settle { until } if now >= until => self.climb(scheduler, now, telemetry),
            SyncPhase::Settle { .. } => None,
            SyncPhase::Up => {
                self.complete(scheduler.volume(), now, telemetry);
                None
            }
        }
    }

    /// Forgets the reply owed to `connection` while the sweep is still running.
    pub fn detach(&mut self, connection: ConnectionId) -> bool {
        match self.pending.as_mut() {
            Some(pending) if pending.respondent == Some(connection) => {
                pending.respondent = None;
                true
            }
            _ => false,
        }
    }

    fn climb<D, const T: usize>(
        &mut self,
        scheduler: &mut PressScheduler<D, I>,
        now: I,
        telemetry: &mut TelemetryRecorder<I, T>,
    ) -> Option<Completion>
    where
        D: LineDriver,
    {
        let Some(PendingSync { target, respondent }) = self.pending.take() else {
            self.phase = SyncPhase::None;
            return None;
        };
        let presses = target.climb_presses();
        telemetry.record_sync_climb(presses, target, now);

        self.phase = SyncPhase::Up;
        match scheduler.start(PressLine::Up, presses, target, respondent, now, telemetry) {
            Ok(None) => None,
            Ok(Some(completion)) => {
                self.complete(target, now, telemetry);
                Some(completion)
            }
            Err(SchedulerError::Busy) => {
                self.phase = SyncPhase::None;
                None
            }
        }
    }

    fn complete<const T: usize>(
        &mut self,
        volume: Volume,
        now: I,
        telemetry: &mut TelemetryRecorder<I, T>,
    ) {
        self.phase = SyncPhase::None;
        telemetry.record_volume(TelemetryEventKind::SyncComplete, volume, now);
    }
}
