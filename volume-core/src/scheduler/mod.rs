//! Non-blocking press scheduler.
//!
//! The scheduler owns the line driver and the mirrored volume. A job is a count
//! of identical pulses on one line (hold for [`PRESS_HOLD`], release for
//! [`PRESS_PAUSE`]) or the fixed self-test walk. [`PressScheduler::tick`] is
//! polled from the control loop and advances at most one transition per call.
//! Volume changes only when a job finishes, after the line has been released.

use core::fmt;
use core::ops::Add;
use core::time::Duration;

use crate::link::ConnectionId;
use crate::presses::{
    LineAction, PRESS_HOLD, PRESS_PAUSE, PressLine, SELF_TEST_STEPS, SelfTestStep, Volume,
};
use crate::repl::Response;
use crate::telemetry::{TelemetryEventKind, TelemetryInstant, TelemetryPayload, TelemetryRecorder};

/// Clock values the scheduler can compare and offset.
pub trait MonotonicInstant: TelemetryInstant + Ord + Add<Duration, Output = Self> {}

impl<T> MonotonicInstant for T where T: TelemetryInstant + Ord + Add<Duration, Output = T> {}

/// Abstraction over the open-drain press lines and the activity indicator.
pub trait LineDriver {
    /// Applies the requested action to the press line.
    fn apply(&mut self, line: PressLine, action: LineAction);

    /// Releases every press line.
    fn release_all(&mut self);

    /// Switches the activity indicator on or off.
    fn set_indicator(&mut self, active: bool);
}

/// Line driver that performs no hardware interaction.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopLineDriver;

impl LineDriver for NoopLineDriver {
    fn apply(&mut self, _: PressLine, _: LineAction) {}

    fn release_all(&mut self) {}

    fn set_indicator(&mut self, _: bool) {}
}

/// Position within the self-test walk; each phase maps to one template step.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SelfTestPhase {
    DownOn,
    DownOff,
    UpOn,
    UpOff,
}

impl SelfTestPhase {
    const ORDER: [SelfTestPhase; 4] = [
        SelfTestPhase::DownOn,
        SelfTestPhase::DownOff,
        SelfTestPhase::UpOn,
        SelfTestPhase::UpOff,
    ];

    #[must_use]
    pub const fn step(self) -> SelfTestStep {
        SELF_TEST_STEPS[self as usize]
    }

    #[must_use]
    pub fn next(self) -> Option<Self> {
        Self::ORDER.get(self as usize + 1).copied()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PressState {
    Idle,
    PulseOn,
    PulseOff,
    SelfTest(SelfTestPhase),
}

impl PressState {
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, PressState::Idle)
    }
}

impl fmt::Display for PressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PressState::Idle => f.write_str("idle"),
            PressState::PulseOn => f.write_str("pulse-on"),
            PressState::PulseOff => f.write_str("pulse-off"),
            PressState::SelfTest(phase) => write!(f, "self-test {phase:?}"),
        }
    }
}

/// In-flight press job.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PressJob {
    /// Line being pulsed; also the direction the volume moves.
    pub line: PressLine,
    /// Presses left, including the one in progress.
    pub remaining: u8,
    pub target: Volume,
    /// Connection awaiting the reply, if it is still around.
    pub respondent: Option<ConnectionId>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum ActiveJob {
    Presses(PressJob),
    SelfTest { respondent: Option<ConnectionId> },
}

impl ActiveJob {
    fn respondent_mut(&mut self) -> &mut Option<ConnectionId> {
        match self {
            ActiveJob::Presses(job) => &mut job.respondent,
            ActiveJob::SelfTest { respondent } => respondent,
        }
    }
}

/// Finished job and the reply it owes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Completion {
    Presses {
        volume: Volume,
        respondent: Option<ConnectionId>,
    },
    SelfTest {
        respondent: Option<ConnectionId>,
    },
}

impl Completion {
    #[must_use]
    pub const fn respondent(&self) -> Option<ConnectionId> {
        match self {
            Completion::Presses { respondent, .. } | Completion::SelfTest { respondent } => {
                *respondent
            }
        }
    }

    #[must_use]
    pub const fn response(&self) -> Response {
        match self {
            Completion::Presses { volume, .. } => Response::Volume(*volume),
            Completion::SelfTest { .. } => Response::TestDone,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SchedulerError {
    Busy,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::Busy => f.write_str("press job already active"),
        }
    }
}

/// Single-slot press job executor.
pub struct PressScheduler<D, I> {
    driver: D,
    volume: Volume,
    state: PressState,
    active: Option<ActiveJob>,
    deadline: Option<I>,
}

impl<D, I> PressScheduler<D, I>
where
    D: LineDriver,
    I: MonotonicInstant,
{
    /// Creates an idle scheduler. Volume starts at the floor until a resync runs.
    #[must_use]
    pub fn new(mut driver: D) -> Self {
        driver.release_all();
        Self {
            driver,
            volume: Volume::MIN,
            state: PressState::Idle,
            active: None,
            deadline: None,
        }
    }

    #[must_use]
    pub const fn volume(&self) -> Volume {
        self.volume
    }

    #[must_use]
    pub const fn state(&self) -> PressState {
        self.state
    }

    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.state.is_idle()
    }

    /// Time at which the current phase ends.
    #[must_use]
    pub const fn deadline(&self) -> Option<I> {
        self.deadline
    }

    #[must_use]
    pub fn active_job(&self) -> Option<&PressJob> {
        match &self.active {
            Some(ActiveJob::Presses(job)) => Some(job),
            _ => None,
        }
    }

    #[must_use]
    pub const fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Starts `count` presses on `line`; volume becomes `target` when they finish.
    ///
    /// A zero-count job completes immediately and is returned as `Ok(Some(_))`
    /// without touching the lines.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Busy`] when a job is already active.
    pub fn start<const T: usize>(
        &mut self,
        line: PressLine,
        count: u8,
        target: Volume,
        respondent: Option<ConnectionId>,
        now: I,
        telemetry: &mut TelemetryRecorder<I, T>,
    ) -> Result<Option<Completion>, SchedulerError> {
        if !self.is_idle() {
            return Err(SchedulerError::Busy);
        }

        telemetry.record_job_started(line, count, target, now);

        if count == 0 {
            self.volume = target;
            telemetry.record_volume(TelemetryEventKind::JobComplete, target, now);
            self.clear_indicator(now, telemetry);
            return Ok(Some(Completion::Presses {
                volume: target,
                respondent,
            }));
        }

        self.active = Some(ActiveJob::Presses(PressJob {
            line,
            remaining: count,
            target,
            respondent,
        }));
        self.drive(line, LineAction::Assert, now, telemetry);
        self.state = PressState::PulseOn;
        self.deadline = Some(now + PRESS_HOLD);
        Ok(None)
    }

    /// Starts the self-test walk.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Busy`] when a job is already active.
    pub fn start_self_test<const T: usize>(
        &mut self,
        respondent: Option<ConnectionId>,
        now: I,
        telemetry: &mut TelemetryRecorder<I, T>,
    ) -> Result<(), SchedulerError> {
        if !self.is_idle() {
            return Err(SchedulerError::Busy);
        }

        telemetry.record(TelemetryEventKind::SelfTestStarted, TelemetryPayload::None, now);
        self.active = Some(ActiveJob::SelfTest { respondent });
        self.enter_self_test(SelfTestPhase::DownOn, now, telemetry);
        Ok(())
    }

    /// Advances the active job if its current phase has elapsed.
    ///
    /// Returns the completion when the job finishes during this call.
    pub fn tick<const T: usize>(
        &mut self,
        now: I,
        telemetry: &mut TelemetryRecorder<I, T>,
    ) -> Option<Completion> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }

        match self.state {
            PressState::Idle => None,
            PressState::PulseOn => {
                let line = self.active_job()?.line;
                self.drive(line, LineAction::Release, now, telemetry);
                self.state = PressState::PulseOff;
                self.deadline = Some(now + PRESS_PAUSE);
                None
            }
            PressState::PulseOff => {
                let Some(ActiveJob::Presses(job)) = self.active.as_mut() else {
                    return None;
                };
                job.remaining = job.remaining.saturating_sub(1);
                if job.remaining > 0 {
                    let line = job.line;
                    self.drive(line, LineAction::Assert, now, telemetry);
                    self.state = PressState::PulseOn;
                    self.deadline = Some(now + PRESS_HOLD);
                    None
                } else {
                    Some(self.finish(now, telemetry))
                }
            }
            PressState::SelfTest(phase) => match phase.next() {
                Some(next) => {
                    self.enter_self_test(next, now, telemetry);
                    None
                }
                None => Some(self.finish(now, telemetry)),
            },
        }
    }

    /// Drops the reply owed to `connection`; the job itself keeps running.
    ///
    /// Returns `true` when the active job was waiting on that connection.
    pub fn detach(&mut self, connection: ConnectionId) -> bool {
        let Some(respondent) = self.active.as_mut().map(ActiveJob::respondent_mut) else {
            return false;
        };
        if *respondent == Some(connection) {
            *respondent = None;
            true
        } else {
            false
        }
    }

    fn enter_self_test<const T: usize>(
        &mut self,
        phase: SelfTestPhase,
        now: I,
        telemetry: &mut TelemetryRecorder<I, T>,
    ) {
        let step = phase.step();
        self.drive(step.line, step.action, now, telemetry);
        self.state = PressState::SelfTest(phase);
        self.deadline = Some(now + step.wait);
    }

    fn finish<const T: usize>(
        &mut self,
        now: I,
        telemetry: &mut TelemetryRecorder<I, T>,
    ) -> Completion {
        let completion = match self.active.take() {
            Some(ActiveJob::Presses(job)) => {
                self.volume = job.target;
                telemetry.record_volume(TelemetryEventKind::JobComplete, job.target, now);
                Completion::Presses {
                    volume: job.target,
                    respondent: job.respondent,
                }
            }
            Some(ActiveJob::SelfTest { respondent }) => {
                telemetry.record(TelemetryEventKind::SelfTestComplete, TelemetryPayload::None, now);
                Completion::SelfTest { respondent }
            }
            None => Completion::Presses {
                volume: self.volume,
                respondent: None,
            },
        };

        self.state = PressState::Idle;
        self.deadline = None;
        self.clear_indicator(now, telemetry);
        completion
    }

    fn clear_indicator<const T: usize>(&mut self, now: I, telemetry: &mut TelemetryRecorder<I, T>) {
        self.driver.set_indicator(false);
        telemetry.record(TelemetryEventKind::IndicatorChanged(false), TelemetryPayload::None, now);
    }

    fn drive<const T: usize>(
        &mut self,
        line: PressLine,
        action: LineAction,
        now: I,
        telemetry: &mut TelemetryRecorder<I, T>,
    ) {
        self.driver.apply(line, action);
        telemetry.record_line_transition(line, action, now);
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec;

    use super::*;
    use crate::presses::{SELF_TEST_TAIL_PAUSE, TEST_HOLD, TEST_LINE_GAP};

    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
    struct MockInstant(u64);

    impl MockInstant {
        fn millis(value: u64) -> Self {
            Self(value * 1_000)
        }
    }

    impl Add<Duration> for MockInstant {
        type Output = Self;

        fn add(self, rhs: Duration) -> Self::Output {
            Self(self.0 + u64::try_from(rhs.as_micros()).unwrap())
        }
    }

    impl TelemetryInstant for MockInstant {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_micros(self.0.saturating_sub(earlier.0))
        }
    }

    #[derive(Default)]
    struct RecordingDriver {
        transitions: Vec<(PressLine, LineAction)>,
        indicator: Vec<bool>,
    }

    impl LineDriver for RecordingDriver {
        fn apply(&mut self, line: PressLine, action: LineAction) {
            self.transitions.push((line, action));
        }

        fn release_all(&mut self) {}

        fn set_indicator(&mut self, active: bool) {
            self.indicator.push(active);
        }
    }

    type Scheduler = PressScheduler<RecordingDriver, MockInstant>;

    fn volume(level: u8) -> Volume {
        Volume::new(level).unwrap()
    }

    #[test]
    fn single_press_holds_then_pauses() {
        let mut telemetry = TelemetryRecorder::<MockInstant>::new();
        let mut scheduler = Scheduler::new(RecordingDriver::default());

        let started = scheduler.start(
            PressLine::Up,
            1,
            volume(1),
            None,
            MockInstant::millis(0),
            &mut telemetry,
        );
        assert_eq!(started, Ok(None));
        assert_eq!(scheduler.state(), PressState::PulseOn);

        assert_eq!(scheduler.tick(MockInstant::millis(99), &mut telemetry), None);
        assert_eq!(scheduler.state(), PressState::PulseOn);

        assert_eq!(scheduler.tick(MockInstant::millis(100), &mut telemetry), None);
        assert_eq!(scheduler.state(), PressState::PulseOff);
        assert_eq!(scheduler.volume(), Volume::MIN);

        assert_eq!(scheduler.tick(MockInstant::millis(199), &mut telemetry), None);
        let completion = scheduler.tick(MockInstant::millis(200), &mut telemetry);
        assert_eq!(
            completion,
            Some(Completion::Presses {
                volume: volume(1),
                respondent: None
            })
        );
        assert!(scheduler.is_idle());
        assert_eq!(scheduler.volume(), volume(1));
        assert_eq!(
            scheduler.driver().transitions,
            [
                (PressLine::Up, LineAction::Assert),
                (PressLine::Up, LineAction::Release)
            ]
        );
        assert_eq!(scheduler.driver().indicator, [false]);
    }

    #[test]
    fn late_ticks_never_shorten_the_pause() {
        let mut telemetry = TelemetryRecorder::<MockInstant>::new();
        let mut scheduler = Scheduler::new(RecordingDriver::default());
        scheduler
            .start(PressLine::Down, 2, volume(0), None, MockInstant::millis(0), &mut telemetry)
            .unwrap();

        // Release lands late; the pause is measured from the release itself.
        scheduler.tick(MockInstant::millis(150), &mut telemetry);
        assert_eq!(scheduler.deadline(), Some(MockInstant::millis(250)));
        scheduler.tick(MockInstant::millis(249), &mut telemetry);
        assert_eq!(scheduler.state(), PressState::PulseOff);
    }

    #[test]
    fn zero_presses_complete_immediately() {
        let mut telemetry = TelemetryRecorder::<MockInstant>::new();
        let mut scheduler = Scheduler::new(RecordingDriver::default());

        let started = scheduler.start(
            PressLine::Up,
            0,
            volume(0),
            None,
            MockInstant::millis(5),
            &mut telemetry,
        );
        assert_eq!(
            started,
            Ok(Some(Completion::Presses {
                volume: volume(0),
                respondent: None
            }))
        );
        assert!(scheduler.is_idle());
        assert!(scheduler.driver().transitions.is_empty());
    }

    #[test]
    fn rejects_second_job_while_active() {
        let mut telemetry = TelemetryRecorder::<MockInstant>::new();
        let mut scheduler = Scheduler::new(RecordingDriver::default());
        let now = MockInstant::millis(0);
        scheduler
            .start(PressLine::Up, 3, volume(3), None, now, &mut telemetry)
            .unwrap();

        assert_eq!(
            scheduler.start(PressLine::Down, 1, volume(2), None, now, &mut telemetry),
            Err(SchedulerError::Busy)
        );
        assert_eq!(
            scheduler.start_self_test(None, now, &mut telemetry),
            Err(SchedulerError::Busy)
        );
    }

    #[test]
    fn self_test_walks_template_timings() {
        let mut telemetry = TelemetryRecorder::<MockInstant>::new();
        let mut scheduler = Scheduler::new(RecordingDriver::default());
        let mut now = MockInstant::millis(0);
        scheduler.start_self_test(None, now, &mut telemetry).unwrap();
        assert_eq!(scheduler.state(), PressState::SelfTest(SelfTestPhase::DownOn));

        for (wait, expected) in [
            (TEST_HOLD, PressState::SelfTest(SelfTestPhase::DownOff)),
            (TEST_LINE_GAP, PressState::SelfTest(SelfTestPhase::UpOn)),
            (TEST_HOLD, PressState::SelfTest(SelfTestPhase::UpOff)),
        ] {
            now = now + wait;
            assert_eq!(scheduler.tick(now, &mut telemetry), None);
            assert_eq!(scheduler.state(), expected);
        }

        now = now + SELF_TEST_TAIL_PAUSE;
        assert_eq!(
            scheduler.tick(now, &mut telemetry),
            Some(Completion::SelfTest { respondent: None })
        );
        assert!(scheduler.is_idle());
        assert_eq!(scheduler.volume(), Volume::MIN);
        assert_eq!(scheduler.driver().transitions.len(), 4);
    }

    #[test]
    fn detach_only_clears_matching_respondent() {
        let mut registry = crate::link::ConnectionRegistry::<2>::new();
        let owner = registry.open().unwrap();
        let other = registry.open().unwrap();
        let mut telemetry = TelemetryRecorder::<MockInstant>::new();
        let mut scheduler = Scheduler::new(RecordingDriver::default());
        scheduler
            .start(
                PressLine::Up,
                1,
                volume(1),
                Some(owner),
                MockInstant::millis(0),
                &mut telemetry,
            )
            .unwrap();

        assert!(!scheduler.detach(other));
        assert!(scheduler.detach(owner));
        assert_eq!(scheduler.active_job().and_then(|job| job.respondent), None);

        scheduler.tick(MockInstant::millis(100), &mut telemetry);
        let completion = scheduler.tick(MockInstant::millis(200), &mut telemetry);
        assert_eq!(completion.and_then(|done| done.respondent()), None);
        assert_eq!(scheduler.volume(), volume(1));
    }
}
