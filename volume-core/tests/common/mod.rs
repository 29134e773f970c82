#![allow(dead_code)]

use std::cell::Cell;
use std::collections::HashSet;
use std::ops::Add;
use std::rc::Rc;
use std::time::Duration;

use volume_core::link::{ConnectionId, DeliveryError, LinkEvent, ResponseSink};
use volume_core::presses::{LineAction, PressLine, Volume};
use volume_core::repl::NumericPolicy;
use volume_core::scheduler::LineDriver;
use volume_core::telemetry::TelemetryInstant;
use volume_core::{ControllerSettings, VolumeController};

/// Microsecond test clock.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MockInstant(pub u64);

impl MockInstant {
    pub fn millis(value: u64) -> Self {
        Self(value * 1_000)
    }

    pub fn as_millis(self) -> u64 {
        self.0 / 1_000
    }
}

impl Add<Duration> for MockInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + u64::try_from(rhs.as_micros()).expect("duration fits"))
    }
}

impl TelemetryInstant for MockInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Transition {
    pub at: MockInstant,
    pub line: PressLine,
    pub action: LineAction,
}

/// Line driver that timestamps every transition with the shared clock.
pub struct RecordingDriver {
    clock: Rc<Cell<MockInstant>>,
    pub transitions: Vec<Transition>,
    pub indicator: Vec<bool>,
    pub released_all: usize,
}

impl RecordingDriver {
    pub fn new(clock: Rc<Cell<MockInstant>>) -> Self {
        Self {
            clock,
            transitions: Vec::new(),
            indicator: Vec::new(),
            released_all: 0,
        }
    }

    pub fn asserts(&self, line: PressLine) -> usize {
        self.transitions
            .iter()
            .filter(|t| t.line == line && t.action == LineAction::Assert)
            .count()
    }
}

impl LineDriver for RecordingDriver {
    fn apply(&mut self, line: PressLine, action: LineAction) {
        self.transitions.push(Transition {
            at: self.clock.get(),
            line,
            action,
        });
    }

    fn release_all(&mut self) {
        self.released_all += 1;
    }

    fn set_indicator(&mut self, active: bool) {
        self.indicator.push(active);
    }
}

/// Response sink that captures every line and can mark connections unwritable.
#[derive(Default)]
pub struct RecordingSink {
    pub lines: Vec<(ConnectionId, String)>,
    pub unwritable: HashSet<ConnectionId>,
}

impl RecordingSink {
    pub fn lines_for(&self, connection: ConnectionId) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|(id, _)| *id == connection)
            .map(|(_, line)| line.as_str())
            .collect()
    }
}

impl ResponseSink for RecordingSink {
    fn is_writable(&self, connection: ConnectionId) -> bool {
        !self.unwritable.contains(&connection)
    }

    fn send_line(&mut self, connection: ConnectionId, line: &str) -> Result<(), DeliveryError> {
        self.lines.push((connection, line.to_owned()));
        Ok(())
    }
}

pub type TestController = VolumeController<RecordingDriver, MockInstant>;

/// Controller wired to a controllable clock, a recording driver and sink.
pub struct Harness {
    pub clock: Rc<Cell<MockInstant>>,
    pub controller: TestController,
    pub sink: RecordingSink,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(ControllerSettings::default())
    }

    pub fn with_policy(numeric_policy: NumericPolicy) -> Self {
        Self::with_settings(ControllerSettings {
            numeric_policy,
            ..ControllerSettings::default()
        })
    }

    pub fn with_settings(settings: ControllerSettings) -> Self {
        let clock = Rc::new(Cell::new(MockInstant::default()));
        let driver = RecordingDriver::new(Rc::clone(&clock));
        Self {
            clock,
            controller: VolumeController::with_settings(driver, settings),
            sink: RecordingSink::default(),
        }
    }

    /// Runs the boot resync and clears the records it produced.
    pub fn booted() -> Self {
        let mut harness = Self::new();
        harness.boot();
        harness.forget_history();
        harness
    }

    /// Boots, then resyncs to `level` through a throwaway connection.
    pub fn at_volume(level: u8) -> Self {
        let mut harness = Self::booted();
        if level != volume_core::presses::DEFAULT_VOLUME {
            let setup = harness.connect();
            harness.send(setup, &format!("SET:{level}"));
            harness.run_until_idle();
            harness.disconnect(setup);
        }
        assert_eq!(harness.controller.volume(), volume(level));
        harness.forget_history();
        harness
    }

    pub fn boot(&mut self) -> Volume {
        let clock = Rc::clone(&self.clock);
        let wait_clock = Rc::clone(&self.clock);
        self.controller
            .boot_sync(move || clock.get(), move |pause| wait_clock.set(wait_clock.get() + pause))
    }

    pub fn forget_history(&mut self) {
        self.sink.lines.clear();
        let driver = self.controller.driver_mut();
        driver.transitions.clear();
        driver.indicator.clear();
    }

    pub fn now(&self) -> MockInstant {
        self.clock.get()
    }

    pub fn connect(&mut self) -> ConnectionId {
        let now = self.now();
        self.controller.connect(now).expect("registry has room")
    }

    pub fn disconnect(&mut self, connection: ConnectionId) {
        let now = self.now();
        self.controller
            .handle_event(LinkEvent::Disconnected { connection }, now, &mut self.sink)
            .expect("connection registered");
    }

    pub fn send(&mut self, connection: ConnectionId, line: &str) {
        self.send_bytes(connection, line.as_bytes());
    }

    pub fn send_bytes(&mut self, connection: ConnectionId, bytes: &[u8]) {
        let now = self.now();
        self.controller
            .handle_event(LinkEvent::DataReceived { connection, bytes }, now, &mut self.sink)
            .expect("connection registered");
    }

    /// Moves the clock forward one millisecond at a time, ticking after each step.
    pub fn advance(&mut self, millis: u64) {
        for _ in 0..millis {
            let now = self.now() + Duration::from_millis(1);
            self.clock.set(now);
            self.controller.tick(now, &mut self.sink);
        }
    }

    /// Ticks until the controller reports idle; panics if that takes over a minute.
    pub fn run_until_idle(&mut self) {
        let limit = self.now() + Duration::from_secs(60);
        while self.controller.is_busy() {
            assert!(self.now() < limit, "controller never went idle");
            self.advance(1);
        }
    }

    pub fn driver(&self) -> &RecordingDriver {
        self.controller.driver()
    }

    pub fn lines_for(&self, connection: ConnectionId) -> Vec<&str> {
        self.sink.lines_for(connection)
    }
}

pub fn volume(level: u8) -> Volume {
    Volume::new(level).expect("test level in range")
}
