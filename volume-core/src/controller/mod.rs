//! Owned state container driven by the control loop.
//!
//! Transports feed [`LinkEvent`]s in and call [`VolumeController::tick`] on
//! every loop iteration; replies go out through a [`ResponseSink`]. Nothing in
//! here blocks except [`VolumeController::boot_sync`], which runs before any
//! transport is up.

use core::time::Duration;

use crate::link::{
    ConnectionId, ConnectionRegistry, DetachedSink, LinkError, LinkEvent, MAX_CONNECTIONS,
    ResponseSink, deliver,
};
use crate::presses::{BOOT_SETTLE, Volume};
use crate::repl::{Action, CommandError, NumericPolicy, Response, interpret};
use crate::scheduler::{
    Completion, LineDriver, MonotonicInstant, PressScheduler, PressState, SchedulerError,
};
use crate::sync::{ResyncOrchestrator, SyncPhase};
use crate::telemetry::{TelemetryEventKind, TelemetryPayload, TelemetryRecorder};

/// Interval the boot resync waits between scheduler polls.
pub const BOOT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runtime knobs for the controller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ControllerSettings {
    pub numeric_policy: NumericPolicy,
    /// Pause between sweep and climb for client-initiated resyncs.
    pub sync_settle: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            numeric_policy: NumericPolicy::Permissive,
            sync_settle: Duration::ZERO,
        }
    }
}

pub struct VolumeController<D, I, const N: usize = MAX_CONNECTIONS>
where
    I: MonotonicInstant,
{
    scheduler: PressScheduler<D, I>,
    sync: ResyncOrchestrator<I>,
    connections: ConnectionRegistry<N>,
    settings: ControllerSettings,
    telemetry: TelemetryRecorder<I>,
}

impl<D, I, const N: usize> VolumeController<D, I, N>
where
    D: LineDriver,
    I: MonotonicInstant,
{
    #[must_use]
    pub fn new(driver: D) -> Self {
        Self::with_settings(driver, ControllerSettings::default())
    }

    #[must_use]
    pub fn with_settings(driver: D, settings: ControllerSettings) -> Self {
        Self {
            scheduler: PressScheduler::new(driver),
            sync: ResyncOrchestrator::new(settings.sync_settle),
            connections: ConnectionRegistry::new(),
            settings,
            telemetry: TelemetryRecorder::new(),
        }
    }

    #[must_use]
    pub const fn volume(&self) -> Volume {
        self.scheduler.volume()
    }

    /// A press job or resync is in flight.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        !self.scheduler.is_idle() || self.sync.is_active()
    }

    #[must_use]
    pub const fn press_state(&self) -> PressState {
        self.scheduler.state()
    }

    #[must_use]
    pub const fn sync_phase(&self) -> SyncPhase<I> {
        self.sync.phase()
    }

    #[must_use]
    pub const fn settings(&self) -> ControllerSettings {
        self.settings
    }

    #[must_use]
    pub const fn telemetry(&self) -> &TelemetryRecorder<I> {
        &self.telemetry
    }

    #[must_use]
    pub const fn connections(&self) -> &ConnectionRegistry<N> {
        &self.connections
    }

    #[must_use]
    pub const fn driver(&self) -> &D {
        self.scheduler.driver()
    }

    pub fn driver_mut(&mut self) -> &mut D {
        self.scheduler.driver_mut()
    }

    /// Registers a new client connection.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::RegistryFull`] when no slot is free.
    pub fn connect(&mut self, now: I) -> Result<ConnectionId, LinkError> {
        let connection = self.connections.open()?;
        self.telemetry
            .record_connection(TelemetryEventKind::ConnectionOpened, connection, now);
        Ok(connection)
    }

    /// Retires `connection` and drops any reply owed to it. In-flight presses continue.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::UnknownConnection`] for stale handles.
    pub fn disconnect(&mut self, connection: ConnectionId, now: I) -> Result<(), LinkError> {
        self.connections.close(connection)?;
        self.scheduler.detach(connection);
        self.sync.detach(connection);
        self.telemetry
            .record_connection(TelemetryEventKind::ConnectionClosed, connection, now);
        Ok(())
    }

    /// Handles one transport event.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::UnknownConnection`] when the event names a handle
    /// that is not registered; the event is otherwise ignored.
    pub fn handle_event<S>(
        &mut self,
        event: LinkEvent<'_>,
        now: I,
        sink: &mut S,
    ) -> Result<(), LinkError>
    where
        S: ResponseSink + ?Sized,
    {
        match event {
            LinkEvent::DataReceived { connection, bytes } => {
                if !self.connections.is_open(connection) {
                    return Err(LinkError::UnknownConnection);
                }
                self.submit(connection, bytes, now, sink);
                Ok(())
            }
            LinkEvent::Disconnected { connection } => self.disconnect(connection, now),
        }
    }

    /// Advances the press job, then the resync, delivering any finished replies.
    pub fn tick<S>(&mut self, now: I, sink: &mut S)
    where
        S: ResponseSink + ?Sized,
    {
        if let Some(completion) = self.scheduler.tick(now, &mut self.telemetry) {
            self.finish(completion, now, sink);
        }
        if let Some(completion) = self
            .sync
            .tick(&mut self.scheduler, now, &mut self.telemetry)
        {
            self.finish(completion, now, sink);
        }
    }

    /// Starts a resync to `target` on behalf of `respondent`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Busy`] while a job or resync is running.
    pub fn start_sync(
        &mut self,
        target: Volume,
        respondent: Option<ConnectionId>,
        now: I,
    ) -> Result<(), SchedulerError> {
        self.sync.start(
            &mut self.scheduler,
            target,
            respondent,
            now,
            &mut self.telemetry,
        )
    }

    /// Blocking resync to the default volume, run once at power-up.
    ///
    /// Uses [`BOOT_SETTLE`] between sweep and climb. `clock` reads the current
    /// time and `wait` sleeps; nothing is delivered to clients.
    pub fn boot_sync<C, W>(&mut self, mut clock: C, mut wait: W) -> Volume
    where
        C: FnMut() -> I,
        W: FnMut(Duration),
    {
        let configured = self.sync.settle();
        self.sync.set_settle(BOOT_SETTLE);

        if self.start_sync(Volume::DEFAULT, None, clock()).is_ok() {
            while self.is_busy() {
                wait(BOOT_POLL_INTERVAL);
                self.tick(clock(), &mut DetachedSink);
            }
        }

        self.sync.set_settle(configured);
        self.volume()
    }

    fn submit<S>(&mut self, connection: ConnectionId, bytes: &[u8], now: I, sink: &mut S)
    where
        S: ResponseSink + ?Sized,
    {
        let busy = self.is_busy();
        let outcome = match core::str::from_utf8(bytes) {
            Ok(line) => interpret(line, self.volume(), busy, self.settings.numeric_policy),
            Err(_) if busy => Err(CommandError::Busy),
            Err(_) => Err(CommandError::Unknown),
        };

        match outcome {
            Ok(action) => {
                self.telemetry.record_connection(
                    TelemetryEventKind::CommandAccepted,
                    connection,
                    now,
                );
                self.dispatch(action, connection, now, sink);
            }
            Err(error) => self.reject(connection, error, now, sink),
        }
    }

    fn dispatch<S>(&mut self, action: Action, connection: ConnectionId, now: I, sink: &mut S)
    where
        S: ResponseSink + ?Sized,
    {
        let respondent = Some(connection);
        let started = match action {
            Action::Press { line, target } => {
                match self
                    .scheduler
                    .start(line, 1, target, respondent, now, &mut self.telemetry)
                {
                    Ok(Some(completion)) => {
                        self.finish(completion, now, sink);
                        Ok(())
                    }
                    Ok(None) => Ok(()),
                    Err(error) => Err(error),
                }
            }
            Action::Resync { target } => self.start_sync(target, respondent, now),
            Action::SelfTest => {
                self.scheduler
                    .start_self_test(respondent, now, &mut self.telemetry)
            }
            Action::Report(volume) => {
                self.respond(respondent, Response::Volume(volume), now, sink);
                Ok(())
            }
        };

        if let Err(SchedulerError::Busy) = started {
            self.reject(connection, CommandError::Busy, now, sink);
        }
    }

    fn reject<S>(&mut self, connection: ConnectionId, error: CommandError, now: I, sink: &mut S)
    where
        S: ResponseSink + ?Sized,
    {
        self.telemetry.record(
            TelemetryEventKind::CommandRejected(error),
            TelemetryPayload::Connection(connection),
            now,
        );
        self.respond(Some(connection), Response::Error(error), now, sink);
    }

    fn finish<S>(&mut self, completion: Completion, now: I, sink: &mut S)
    where
        S: ResponseSink + ?Sized,
    {
        self.respond(completion.respondent(), completion.response(), now, sink);
    }

    fn respond<S>(
        &mut self,
        respondent: Option<ConnectionId>,
        response: Response,
        now: I,
        sink: &mut S,
    ) where
        S: ResponseSink + ?Sized,
    {
        let delivery = deliver(&self.connections, sink, respondent, &response);
        self.telemetry.record_delivery(delivery, now);
    }
}
