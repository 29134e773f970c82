//! Telemetry event catalog and recorder shared by firmware and host targets.
//!
//! The core never logs directly. Every line transition, job boundary and
//! protocol decision is written into a bounded ring with a monotonically
//! increasing id; the embedding binary drains new records and forwards them to
//! its own logger (`tracing` on the host, `defmt` on the MCU).

use core::fmt;
use core::time::Duration;

use heapless::HistoryBuf;

use crate::link::{ConnectionId, Delivery, DeliveryError};
use crate::presses::{LineAction, PressLine, Volume};
use crate::repl::CommandError;

/// Monotonic identifier assigned to each telemetry record.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Trait implemented by monotonic instant wrappers used for telemetry tracking.
pub trait TelemetryInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Discriminated telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    LineAsserted(PressLine),
    LineReleased(PressLine),
    JobStarted(PressLine),
    JobComplete,
    SyncStarted,
    SyncClimb,
    SyncComplete,
    SelfTestStarted,
    SelfTestComplete,
    IndicatorChanged(bool),
    CommandAccepted,
    CommandRejected(CommandError),
    ConnectionOpened,
    ConnectionClosed,
    ResponseSent,
    ResponseSuppressed(DeliveryError),
}

impl TelemetryEventKind {
    /// Events that indicate a reply was lost or a request refused.
    #[must_use]
    pub const fn is_warning(self) -> bool {
        matches!(
            self,
            TelemetryEventKind::CommandRejected(_) | TelemetryEventKind::ResponseSuppressed(_)
        )
    }

    /// High-frequency events that binaries usually log at debug level.
    #[must_use]
    pub const fn is_line_level(self) -> bool {
        matches!(
            self,
            TelemetryEventKind::LineAsserted(_)
                | TelemetryEventKind::LineReleased(_)
                | TelemetryEventKind::IndicatorChanged(_)
        )
    }
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::LineAsserted(line) => write!(f, "line-asserted {line}"),
            TelemetryEventKind::LineReleased(line) => write!(f, "line-released {line}"),
            TelemetryEventKind::JobStarted(line) => write!(f, "job-started {line}"),
            TelemetryEventKind::JobComplete => f.write_str("job-complete"),
            TelemetryEventKind::SyncStarted => f.write_str("sync-started"),
            TelemetryEventKind::SyncClimb => f.write_str("sync-climb"),
            TelemetryEventKind::SyncComplete => f.write_str("sync-complete"),
            TelemetryEventKind::SelfTestStarted => f.write_str("self-test-started"),
            TelemetryEventKind::SelfTestComplete => f.write_str("self-test-complete"),
            TelemetryEventKind::IndicatorChanged(active) => {
                write!(f, "indicator {}", if *active { "on" } else { "off" })
            }
            TelemetryEventKind::CommandAccepted => f.write_str("command-accepted"),
            TelemetryEventKind::CommandRejected(error) => write!(f, "command-rejected ({error})"),
            TelemetryEventKind::ConnectionOpened => f.write_str("connection-opened"),
            TelemetryEventKind::ConnectionClosed => f.write_str("connection-closed"),
            TelemetryEventKind::ResponseSent => f.write_str("response-sent"),
            TelemetryEventKind::ResponseSuppressed(reason) => {
                write!(f, "response-suppressed ({reason})")
            }
        }
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    /// No additional metadata accompanies the event.
    None,
    /// Details describing a line transition.
    Line(LineTelemetry),
    /// Press count and target of a job or climb.
    Job(JobTelemetry),
    /// Volume recorded at completion or requested by a resync.
    Volume(Volume),
    /// Connection the event concerns.
    Connection(ConnectionId),
}

impl fmt::Display for TelemetryPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryPayload::None => Ok(()),
            TelemetryPayload::Line(details) => match details.elapsed_since_previous {
                Some(elapsed) => write!(f, "{} +{}ms", details.action, elapsed.as_millis()),
                None => write!(f, "{}", details.action),
            },
            TelemetryPayload::Job(details) => {
                write!(f, "presses={} target={}", details.presses, details.target)
            }
            TelemetryPayload::Volume(volume) => write!(f, "volume={volume}"),
            TelemetryPayload::Connection(connection) => write!(f, "{connection}"),
        }
    }
}

/// Line transition payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LineTelemetry {
    pub line: PressLine,
    pub action: LineAction,
    pub elapsed_since_previous: Option<Duration>,
}

/// Press job payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct JobTelemetry {
    pub presses: u8,
    pub target: Volume,
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

impl<TInstant: Copy> fmt::Display for TelemetryRecord<TInstant> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.details {
            TelemetryPayload::None => write!(f, "[{}] {}", self.id, self.event),
            details => write!(f, "[{}] {} {details}", self.id, self.event),
        }
    }
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    last_transition_at: Option<TInstant>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            last_transition_at: None,
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    /// Returns retained records with an id at or after `cursor`, oldest first.
    ///
    /// Callers keep [`Self::next_event_id`] as their cursor between drains.
    /// Records that fell out of the ring before a drain are skipped.
    pub fn since(&self, cursor: EventId) -> impl Iterator<Item = &TelemetryRecord<TInstant>> {
        self.oldest_first().filter(move |record| record.id >= cursor)
    }

    /// Id the next recorded event will receive.
    #[must_use]
    pub const fn next_event_id(&self) -> EventId {
        self.next_event_id
    }

    /// Returns the most recent telemetry record, if available.
    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    /// Returns the number of records currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` when no telemetry records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }

    /// Records a line transition and captures elapsed time since the previous transition.
    pub fn record_line_transition(
        &mut self,
        line: PressLine,
        action: LineAction,
        timestamp: TInstant,
    ) -> EventId {
        let elapsed = self
            .last_transition_at
            .map(|previous| timestamp.saturating_duration_since(previous));
        self.last_transition_at = Some(timestamp);

        let payload = TelemetryPayload::Line(LineTelemetry {
            line,
            action,
            elapsed_since_previous: elapsed,
        });
        self.record(
            match action {
                LineAction::Assert => TelemetryEventKind::LineAsserted(line),
                LineAction::Release => TelemetryEventKind::LineReleased(line),
            },
            payload,
            timestamp,
        )
    }

    pub fn record_job_started(
        &mut self,
        line: PressLine,
        presses: u8,
        target: Volume,
        timestamp: TInstant,
    ) -> EventId {
        self.record(
            TelemetryEventKind::JobStarted(line),
            TelemetryPayload::Job(JobTelemetry { presses, target }),
            timestamp,
        )
    }

    pub fn record_volume(
        &mut self,
        event: TelemetryEventKind,
        volume: Volume,
        timestamp: TInstant,
    ) -> EventId {
        self.record(event, TelemetryPayload::Volume(volume), timestamp)
    }

    pub fn record_sync_climb(
        &mut self,
        presses: u8,
        target: Volume,
        timestamp: TInstant,
    ) -> EventId {
        self.record(
            TelemetryEventKind::SyncClimb,
            TelemetryPayload::Job(JobTelemetry { presses, target }),
            timestamp,
        )
    }

    pub fn record_connection(
        &mut self,
        event: TelemetryEventKind,
        connection: ConnectionId,
        timestamp: TInstant,
    ) -> EventId {
        self.record(event, TelemetryPayload::Connection(connection), timestamp)
    }

    /// Records the outcome of a reply; unaddressed replies leave no record.
    pub fn record_delivery(&mut self, delivery: Delivery, timestamp: TInstant) -> Option<EventId> {
        match delivery {
            Delivery::Sent(connection) => Some(self.record_connection(
                TelemetryEventKind::ResponseSent,
                connection,
                timestamp,
            )),
            Delivery::Suppressed { connection, reason } => Some(self.record_connection(
                TelemetryEventKind::ResponseSuppressed(reason),
                connection,
                timestamp,
            )),
            Delivery::Unaddressed => None,
        }
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}
