//! Connection registry and response delivery.
//!
//! Transports hand out [`ConnectionId`]s obtained from a [`ConnectionRegistry`]
//! and report traffic through [`LinkEvent`]s. In-flight jobs keep a copy of the
//! requesting handle, never the connection itself. Before a reply is written the
//! handle is checked against the registry, so a connection that went away (or a
//! slot that has since been reused) never receives a stale response.

use core::fmt;

use crate::repl::Response;

/// Live connections tracked at once.
pub const MAX_CONNECTIONS: usize = 8;

/// Generation-checked handle to a transport connection.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ConnectionId {
    slot: u8,
    generation: u16,
}

impl ConnectionId {
    #[must_use]
    pub fn slot(self) -> usize {
        usize::from(self.slot)
    }

    #[must_use]
    pub const fn generation(self) -> u16 {
        self.generation
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}.{}", self.slot, self.generation)
    }
}

/// Traffic reported by a transport.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent<'a> {
    /// One command line arrived on `connection`.
    DataReceived {
        connection: ConnectionId,
        bytes: &'a [u8],
    },
    Disconnected {
        connection: ConnectionId,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LinkError {
    RegistryFull,
    UnknownConnection,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::RegistryFull => f.write_str("connection registry full"),
            LinkError::UnknownConnection => f.write_str("unknown connection"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeliveryError {
    /// Handle is no longer registered.
    Closed,
    /// Transport reports the connection cannot take writes.
    NotWritable,
    /// Transport accepted the handle but the write failed.
    Transport,
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Closed => f.write_str("connection closed"),
            DeliveryError::NotWritable => f.write_str("connection not writable"),
            DeliveryError::Transport => f.write_str("transport write failed"),
        }
    }
}

#[derive(Copy, Clone, Debug, Default)]
struct Slot {
    generation: u16,
    open: bool,
}

/// Fixed-capacity table of live connection handles.
#[derive(Clone, Debug)]
pub struct ConnectionRegistry<const N: usize = MAX_CONNECTIONS> {
    slots: [Slot; N],
}

impl<const N: usize> ConnectionRegistry<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [Slot {
                generation: 0,
                open: false,
            }; N],
        }
    }

    /// Claims a free slot and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::RegistryFull`] when every slot is in use.
    pub fn open(&mut self) -> Result<ConnectionId, LinkError> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| !slot.open)
            .ok_or(LinkError::RegistryFull)?;
        let slot_index = u8::try_from(index).map_err(|_| LinkError::RegistryFull)?;

        slot.open = true;
        Ok(ConnectionId {
            slot: slot_index,
            generation: slot.generation,
        })
    }

    /// Retires `connection`; the slot's next handle gets a fresh generation.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::UnknownConnection`] for stale or already closed handles.
    pub fn close(&mut self, connection: ConnectionId) -> Result<(), LinkError> {
        let slot = self
            .slots
            .get_mut(connection.slot())
            .filter(|slot| slot.open && slot.generation == connection.generation)
            .ok_or(LinkError::UnknownConnection)?;

        slot.open = false;
        slot.generation = slot.generation.wrapping_add(1);
        Ok(())
    }

    #[must_use]
    pub fn is_open(&self, connection: ConnectionId) -> bool {
        self.slots
            .get(connection.slot())
            .is_some_and(|slot| slot.open && slot.generation == connection.generation)
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.open).count()
    }
}

impl<const N: usize> Default for ConnectionRegistry<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport side of response delivery.
pub trait ResponseSink {
    /// Reports whether `connection` can take a write right now.
    fn is_writable(&self, connection: ConnectionId) -> bool;

    /// Writes one newline-terminated response line.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] when the transport cannot complete the write.
    fn send_line(&mut self, connection: ConnectionId, line: &str) -> Result<(), DeliveryError>;
}

/// Sink for work that has no clients attached, such as the boot resync.
#[derive(Copy, Clone, Debug, Default)]
pub struct DetachedSink;

impl ResponseSink for DetachedSink {
    fn is_writable(&self, _connection: ConnectionId) -> bool {
        false
    }

    fn send_line(&mut self, _connection: ConnectionId, _line: &str) -> Result<(), DeliveryError> {
        Err(DeliveryError::NotWritable)
    }
}

/// Result of attempting to deliver one response.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    Sent(ConnectionId),
    /// The work had no respondent attached.
    Unaddressed,
    Suppressed {
        connection: ConnectionId,
        reason: DeliveryError,
    },
}

/// Sends `response` to `respondent` if the handle is still live and writable.
pub fn deliver<S, const N: usize>(
    registry: &ConnectionRegistry<N>,
    sink: &mut S,
    respondent: Option<ConnectionId>,
    response: &Response,
) -> Delivery
where
    S: ResponseSink + ?Sized,
{
    let Some(connection) = respondent else {
        return Delivery::Unaddressed;
    };

    if !registry.is_open(connection) {
        return Delivery::Suppressed {
            connection,
            reason: DeliveryError::Closed,
        };
    }

    if !sink.is_writable(connection) {
        return Delivery::Suppressed {
            connection,
            reason: DeliveryError::NotWritable,
        };
    }

    match sink.send_line(connection, response.to_line().as_str()) {
        Ok(()) => Delivery::Sent(connection),
        Err(reason) => Delivery::Suppressed { connection, reason },
    }
}
