//! USB CDC link plumbing shared by the USB and control tasks.
//!
//! The USB task turns raw CDC packets into [`HostMessage`]s; the control task
//! routes them into the controller and answers through [`UsbSink`]. Only one
//! host can hold the CDC port, so at most one connection handle is live.

#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender, TrySendError};
use heapless::Vec;
use volume_core::VolumeController;
use volume_core::link::{ConnectionId, DeliveryError, LinkError, LinkEvent, ResponseSink};
use volume_core::repl::ResponseLine;
use volume_core::scheduler::LineDriver;

use crate::clock::FirmwareInstant;

/// Maximum number of bytes accepted on a single command line (excluding terminator).
pub const MAX_LINE_LEN: usize = 64;

/// Depth of the host-to-controller message queue.
pub const HOST_QUEUE_DEPTH: usize = 4;

/// Depth of the controller-to-host response queue.
pub const RESPONSE_QUEUE_DEPTH: usize = 4;

#[cfg(target_os = "none")]
type LinkMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
type LinkMutex = NoopRawMutex;

/// One complete command line, terminator stripped.
pub type CommandFrame = Vec<u8, MAX_LINE_LEN>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostMessage {
    /// Host raised DTR.
    Attached,
    Command(CommandFrame),
    /// Host dropped DTR or the endpoint went away.
    Detached,
}

pub type HostQueue = Channel<LinkMutex, HostMessage, HOST_QUEUE_DEPTH>;
pub type HostSender<'a> = Sender<'a, LinkMutex, HostMessage, HOST_QUEUE_DEPTH>;
pub type HostReceiver<'a> = Receiver<'a, LinkMutex, HostMessage, HOST_QUEUE_DEPTH>;

pub type ResponseQueue = Channel<LinkMutex, ResponseLine, RESPONSE_QUEUE_DEPTH>;
pub type ResponseSender<'a> = Sender<'a, LinkMutex, ResponseLine, RESPONSE_QUEUE_DEPTH>;
pub type ResponseReceiver<'a> = Receiver<'a, LinkMutex, ResponseLine, RESPONSE_QUEUE_DEPTH>;

/// Result of feeding a byte into the [`LineAssembler`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Assembled {
    Line(CommandFrame),
    /// The line outgrew [`MAX_LINE_LEN`] and was discarded.
    Overflow,
}

/// Splits the CDC byte stream into command lines on `\r` or `\n`.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buffer: CommandFrame,
    overflowed: bool,
}

impl LineAssembler {
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            overflowed: false,
        }
    }

    /// Drops any partial line.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.overflowed = false;
    }

    pub fn feed(&mut self, byte: u8) -> Option<Assembled> {
        match byte {
            b'\r' | b'\n' if self.overflowed => {
                self.clear();
                Some(Assembled::Overflow)
            }
            b'\r' | b'\n' if self.buffer.is_empty() => None,
            b'\r' | b'\n' => Some(Assembled::Line(core::mem::take(&mut self.buffer))),
            _ if self.overflowed => None,
            value => {
                if self.buffer.push(value).is_err() {
                    self.overflowed = true;
                    self.buffer.clear();
                }
                None
            }
        }
    }
}

/// Queues responses for the single attached USB host.
pub struct UsbSink<'a> {
    sender: ResponseSender<'a>,
    attached: Option<ConnectionId>,
}

impl<'a> UsbSink<'a> {
    pub fn new(sender: ResponseSender<'a>) -> Self {
        Self {
            sender,
            attached: None,
        }
    }

    pub fn attached(&self) -> Option<ConnectionId> {
        self.attached
    }
}

impl ResponseSink for UsbSink<'_> {
    fn is_writable(&self, connection: ConnectionId) -> bool {
        self.attached == Some(connection) && !self.sender.is_full()
    }

    fn send_line(&mut self, connection: ConnectionId, line: &str) -> Result<(), DeliveryError> {
        if self.attached != Some(connection) {
            return Err(DeliveryError::Closed);
        }

        let mut frame = ResponseLine::new();
        frame
            .push_str(line)
            .map_err(|_| DeliveryError::Transport)?;

        match self.sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DeliveryError::NotWritable),
        }
    }
}

/// Applies one host message to the controller.
///
/// A second `Attached` without a `Detached` in between retires the previous
/// handle first, so its respondent is cleared before the new host is admitted.
///
/// # Errors
///
/// Returns [`LinkError`] when the controller rejects the handle.
pub fn route<D, const N: usize>(
    controller: &mut VolumeController<D, FirmwareInstant, N>,
    sink: &mut UsbSink<'_>,
    message: &HostMessage,
    now: FirmwareInstant,
) -> Result<(), LinkError>
where
    D: LineDriver,
{
    match message {
        HostMessage::Attached => {
            if let Some(previous) = sink.attached.take() {
                controller.handle_event(
                    LinkEvent::Disconnected {
                        connection: previous,
                    },
                    now,
                    sink,
                )?;
            }
            sink.attached = Some(controller.connect(now)?);
            Ok(())
        }
        HostMessage::Command(frame) => {
            let connection = sink.attached.ok_or(LinkError::UnknownConnection)?;
            let event = LinkEvent::DataReceived {
                connection,
                bytes: frame.as_slice(),
            };
            controller.handle_event(event, now, sink)
        }
        HostMessage::Detached => match sink.attached.take() {
            Some(connection) => {
                controller.handle_event(LinkEvent::Disconnected { connection }, now, sink)
            }
            None => Ok(()),
        },
    }
}
