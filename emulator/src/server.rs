//! TCP transport and control loop.
//!
//! A single thread polls a non-blocking listener, drains whatever each client
//! sent since the last pass, ticks the controller and forwards new telemetry
//! to `tracing`. Everything drained from one client in one pass is one
//! command, however many reads the kernel hands it out in.

use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};
use volume_core::link::{ConnectionId, DeliveryError, LinkEvent, ResponseSink};
use volume_core::presses::PressLine;
use volume_core::telemetry::{EventId, TelemetryRecord};
use volume_core::{ControllerSettings, VolumeController};

use crate::clock::HostInstant;
use crate::lines::SimulatedLines;
use crate::transcript::{Direction, Transcript};

pub const DEFAULT_PORT: u16 = 42069;

const READ_BUFFER_LEN: usize = 256;

/// Bytes kept per client per pass. The rest of an oversized chunk is dropped.
const MAX_CHUNK_LEN: usize = 4096;

type Controller = VolumeController<SimulatedLines, HostInstant>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to configure listener")]
    Configure(#[source] io::Error),
    #[error("failed to accept connection")]
    Accept(#[source] io::Error),
    #[error("failed to open transcript {}", path.display())]
    Transcript {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub settings: ControllerSettings,
    pub boot_sync: bool,
    pub poll_interval: Duration,
    pub transcript: Option<PathBuf>,
}

struct Client {
    stream: TcpStream,
    peer: SocketAddr,
}

/// Open client sockets keyed by their controller handle.
#[derive(Default)]
struct ClientTable {
    clients: HashMap<ConnectionId, Client>,
    transcript: Option<Transcript>,
}

impl ClientTable {
    fn record(&mut self, connection: ConnectionId, direction: Direction, text: &str) {
        let Some(transcript) = self.transcript.as_mut() else {
            return;
        };
        if let Err(error) = transcript.append(connection, direction, text) {
            warn!(%error, "transcript write failed, disabling transcript");
            self.transcript = None;
        }
    }
}

impl ResponseSink for ClientTable {
    fn is_writable(&self, connection: ConnectionId) -> bool {
        self.clients.contains_key(&connection)
    }

    fn send_line(&mut self, connection: ConnectionId, line: &str) -> Result<(), DeliveryError> {
        let client = self
            .clients
            .get_mut(&connection)
            .ok_or(DeliveryError::Closed)?;

        match client.stream.write_all(line.as_bytes()) {
            Ok(()) => {
                self.record(connection, Direction::Outbound, line);
                Ok(())
            }
            Err(error) if error.kind() == ErrorKind::WouldBlock => Err(DeliveryError::NotWritable),
            Err(error) => {
                debug!(%connection, %error, "write failed");
                Err(DeliveryError::Transport)
            }
        }
    }
}

pub struct Server {
    listener: TcpListener,
    controller: Controller,
    clients: ClientTable,
    telemetry_cursor: EventId,
    poll_interval: Duration,
}

impl Server {
    /// Runs the boot resync (unless disabled), then binds the listener.
    pub fn start(config: ServerConfig) -> Result<Self, TransportError> {
        let mut controller = Controller::with_settings(SimulatedLines::default(), config.settings);

        if config.boot_sync {
            info!("boot resync to default volume");
            let volume = controller.boot_sync(HostInstant::now, thread::sleep);
            info!(%volume, "boot resync complete");
        } else {
            warn!("boot resync skipped, mirrored volume starts at 0");
        }

        let transcript = match config.transcript {
            Some(path) => Some(
                Transcript::create(&path)
                    .map_err(|source| TransportError::Transcript { path, source })?,
            ),
            None => None,
        };

        let listener = TcpListener::bind(config.listen).map_err(|source| TransportError::Bind {
            addr: config.listen,
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(TransportError::Configure)?;

        let mut server = Self {
            listener,
            controller,
            clients: ClientTable {
                clients: HashMap::new(),
                transcript,
            },
            telemetry_cursor: 0,
            poll_interval: config.poll_interval,
        };
        server.drain_telemetry();

        let addr = server.local_addr().map_err(TransportError::Configure)?;
        info!(%addr, "listening");
        Ok(server)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Polls until `shutdown` is raised.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<(), TransportError> {
        while !shutdown.load(Ordering::Relaxed) {
            self.poll_once()?;
            thread::sleep(self.poll_interval);
        }

        let lines = self.controller.driver();
        for line in [PressLine::Down, PressLine::Up] {
            if lines.is_asserted(line) {
                warn!(%line, "line still asserted at shutdown");
            }
        }
        info!(
            volume = %self.controller.volume(),
            down_presses = lines.presses(PressLine::Down),
            up_presses = lines.presses(PressLine::Up),
            syncing = lines.indicator(),
            "shutting down"
        );
        Ok(())
    }

    pub fn poll_once(&mut self) -> Result<(), TransportError> {
        self.accept_pending()?;
        self.read_clients();
        self.controller.tick(HostInstant::now(), &mut self.clients);
        self.drain_telemetry();
        Ok(())
    }

    fn accept_pending(&mut self) -> Result<(), TransportError> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(error) if error.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(error)
                    if matches!(
                        error.kind(),
                        ErrorKind::Interrupted | ErrorKind::ConnectionAborted
                    ) =>
                {
                    debug!(%error, "accept interrupted");
                }
                Err(error) => return Err(TransportError::Accept(error)),
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(error) = stream.set_nonblocking(true) {
            warn!(%peer, %error, "dropping client");
            return;
        }
        if let Err(error) = stream.set_nodelay(true) {
            debug!(%peer, %error, "nodelay unavailable");
        }

        match self.controller.connect(HostInstant::now()) {
            Ok(connection) => {
                info!(%peer, %connection, "client connected");
                self.clients
                    .clients
                    .insert(connection, Client { stream, peer });
            }
            Err(error) => {
                warn!(%peer, %error, "refusing client");
                if let Err(error) = stream.shutdown(Shutdown::Both) {
                    debug!(%peer, %error, "shutdown failed");
                }
            }
        }
    }

    fn read_clients(&mut self) {
        let connections: Vec<ConnectionId> = self.clients.clients.keys().copied().collect();
        let mut chunk = Vec::with_capacity(READ_BUFFER_LEN);

        for connection in connections {
            let Some(client) = self.clients.clients.get_mut(&connection) else {
                continue;
            };
            chunk.clear();
            let state = drain_socket(&mut client.stream, &mut chunk);

            if !chunk.is_empty() {
                self.submit(connection, &chunk);
            }
            match state {
                SocketState::Open => {}
                SocketState::Closed => self.drop_client(connection, "peer closed"),
                SocketState::Failed(error) => {
                    debug!(%connection, %error, "read failed");
                    self.drop_client(connection, "read failed");
                }
            }
        }
    }

    fn submit(&mut self, connection: ConnectionId, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        debug!(%connection, command = %text.trim(), "received");
        self.clients.record(connection, Direction::Inbound, &text);

        let event = LinkEvent::DataReceived { connection, bytes };
        if let Err(error) = self
            .controller
            .handle_event(event, HostInstant::now(), &mut self.clients)
        {
            warn!(%connection, %error, "dropped command");
        }
    }

    fn drop_client(&mut self, connection: ConnectionId, reason: &str) {
        if let Some(client) = self.clients.clients.remove(&connection) {
            info!(peer = %client.peer, %connection, reason, "client disconnected");
        }

        let event = LinkEvent::Disconnected { connection };
        if let Err(error) = self
            .controller
            .handle_event(event, HostInstant::now(), &mut self.clients)
        {
            warn!(%connection, %error, "disconnect for unknown connection");
        }
    }

    fn drain_telemetry(&mut self) {
        let telemetry = self.controller.telemetry();
        let mut expected = self.telemetry_cursor;
        for record in telemetry.since(self.telemetry_cursor) {
            if record.id != expected {
                debug!(
                    dropped = record.id.wrapping_sub(expected),
                    "telemetry ring overflowed"
                );
            }
            log_record(record);
            expected = record.id.wrapping_add(1);
        }
        self.telemetry_cursor = telemetry.next_event_id();
    }
}

enum SocketState {
    Open,
    Closed,
    Failed(io::Error),
}

/// Reads until the socket would block, keeping at most [`MAX_CHUNK_LEN`] bytes.
fn drain_socket(stream: &mut TcpStream, chunk: &mut Vec<u8>) -> SocketState {
    let mut buffer = [0_u8; READ_BUFFER_LEN];
    loop {
        match stream.read(&mut buffer) {
            Ok(0) => return SocketState::Closed,
            Ok(read) => {
                let room = MAX_CHUNK_LEN.saturating_sub(chunk.len());
                chunk.extend_from_slice(&buffer[..read.min(room)]);
            }
            Err(error) if error.kind() == ErrorKind::WouldBlock => return SocketState::Open,
            Err(error) if error.kind() == ErrorKind::Interrupted => {}
            Err(error) => return SocketState::Failed(error),
        }
    }
}

fn log_record(record: &TelemetryRecord<HostInstant>) {
    if record.event.is_warning() {
        warn!("{record}");
    } else if record.event.is_line_level() {
        debug!("{record}");
    } else {
        info!("{record}");
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader};
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::thread::JoinHandle;

    use super::*;

    struct Running {
        addr: SocketAddr,
        shutdown: Arc<AtomicBool>,
        handle: Option<JoinHandle<()>>,
    }

    impl Running {
        fn spawn() -> Self {
            let config = ServerConfig {
                listen: (Ipv4Addr::LOCALHOST, 0).into(),
                settings: ControllerSettings::default(),
                boot_sync: false,
                poll_interval: Duration::from_millis(1),
                transcript: None,
            };
            let mut server = Server::start(config).expect("server binds");
            let addr = server.local_addr().expect("bound address");
            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&shutdown);
            let handle = thread::spawn(move || server.run(&flag).expect("control loop"));

            Self {
                addr,
                shutdown,
                handle: Some(handle),
            }
        }
    }

    impl Drop for Running {
        fn drop(&mut self) {
            self.shutdown.store(true, Ordering::Relaxed);
            if let Some(handle) = self.handle.take() {
                handle.join().expect("server thread");
            }
        }
    }

    struct TestClient {
        reader: BufReader<TcpStream>,
        writer: TcpStream,
    }

    impl TestClient {
        fn connect(addr: SocketAddr) -> Self {
            let stream = TcpStream::connect(addr).expect("connect");
            stream.set_nodelay(true).unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            Self {
                reader: BufReader::new(stream.try_clone().unwrap()),
                writer: stream,
            }
        }

        /// Sends one command and gives the server time to read it on its own.
        fn send(&mut self, command: &str) {
            self.writer.write_all(command.as_bytes()).unwrap();
            thread::sleep(Duration::from_millis(30));
        }

        fn read_line(&mut self) -> String {
            let mut line = String::new();
            self.reader.read_line(&mut line).expect("response line");
            line
        }
    }

    #[test]
    fn answers_get_over_tcp() {
        let server = Running::spawn();
        let mut client = TestClient::connect(server.addr);

        client.send("GET");

        assert_eq!(client.read_line(), "OK volume=0\n");
    }

    #[test]
    fn overlapping_command_is_busy_and_first_completes() {
        let server = Running::spawn();
        let mut client = TestClient::connect(server.addr);

        client.send("UP");
        client.send("DOWN");

        assert_eq!(client.read_line(), "ERR busy\n");
        assert_eq!(client.read_line(), "OK volume=1\n");
    }

    #[test]
    fn unknown_command_is_reported() {
        let server = Running::spawn();
        let mut client = TestClient::connect(server.addr);

        client.send("HELLO\r\n");

        assert_eq!(client.read_line(), "ERR unknown command\n");
    }

    #[test]
    fn chunk_longer_than_one_read_is_one_command() {
        let server = Running::spawn();
        let mut client = TestClient::connect(server.addr);

        client.send(&"X".repeat(READ_BUFFER_LEN + 44));
        client.send("GET");

        assert_eq!(client.read_line(), "ERR unknown command\n");
        // A split chunk would have queued a second error ahead of this.
        assert_eq!(client.read_line(), "OK volume=0\n");
    }

    #[test]
    fn run_returns_once_shutdown_is_raised() {
        let config = ServerConfig {
            listen: (Ipv4Addr::LOCALHOST, 0).into(),
            settings: ControllerSettings::default(),
            boot_sync: false,
            poll_interval: Duration::from_millis(1),
            transcript: None,
        };
        let mut server = Server::start(config).expect("server binds");
        let shutdown = AtomicBool::new(true);

        server.run(&shutdown).expect("clean shutdown");

        assert_eq!(server.controller.volume().get(), 0);
    }

    #[test]
    fn job_survives_requester_disconnect() {
        let server = Running::spawn();
        let mut requester = TestClient::connect(server.addr);
        requester.send("UP");
        drop(requester);

        thread::sleep(Duration::from_millis(400));
        let mut observer = TestClient::connect(server.addr);
        observer.send("GET");

        assert_eq!(observer.read_line(), "OK volume=1\n");
    }
}
