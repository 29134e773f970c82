mod clock;
mod lines;
mod server;
mod transcript;

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use volume_core::ControllerSettings;
use volume_core::repl::NumericPolicy;

use server::{DEFAULT_PORT, Server, ServerConfig};

/// Serves the volume presser protocol over TCP against simulated lines.
#[derive(Debug, Parser)]
#[command(name = "volume-emulator", version, about)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "VOLUME_LISTEN", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    listen: IpAddr,

    /// TCP port to listen on
    #[arg(long, env = "VOLUME_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Reject SET levels that are not a bare signed integer
    #[arg(long)]
    strict_set: bool,

    /// Start at volume 0 without the boot resync
    #[arg(long)]
    skip_boot_sync: bool,

    /// Pause between the down sweep and the up climb of a resync
    #[arg(long, default_value_t = 0)]
    sync_settle_ms: u64,

    /// Control loop poll interval
    #[arg(long, default_value_t = 5)]
    poll_interval_ms: u64,

    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Record client traffic to this file, replacing any previous contents
    #[arg(long)]
    transcript: Option<PathBuf>,
}

impl Cli {
    fn server_config(self) -> ServerConfig {
        let numeric_policy = if self.strict_set {
            NumericPolicy::Strict
        } else {
            NumericPolicy::Permissive
        };

        ServerConfig {
            listen: SocketAddr::new(self.listen, self.port),
            settings: ControllerSettings {
                numeric_policy,
                sync_settle: Duration::from_millis(self.sync_settle_ms),
            },
            boot_sync: !self.skip_boot_sync,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            transcript: self.transcript,
        }
    }
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Raises `flag` once `signal` resolves. A failed signal leaves it lowered.
fn raise_on<F>(flag: &AtomicBool, signal: F) -> io::Result<()>
where
    F: Future<Output = io::Result<()>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(signal)?;
    flag.store(true, Ordering::Relaxed);
    Ok(())
}

fn watch_for_interrupt(flag: &'static AtomicBool) -> Result<()> {
    thread::Builder::new()
        .name("interrupt".into())
        .spawn(move || match raise_on(flag, tokio::signal::ctrl_c()) {
            Ok(()) => info!("interrupt received"),
            Err(error) => warn!(%error, "interrupt handler unavailable"),
        })
        .context("failed to spawn interrupt watcher")?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut server = Server::start(cli.server_config()).context("failed to start emulator")?;
    watch_for_interrupt(&SHUTDOWN)?;
    server.run(&SHUTDOWN).context("control loop failed")
}
