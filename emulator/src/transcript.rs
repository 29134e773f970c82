//! Optional on-disk transcript of client traffic.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use volume_core::link::ConnectionId;

#[derive(Copy, Clone, Debug)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn prefix(self) -> &'static str {
        match self {
            Direction::Inbound => ">",
            Direction::Outbound => "<",
        }
    }
}

pub struct Transcript {
    writer: BufWriter<File>,
    started_at: Instant,
}

impl Transcript {
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut transcript = Self {
            writer: BufWriter::new(file),
            started_at: Instant::now(),
        };
        writeln!(transcript.writer, "# volume-emulator transcript")?;
        writeln!(
            transcript.writer,
            "# Timestamps are milliseconds since the listener started"
        )?;
        transcript.writer.flush()?;
        Ok(transcript)
    }

    pub fn append(
        &mut self,
        connection: ConnectionId,
        direction: Direction,
        text: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>7} ms] {connection} {} {}",
            self.started_at.elapsed().as_millis(),
            direction.prefix(),
            text.trim_end()
        )?;
        self.writer.flush()
    }
}
