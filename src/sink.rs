//! Append-only message log.
//!
//! Every received message is recorded as one line. The file is truncated
//! when the server starts and only ever appended to afterwards.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Write-only destination for received messages.
pub trait MessageSink {
    /// Record one message. The sink adds the trailing newline.
    fn record(&mut self, message: &[u8]) -> io::Result<()>;
}

/// File-backed message log addressed by path.
///
/// The file is reopened in append mode for every record, so nothing is held
/// open between messages. Records reach the page cache; there is no fsync.
#[derive(Debug, Clone)]
pub struct MessageLog {
    path: PathBuf,
}

impl MessageLog {
    /// Create (or truncate) the log file at `path`.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        File::create(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MessageSink for MessageLog {
    fn record(&mut self, message: &[u8]) -> io::Result<()> {
        let mut record = Vec::with_capacity(message.len() + 1);
        record.extend_from_slice(message);
        record.push(b'\n');

        // Single write so concurrent appenders never interleave within a line
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;
        file.write_all(&record)
    }
}

/// In-memory sink, one entry per message (without the newline).
impl MessageSink for Vec<Vec<u8>> {
    fn record(&mut self, message: &[u8]) -> io::Result<()> {
        self.push(message.to_vec());
        Ok(())
    }
}
