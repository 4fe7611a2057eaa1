//! Completion-driven server runtime.
//!
//! Platform-independent pieces live here:
//! - `BufferPool`: Receive buffer management
//! - `ConnectionMachine`: Per-connection state machine
//! - `TokenAllocator`: Operation tracking for completion correlation
//!
//! The event loop itself needs io_uring and is only built on Linux.

mod buffer;
mod connection;
mod listener;
mod shutdown;
mod token;

pub use buffer::{BufferPool, MAX_MESSAGE_LEN, RECV_BUFFER_SIZE};
pub use connection::{
    ConnectionMachine, Disposition, MachineError, Stats, Submission, ACK_PAYLOAD,
};
pub use shutdown::Shutdown;
pub use token::{OpType, PendingOp, TokenAllocator};

#[cfg(target_os = "linux")]
mod uring;

#[cfg(target_os = "linux")]
pub use uring::Server;

use crate::config::Config;
use std::fmt;
use std::io;
use std::path::PathBuf;

/// Errors that stop the server.
#[derive(Debug)]
pub enum ServerError {
    /// Creating, binding or listening on the socket failed.
    Bind(String, io::Error),
    /// The message log could not be created.
    Sink(PathBuf, io::Error),
    /// The io_uring instance could not be created.
    Ring(io::Error),
    /// Fatal state machine error, e.g. accept failure on the listener.
    Machine(MachineError),
    /// Ring submission or wait failed.
    Io(io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Bind(addr, e) => write!(f, "Failed to listen on {addr}: {e}"),
            ServerError::Sink(path, e) => {
                write!(f, "Failed to create message log '{}': {}", path.display(), e)
            }
            ServerError::Ring(e) => write!(f, "Failed to set up io_uring: {e}"),
            ServerError::Machine(e) => write!(f, "{e}"),
            ServerError::Io(e) => write!(f, "Event loop I/O error: {e}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Bind(_, e) | ServerError::Sink(_, e) => Some(e),
            ServerError::Ring(e) | ServerError::Io(e) => Some(e),
            ServerError::Machine(e) => Some(e),
        }
    }
}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        ServerError::Io(e)
    }
}

/// Bind according to `config` and run the event loop until shutdown.
pub fn run(config: &Config, shutdown: Shutdown) -> Result<Stats, ServerError> {
    #[cfg(target_os = "linux")]
    {
        Server::bind(config)?.run(shutdown)
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = (config, shutdown); // suppress unused warnings
        Err(ServerError::Ring(io::Error::new(
            io::ErrorKind::Unsupported,
            "Unsupported platform: io_uring requires Linux",
        )))
    }
}
