//! ackd: logs every message a client sends and acknowledges it after a delay.
//!
//! The server is a single-threaded io_uring event loop. Each connection
//! cycles through receive, log, timed wait and send until the client goes
//! away. Messages are appended, one per line, to a log file named after the
//! listening port.

pub mod config;
pub mod runtime;
pub mod sink;
