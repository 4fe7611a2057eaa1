//! Connection state machine.
//!
//! A connection has no record of its own: the single operation in flight for
//! it carries its socket. When that operation completes, the state machine
//! looks at (operation, result, elapsed time) and decides what to submit
//! next:
//!
//! ```text
//! Accept ──► Receive(trigger) ──► Receive(buffer) ──► TimedWait ──► Send
//!                 ▲                     │                           │
//!                 │                     └─► disconnect (result <= 0)│
//!                 └─────────────────────────────────────────────────┘
//! ```
//!
//! The machine never touches the ring. It emits [`Submission`]s and reports a
//! [`Disposition`] telling the event loop what to do with the completed
//! operation's record.

use crate::runtime::buffer::{message_bytes, BufferPool, RECV_BUFFER_SIZE};
use crate::runtime::token::{OpType, PendingOp};
use crate::sink::MessageSink;
use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Acknowledgment sent after the delay.
pub const ACK_PAYLOAD: &[u8] = b"ACCEPTED";

/// A request the event loop must hand to the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Accept on the listening socket.
    Accept,
    /// Wait for the connection to become readable, without a buffer.
    TriggerReceive { fd: RawFd },
    /// Receive into a pool buffer.
    Receive { fd: RawFd, buf_idx: usize },
    /// One-shot timer before the acknowledgment.
    TimedWait { fd: RawFd, delay: Duration },
    /// Send the acknowledgment.
    Send { fd: RawFd },
}

/// What the event loop does with a completed operation's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Completion consumed; free the record.
    Consumed,
    /// Timer completed before the delay elapsed. Keep the record and re-arm
    /// it for the remaining time.
    Deferred(Duration),
    /// Terminal state: free the record, shut down and close the socket.
    Disconnect,
}

/// Failures that end the event loop.
#[derive(Debug)]
pub enum MachineError {
    /// Accept on the listener failed.
    Accept(io::Error),
}

impl fmt::Display for MachineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineError::Accept(e) => write!(f, "accept failed: {e}"),
        }
    }
}

impl std::error::Error for MachineError {}

/// Running totals, mostly for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub accepted: u64,
    pub messages: u64,
    pub acks: u64,
    pub disconnects: u64,
    /// Receive buffers currently owned by in-flight operations.
    pub buffers_in_use: usize,
}

/// Decides the next operation for every completion.
///
/// Owns the receive buffer pool and the message sink, since both are only
/// touched while dispatching a completion.
pub struct ConnectionMachine<S> {
    buffers: BufferPool,
    sink: S,
    ack_delay: Duration,
    eager_receive: bool,
    stats: Stats,
}

impl<S: MessageSink> ConnectionMachine<S> {
    /// # Arguments
    /// * `max_connections` - Number of receive buffers in the pool
    /// * `ack_delay` - Minimum time between logging and acknowledging
    /// * `eager_receive` - Skip the readiness trigger and allocate on accept
    pub fn new(sink: S, max_connections: usize, ack_delay: Duration, eager_receive: bool) -> Self {
        Self {
            buffers: BufferPool::new(max_connections, RECV_BUFFER_SIZE),
            sink,
            ack_delay,
            eager_receive,
            stats: Stats::default(),
        }
    }

    pub fn buffers(&self) -> &BufferPool {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut BufferPool {
        &mut self.buffers
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn stats(&self) -> Stats {
        Stats {
            buffers_in_use: self.buffers.capacity() - self.buffers.available(),
            ..self.stats
        }
    }

    /// Dispatch one completion.
    ///
    /// Submissions to make are appended to `next`. A `Tick` is not a
    /// connection operation and is always reported as consumed.
    pub fn on_completion(
        &mut self,
        op: &mut PendingOp,
        result: i32,
        now: Instant,
        next: &mut Vec<Submission>,
    ) -> Result<Disposition, MachineError> {
        match op.op {
            OpType::Accept => self.on_accept(result, next),
            OpType::Receive { buf_idx: None } => Ok(self.on_trigger(op.fd, result, next)),
            OpType::Receive {
                buf_idx: Some(buf_idx),
            } => {
                // The buffer leaves the operation here whatever happens next
                op.op = OpType::Receive { buf_idx: None };
                Ok(self.on_receive(op.fd, buf_idx, result, next))
            }
            OpType::TimedWait => Ok(self.on_timed_wait(op, result, now, next)),
            OpType::Send => Ok(self.on_send(op.fd, result, next)),
            OpType::Tick => Ok(Disposition::Consumed),
        }
    }

    /// Return the buffer held by an operation that will never complete
    /// through the machine, e.g. on shutdown.
    pub fn release(&mut self, op: &PendingOp) {
        if let OpType::Receive {
            buf_idx: Some(buf_idx),
        } = op.op
        {
            self.buffers.free(buf_idx);
        }
    }

    fn on_accept(
        &mut self,
        result: i32,
        next: &mut Vec<Submission>,
    ) -> Result<Disposition, MachineError> {
        if result < 0 {
            return Err(MachineError::Accept(io::Error::from_raw_os_error(-result)));
        }

        // Re-arm first so exactly one accept is always outstanding
        next.push(Submission::Accept);

        let fd = result;
        self.stats.accepted += 1;
        info!(fd, "Accepted connection");

        // Without a free buffer, fall back to the readiness trigger, which
        // retries the allocation once the client has sent something
        match self.eager_receive.then(|| self.buffers.alloc()).flatten() {
            Some(buf_idx) => next.push(Submission::Receive { fd, buf_idx }),
            None => next.push(Submission::TriggerReceive { fd }),
        }

        Ok(Disposition::Consumed)
    }

    fn on_trigger(&mut self, fd: RawFd, result: i32, next: &mut Vec<Submission>) -> Disposition {
        if result < 0 {
            let err = io::Error::from_raw_os_error(-result);
            debug!(fd, "Readiness wait failed: {}", err);
            return self.disconnect(fd);
        }

        match self.buffers.alloc() {
            Some(buf_idx) => {
                trace!(fd, buf_idx, "Socket readable, receiving");
                next.push(Submission::Receive { fd, buf_idx });
                Disposition::Consumed
            }
            None => {
                warn!(fd, "No receive buffer available, dropping connection");
                self.disconnect(fd)
            }
        }
    }

    fn on_receive(
        &mut self,
        fd: RawFd,
        buf_idx: usize,
        result: i32,
        next: &mut Vec<Submission>,
    ) -> Disposition {
        if result <= 0 {
            if result < 0 {
                let err = io::Error::from_raw_os_error(-result);
                debug!(fd, "Receive error: {}", err);
            } else {
                debug!(fd, "Connection closed by peer");
            }
            self.buffers.free(buf_idx);
            return self.disconnect(fd);
        }

        let message = message_bytes(self.buffers.get(buf_idx), result as usize);
        debug!(
            fd,
            len = message.len(),
            message = %String::from_utf8_lossy(message),
            "Received message"
        );

        let logged = self.sink.record(message);
        self.buffers.free(buf_idx);

        if let Err(e) = logged {
            error!(fd, error = %e, "Failed to log message, dropping connection");
            return self.disconnect(fd);
        }

        self.stats.messages += 1;
        next.push(Submission::TimedWait {
            fd,
            delay: self.ack_delay,
        });
        Disposition::Consumed
    }

    fn on_timed_wait(
        &mut self,
        op: &PendingOp,
        result: i32,
        now: Instant,
        next: &mut Vec<Submission>,
    ) -> Disposition {
        // A fired timeout reports -ETIME; anything else is only logged, the
        // elapsed time decides
        if result < 0 && result != -libc::ETIME {
            let err = io::Error::from_raw_os_error(-result);
            debug!(fd = op.fd, "Timer completed with error: {}", err);
        }

        let elapsed = now.saturating_duration_since(op.submitted_at);
        if elapsed < self.ack_delay {
            let remaining = self.ack_delay - elapsed;
            trace!(fd = op.fd, ?remaining, "Timer completed early, re-arming");
            return Disposition::Deferred(remaining);
        }

        next.push(Submission::Send { fd: op.fd });
        Disposition::Consumed
    }

    fn on_send(&mut self, fd: RawFd, result: i32, next: &mut Vec<Submission>) -> Disposition {
        if result < 0 {
            let err = io::Error::from_raw_os_error(-result);
            debug!(fd, "Send error: {}", err);
        } else if (result as usize) < ACK_PAYLOAD.len() {
            debug!(fd, sent = result, "Short acknowledgment send");
        } else {
            self.stats.acks += 1;
            info!(fd, "Sent acknowledgment");
        }

        next.push(Submission::TriggerReceive { fd });
        Disposition::Consumed
    }

    fn disconnect(&mut self, fd: RawFd) -> Disposition {
        self.stats.disconnects += 1;
        info!(fd, "Client disconnected");
        Disposition::Disconnect
    }
}
