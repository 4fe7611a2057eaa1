//! io_uring event loop for Linux.
//!
//! Completion-based model: submit operations to the ring,
//! then process completions in batches on a single thread.

use super::ring::Ring;
use crate::config::Config;
use crate::runtime::buffer::MAX_MESSAGE_LEN;
use crate::runtime::listener::create_listener;
use crate::runtime::{ConnectionMachine, Disposition, OpType, PendingOp};
use crate::runtime::{ServerError, Shutdown, Stats, Submission, TokenAllocator};
use crate::sink::MessageLog;
use std::collections::HashSet;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// A bound server, ready to run its event loop.
pub struct Server {
    // Dropped first: the kernel may still reference the receive buffers
    // owned by `machine` until the ring is torn down.
    ring: Ring,
    tokens: TokenAllocator,
    machine: ConnectionMachine<MessageLog>,
    listener: TcpListener,
    local_addr: SocketAddr,
    batch_size: usize,
    tick_interval: Duration,
}

impl Server {
    /// Create the listener, the message log and the ring.
    ///
    /// The log is named after the bound port unless the config names a file,
    /// and is truncated here.
    pub fn bind(config: &Config) -> Result<Self, ServerError> {
        let addr_str = format!("{}:{}", config.host, config.port);
        let addr: SocketAddr = addr_str.parse().map_err(|e| {
            ServerError::Bind(
                addr_str.clone(),
                std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            )
        })?;

        let listener = create_listener(addr, config.backlog)
            .map_err(|e| ServerError::Bind(addr_str.clone(), e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Bind(addr_str, e))?;

        let log_path = config.log_path(local_addr.port());
        let log = MessageLog::create(&log_path).map_err(|e| ServerError::Sink(log_path, e))?;

        let ring = Ring::new(config.ring_size).map_err(ServerError::Ring)?;

        let machine = ConnectionMachine::new(
            log,
            config.max_connections,
            config.ack_delay,
            config.eager_receive,
        );

        info!(
            addr = %local_addr,
            ring_size = config.ring_size,
            log_file = %machine.sink().path().display(),
            ack_delay_ms = config.ack_delay.as_millis() as u64,
            "Server bound"
        );

        Ok(Self {
            ring,
            tokens: TokenAllocator::new(config.max_connections * 2),
            machine,
            listener,
            local_addr,
            batch_size: config.batch_size.max(1),
            tick_interval: config.tick_interval.max(Duration::from_millis(1)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn log_path(&self) -> &Path {
        self.machine.sink().path()
    }

    /// Run until `shutdown` is requested or a fatal error occurs.
    pub fn run(mut self, shutdown: Shutdown) -> Result<Stats, ServerError> {
        self.submit(Submission::Accept)?;
        self.arm_tick()?;

        let mut completions = Vec::with_capacity(self.batch_size);
        let mut next = Vec::new();

        info!(addr = %self.local_addr, "Event loop started");

        while !shutdown.is_requested() {
            // Flushes everything queued by the previous batch
            self.ring.wait()?;

            completions.clear();
            self.ring.drain(self.batch_size, &mut completions);

            for &(token, result) in &completions {
                self.dispatch(token, result, &mut next)?;
            }
        }

        let stats = self.machine.stats();
        let in_flight = self.tokens.len();
        self.close_all();
        info!(
            in_flight,
            accepted = stats.accepted,
            messages = stats.messages,
            acks = stats.acks,
            "Event loop stopped"
        );
        Ok(stats)
    }

    fn dispatch(
        &mut self,
        token: u64,
        result: i32,
        next: &mut Vec<Submission>,
    ) -> Result<(), ServerError> {
        let now = Instant::now();

        let op = match self.tokens.get_mut(token) {
            Some(op) => op,
            None => {
                warn!("Unknown token in completion: {}", token);
                return Ok(());
            }
        };

        if op.op == OpType::Tick {
            self.tokens.free(token);
            return self.arm_tick();
        }

        let fd = op.fd;
        let disposition = self
            .machine
            .on_completion(op, result, now, next)
            .map_err(|e| {
                error!(error = %e, "Fatal error on listener");
                ServerError::Machine(e)
            })?;

        self.settle(token, fd, disposition)?;

        for submission in next.drain(..) {
            self.submit(submission)?;
        }

        Ok(())
    }

    /// Apply the machine's verdict to the token that just completed.
    fn settle(
        &mut self,
        token: u64,
        fd: RawFd,
        disposition: Disposition,
    ) -> Result<(), ServerError> {
        match disposition {
            Disposition::Consumed => {
                self.tokens.free(token);
            }
            Disposition::Deferred(remaining) => {
                // Same record, so the delay keeps counting from the first submit
                self.ring.timeout(remaining, token)?;
            }
            Disposition::Disconnect => {
                self.tokens.free(token);
                close_socket(fd);
            }
        }
        Ok(())
    }

    fn submit(&mut self, submission: Submission) -> Result<(), ServerError> {
        let now = Instant::now();

        match submission {
            Submission::Accept => {
                let fd = self.listener.as_raw_fd();
                let token = self.tokens.alloc(PendingOp::new(OpType::Accept, fd, now));
                self.ring.accept(fd, token)?;
            }
            Submission::TriggerReceive { fd } => {
                let op = PendingOp::new(OpType::Receive { buf_idx: None }, fd, now);
                let token = self.tokens.alloc(op);
                self.ring.trigger_receive(fd, token)?;
            }
            Submission::Receive { fd, buf_idx } => {
                let op = PendingOp::new(
                    OpType::Receive {
                        buf_idx: Some(buf_idx),
                    },
                    fd,
                    now,
                );
                let token = self.tokens.alloc(op);
                let buf = self.machine.buffers_mut().get_ptr(buf_idx);
                // SAFETY: the buffer belongs to this operation until its
                // completion is dispatched, and the pool outlives the ring.
                unsafe { self.ring.receive(fd, buf, MAX_MESSAGE_LEN, token)? };
            }
            Submission::TimedWait { fd, delay } => {
                let token = self.tokens.alloc(PendingOp::new(OpType::TimedWait, fd, now));
                self.ring.timeout(delay, token)?;
            }
            Submission::Send { fd } => {
                let token = self.tokens.alloc(PendingOp::new(OpType::Send, fd, now));
                self.ring.send_ack(fd, token)?;
            }
        }

        Ok(())
    }

    fn arm_tick(&mut self) -> Result<(), ServerError> {
        let token = self
            .tokens
            .alloc(PendingOp::new(OpType::Tick, -1, Instant::now()));
        self.ring.timeout(self.tick_interval, token)?;
        Ok(())
    }

    /// Close every connection that still has an operation in flight.
    fn close_all(&mut self) {
        let listener_fd = self.listener.as_raw_fd();
        let mut open = HashSet::new();

        for op in self.tokens.drain() {
            self.machine.release(&op);
            if op.op != OpType::Tick && op.fd != listener_fd {
                open.insert(op.fd);
            }
        }

        for fd in open {
            close_socket(fd);
        }
    }
}

/// Shut down both directions and release the descriptor.
fn close_socket(fd: RawFd) {
    // SAFETY: the descriptor came from accept and no operation references it
    // any more.
    unsafe {
        libc::shutdown(fd, libc::SHUT_RDWR);
        libc::close(fd);
    }
    debug!(fd, "Connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind_local(name: &str, tick_interval: Duration) -> Option<Server> {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            ring_size: 8,
            max_connections: 4,
            tick_interval,
            log_file: Some(std::env::temp_dir().join(format!(
                "ackd-loop-{}-{}.txt",
                std::process::id(),
                name
            ))),
            ..Config::default()
        };
        match Server::bind(&config) {
            Ok(server) => Some(server),
            // io_uring may be unavailable in restricted sandboxes
            Err(ServerError::Ring(_)) => None,
            Err(e) => panic!("bind failed: {e}"),
        }
    }

    #[test]
    fn test_deferred_wait_rearms_same_token() {
        let Some(mut server) = bind_local("deferred", Duration::from_millis(20)) else {
            return;
        };
        let submitted = Instant::now() - Duration::from_millis(50);
        let token = server.tokens.alloc(PendingOp::new(OpType::TimedWait, -1, submitted));

        server
            .settle(token, -1, Disposition::Deferred(Duration::from_millis(10)))
            .unwrap();

        let mut completions = Vec::new();
        while completions.is_empty() {
            server.ring.wait().unwrap();
            server.ring.drain(8, &mut completions);
        }

        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].0, token);
        assert_eq!(completions[0].1, -libc::ETIME);

        // The record survives with its original submit time
        assert_eq!(server.tokens.len(), 1);
        let op = server.tokens.get_mut(token).unwrap();
        assert_eq!(op.op, OpType::TimedWait);
        assert_eq!(op.submitted_at, submitted);

        std::fs::remove_file(server.log_path()).unwrap();
    }

    #[test]
    fn test_consumed_frees_token() {
        let Some(mut server) = bind_local("consumed", Duration::from_millis(20)) else {
            return;
        };
        let token = server.tokens.alloc(PendingOp::new(OpType::Send, -1, Instant::now()));

        server.settle(token, -1, Disposition::Consumed).unwrap();

        assert_eq!(server.tokens.len(), 0);
        std::fs::remove_file(server.log_path()).unwrap();
    }

    #[test]
    fn test_zero_tick_interval_is_clamped() {
        let Some(server) = bind_local("tick", Duration::ZERO) else {
            return;
        };
        assert_eq!(server.tick_interval, Duration::from_millis(1));
        std::fs::remove_file(server.log_path()).unwrap();
    }
}
