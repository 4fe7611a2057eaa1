//! Submission adapter over the io_uring instance.
//!
//! Every request is queued as one SQE tagged with its operation token and
//! stays queued until [`Ring::wait`] flushes the whole batch to the kernel.

use crate::runtime::connection::ACK_PAYLOAD;
use io_uring::{opcode, squeue, types, IoUring};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;
use tracing::trace;

pub struct Ring {
    ring: IoUring,
    /// Timespecs of armed timers, boxed so their address is stable until the
    /// timer's completion has been drained.
    timers: HashMap<u64, Box<types::Timespec>>,
}

impl Ring {
    /// Create a ring with `entries` submission queue slots.
    pub fn new(entries: u32) -> io::Result<Self> {
        Ok(Self {
            ring: IoUring::new(entries)?,
            timers: HashMap::new(),
        })
    }

    /// Queue an accept on the listening socket.
    pub fn accept(&mut self, listener_fd: RawFd, token: u64) -> io::Result<()> {
        let accept = opcode::Accept::new(
            types::Fd(listener_fd),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
        .build()
        .user_data(token);

        // SAFETY: no memory is referenced by the SQE.
        unsafe { self.push(&accept) }
    }

    /// Queue a readiness wait on a connection (a receive without a buffer).
    pub fn trigger_receive(&mut self, fd: RawFd, token: u64) -> io::Result<()> {
        let poll = opcode::PollAdd::new(types::Fd(fd), libc::POLLIN as u32)
            .build()
            .user_data(token);

        // SAFETY: no memory is referenced by the SQE.
        unsafe { self.push(&poll) }
    }

    /// Queue a receive of up to `len` bytes into `buf`.
    ///
    /// # Safety
    /// `buf` must stay valid and otherwise untouched until the completion for
    /// `token` has been drained.
    pub unsafe fn receive(
        &mut self,
        fd: RawFd,
        buf: *mut u8,
        len: usize,
        token: u64,
    ) -> io::Result<()> {
        let recv = opcode::Recv::new(types::Fd(fd), buf, len as u32)
            .build()
            .user_data(token);

        unsafe { self.push(&recv) }
    }

    /// Queue a one-shot timer firing after `delay`.
    ///
    /// Re-arming a token whose previous timer completed replaces its timespec.
    pub fn timeout(&mut self, delay: Duration, token: u64) -> io::Result<()> {
        let ts = Box::new(
            types::Timespec::new()
                .sec(delay.as_secs())
                .nsec(delay.subsec_nanos()),
        );
        let timeout = opcode::Timeout::new(&*ts as *const types::Timespec)
            .build()
            .user_data(token);
        self.timers.insert(token, ts);

        // SAFETY: the timespec lives in `timers` until the completion is drained.
        unsafe { self.push(&timeout) }
    }

    /// Queue the acknowledgment send.
    pub fn send_ack(&mut self, fd: RawFd, token: u64) -> io::Result<()> {
        let len = ACK_PAYLOAD.len() as u32;
        let send = opcode::Send::new(types::Fd(fd), ACK_PAYLOAD.as_ptr(), len)
            .flags(libc::MSG_NOSIGNAL)
            .build()
            .user_data(token);

        // SAFETY: the payload is a static.
        unsafe { self.push(&send) }
    }

    /// Flush queued submissions and block until at least one completion is
    /// ready.
    ///
    /// An interrupted wait returns `Ok`, so the caller can check for shutdown.
    pub fn wait(&mut self) -> io::Result<()> {
        match self.ring.submit_and_wait(1) {
            Ok(_) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EINTR) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Move up to `max_batch` ready completions into `out` as
    /// `(token, result)` pairs.
    pub fn drain(&mut self, max_batch: usize, out: &mut Vec<(u64, i32)>) {
        for cqe in self.ring.completion().take(max_batch) {
            let token = cqe.user_data();
            self.timers.remove(&token);
            out.push((token, cqe.result()));
        }
        trace!(count = out.len(), "Drained completions");
    }

    /// Push one SQE, flushing once to make room if the queue is full.
    ///
    /// # Safety
    /// Memory referenced by the entry must stay valid until it completes.
    unsafe fn push(&mut self, entry: &squeue::Entry) -> io::Result<()> {
        if unsafe { self.ring.submission().push(entry) }.is_ok() {
            return Ok(());
        }

        self.ring.submit()?;
        unsafe { self.ring.submission().push(entry) }
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "submission queue full"))
    }
}
