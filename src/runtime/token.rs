//! Operation token tracking for completion correlation.
//!
//! Each submitted operation gets a unique token (user_data) that identifies
//! the operation and the resources it owns when the completion arrives.

use slab::Slab;
use std::os::unix::io::RawFd;
use std::time::Instant;

/// Type of in-flight operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    /// Accept operation on listener socket.
    Accept,
    /// Receive on a connection.
    Receive {
        /// Pool buffer the kernel writes into. `None` for a trigger receive,
        /// which only waits for the socket to become readable.
        buf_idx: Option<usize>,
    },
    /// Fixed delay between logging a message and acknowledging it.
    TimedWait,
    /// Acknowledgment send.
    Send,
    /// Periodic wakeup used by the event loop to observe shutdown.
    Tick,
}

/// Record of one submitted operation.
#[derive(Debug, Clone, Copy)]
pub struct PendingOp {
    pub op: OpType,
    /// Socket the operation belongs to (the listener for `Accept`).
    pub fd: RawFd,
    /// When the operation was first submitted.
    pub submitted_at: Instant,
}

impl PendingOp {
    pub fn new(op: OpType, fd: RawFd, submitted_at: Instant) -> Self {
        Self {
            op,
            fd,
            submitted_at,
        }
    }
}

/// Allocator for operation tokens with O(1) lookup.
///
/// Uses a slab to efficiently allocate and deallocate tokens,
/// providing stable identifiers for in-flight operations.
pub struct TokenAllocator {
    ops: Slab<PendingOp>,
}

impl TokenAllocator {
    /// Create a new token allocator with specified capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            ops: Slab::with_capacity(capacity),
        }
    }

    /// Allocate a new token for an operation.
    ///
    /// Returns the token (user_data value for io_uring).
    pub fn alloc(&mut self, op: PendingOp) -> u64 {
        self.ops.insert(op) as u64
    }

    pub fn get_mut(&mut self, token: u64) -> Option<&mut PendingOp> {
        self.ops.get_mut(token as usize)
    }

    /// Free a token, making it available for reuse.
    ///
    /// Returns the operation that was associated with the token.
    pub fn free(&mut self, token: u64) -> Option<PendingOp> {
        self.ops.try_remove(token as usize)
    }

    /// Number of currently allocated tokens.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Remove every outstanding operation.
    pub fn drain(&mut self) -> impl Iterator<Item = PendingOp> + '_ {
        self.ops.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_allocator() {
        let mut alloc = TokenAllocator::new(16);
        let now = Instant::now();

        let t1 = alloc.alloc(PendingOp::new(OpType::Accept, 3, now));
        let t2 = alloc.alloc(PendingOp::new(
            OpType::Receive { buf_idx: Some(1) },
            7,
            now,
        ));

        assert_eq!(alloc.len(), 2);

        // Verify we can retrieve operations
        assert_eq!(alloc.get_mut(t1).unwrap().op, OpType::Accept);
        let op = alloc.get_mut(t2).unwrap();
        assert_eq!(op.op, OpType::Receive { buf_idx: Some(1) });
        assert_eq!(op.fd, 7);

        // Free and verify
        assert!(alloc.free(t1).is_some());
        assert!(alloc.get_mut(t1).is_none());
        assert!(alloc.free(t1).is_none());
        assert_eq!(alloc.len(), 1);

        // Allocate reuses slot
        let t3 = alloc.alloc(PendingOp::new(OpType::Accept, 3, now));
        assert_eq!(t3, t1); // Slab reuses slots
    }

    #[test]
    fn test_drain() {
        let mut alloc = TokenAllocator::new(4);
        let now = Instant::now();
        alloc.alloc(PendingOp::new(OpType::Send, 5, now));
        alloc.alloc(PendingOp::new(OpType::TimedWait, 6, now));

        let mut fds: Vec<RawFd> = alloc.drain().map(|op| op.fd).collect();
        fds.sort();
        assert_eq!(fds, vec![5, 6]);
        assert_eq!(alloc.len(), 0);
    }
}
