//! Receive buffer pool.
//!
//! Provides fixed-size buffer allocation without per-message malloc overhead.
//! Each buffer is one byte larger than the receive window so a full message
//! is always followed by a NUL sentinel.

/// Largest message accepted by a single receive.
pub const MAX_MESSAGE_LEN: usize = 128;

/// Size of each pooled buffer: the receive window plus the sentinel byte.
pub const RECV_BUFFER_SIZE: usize = MAX_MESSAGE_LEN + 1;

/// Pool of fixed-size receive buffers.
///
/// Buffers are pre-allocated and reused to avoid allocation overhead
/// on the hot path. The pool tracks which buffers are in use via a free list.
/// The inner allocations never move, so a pointer handed to the kernel stays
/// valid until the buffer is freed.
pub struct BufferPool {
    /// Actual buffer storage.
    buffers: Vec<Box<[u8]>>,
    /// Stack of available buffer indices (LIFO for cache locality).
    free_list: Vec<usize>,
}

impl BufferPool {
    /// Create a new buffer pool.
    ///
    /// # Arguments
    /// * `count` - Number of buffers to pre-allocate
    /// * `size` - Size of each buffer in bytes
    pub fn new(count: usize, size: usize) -> Self {
        let mut buffers = Vec::with_capacity(count);
        let mut free_list = Vec::with_capacity(count);

        // Reverse order so the first alloc hands out index 0
        for i in (0..count).rev() {
            buffers.push(vec![0u8; size].into_boxed_slice());
            free_list.push(i);
        }

        Self {
            buffers,
            free_list,
        }
    }

    /// Allocate a zeroed buffer from the pool.
    ///
    /// Returns `None` if no buffers are available.
    pub fn alloc(&mut self) -> Option<usize> {
        let idx = self.free_list.pop()?;
        self.buffers[idx].fill(0);
        Some(idx)
    }

    /// Return a buffer to the pool.
    pub fn free(&mut self, idx: usize) {
        debug_assert!(idx < self.buffers.len(), "buffer index out of bounds");
        debug_assert!(!self.free_list.contains(&idx), "double free of buffer");
        self.free_list.push(idx);
    }

    /// Get an immutable reference to a buffer.
    ///
    /// # Panics
    /// Panics if `idx` is out of bounds.
    pub fn get(&self, idx: usize) -> &[u8] {
        &self.buffers[idx]
    }

    /// Get a mutable reference to a buffer.
    ///
    /// # Panics
    /// Panics if `idx` is out of bounds.
    pub fn get_mut(&mut self, idx: usize) -> &mut [u8] {
        &mut self.buffers[idx]
    }

    /// Get a mutable pointer to a buffer for the kernel.
    ///
    /// The caller must not access the buffer through other references while
    /// an operation using the pointer is in flight.
    pub fn get_ptr(&mut self, idx: usize) -> *mut u8 {
        self.buffers[idx].as_mut_ptr()
    }

    /// Get the total number of buffers.
    pub fn capacity(&self) -> usize {
        self.buffers.len()
    }

    /// Get the number of available buffers.
    pub fn available(&self) -> usize {
        self.free_list.len()
    }
}

/// Extract the message from a filled receive buffer.
///
/// The message ends at the first NUL or after `received` bytes, whichever
/// comes first.
pub fn message_bytes(buf: &[u8], received: usize) -> &[u8] {
    let window = &buf[..received.min(buf.len())];
    match window.iter().position(|&b| b == 0) {
        Some(end) => &window[..end],
        None => window,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_pool_basic() {
        let mut pool = BufferPool::new(4, RECV_BUFFER_SIZE);

        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.available(), 4);
        assert_eq!(pool.get(0).len(), 129);

        // Allocate all buffers
        let b0 = pool.alloc().unwrap();
        let b1 = pool.alloc().unwrap();
        let b2 = pool.alloc().unwrap();
        let b3 = pool.alloc().unwrap();

        assert_eq!(b0, 0);
        assert_eq!(pool.available(), 0);
        assert!(pool.alloc().is_none());

        // Free and reallocate
        pool.free(b1);
        assert_eq!(pool.available(), 1);

        let b4 = pool.alloc().unwrap();
        assert_eq!(b4, b1); // LIFO reuse

        pool.free(b0);
        pool.free(b2);
        pool.free(b3);
        pool.free(b4);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_alloc_zeroes_reused_buffer() {
        let mut pool = BufferPool::new(1, RECV_BUFFER_SIZE);

        let idx = pool.alloc().unwrap();
        pool.get_mut(idx)[..5].copy_from_slice(b"dirty");
        pool.free(idx);

        let idx = pool.alloc().unwrap();
        assert!(pool.get(idx).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_message_bytes() {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        buf[..5].copy_from_slice(b"hello");

        assert_eq!(message_bytes(&buf, 5), b"hello");
        // Stops at the sentinel even if the count is larger
        assert_eq!(message_bytes(&buf, 20), b"hello");
        // Count wins when it is shorter
        assert_eq!(message_bytes(&buf, 3), b"hel");

        buf[2] = 0;
        assert_eq!(message_bytes(&buf, 5), b"he");
    }

    #[test]
    fn test_message_bytes_full_window() {
        let buf = [b'x'; RECV_BUFFER_SIZE];
        assert_eq!(message_bytes(&buf, MAX_MESSAGE_LEN).len(), MAX_MESSAGE_LEN);
    }
}
