//! Linux io_uring backend.
//!
//! Completion-based I/O with batched submissions on a single thread.

mod event_loop;
mod ring;

pub use event_loop::Server;
