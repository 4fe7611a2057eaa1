//! Shutdown flag for the event loop.
//!
//! The loop checks the flag once per iteration. It can be raised from another
//! thread through a cloned handle or, when installed, by SIGINT/SIGTERM.

use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

static SIGNALLED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_signum: libc::c_int) {
    SIGNALLED.store(true, Ordering::SeqCst);
}

/// Cloneable shutdown request handle.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    watch_signals: bool,
}

impl Shutdown {
    /// Handle that is only raised through [`Shutdown::trigger`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle that is also raised by SIGINT or SIGTERM.
    ///
    /// The handlers are installed without `SA_RESTART`, so a signal interrupts
    /// the ring wait instead of waiting for the next tick.
    pub fn on_signals() -> io::Result<Self> {
        for signum in [libc::SIGINT, libc::SIGTERM] {
            // SAFETY: the handler only stores to an atomic, which is
            // async-signal-safe.
            unsafe {
                let mut action: libc::sigaction = std::mem::zeroed();
                let handler: extern "C" fn(libc::c_int) = on_signal;
                action.sa_sigaction = handler as libc::sighandler_t;
                libc::sigemptyset(&mut action.sa_mask);
                action.sa_flags = 0;
                if libc::sigaction(signum, &action, ptr::null_mut()) != 0 {
                    return Err(io::Error::last_os_error());
                }
            }
        }

        Ok(Self {
            flag: Arc::new(AtomicBool::new(false)),
            watch_signals: true,
        })
    }

    /// Ask the loop to stop.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || (self.watch_signals && SIGNALLED.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_visible_through_clones() {
        let shutdown = Shutdown::new();
        let handle = shutdown.clone();
        assert!(!shutdown.is_requested());

        handle.trigger();
        assert!(shutdown.is_requested());
    }
}
