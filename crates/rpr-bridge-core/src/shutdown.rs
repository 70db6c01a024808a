//! Shutdown signal shared between the host and the server.
//!
//! The server is single-threaded, but a signal handler (or the host) may run
//! on another thread. Hold mode polls this token every time a blocking read or
//! write times out, so a held connection never outlives a shutdown request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable, thread-safe shutdown flag.
///
/// # Example
///
/// ```
/// use rpr_bridge_core::ShutdownSignal;
///
/// let signal = ShutdownSignal::new();
/// let handler_copy = signal.clone();
///
/// // e.g. inside a Ctrl-C handler
/// handler_copy.trigger();
/// assert!(signal.is_triggered());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request shutdown. All clones observe it.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Return `Err(Interrupted)` once shutdown has been requested.
    pub fn check(&self) -> crate::Result<()> {
        if self.is_triggered() {
            Err(crate::BridgeError::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_signal_not_triggered() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());
        assert!(signal.check().is_ok());
    }

    #[test]
    fn test_clone_shares_state() {
        let signal = ShutdownSignal::default();
        let other = signal.clone();

        other.trigger();

        assert!(signal.is_triggered());
        assert!(matches!(signal.check(), Err(crate::BridgeError::Interrupted)));
    }

    #[test]
    fn test_trigger_from_another_thread() {
        let signal = ShutdownSignal::new();
        let remote = signal.clone();
        std::thread::spawn(move || remote.trigger()).join().unwrap();
        assert!(signal.is_triggered());
    }
}
