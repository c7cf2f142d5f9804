use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

/// Read-only view of connection health that the event pipeline consults
/// before doing any work.
pub trait Watchdog: Send + Sync {
    /// When true, every cache, dispatch and prefill operation becomes a no-op.
    fn should_stop_all_logic(&self) -> bool;

    /// True once the platform connection has been established at least once.
    fn connected_once(&self) -> bool;

    /// True while the platform connection is believed to be up.
    fn connected_currently(&self) -> bool;
}

/// Write side of the connection flags, for whoever observes the connection
pub trait ConnectionTracker: Watchdog {
    fn mark_connected(&self);
    fn mark_connected_once(&self);
    fn mark_disconnected(&self);
}

/// Flag-based connection monitor shared between the platform adapter and the router
#[derive(Debug, Default)]
pub struct ConnectionMonitor {
    stop_all_logic: AtomicBool,
    connected_once: AtomicBool,
    connected_currently: AtomicBool,
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse all further work. Sends already in flight are not interrupted.
    pub fn stop_all_logic(&self) {
        warn!("Stopping all bot logic");
        self.stop_all_logic.store(true, Ordering::SeqCst);
    }

}

impl ConnectionTracker for ConnectionMonitor {
    fn mark_connected(&self) {
        self.connected_currently.store(true, Ordering::SeqCst);
    }

    fn mark_connected_once(&self) {
        self.connected_once.store(true, Ordering::SeqCst);
    }

    fn mark_disconnected(&self) {
        self.connected_currently.store(false, Ordering::SeqCst);
    }
}

impl Watchdog for ConnectionMonitor {
    fn should_stop_all_logic(&self) -> bool {
        self.stop_all_logic.load(Ordering::SeqCst)
    }

    fn connected_once(&self) -> bool {
        self.connected_once.load(Ordering::SeqCst)
    }

    fn connected_currently(&self) -> bool {
        self.connected_currently.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_monitor_is_idle() {
        let monitor = ConnectionMonitor::new();
        assert!(!monitor.should_stop_all_logic());
        assert!(!monitor.connected_once());
        assert!(!monitor.connected_currently());
    }

    #[test]
    fn test_connection_flags_are_independent() {
        let monitor = ConnectionMonitor::new();
        monitor.mark_connected();
        monitor.mark_connected_once();
        monitor.mark_disconnected();
        assert!(monitor.connected_once());
        assert!(!monitor.connected_currently());
    }

    #[test]
    fn test_stop_is_sticky() {
        let monitor = ConnectionMonitor::new();
        monitor.stop_all_logic();
        monitor.mark_connected();
        assert!(monitor.should_stop_all_logic());
    }
}
