//! Event sink that writes [`ProbeEvent`]s through `tracing`.

use super::events::ProbeEvent;
use tracing::{debug, error, info};

/// Tracing target used for lifecycle events.
pub const EVENT_TARGET: &str = "oob_probe::events";

/// Writes lifecycle events as JSON at info level on [`EVENT_TARGET`].
#[derive(Debug, Clone)]
pub struct EventLogger {
    enabled: bool,
}

impl EventLogger {
    /// Create a logger. A disabled logger discards every event.
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Create a logger that discards all events.
    ///
    /// Useful for tests.
    pub fn new_null() -> Self {
        Self { enabled: false }
    }

    /// Log an event.
    ///
    /// The event is serialized to JSON with an ISO8601 timestamp.
    pub fn log(&self, event: ProbeEvent) {
        if !self.enabled {
            return;
        }

        match serde_json::to_string(&event.with_timestamp()) {
            Ok(json) => info!(target: EVENT_TARGET, "{}", json),
            Err(e) => error!("Failed to serialize probe event: {}", e),
        }
    }

    /// Whether events are written.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for EventLogger {
    fn default() -> Self {
        debug!("Using default event logger (enabled)");
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::Protocol;

    #[test]
    fn test_event_target() {
        assert_eq!(EVENT_TARGET, "oob_probe::events");
    }

    #[test]
    fn test_null_logger_is_disabled() {
        let logger = EventLogger::new_null();
        assert!(!logger.is_enabled());

        // Should not panic
        logger.log(ProbeEvent::ListenerClosed {
            protocol: Protocol::Tcp,
            port: 1,
        });
    }
}
