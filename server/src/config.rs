//! Server configuration

use crate::error::ServerError;
use clap::ValueEnum;
use std::time::Duration;

/// What to do with a message sent to a connection whose queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OverflowPolicy {
    /// Discard the incoming message.
    #[default]
    DropNewest,
    /// Evict the oldest queued message to make room.
    DropOldest,
    /// Discard the incoming message and report failure to the sender.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Resource path a client must request to be accepted.
    pub resource_path: String,
    /// Per-connection queue bound. `None` leaves queues unbounded.
    pub queue_capacity: Option<usize>,
    pub overflow_policy: OverflowPolicy,
    /// Interval between "still waiting" reports while `stop` drains workers.
    pub shutdown_grace: Duration,
    /// Period of the live-connection report. `None` disables the monitor.
    pub monitor_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            resource_path: shared::DEFAULT_PATH.to_string(),
            queue_capacity: None,
            overflow_policy: OverflowPolicy::default(),
            shutdown_grace: Duration::from_secs(1),
            monitor_interval: None,
        }
    }
}

impl ServerConfig {
    pub fn new(resource_path: impl Into<String>) -> Self {
        Self {
            resource_path: resource_path.into(),
            ..Self::default()
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize, policy: OverflowPolicy) -> Self {
        self.queue_capacity = Some(capacity);
        self.overflow_policy = policy;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = Some(interval);
        self
    }

    /// Rejects settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.queue_capacity == Some(0) {
            return Err(ServerError::InvalidConfig(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        if self.shutdown_grace.is_zero() {
            return Err(ServerError::InvalidConfig(
                "shutdown grace must be non-zero".to_string(),
            ));
        }
        if matches!(self.monitor_interval, Some(interval) if interval.is_zero()) {
            return Err(ServerError::InvalidConfig(
                "monitor interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
