#![forbid(unsafe_code)]

//! Timer configuration.

use std::time::Duration;

/// Interval used when none is given.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Name given to timer threads unless overridden.
pub const DEFAULT_THREAD_NAME: &str = "pulse-timer";

/// Configuration for an [`IntervalBroadcaster`](crate::IntervalBroadcaster).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerConfig {
    /// Time between the end of one wait and the start of the next round.
    pub interval: Duration,
    /// Name of the background thread, as shown by debuggers and panics.
    pub thread_name: String,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl TimerConfig {
    /// Default configuration with the given interval.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self::default().with_interval(interval)
    }

    /// Set the firing interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the background thread name.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}
