use std::time::Duration;

// Well under typical 10s server idle-timeouts, leaving margin for jitter.
const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for stream-service behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Interval between keepalive pings while connected; the first ping is
    /// sent immediately on connect
    pub keepalive_interval: Duration,
}

impl Config {
    /// Replaces the keepalive interval.
    #[must_use]
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }
}
