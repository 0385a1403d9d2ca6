use std::time::Duration;

/// Decides how long a collector sleeps between two collection cycles.
///
/// Normally that is the configured scrape interval. A single wait can be overridden, which is
/// how a restored snapshot shortens the first wait after a restart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScrapeScheduler {
    scrape_interval: Duration,
    next_sleep: Option<Duration>,
}

impl ScrapeScheduler {
    /// Creates a scheduler sleeping `scrape_interval` between cycles.
    pub fn new(scrape_interval: Duration) -> Self {
        Self {
            scrape_interval,
            next_sleep: None,
        }
    }

    /// The configured scrape interval.
    pub fn scrape_interval(&self) -> Duration {
        self.scrape_interval
    }

    /// Overrides the duration of the next wait only.
    pub fn set_next_sleep_duration(&mut self, duration: Duration) {
        self.next_sleep = Some(duration);
    }

    /// The override for the next wait, if one is set.
    pub fn pending_override(&self) -> Option<Duration> {
        self.next_sleep
    }

    /// Returns the duration of the next wait and consumes a pending override.
    pub fn next_sleep(&mut self) -> Duration {
        self.next_sleep.take().unwrap_or(self.scrape_interval)
    }
}
