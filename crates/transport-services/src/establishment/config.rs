//! Establishment configuration.

use std::time::Duration;

/// Timing knobs for candidate racing.
#[derive(Debug, Clone)]
pub struct EstablishmentConfig {
    /// Delay before starting the next candidate while earlier ones are pending.
    pub stagger_delay: Duration,
    /// Upper bound for the whole race.
    pub deadline: Duration,
    /// Upper bound for a single attempt, if any.
    pub attempt_timeout: Option<Duration>,
}

impl Default for EstablishmentConfig {
    fn default() -> Self {
        Self {
            stagger_delay: Duration::from_millis(250),
            deadline: Duration::from_secs(10),
            attempt_timeout: None,
        }
    }
}

impl EstablishmentConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the stagger delay.
    pub fn stagger_delay(mut self, delay: Duration) -> Self {
        self.stagger_delay = delay;
        self
    }

    /// Set the race deadline.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set the per-attempt timeout.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }
}
