//! Fixed-interval rejoin policy for agents

use std::time::Duration;

/// Agents never give up: every failure waits the same interval and tries
/// again. Only the attempt count is tracked, for logging.
#[derive(Debug)]
pub struct ReconnectManager {
    interval: Duration,
    attempts: u32,
}

impl ReconnectManager {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            attempts: 0,
        }
    }

    /// Mark connection as successful
    pub fn on_connected(&mut self) {
        self.attempts = 0;
    }

    /// Record a failed attempt or a lost session and return the delay
    /// before the next join.
    pub fn on_disconnected(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        self.interval
    }

    /// Consecutive failures since the last successful join.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay() {
        let mut manager = ReconnectManager::new(Duration::from_secs(2));
        for _ in 0..10 {
            assert_eq!(manager.on_disconnected(), Duration::from_secs(2));
        }
        assert_eq!(manager.attempts(), 10);
    }

    #[test]
    fn test_connected_resets_attempts() {
        let mut manager = ReconnectManager::new(Duration::from_secs(2));
        let _ = manager.on_disconnected();
        let _ = manager.on_disconnected();
        assert_eq!(manager.attempts(), 2);

        manager.on_connected();
        assert_eq!(manager.attempts(), 0);
    }
}
