use anyhow::Result;
use std::thread;
use std::time::Duration;

/// Bounded retry schedule: a fixed number of attempts separated by a fixed
/// delay. Total wall-clock budget is roughly `attempts * delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Schedule sized for registry-side tag propagation, which can take
    /// minutes after a release publishes.
    pub const fn tag_propagation() -> Self {
        Self::new(60, Duration::from_secs(15))
    }

    /// Short schedule for conditions expected to settle within a minute.
    pub const fn short_poll() -> Self {
        Self::new(10, Duration::from_secs(5))
    }

    /// Schedule for waiting on pull-request automerge.
    pub const fn merge_poll() -> Self {
        Self::new(20, Duration::from_secs(10))
    }

    /// Drives `probe` until it yields a value or the budget runs out.
    ///
    /// The probe receives the 1-based attempt number. `Ok(None)` from the
    /// probe means "not yet"; `Ok(None)` from this method means the budget
    /// was exhausted without a value. An `Err` from the probe ends the loop
    /// immediately.
    pub fn run<T, F>(&self, mut probe: F) -> Result<Option<T>>
    where
        F: FnMut(u32) -> Result<Option<T>>,
    {
        let attempts = self.attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(found) = probe(attempt)? {
                return Ok(Some(found));
            }
            if attempt < attempts {
                thread::sleep(self.delay);
            }
        }
        Ok(None)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::tag_propagation()
    }
}
