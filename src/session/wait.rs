use std::thread;
use std::time::Duration;

/// Fixed-interval, fixed-attempt polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundedWait {
    pub interval: Duration,
    pub attempts: u32,
}

impl BoundedWait {
    pub fn new(interval: Duration, attempts: u32) -> Self {
        Self { interval, attempts }
    }

    /// Upper bound on how long [`until`](Self::until) can block
    pub fn max_duration(&self) -> Duration {
        self.interval * self.attempts
    }

    /// Poll `done` until it returns `true` or the attempts run out.
    ///
    /// Returns whether the condition was met. `done` is checked once before
    /// the first sleep and once after each.
    pub fn until(&self, mut done: impl FnMut() -> bool) -> bool {
        if done() {
            return true;
        }
        for _ in 0..self.attempts {
            thread::sleep(self.interval);
            if done() {
                return true;
            }
        }
        false
    }
}

impl Default for BoundedWait {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), 50)
    }
}
