use crate::device::DeviceAddress;
use std::time::Duration;

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Blocking delay used between discovery attempts and poll loop ticks.
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<S: Sleeper + ?Sized> Sleeper for &mut S {
    fn sleep(&mut self, duration: Duration) {
        (**self).sleep(duration);
    }
}

pub type AttemptCallback = Box<dyn FnMut(&DeviceAddress, u32, bool)>;

/// Discovery retry policy: fixed interval, unbounded unless `max_attempts` is set.
pub struct RetryPolicy {
    max_attempts: Option<u32>,
    interval: Duration,
    on_attempt: Option<AttemptCallback>,
}

impl RetryPolicy {
    pub fn new(interval: Duration) -> Self {
        Self {
            max_attempts: None,
            interval,
            on_attempt: None,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(DEFAULT_RETRY_INTERVAL)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    /// Called after every attempt with the device, the 1-based attempt number and its outcome.
    pub fn on_attempt<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&DeviceAddress, u32, bool) + 'static,
    {
        self.on_attempt = Some(Box::new(callback));
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    pub(crate) fn notify(&mut self, address: &DeviceAddress, attempt: u32, succeeded: bool) {
        if let Some(callback) = self.on_attempt.as_mut() {
            callback(address, attempt, succeeded);
        }
    }

    /// Whether another attempt is allowed after `attempts` failures.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts < max,
            None => true,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl core::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("interval", &self.interval)
            .field("on_attempt", &self.on_attempt.is_some())
            .finish()
    }
}
