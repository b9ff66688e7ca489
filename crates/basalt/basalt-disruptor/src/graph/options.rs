//! Retry budgets and placement options for graphs.

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// `attempts` retries, each after sleeping `delay`. Written as
/// `<attempts>x<milliseconds>`, e.g. `100x1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid retry policy '{0}', expected <attempts>x<milliseconds>")]
pub struct ParseRetryError(String);

impl RetryPolicy {
    pub const fn new(attempts: u32, delay_ms: u64) -> Self {
        Self {
            attempts,
            delay: Duration::from_millis(delay_ms),
        }
    }

    /// Calls `probe` once, then up to `attempts` more times after sleeping
    /// `delay`, until it yields a value.
    pub fn run<T>(&self, mut probe: impl FnMut() -> Option<T>) -> Option<T> {
        if let Some(value) = probe() {
            return Some(value);
        }
        for _ in 0..self.attempts {
            std::thread::sleep(self.delay);
            if let Some(value) = probe() {
                return Some(value);
            }
        }
        None
    }
}

impl fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.attempts, self.delay.as_millis())
    }
}

impl FromStr for RetryPolicy {
    type Err = ParseRetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseRetryError(s.to_owned());
        let (attempts, delay) = s.trim().split_once('x').ok_or_else(invalid)?;
        let attempts = attempts.parse().map_err(|_| invalid())?;
        let delay = delay.parse().map_err(|_| invalid())?;
        Ok(Self::new(attempts, delay))
    }
}

impl TryFrom<String> for RetryPolicy {
    type Error = ParseRetryError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Retry budgets of the graph state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GraphOptions {
    /// Waiting for another party to finish constructing the region.
    pub attach: RetryPolicy,
    /// Taking the update lock for a topology change or a detach.
    pub update: RetryPolicy,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            attach: RetryPolicy::new(100, 1),
            update: RetryPolicy::new(500, 1),
        }
    }
}

/// How a shared segment is acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmMode {
    /// Create a new segment; `purge` removes a stale one first.
    Create { purge: bool },
    /// Open an existing segment, retrying until it exists and is large enough.
    Open,
    /// Create the segment, or open it when it already exists.
    Attach,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShmOptions {
    pub path: PathBuf,
    pub mode: ShmMode,
    /// Pin the mapping in RAM.
    pub lock: bool,
    pub open: RetryPolicy,
}

impl ShmOptions {
    pub fn new(path: impl Into<PathBuf>, mode: ShmMode) -> Self {
        Self {
            path: path.into(),
            mode,
            lock: false,
            open: RetryPolicy::new(500, 1),
        }
    }

    pub fn locked(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    pub fn open_retry(mut self, policy: RetryPolicy) -> Self {
        self.open = policy;
        self
    }
}
