//! Deadline-bounded polling
//!
//! Asynchronous catalog state (import tasks, image status) is observed by
//! polling at a fixed interval until a condition holds or an overall
//! deadline elapses. Transient server errors count as "not ready yet".

use crate::core::error::{PublishError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Outcome of a single poll attempt
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus<T> {
    Ready(T),
    Pending,
}

/// Overall time budget of one publication.
///
/// Created once at the top-level call and shared by every waiting point.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Fail with a timeout naming `what` if the budget is spent
    pub fn check(&self, what: &str) -> Result<()> {
        if self.is_expired() {
            return Err(self.timeout(what));
        }
        Ok(())
    }

    fn timeout(&self, what: &str) -> PublishError {
        PublishError::Timeout {
            what: what.to_string(),
            after: self.budget,
        }
    }
}

/// Options for polling behavior
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Fixed delay between attempts
    pub interval: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
        }
    }
}

/// Fixed-interval poller
///
/// # Examples
///
/// ```no_run
/// use image_publisher::core::{Deadline, PollOptions, PollStatus, Poller};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> image_publisher::core::Result<()> {
/// let poller = Poller::new(PollOptions::default());
/// let deadline = Deadline::after(Duration::from_secs(60));
///
/// let value = poller
///     .poll("answer", &deadline, || async { Ok(PollStatus::Ready(42)) })
///     .await?;
/// assert_eq!(value, 42);
/// # Ok(())
/// # }
/// ```
pub struct Poller {
    options: PollOptions,
}

impl Poller {
    pub fn new(options: PollOptions) -> Self {
        Self { options }
    }

    /// Run `operation` until it is ready, fails permanently, or the deadline passes.
    ///
    /// Transient errors (see [`PublishError::is_transient`]) are swallowed and
    /// retried; they never extend the deadline. Sleeps are capped at the
    /// remaining budget so the worst case latency equals the deadline.
    pub async fn poll<F, Fut, T>(&self, what: &str, deadline: &Deadline, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PollStatus<T>>>,
    {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(PollStatus::Ready(value)) => return Ok(value),
                Ok(PollStatus::Pending) => {
                    tracing::debug!(what, attempt, "not ready yet");
                }
                Err(error) if error.is_transient() => {
                    tracing::warn!(what, attempt, error = %error, "transient failure while polling");
                }
                Err(error) => return Err(error),
            }

            let remaining = deadline.remaining();
            if remaining.is_zero() {
                return Err(deadline.timeout(what));
            }

            sleep(self.options.interval.min(remaining)).await;
            deadline.check(what)?;
        }
    }
}
