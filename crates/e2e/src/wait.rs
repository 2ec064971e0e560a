//! Bounded retry loop used for element lookups and assertions

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::trace;

use crate::error::{E2eError, E2eResult};

/// Outcome of a single polling attempt
pub enum Attempt<T> {
    /// Condition met
    Ready(T),
    /// Not yet; carries the error reported if the deadline passes
    Retry(E2eError),
}

/// Fixed-backoff polling policy
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(4),
            interval: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn start(&self) -> Backoff {
        Backoff {
            policy: *self,
            start: Instant::now(),
            attempts: 0,
        }
    }

    /// Run `attempt` until it is ready, it fails hard, or the timeout elapses.
    /// At least one attempt is always made.
    pub async fn poll<T, F, Fut>(&self, mut attempt: F) -> E2eResult<T>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = E2eResult<Attempt<T>>>,
    {
        let mut backoff = self.start();

        loop {
            match attempt(backoff.attempts()).await? {
                Attempt::Ready(value) => return Ok(value),
                Attempt::Retry(reason) => {
                    if !backoff.wait().await {
                        trace!("giving up after {} attempt(s): {}", backoff.attempts(), reason);
                        return Err(reason);
                    }
                }
            }
        }
    }
}

/// Deadline tracker for hand-written retry loops
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    start: Instant,
    attempts: usize,
}

impl Backoff {
    /// Number of failed attempts recorded so far
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Record a failed attempt and sleep before the next one.
    /// Returns `false` once the deadline has passed.
    pub async fn wait(&mut self) -> bool {
        self.attempts += 1;

        let elapsed = self.start.elapsed();
        if elapsed >= self.policy.timeout {
            return false;
        }

        sleep(self.policy.interval.min(self.policy.timeout - elapsed)).await;
        true
    }
}
