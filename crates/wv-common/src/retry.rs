//! Retry Orchestrator
//!
//! Three flavors share one loop:
//! - [`RetryPolicy::run`]: bounded by a maximum attempt count only.
//! - [`RetryPolicy::run_until`]: additionally bounded by a [`Deadline`]. The
//!   deadline is checked before every attempt, bounds every in-flight
//!   attempt, and races every backoff sleep.
//! - [`RetryPolicy::run_until_settled`]: like `run_until`, except that an
//!   attempt that has started always runs to completion. Attempts that
//!   commit external state and compensate on failure use this one.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::backoff::BackoffConfig;
use crate::DEFAULT_MAX_ATTEMPTS;

/// Result of a single attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    /// Terminal outcome, successful or not; stops the loop
    Done(T),
    /// Transient failure; the loop waits and tries again
    Retry(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetryError {
    #[error("{operation} failed after {attempts} attempts: {last_reason}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last_reason: String,
    },

    #[error("{operation} deadline exceeded")]
    DeadlineExceeded { operation: String },

    #[error("{operation} cancelled")]
    Cancelled { operation: String },
}

impl RetryError {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Expired,
    Cancelled,
}

impl Stop {
    fn into_error(self, operation: &str) -> RetryError {
        match self {
            Stop::Expired => RetryError::DeadlineExceeded { operation: operation.to_string() },
            Stop::Cancelled => RetryError::Cancelled { operation: operation.to_string() },
        }
    }
}

/// Point in time after which a request stops waiting, with an optional
/// cancellation signal from the caller
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    at: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

impl Deadline {
    /// No time bound and no cancellation
    pub fn never() -> Self {
        Self::default()
    }

    pub fn after(timeout: Duration) -> Self {
        Self::at(Instant::now() + timeout)
    }

    pub fn at(instant: Instant) -> Self {
        Self {
            at: Some(instant),
            cancel: None,
        }
    }

    /// Attach a cancellation signal; sending `true` stops the request
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.at, Some(at) if at <= Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    fn stopped(&self) -> Option<Stop> {
        if self.is_cancelled() {
            Some(Stop::Cancelled)
        } else if self.is_expired() {
            Some(Stop::Expired)
        } else {
            None
        }
    }

    async fn cancelled(&self) {
        match &self.cancel {
            Some(rx) => {
                let mut rx = rx.clone();
                // A dropped sender can never cancel
                if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending::<()>().await,
        }
    }

    async fn done(&self) -> Stop {
        match self.at {
            Some(at) => tokio::select! {
                _ = self.cancelled() => Stop::Cancelled,
                _ = tokio::time::sleep_until(at) => Stop::Expired,
            },
            None => {
                self.cancelled().await;
                Stop::Cancelled
            }
        }
    }

    /// Run a future, giving up when the deadline fires
    pub async fn bound<F: Future>(
        &self,
        operation: &str,
        future: F,
    ) -> Result<F::Output, RetryError> {
        if let Some(stop) = self.stopped() {
            return Err(stop.into_error(operation));
        }
        tokio::select! {
            biased;
            stop = self.done() => Err(stop.into_error(operation)),
            output = future => Ok(output),
        }
    }
}

/// Bounded retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffConfig::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffConfig) -> Self {
        Self { max_attempts, backoff }
    }

    /// Bounded loop without a deadline
    pub async fn run<T, F, Fut>(&self, operation: &str, f: F) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        self.run_until(operation, &Deadline::never(), f).await
    }

    /// Bounded loop that also stops as soon as `deadline` fires
    pub async fn run_until<T, F, Fut>(
        &self,
        operation: &str,
        deadline: &Deadline,
        f: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        self.run_loop(operation, deadline, true, f).await
    }

    /// Bounded loop whose deadline is only checked between attempts and
    /// during backoff; a started attempt is never interrupted
    pub async fn run_until_settled<T, F, Fut>(
        &self,
        operation: &str,
        deadline: &Deadline,
        f: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        self.run_loop(operation, deadline, false, f).await
    }

    async fn run_loop<T, F, Fut>(
        &self,
        operation: &str,
        deadline: &Deadline,
        bound_attempts: bool,
        mut f: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let mut last_reason = String::from("no attempt made");

        for attempt in 1..=self.max_attempts {
            // checked before the attempt is even built
            if let Some(stop) = deadline.stopped() {
                return Err(stop.into_error(operation));
            }

            let outcome = if bound_attempts {
                deadline.bound(operation, f(attempt)).await?
            } else {
                f(attempt).await
            };

            match outcome {
                Attempt::Done(value) => {
                    debug!(operation, attempt, "Operation finished");
                    return Ok(value);
                }
                Attempt::Retry(reason) => last_reason = reason,
            }

            if attempt == self.max_attempts {
                break;
            }

            let wait = self.backoff.wait(attempt);
            warn!(
                operation,
                attempt,
                reason = %last_reason,
                wait_ms = wait.as_millis() as u64,
                "Attempt failed, retrying"
            );
            deadline.bound(operation, tokio::time::sleep(wait)).await?;
        }

        Err(RetryError::Exhausted {
            operation: operation.to_string(),
            attempts: self.max_attempts,
            last_reason,
        })
    }
}
