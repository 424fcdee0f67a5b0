//! Jittered backoff
//!
//! The wait for attempt `i` (1-indexed) is a uniformly random value inside a
//! fixed window plus a component that grows linearly with `i`:
//!
//! ```text
//! wait = min_range + uniform[0, |max_range - min_range|) + offset * i
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{DEFAULT_MAX_RANGE, DEFAULT_MIN_RANGE, DEFAULT_SLEEP_OFFSET};

/// Backoff window configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub min_range: Duration,
    pub max_range: Duration,
    pub offset: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_range: DEFAULT_MIN_RANGE,
            max_range: DEFAULT_MAX_RANGE,
            offset: DEFAULT_SLEEP_OFFSET,
        }
    }
}

impl BackoffConfig {
    pub fn new(min_range: Duration, max_range: Duration, offset: Duration) -> Self {
        Self { min_range, max_range, offset }
    }

    /// Width of the random window; the bounds may be given in either order
    pub fn window(&self) -> Duration {
        if self.max_range > self.min_range {
            self.max_range - self.min_range
        } else {
            self.min_range - self.max_range
        }
    }

    /// Wait before retrying after `attempt`
    pub fn wait(&self, attempt: u32) -> Duration {
        self.wait_with(attempt, &mut rand::thread_rng())
    }

    /// Same as [`wait`](Self::wait) with a caller-supplied random source
    pub fn wait_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let window = self.window().as_nanos() as u64;
        let jitter = if window == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(rng.gen_range(0..window))
        };

        self.min_range + jitter + self.offset * attempt
    }
}
