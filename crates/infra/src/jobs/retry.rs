//! Retry decisions for a unit's attempt sequence.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use mediaproc_ai::{CapabilityError, FailureClass};

/// Fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts allowed for a transient failure (first attempt included).
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    fn effective_max(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Decide what to do after `attempt` (0-based) failed with `err`.
    pub fn decide(&self, attempt: u32, err: &CapabilityError) -> Decision {
        if !err.class.is_transient() {
            return Decision::GiveUp(FinalError::new(err, attempt + 1, err.message.clone()));
        }

        let max = self.effective_max();
        if attempt + 1 < max {
            return Decision::Retry(self.delay);
        }

        let attempts = attempt + 1;
        Decision::GiveUp(FinalError::new(
            err,
            attempts,
            format!("gave up after {attempts} attempts: {}", err.message),
        ))
    }
}

/// Outcome of [`RetryPolicy::decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Retry(Duration),
    GiveUp(FinalError),
}

/// Last word on a unit whose attempts are over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalError {
    pub class: FailureClass,
    pub attempts: u32,
    pub message: String,
    /// Text of the failure that ended the sequence.
    pub last_error: String,
    pub status: Option<u16>,
}

impl FinalError {
    fn new(err: &CapabilityError, attempts: u32, message: String) -> Self {
        Self {
            class: err.class,
            attempts,
            message,
            last_error: err.message.clone(),
            status: err.status,
        }
    }

    /// Give-up for a failure that never entered the retry loop (staging, panics).
    pub fn immediate(err: &CapabilityError) -> Self {
        Self::new(err, 1, err.message.clone())
    }
}
