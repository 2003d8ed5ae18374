//! Cooperative cancellation: long-running release work checks its deadline
//! at each suspension point.

use crate::CoreError;
use std::time::{Duration, Instant};

/// Default deadline for jobs picked up from the queue, when the submitting
/// request did not carry one.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn within(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    pub fn for_queued_job() -> Self {
        Self::within(DEFAULT_JOB_TIMEOUT)
    }

    /// Fails with [`CoreError::Cancelled`] once the deadline has passed.
    pub fn check(&self) -> Result<(), CoreError> {
        if Instant::now() >= self.at {
            return Err(CoreError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_deadline_passes() {
        let deadline = Deadline::within(Duration::from_secs(60));
        assert!(deadline.check().is_ok());
    }

    #[test]
    fn expired_deadline_cancels() {
        let deadline = Deadline::within(Duration::ZERO);
        assert!(matches!(deadline.check(), Err(CoreError::Cancelled)));
    }
}
