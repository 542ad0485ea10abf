//! Exponential reconnect backoff

use std::time::Duration;

use super::CaptureError;

/// Backoff parameters, in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: f64,
    pub multiplier: f64,
    pub max_delay: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: 1.0,
            multiplier: 1.5,
            max_delay: 10.0,
        }
    }
}

/// Computes the delay before the next connection attempt.
///
/// Each failure multiplies the current delay by `multiplier`, capped at
/// `max_delay`. A successful connection resets it to `initial_delay`.
#[derive(Debug, Clone)]
pub struct BackoffScheduler {
    policy: BackoffPolicy,
    current: f64,
}

impl BackoffScheduler {
    /// Creates a scheduler, rejecting policies that would not grow or would start at zero
    pub fn new(policy: BackoffPolicy) -> Result<Self, CaptureError> {
        let BackoffPolicy {
            initial_delay,
            multiplier,
            max_delay,
        } = policy;

        if !initial_delay.is_finite() || initial_delay <= 0.0 {
            return Err(CaptureError::InvalidConfig(format!(
                "initial_delay must be > 0, got {}",
                initial_delay
            )));
        }
        if !multiplier.is_finite() || multiplier <= 1.0 {
            return Err(CaptureError::InvalidConfig(format!(
                "multiplier must be > 1, got {}",
                multiplier
            )));
        }
        if !max_delay.is_finite() || max_delay < initial_delay {
            return Err(CaptureError::InvalidConfig(format!(
                "max_delay must be >= initial_delay ({}), got {}",
                initial_delay, max_delay
            )));
        }

        Ok(Self {
            policy,
            current: initial_delay,
        })
    }

    /// Delay to wait before the next attempt, in seconds
    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn current_duration(&self) -> Duration {
        Duration::from_secs_f64(self.current)
    }

    /// Advances to the next delay and returns it
    pub fn next_delay(&mut self) -> f64 {
        self.current = (self.current * self.policy.multiplier).min(self.policy.max_delay);
        self.current
    }

    /// Resets to the initial delay and returns it
    pub fn reset(&mut self) -> f64 {
        self.current = self.policy.initial_delay;
        self.current
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }
}
