//! Retry policy for same-credential retries and the rotation budget

use std::time::Duration;
use log::debug;

use crate::config::FailoverConfig;

/// Retry policy for transient failures on one credential
#[derive(Debug, Clone)]
pub struct RetryPolicy
{   /// Total attempts, including the first
    pub max_attempts: usize
  , pub backoff_multiplier: f32
  , pub initial_backoff: Duration
}

impl RetryPolicy
{   /// Create a new retry policy
    pub fn new(
      max_attempts: usize
    , backoff_multiplier: f32
    , initial_backoff_ms: u64
    ) -> Self
    {   RetryPolicy
        {   max_attempts: max_attempts.max(1)
          , backoff_multiplier
          , initial_backoff: Duration::from_millis(
              initial_backoff_ms
            )
        }
    }

    /// A single attempt, no retries
    pub fn once() -> Self
    {   RetryPolicy::new(1, 1.0, 0)
    }

    /// Backoff before retry number `attempt` (1-based)
    pub fn backoff_for_attempt(
      &self
    , attempt: usize
    ) -> Duration
    {   debug!("Calculating backoff for attempt {}", attempt);
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let multiplier
          = self.backoff_multiplier.powi(exponent);
        Duration::from_millis(
          (self.initial_backoff.as_millis() as f32
            * multiplier) as u64
        )
    }

    /// Whether another attempt is allowed after `attempts` tries
    pub fn allows_another(&self, attempts: usize) -> bool
    {   attempts < self.max_attempts
    }
}

impl Default for RetryPolicy
{   fn default() -> Self
    {   RetryPolicy::new(3, 2.0, 100)
    }
}

impl From<&FailoverConfig> for RetryPolicy
{   fn from(config: &FailoverConfig) -> Self
    {   RetryPolicy::new(
          config.max_attempts
        , config.backoff_multiplier
        , config.initial_backoff_ms
        )
    }
}

/// Upper bound on credential rotations within one logical call.
///
/// Every rotation bumps some credential's error count, and a credential
/// leaves the pool once it reaches the quarantine threshold, so
/// `usable × threshold` rotations cover the whole pool.
#[derive(Debug, Clone)]
pub struct RotationBudget
{   pub remaining: usize
  , pub used: usize
}

impl RotationBudget
{   pub fn new(
      usable_credentials: usize
    , quarantine_threshold: u32
    ) -> Self
    {   let remaining = (usable_credentials
          * quarantine_threshold as usize).max(1);
        debug!("Rotation budget of {}", remaining);
        RotationBudget
        {   remaining
          , used: 0
        }
    }

    /// Consume one rotation; false once the budget is spent
    pub fn take(&mut self) -> bool
    {   if self.remaining == 0
        {   return false;
        }
        self.remaining -= 1;
        self.used += 1;
        true
    }
}
