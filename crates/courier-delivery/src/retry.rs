//! Backoff policy and retry decisions for failed deliveries.
//!
//! With the default policy the k-th retry waits `base_delay * 2^k`, so a
//! one second base gives 2s, 4s, 8s for the three retries a task gets.
//! Delays are capped by `max_delay` and optionally randomized by a jitter
//! factor, which is off by default.

use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_core::Task;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// How delays grow between retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Fixed,
    /// Delay doubles with every retry.
    Exponential,
    /// Delay grows by `base_delay` with every retry.
    Linear,
}

/// Retry timing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retry ceiling stamped on new tasks.
    pub max_retries: u32,

    /// Delay unit the strategy scales.
    pub base_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Randomization as a fraction of the delay (0.0 to 1.0).
    pub jitter_factor: f64,

    /// Growth strategy.
    pub backoff_strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: courier_core::DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3600),
            jitter_factor: 0.0,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry_number` (one-based).
    pub fn delay_for(&self, retry_number: u32) -> Duration {
        let raw = match self.backoff_strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(retry_number),
            BackoffStrategy::Exponential => {
                let multiplier = 2_u32.saturating_pow(retry_number.min(31));
                self.base_delay.saturating_mul(multiplier)
            },
        };

        let capped = raw.min(self.max_delay);
        apply_jitter(capped, self.jitter_factor).min(self.max_delay)
    }
}

/// Everything needed to decide what happens after a failed attempt.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Retries already taken by the task.
    pub retry_count: u32,
    /// The task's retry ceiling.
    pub max_retries: u32,
    /// Why the attempt failed.
    pub error: DeliveryError,
    /// When the attempt failed.
    pub failed_at: DateTime<Utc>,
    /// Timing policy.
    pub policy: RetryPolicy,
}

/// What to do with a task after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-submit after `delay`.
    Retry {
        /// Retry count the task will carry after re-submission.
        retry_count: u32,
        /// Backoff before re-submission.
        delay: Duration,
        /// When the task becomes due.
        next_attempt_at: DateTime<Utc>,
    },
    /// The failure is final.
    GiveUp {
        /// Why no retry is made.
        reason: String,
    },
}

impl RetryContext {
    /// Creates a context from raw counters.
    pub fn new(
        retry_count: u32,
        max_retries: u32,
        error: DeliveryError,
        failed_at: DateTime<Utc>,
        policy: RetryPolicy,
    ) -> Self {
        Self { retry_count, max_retries, error, failed_at, policy }
    }

    /// Creates a context for `task`, using the task's own retry ceiling.
    pub fn for_task(
        task: &Task,
        error: DeliveryError,
        failed_at: DateTime<Utc>,
        policy: RetryPolicy,
    ) -> Self {
        Self::new(task.retry_count, task.max_retries, error, failed_at, policy)
    }

    /// Decides whether and when to retry.
    pub fn decide_retry(&self) -> RetryDecision {
        if self.retry_count >= self.max_retries {
            return RetryDecision::GiveUp {
                reason: format!("maximum retries ({}) exhausted", self.max_retries),
            };
        }

        if !self.error.is_retryable() {
            return RetryDecision::GiveUp {
                reason: format!("non-retryable error: {}", self.error),
            };
        }

        let retry_count = self.retry_count + 1;
        let delay = self.policy.delay_for(retry_count);
        let Ok(chrono_delay) = chrono::Duration::from_std(delay) else {
            return RetryDecision::GiveUp {
                reason: "retry delay duration out of range".to_string(),
            };
        };

        RetryDecision::Retry { retry_count, delay, next_attempt_at: self.failed_at + chrono_delay }
    }
}

/// Randomizes `duration` by up to ±`jitter_factor` of its length.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::from_secs_f64(jittered_secs.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure() -> DeliveryError {
        DeliveryError::http_status(500, "boom")
    }

    #[test]
    fn default_policy_doubles_from_two_seconds() {
        let policy = RetryPolicy::default();

        let delays: Vec<_> = (1..=4).map(|k| policy.delay_for(k)).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
            ]
        );
    }

    #[test]
    fn retry_decision_increments_count_and_sets_due_time() {
        let failed_at = Utc::now();
        let context = RetryContext::new(1, 3, failure(), failed_at, RetryPolicy::default());

        assert_eq!(
            context.decide_retry(),
            RetryDecision::Retry {
                retry_count: 2,
                delay: Duration::from_secs(4),
                next_attempt_at: failed_at + chrono::Duration::seconds(4),
            }
        );
    }

    #[test]
    fn ceiling_ends_retries() {
        let context = RetryContext::new(3, 3, failure(), Utc::now(), RetryPolicy::default());

        match context.decide_retry() {
            RetryDecision::GiveUp { reason } => assert!(reason.contains("exhausted")),
            RetryDecision::Retry { .. } => unreachable!("must not retry at the ceiling"),
        }
    }

    #[test]
    fn zero_ceiling_never_retries() {
        let context = RetryContext::new(0, 0, failure(), Utc::now(), RetryPolicy::default());
        assert!(matches!(context.decide_retry(), RetryDecision::GiveUp { .. }));
    }

    #[test]
    fn non_retryable_errors_give_up() {
        let context = RetryContext::new(
            0,
            3,
            DeliveryError::invalid_request("bad method"),
            Utc::now(),
            RetryPolicy::default(),
        );

        match context.decide_retry() {
            RetryDecision::GiveUp { reason } => assert!(reason.contains("non-retryable")),
            RetryDecision::Retry { .. } => unreachable!("invalid requests are never retried"),
        }
    }

    #[test]
    fn client_errors_are_still_retried() {
        let context = RetryContext::new(
            0,
            3,
            DeliveryError::http_status(404, "not found"),
            Utc::now(),
            RetryPolicy::default(),
        );
        assert!(matches!(context.decide_retry(), RetryDecision::Retry { retry_count: 1, .. }));
    }

    #[test]
    fn for_task_uses_task_counters() {
        let mut task = Task::new(
            courier_core::NotificationRequest::new("http://localhost/x", "POST"),
            5,
            Utc::now(),
        );
        task.record_retry(Utc::now());

        let context = RetryContext::for_task(&task, failure(), Utc::now(), RetryPolicy::default());
        assert_eq!(context.retry_count, 1);
        assert_eq!(context.max_retries, 5);
    }

    #[test]
    fn max_delay_enforced() {
        let policy = RetryPolicy { max_delay: Duration::from_secs(60), ..Default::default() };

        assert_eq!(policy.delay_for(10), Duration::from_secs(60));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn linear_and_fixed_strategies() {
        let linear = RetryPolicy {
            backoff_strategy: BackoffStrategy::Linear,
            base_delay: Duration::from_secs(5),
            ..Default::default()
        };
        let fixed = RetryPolicy { backoff_strategy: BackoffStrategy::Fixed, ..linear.clone() };

        assert_eq!(linear.delay_for(1), Duration::from_secs(5));
        assert_eq!(linear.delay_for(3), Duration::from_secs(15));
        assert_eq!(fixed.delay_for(1), Duration::from_secs(5));
        assert_eq!(fixed.delay_for(3), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base_delay = Duration::from_secs(10);
        let mut seen_delays = std::collections::HashSet::new();

        for _ in 0..20 {
            let jittered = apply_jitter(base_delay, 0.5);
            seen_delays.insert(jittered.as_millis());
        }

        assert!(seen_delays.len() > 1, "jitter should create variation");
        for &delay_ms in &seen_delays {
            assert!((5_000..=15_000).contains(&delay_ms), "delay out of range: {delay_ms}ms");
        }
    }

    #[test]
    fn strategy_names_are_lowercase() {
        assert_eq!(serde_json::to_string(&BackoffStrategy::Exponential).unwrap(), "\"exponential\"");
        let parsed: BackoffStrategy = serde_json::from_str("\"linear\"").unwrap();
        assert_eq!(parsed, BackoffStrategy::Linear);
    }
}
