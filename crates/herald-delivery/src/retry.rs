//! Exponential backoff retry policy with jitter.
//!
//! Decides whether a failed notification event gets another attempt and
//! when. The policy is pure apart from the jitter source: it reads the event
//! and the supplied `now`, and never touches storage.

use std::time::Duration;

use chrono::{DateTime, Utc};
use herald_core::{DeliveryStatus, NotificationEvent, DEFAULT_MAX_RETRIES};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy configuration for webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retry ceiling for events that do not carry their own `max_retries`.
    pub max_retries: u32,

    /// Base delay for exponential backoff calculation.
    pub base_delay: Duration,

    /// Cap applied to the exponential delay before jitter.
    pub max_delay: Duration,

    /// Jitter percentage (0.0 to 1.0) to add randomness.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.2,
        }
    }
}

/// Result of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule another attempt.
    Retry {
        /// When the next delivery attempt may be made
        next_attempt_at: DateTime<Utc>,
        /// Human-readable progress, e.g. "retry 2 of 5"
        reason: String,
    },
    /// Stop retrying.
    GiveUp {
        /// Reason why the delivery should not be retried
        reason: String,
    },
}

impl RetryDecision {
    /// Whether another attempt should be scheduled.
    pub fn should_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }

    /// Diagnostic reason attached to either outcome.
    pub fn reason(&self) -> &str {
        match self {
            Self::Retry { reason, .. } | Self::GiveUp { reason } => reason,
        }
    }
}

impl RetryPolicy {
    /// Retry ceiling for `event`: its own `max_retries` when positive,
    /// otherwise the policy default.
    pub fn max_retries_for(&self, event: &NotificationEvent) -> u32 {
        if event.max_retries > 0 {
            event.max_retries
        } else {
            self.max_retries
        }
    }

    /// Unjittered delay: `min(base_delay * 2^retry_count, max_delay)`.
    pub fn capped_delay(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.min(31);
        let multiplier = 2_u32.saturating_pow(exponent);
        std::cmp::min(self.base_delay.saturating_mul(multiplier), self.max_delay)
    }

    /// Delay before the next attempt after `retry_count` failures.
    ///
    /// Jitter is applied after capping, so the result may exceed
    /// `max_delay` by up to `jitter_factor`.
    pub fn delay(&self, retry_count: u32) -> Duration {
        apply_jitter(self.capped_delay(retry_count), self.jitter_factor)
    }

    /// Decides whether `event` gets another attempt, evaluated at `now`.
    ///
    /// Rules apply in order and the first match wins: completed events are
    /// never retried, exhausted events are never retried, events whose
    /// `next_retry_date` is still in the future are not retried yet, and
    /// everything else is retried after [`RetryPolicy::delay`].
    pub fn decide(&self, event: &NotificationEvent, now: DateTime<Utc>) -> RetryDecision {
        if event.delivery_status == DeliveryStatus::Completed {
            return RetryDecision::GiveUp { reason: "event already delivered".to_string() };
        }

        let max_retries = self.max_retries_for(event);
        if event.retry_count >= max_retries {
            return RetryDecision::GiveUp {
                reason: format!("maximum retries reached ({max_retries})"),
            };
        }

        if let Some(next_retry_date) = event.next_retry_date {
            if next_retry_date > now {
                return RetryDecision::GiveUp {
                    reason: format!("too early to retry, next attempt at {next_retry_date}"),
                };
            }
        }

        let delay = self.delay(event.retry_count);
        let next_attempt_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|chrono_delay| now.checked_add_signed(chrono_delay));
        let Some(next_attempt_at) = next_attempt_at else {
            return RetryDecision::GiveUp {
                reason: "retry delay duration out of range".to_string(),
            };
        };

        RetryDecision::Retry {
            next_attempt_at,
            reason: format!("retry {} of {max_retries}", event.retry_count),
        }
    }
}

/// Applies jitter to a duration to prevent thundering herd effects.
///
/// Randomizes the delay by ±jitter_factor percentage. For example, with
/// jitter_factor=0.2, a 10s delay becomes 8s to 12s randomly.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
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
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy { jitter_factor: 0.0, ..RetryPolicy::default() }
    }

    fn failed_event(retry_count: u32) -> NotificationEvent {
        let mut event = NotificationEvent::new("evt-1", "order.created", json!({}), Utc::now());
        event.retry_count = retry_count;
        event
    }

    #[test]
    fn exponential_backoff_increases_correctly() {
        let policy = no_jitter();
        let delays: Vec<_> = (0..5).map(|n| policy.delay(n)).collect();

        assert_eq!(delays, [1, 2, 4, 8, 16].map(Duration::from_secs));
    }

    #[test]
    fn backoff_is_capped_before_jitter() {
        let policy = no_jitter();
        assert_eq!(policy.delay(6), Duration::from_secs(60));
        assert_eq!(policy.delay(40), Duration::from_secs(60));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn completed_events_are_never_retried() {
        let mut event = failed_event(0);
        event.mark_completed();

        let decision = no_jitter().decide(&event, Utc::now());
        assert_eq!(decision.reason(), "event already delivered");
        assert!(!decision.should_retry());
    }

    #[test]
    fn retry_respects_maximum_retries() {
        let event = failed_event(5);

        match no_jitter().decide(&event, Utc::now()) {
            RetryDecision::GiveUp { reason } => {
                assert_eq!(reason, "maximum retries reached (5)");
            },
            RetryDecision::Retry { .. } => {
                unreachable!("should not retry when retries are exhausted");
            },
        }
    }

    #[test]
    fn event_ceiling_overrides_policy_default() {
        let event = failed_event(2).with_max_retries(2);
        assert!(!no_jitter().decide(&event, Utc::now()).should_retry());

        let event = failed_event(2).with_max_retries(0);
        assert!(no_jitter().decide(&event, Utc::now()).should_retry());
    }

    #[test]
    fn premature_reevaluation_is_rejected() {
        let now = Utc::now();
        let mut event = failed_event(1);
        event.schedule_retry(now + ChronoDuration::seconds(30));

        let decision = no_jitter().decide(&event, now);
        assert!(decision.reason().starts_with("too early"));
    }

    #[test]
    fn retry_schedules_from_now() {
        let now = Utc::now();
        let event = failed_event(2);

        match no_jitter().decide(&event, now) {
            RetryDecision::Retry { next_attempt_at, reason } => {
                assert_eq!(next_attempt_at, now + ChronoDuration::seconds(4));
                assert_eq!(reason, "retry 2 of 5");
            },
            RetryDecision::GiveUp { reason } => unreachable!("unexpected give up: {reason}"),
        }
    }

    #[test]
    fn unrepresentable_retry_time_gives_up() {
        let huge = Duration::from_millis(8_000_000_000_000_000_000);
        let policy = RetryPolicy { base_delay: huge, max_delay: huge, ..no_jitter() };

        let decision = policy.decide(&failed_event(0), Utc::now());

        assert!(!decision.should_retry());
        assert_eq!(decision.reason(), "retry delay duration out of range");
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let delay = policy.delay(3).as_secs_f64();
            assert!((6.399..=9.601).contains(&delay), "delay {delay} out of bounds");
        }
    }
}
