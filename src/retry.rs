//! Retry thresholds and per-field failure counters

use std::time::Duration;

use crate::registry::{FieldDescriptor, FieldId};

/// What to do after a response timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait until `resume_at` (ms) and send again
    Retry { resume_at: u64 },
    /// Attempts exhausted, the field is unreachable for this cycle
    GiveUp,
}

/// Timeout and attempt budget of one field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Response timeout, also used as backoff between attempts
    pub retry_interval: Duration,
    /// Attempts per poll (0 behaves like 1)
    pub retry_count: u8,
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(retry_interval: Duration, retry_count: u8) -> Self {
        Self {
            retry_interval,
            retry_count,
        }
    }

    /// Resolve a field's overrides against engine defaults
    pub fn for_field(descriptor: &FieldDescriptor, defaults: RetryPolicy) -> Self {
        Self {
            retry_interval: descriptor.retry_interval.unwrap_or(defaults.retry_interval),
            retry_count: descriptor.retry_count.unwrap_or(defaults.retry_count),
        }
    }

    /// Total attempts allowed per poll
    #[inline]
    pub fn attempts(&self) -> u8 {
        self.retry_count.max(1)
    }

    /// Timeout in milliseconds
    #[inline]
    pub fn interval_ms(&self) -> u64 {
        self.retry_interval.as_millis() as u64
    }

    /// Record a timeout of attempt number `attempt` (1-based)
    pub fn on_timeout(&self, state: &mut RetryState, attempt: u8, now_ms: u64) -> RetryDecision {
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if attempt < self.attempts() {
            RetryDecision::Retry {
                resume_at: now_ms.saturating_add(self.interval_ms()),
            }
        } else {
            RetryDecision::GiveUp
        }
    }

    /// Record a successful response
    #[inline]
    pub fn on_success(&self, state: &mut RetryState) {
        state.consecutive_failures = 0;
    }
}

/// Failure counter of one field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Field this counter belongs to
    pub field_id: FieldId,
    /// Timeouts since the last successful response
    pub consecutive_failures: u32,
}

impl RetryState {
    /// Fresh counter
    pub fn new(field_id: FieldId) -> Self {
        Self {
            field_id,
            consecutive_failures: 0,
        }
    }
}
