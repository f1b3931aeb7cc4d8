//! When a failed GitHub REST attempt is worth repeating, and after how long.
//!
//! GitHub signals throttling in two ways: secondary rate limits answer 403 or
//! 429 with `retry-after`, while an exhausted primary quota answers 403 with
//! `x-ratelimit-remaining: 0` and an epoch `x-ratelimit-reset`. Plain 403s are
//! permission failures and never retried.

use std::time::Duration;

use reqwest::header::HeaderMap;

const MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Longer waits would hold a webhook delivery open past any useful point.
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

/// Throttling hints GitHub attached to a non-success response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitHint {
    pub retry_after: Option<Duration>,
    pub reset_in: Option<Duration>,
    pub quota_exhausted: bool,
}

impl RateLimitHint {
    pub fn from_headers(headers: &HeaderMap, now_unix_secs: u64) -> Self {
        let header_u64 = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
        };
        Self {
            retry_after: header_u64("retry-after").map(Duration::from_secs),
            reset_in: header_u64("x-ratelimit-reset")
                .map(|reset| Duration::from_secs(reset.saturating_sub(now_unix_secs))),
            quota_exhausted: header_u64("x-ratelimit-remaining") == Some(0),
        }
    }

    fn is_throttled(&self) -> bool {
        self.retry_after.is_some() || self.quota_exhausted
    }

    fn wait(&self) -> Option<Duration> {
        self.retry_after
            .or(if self.quota_exhausted { self.reset_in } else { None })
    }
}

/// Why one attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptFailure {
    Status { status: u16, hint: RateLimitHint },
    Transport { transient: bool },
}

impl AttemptFailure {
    pub fn transport(error: &reqwest::Error) -> Self {
        Self::Transport {
            transient: error.is_timeout() || error.is_connect() || error.is_request(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms.max(1)),
        }
    }

    /// `attempt` is 1-based and counts the attempt that just failed.
    pub fn decide(&self, attempt: usize, failure: AttemptFailure) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        match failure {
            AttemptFailure::Transport { transient: true } => RetryDecision::Retry {
                delay: self.backoff(attempt),
            },
            AttemptFailure::Transport { transient: false } => RetryDecision::GiveUp,
            AttemptFailure::Status { status, hint }
                if status == 429 || (status == 403 && hint.is_throttled()) =>
            {
                match hint.wait() {
                    Some(wait) if wait > MAX_RATE_LIMIT_WAIT => RetryDecision::GiveUp,
                    Some(wait) => RetryDecision::Retry {
                        delay: wait.max(self.base_delay),
                    },
                    None => RetryDecision::Retry {
                        delay: self.backoff(attempt),
                    },
                }
            }
            AttemptFailure::Status { status, hint } if status >= 500 => RetryDecision::Retry {
                delay: hint
                    .retry_after
                    .filter(|wait| *wait <= MAX_RATE_LIMIT_WAIT)
                    .map_or_else(|| self.backoff(attempt), |wait| wait.max(self.base_delay)),
            },
            AttemptFailure::Status { .. } => RetryDecision::GiveUp,
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10) as u32;
        self.base_delay
            .saturating_mul(1_u32 << exponent)
            .min(MAX_BACKOFF)
    }
}
