//! Retry logic with exponential backoff for transient Torbox failures.
//!
//! When a request fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - network failures, 5xx, 408/425
//! - [`FailureType::RateLimited`] - HTTP 429 (honours `Retry-After`)
//! - [`FailureType::Permanent`] - everything else, propagated on first failure
//!
//! The [`RetryPolicy`] then decides whether to retry based on failure type and
//! attempt count. Delays are deterministic: `base * 2^(attempt-1)`, capped.
//!
//! # Example
//!
//! ```
//! use torbox_core::torbox::{FailureType, RetryDecision, RetryPolicy, TorboxError, classify_error};
//!
//! let policy = RetryPolicy::default();
//! let error = TorboxError::http_status("/v1/api/integration/jobs", 503, "busy", None);
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::time::Duration;

use tracing::{debug, instrument};

use super::TorboxError;

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff.
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default maximum delay cap.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// HTTP statuses that are always worth retrying, regardless of kind.
const RETRYABLE_STATUSES: [u16; 7] = [408, 425, 429, 500, 502, 503, 504];

/// Classification of request failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    Transient,

    /// Failure that won't succeed regardless of retries.
    Permanent,

    /// Server rate limiting (HTTP 429).
    RateLimited,
}

/// Decision on whether to retry a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 4 (initial attempt + 3 retries)
/// - `base_delay`: 500ms
/// - `max_delay`: 10 seconds
/// - `backoff_multiplier`: 2.0
///
/// With defaults, delays are 500ms, 1s, 2s before attempts run out.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Delay before the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied each attempt.
    backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES + 1,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// `max_attempts` includes the initial attempt and is clamped to at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Creates a policy allowing `max_retries` retries after the first attempt.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            ..Self::default()
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::with_max_retries(0)
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay cap.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[instrument(level = "debug", skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.delay_for_attempt(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Backoff delay after the given failed attempt.
    ///
    /// Formula: `min(base_delay * multiplier^(attempt-1), max_delay)`
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * self.backoff_multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }
}

/// Classifies a client error into a failure type for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | Network / Timeout | Transient |
/// | HTTP 429 | RateLimited |
/// | HTTP 5xx | Transient |
/// | HTTP 408, 425 | Transient |
/// | Other HTTP | Permanent |
/// | Rejected envelope, invalid response, missing key | Permanent |
#[must_use]
pub fn classify_error(error: &TorboxError) -> FailureType {
    match error {
        TorboxError::Network { .. } | TorboxError::Timeout { .. } => FailureType::Transient,
        TorboxError::HttpStatus { status, .. } => classify_http_status(*status),
        TorboxError::AuthMissing
        | TorboxError::Rejected { .. }
        | TorboxError::InvalidResponse { .. }
        | TorboxError::InvalidUrl { .. }
        | TorboxError::NoLinksYet { .. }
        | TorboxError::ClientBuild(_) => FailureType::Permanent,
    }
}

fn classify_http_status(status: u16) -> FailureType {
    match status {
        429 => FailureType::RateLimited,
        500..=599 => FailureType::Transient,
        status if RETRYABLE_STATUSES.contains(&status) => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}
