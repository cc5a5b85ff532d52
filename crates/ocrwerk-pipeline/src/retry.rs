// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retry policy for page failures: exponential backoff with jitter.
//
// Only transient failures (timeouts, crashed engines, temp-file I/O) are
// retried. Bad input and missing software fail the page straight away.

use std::time::Duration;

use ocrwerk_core::PageFailure;
use ocrwerk_core::config::RetrySettings;
use tracing::{debug, info, warn};

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first.
    pub max_retries: u32,
    /// Base delay between retries (exponential backoff).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

/// Result of evaluating whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after this delay.
    RetryAfter(Duration),
    /// Do not retry; the failure is permanent.
    GiveUp,
    /// Maximum retries exhausted.
    Exhausted,
}

/// Decide whether page work that failed on its `attempt`-th try (0-based)
/// should run again.
pub fn should_retry(failure: &PageFailure, attempt: u32, config: &RetryConfig) -> RetryDecision {
    if !failure.retryable {
        info!(page = failure.page, kind = %failure.kind, "permanent page failure, not retrying");
        return RetryDecision::GiveUp;
    }
    if attempt >= config.max_retries {
        warn!(page = failure.page, attempt, max = config.max_retries, "retry limit exhausted");
        return RetryDecision::Exhausted;
    }
    let delay = compute_delay(attempt, config);
    debug!(page = failure.page, attempt, delay_ms = delay.as_millis() as u64, "scheduling retry");
    RetryDecision::RetryAfter(delay)
}

/// delay = min(base * 2^attempt + jitter, max_delay), jitter in [0, base).
fn compute_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_ms = config.base_delay.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(1u64 << attempt.min(10));
    let total_ms = exp_ms.saturating_add(jitter(base_ms, attempt));
    Duration::from_millis(total_ms.min(config.max_delay.as_millis() as u64))
}

/// Deterministic spread over [0, base) keyed by the attempt number.
fn jitter(base_ms: u64, attempt: u32) -> u64 {
    let hash = (attempt as u64).wrapping_mul(6364136223846793005);
    hash % base_ms.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocrwerk_core::PageFailureKind;

    #[test]
    fn timeout_is_retried() {
        let failure = PageFailure::new(3, PageFailureKind::OcrTimeout, "slow");
        assert!(matches!(
            should_retry(&failure, 0, &RetryConfig::default()),
            RetryDecision::RetryAfter(_)
        ));
    }

    #[test]
    fn bad_input_is_permanent() {
        let failure = PageFailure::new(3, PageFailureKind::RasterFailed, "corrupt page");
        assert_eq!(should_retry(&failure, 0, &RetryConfig::default()), RetryDecision::GiveUp);
        let overridden = PageFailure::new(3, PageFailureKind::Io, "disk full").with_retryable(false);
        assert_eq!(should_retry(&overridden, 0, &RetryConfig::default()), RetryDecision::GiveUp);
    }

    #[test]
    fn retry_respects_max() {
        let config = RetryConfig {
            max_retries: 3,
            ..Default::default()
        };
        let failure = PageFailure::new(1, PageFailureKind::OcrEngineCrashed, "signal 9");
        assert!(matches!(should_retry(&failure, 2, &config), RetryDecision::RetryAfter(_)));
        assert_eq!(should_retry(&failure, 3, &config), RetryDecision::Exhausted);

        let never = RetryConfig {
            max_retries: 0,
            ..Default::default()
        };
        assert_eq!(should_retry(&failure, 0, &never), RetryDecision::Exhausted);
    }

    #[test]
    fn delay_increases_with_attempts() {
        let config = RetryConfig::default();
        let d0 = compute_delay(0, &config);
        let d1 = compute_delay(1, &config);
        let d2 = compute_delay(2, &config);
        assert!(d1 > d0);
        assert!(d2 > d1);
    }

    #[test]
    fn delay_capped_at_max() {
        let config = RetryConfig {
            max_delay: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(compute_delay(20, &config) <= Duration::from_secs(1));
    }

    #[test]
    fn settings_convert() {
        let config = RetryConfig::from(&RetrySettings {
            max_retries: 4,
            base_delay_ms: 10,
            max_delay_ms: 80,
        });
        assert_eq!(config.max_retries, 4);
        assert_eq!(config.base_delay, Duration::from_millis(10));
        assert_eq!(config.max_delay, Duration::from_millis(80));
    }
}
