//! Retry classification and backoff calculations for transfers

use fetchup_config::RetryConfig;
use fetchup_errors::{Error, ErrorKind};
use std::time::Duration;

/// Whether a failed attempt may be retried.
///
/// Only transient transfer failures (network, timeout, 5xx, 429) qualify;
/// 4xx responses, malformed URLs and local disk errors fail immediately.
#[must_use]
pub fn is_transient(error: &Error) -> bool {
    error.kind() == ErrorKind::TransientTransfer
}

/// Calculate exponential backoff delay with jitter
///
/// `attempt` is the number of the attempt that just failed, starting at 1.
#[must_use]
pub fn calculate_backoff_delay(retry_config: &RetryConfig, attempt: u32) -> Duration {
    // Precision loss acceptable for backoff calculations
    #[allow(clippy::cast_precision_loss)]
    let base_delay = retry_config.initial_delay_ms as f64;
    #[allow(clippy::cast_precision_loss)]
    let max_delay = retry_config.max_delay_ms as f64;

    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let delay = (base_delay * retry_config.backoff_multiplier.powi(exponent)).min(max_delay);

    let jitter = delay * retry_config.jitter_factor * (rand::random::<f64>() - 0.5);
    // Safe cast: max(0.0) ensures non-negative, round() handles fractional part
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let final_delay = (delay + jitter).max(0.0).round() as u64;

    Duration::from_millis(final_delay)
}
