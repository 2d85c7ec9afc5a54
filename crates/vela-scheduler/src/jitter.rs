//! Randomised delays.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A duration between `base` and `base + max_factor * base`.
///
/// A non-positive factor is treated as `1.0`.
pub fn jitter(base: Duration, max_factor: f64) -> Duration {
    let factor = if max_factor <= 0.0 { 1.0 } else { max_factor };
    base + base.mul_f64(rand::random::<f64>() * factor)
}

/// Sleep for `duration` unless `cancel` fires first.
///
/// Returns `false` when cancelled.
pub async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
