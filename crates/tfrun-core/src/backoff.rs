use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::RunError;

/// `min(min_ms * 2^(iter/5), max_ms)` milliseconds, rounded down.
///
/// The exponent grows by one every five iterations, so the delay doubles
/// every fifth step until it reaches the cap.
pub fn backoff(min_ms: u64, max_ms: u64, iter: u32) -> Duration {
    let grown = (min_ms as f64) * 2f64.powf(f64::from(iter) / 5.0);
    let capped = grown.min(max_ms as f64);
    Duration::from_millis(capped.max(0.0).floor() as u64)
}

/// Sleep for `duration` unless `cancel` fires first.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<(), RunError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RunError::cancelled()),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
