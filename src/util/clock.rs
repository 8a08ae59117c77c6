//! Wall-clock helpers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// Upper bound for timer deadlines, roughly thirty years out.
pub const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Milliseconds since the Unix epoch; zero if the system clock predates it.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Instant `after` from now, clamped to [`FAR_FUTURE`] instead of overflowing.
#[must_use]
pub fn deadline_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after.min(FAR_FUTURE))
        .unwrap_or_else(|| now + Duration::from_secs(86_400))
}
