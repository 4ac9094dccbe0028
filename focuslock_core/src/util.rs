//! Period helpers for f64 loop rates.

use std::time::Duration;

/// Loop period for `hz`, or zero when `hz` is not a positive finite rate.
#[inline]
pub fn period(hz: f64) -> Duration {
    if hz > 0.0 {
        Duration::try_from_secs_f64(1.0 / hz).unwrap_or(Duration::ZERO)
    } else {
        Duration::ZERO
    }
}

/// Time left in a period after `elapsed`; never negative.
#[inline]
pub fn residual(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}

/// Seconds to `Duration`, treating negative or NaN input as zero and overflow as `None`.
#[inline]
pub fn secs(s: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(s.max(0.0)).ok()
}
