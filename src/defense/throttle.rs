//! Progressive response delay.
//!
//! Pure computation; the pipeline performs the actual sleep so this stays
//! trivially testable.

/// Delay to apply for the `used`-th request in the current window.
///
/// Zero through `delay_after` requests incur no delay; each request past
/// that adds `per_request_delay_ms`, capped at `max_delay_ms`.
pub fn delay_for(used: i64, delay_after: i64, per_request_delay_ms: u64, max_delay_ms: u64) -> u64 {
    if used <= delay_after {
        return 0;
    }
    let over = (used - delay_after) as u64;
    over.saturating_mul(per_request_delay_ms).min(max_delay_ms)
}
