use std::time::Duration;

use rand::Rng;

/// Delay before retry `attempt` (1-based). The delay doubles per failed
/// attempt starting from `base_ms` and is clamped to `max_ms`; up to a
/// quarter of random jitter keeps lockstep callers from retrying in
/// unison. Attempt 0 yields no delay.
pub fn calculate_backoff(attempt: u8, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let mut delay_ms = base_ms;
    for _ in 1..attempt {
        delay_ms = delay_ms.saturating_mul(2);
        if delay_ms >= max_ms {
            delay_ms = max_ms;
            break;
        }
    }

    let spread = delay_ms / 4;
    let jittered = delay_ms.saturating_add(rand::rng().random_range(0..=spread));

    Duration::from_millis(jittered.min(max_ms))
}
