//! Retry backoff
//!
//! Full-jitter exponential backoff: the delay for attempt `n` is drawn
//! uniformly from `[0, min(cap, 2 * 2^n)]` seconds. Full jitter spreads
//! retry storms after a shared dependency outage.

use rand::Rng;

/// Delay in seconds before retrying after the given failed attempt
/// (0-based).
pub fn backoff_with_jitter(attempt: u32, cap_secs: u64) -> u64 {
    let ceiling = 2u64
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(cap_secs);
    rand::thread_rng().gen_range(0..=ceiling)
}
