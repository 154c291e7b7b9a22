//! Capped exponential backoff with full jitter for lock-acquisition
//! retries.

use std::time::Duration;

const BASE: Duration = Duration::from_millis(50);
const CAP: Duration = Duration::from_secs(1);

pub fn delay_for_attempt(attempt: u32) -> Duration {
    let exp = BASE.saturating_mul(1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX));
    let capped = exp.min(CAP);
    let jitter_ms = rand::Rng::gen_range(&mut rand::thread_rng(), 0..=capped.as_millis().max(1) as u64);
    Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped() {
        for attempt in 0..20 {
            assert!(delay_for_attempt(attempt) <= CAP);
        }
    }
}
