use std::time::Duration;

use rand::Rng;

/// Exponential retry delay: `base · 2^(attempts_made - 1)`.
pub fn retry_delay(base: Duration, attempts_made: u32) -> Duration {
    let exponent = attempts_made.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent)
}

/// "Equal jitter": the delay lands in `[backoff/2, backoff]`.
pub fn jittered_backoff(rng: &mut impl Rng, backoff: Duration) -> Duration {
    let backoff_ms = backoff.as_millis() as u64;
    if backoff_ms <= 1 {
        return backoff;
    }
    let half_ms = backoff_ms / 2;
    let jitter_ms = rng.gen_range(0..=half_ms);
    Duration::from_millis(half_ms.saturating_add(jitter_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn delay_doubles_per_attempt() {
        let base = Duration::from_secs(1);
        assert_eq!(retry_delay(base, 1), Duration::from_secs(1));
        assert_eq!(retry_delay(base, 2), Duration::from_secs(2));
        assert_eq!(retry_delay(base, 4), Duration::from_secs(8));
        assert_eq!(retry_delay(base, 0), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_upper_half() {
        let mut rng = StdRng::seed_from_u64(7);
        let backoff = Duration::from_millis(1_000);
        for _ in 0..200 {
            let delay = jittered_backoff(&mut rng, backoff);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= backoff);
        }
        assert_eq!(jittered_backoff(&mut rng, Duration::from_millis(1)), Duration::from_millis(1));
    }
}
