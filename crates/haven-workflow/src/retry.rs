use rand::Rng;

use crate::types::{RetryPolicy, RetryStrategy};

/// Delay before re-running a step whose `attempt`-th try just failed
/// (1-based).
///
/// - fixed: `base`
/// - linear: `base × attempt`, capped
/// - exponential: `base × 2^(attempt-1) + jitter ∈ [0, base)`, capped
pub fn delay_for(policy: &RetryPolicy, attempt: u32) -> std::time::Duration {
    let base = policy.base_delay_ms;
    let ms = match policy.strategy {
        RetryStrategy::Fixed => base,
        RetryStrategy::Linear => base.saturating_mul(attempt as u64),
        RetryStrategy::Exponential => {
            let factor = 1u64 << (attempt.saturating_sub(1)).min(32);
            let jitter = if base > 0 {
                rand::thread_rng().gen_range(0..base)
            } else {
                0
            };
            base.saturating_mul(factor).saturating_add(jitter)
        }
    };
    std::time::Duration::from_millis(ms.min(policy.max_delay_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(strategy: RetryStrategy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            strategy,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
            retryable_errors: Vec::new(),
        }
    }

    #[test]
    fn fixed_is_constant() {
        let p = policy(RetryStrategy::Fixed);
        for attempt in 1..5 {
            assert_eq!(delay_for(&p, attempt).as_millis(), 100);
        }
    }

    #[test]
    fn linear_grows_and_caps() {
        let p = policy(RetryStrategy::Linear);
        assert_eq!(delay_for(&p, 1).as_millis(), 100);
        assert_eq!(delay_for(&p, 3).as_millis(), 300);
        assert_eq!(delay_for(&p, 50).as_millis(), 2_000);
    }

    #[test]
    fn exponential_doubles_with_bounded_jitter() {
        let p = policy(RetryStrategy::Exponential);
        for _ in 0..50 {
            let d1 = delay_for(&p, 1).as_millis() as u64;
            assert!((100..200).contains(&d1), "attempt 1: {d1}");
            let d3 = delay_for(&p, 3).as_millis() as u64;
            assert!((400..500).contains(&d3), "attempt 3: {d3}");
        }
    }

    #[test]
    fn exponential_caps_at_max_delay() {
        let p = policy(RetryStrategy::Exponential);
        assert_eq!(delay_for(&p, 20).as_millis(), 2_000);
    }
}
