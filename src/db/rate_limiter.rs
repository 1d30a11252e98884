use rsb_derive::Builder;
use std::sync::Mutex;
use tokio::time::Instant;

/// How often the base capacity may grow, and by how much. Firestore asks
/// clients to ramp traffic up following the 500/50/5 rule: start at 500
/// ops/sec and increase by 50% every 5 minutes.
pub(crate) const RATE_LIMITER_GROWTH_INTERVAL_MS: u64 = 300_000;
pub(crate) const RATE_LIMITER_GROWTH_FACTOR: f64 = 1.5;

#[derive(Debug, Eq, PartialEq, Clone, Builder)]
pub struct FirestoreRateLimiterOptions {
    #[default = "500"]
    pub initial_ops_per_second: usize,

    #[default = "10_000"]
    pub max_ops_per_second: usize,
}

/// Token bucket refilling continuously at the current capacity. Capacity
/// itself ramps from `initial_ops_per_second` towards `max_ops_per_second`
/// multiplying by 1.5 every 5 minutes. Driven by a monotonic clock so wall
/// clock jumps cannot shrink the apparent capacity.
pub struct FirestoreRateLimiter {
    options: FirestoreRateLimiterOptions,
    state: Mutex<RateLimiterState>,
}

struct RateLimiterState {
    available_tokens: f64,
    last_refill: Instant,
    started_at: Instant,
}

impl FirestoreRateLimiter {
    pub fn new(options: FirestoreRateLimiterOptions) -> Self {
        let now = Instant::now();
        let available_tokens = options.initial_ops_per_second as f64;
        Self {
            options,
            state: Mutex::new(RateLimiterState {
                available_tokens,
                last_refill: now,
                started_at: now,
            }),
        }
    }

    /// The current sustained capacity in ops/sec.
    pub fn current_capacity(&self) -> usize {
        let state = self.state.lock().expect("rate limiter lock");
        self.capacity_at(&state, Instant::now()) as usize
    }

    fn capacity_at(&self, state: &RateLimiterState, now: Instant) -> f64 {
        let elapsed_ms = now.duration_since(state.started_at).as_millis() as u64;
        let growth_steps = (elapsed_ms / RATE_LIMITER_GROWTH_INTERVAL_MS) as i32;
        let capacity =
            (self.options.initial_ops_per_second as f64) * RATE_LIMITER_GROWTH_FACTOR.powi(growth_steps);
        capacity.min(self.options.max_ops_per_second as f64)
    }

    fn refill(&self, state: &mut RateLimiterState, now: Instant) -> f64 {
        let capacity = self.capacity_at(state, now);
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.available_tokens = (state.available_tokens + elapsed * capacity).min(capacity);
        state.last_refill = now;
        capacity
    }

    /// Takes `ops` tokens when available. No partial takes.
    pub fn try_make_request(&self, ops: usize) -> bool {
        let mut state = self.state.lock().expect("rate limiter lock");
        let now = Instant::now();
        self.refill(&mut state, now);
        if (ops as f64) <= state.available_tokens {
            state.available_tokens -= ops as f64;
            true
        } else {
            false
        }
    }

    /// Milliseconds until `ops` tokens could be taken: `0` when the request
    /// is already satisfiable, `None` when it exceeds the current capacity
    /// and waiting at this capacity would never help.
    pub fn next_request_delay_ms(&self, ops: usize) -> Option<u64> {
        let mut state = self.state.lock().expect("rate limiter lock");
        let now = Instant::now();
        let capacity = self.refill(&mut state, now);
        if (ops as f64) <= state.available_tokens {
            Some(0)
        } else if (ops as f64) > capacity {
            None
        } else {
            let missing = ops as f64 - state.available_tokens;
            Some((1000.0 * missing / capacity).ceil() as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn small_limiter() -> FirestoreRateLimiter {
        FirestoreRateLimiter::new(
            FirestoreRateLimiterOptions::new()
                .with_initial_ops_per_second(500)
                .with_max_ops_per_second(10_000),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_headroom_then_denial() {
        let limiter = small_limiter();
        assert!(limiter.try_make_request(250));
        assert!(limiter.try_make_request(250));
        assert!(!limiter.try_make_request(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_refill_at_capacity_rate() {
        let limiter = small_limiter();
        assert!(limiter.try_make_request(500));
        assert!(!limiter.try_make_request(500));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.try_make_request(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_is_zero_when_satisfiable() {
        let limiter = small_limiter();
        assert_eq!(limiter.next_request_delay_ms(500), Some(0));
        assert!(limiter.try_make_request(500));
        // 100 missing tokens at 500/sec is 200ms
        assert_eq!(limiter.next_request_delay_ms(100), Some(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_request_never_satisfiable() {
        let limiter = small_limiter();
        assert_eq!(limiter.next_request_delay_ms(501), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_scales_up_after_five_minutes() {
        let limiter = small_limiter();
        assert_eq!(limiter.current_capacity(), 500);

        tokio::time::advance(Duration::from_millis(RATE_LIMITER_GROWTH_INTERVAL_MS)).await;
        assert_eq!(limiter.current_capacity(), 750);

        tokio::time::advance(Duration::from_millis(RATE_LIMITER_GROWTH_INTERVAL_MS)).await;
        assert_eq!(limiter.current_capacity(), 1125);

        // Far enough in the future the cap takes over
        tokio::time::advance(Duration::from_millis(20 * RATE_LIMITER_GROWTH_INTERVAL_MS)).await;
        assert_eq!(limiter.current_capacity(), 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_is_monotonic_non_decreasing() {
        let limiter = small_limiter();
        let mut last = 0;
        for _ in 0..30 {
            let capacity = limiter.current_capacity();
            assert!(capacity >= last);
            last = capacity;
            tokio::time::advance(Duration::from_secs(60)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_previously_oversized_becomes_satisfiable_after_growth() {
        let limiter = small_limiter();
        assert_eq!(limiter.next_request_delay_ms(700), None);
        tokio::time::advance(Duration::from_millis(RATE_LIMITER_GROWTH_INTERVAL_MS)).await;
        assert!(limiter.next_request_delay_ms(700).is_some());
    }
}
