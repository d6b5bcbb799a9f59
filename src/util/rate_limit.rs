//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Per-connection inbound flood guard
#[derive(Clone)]
pub struct InputRateLimiter {
    limiter: Arc<Limiter>,
}

impl InputRateLimiter {
    pub fn new(frames_per_second: u32) -> Self {
        Self {
            limiter: create_limiter(frames_per_second),
        }
    }

    /// Check if an inbound frame is allowed (returns true if allowed)
    pub fn check_input(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_beyond_quota_is_rejected() {
        let limiter = InputRateLimiter::new(5);
        let allowed = (0..20).filter(|_| limiter.check_input()).count();
        assert!(allowed >= 5 && allowed < 20, "allowed {allowed}");
    }

    #[test]
    fn zero_quota_still_admits_one() {
        let limiter = InputRateLimiter::new(0);
        assert!(limiter.check_input());
    }
}
