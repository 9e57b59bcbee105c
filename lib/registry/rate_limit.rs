//! A token-bucket gate applied to every outbound registry call, when an endpoint
//! declares a QPS cap.

use std::num::NonZeroU32;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A per-endpoint rate gate. `None` when the endpoint declared no (or a
/// non-positive) QPS cap, in which case [`RateGate::acquire`] is a no-op.
pub enum RateGate {
    /// No limiting configured.
    Unlimited,
    /// Limiting to `qps` requests per second, bucket size equal to the rate.
    Limited(DefaultDirectRateLimiter),
}

impl RateGate {
    /// Builds a gate for the given QPS cap. Zero, negative, or absent caps disable
    /// limiting entirely.
    pub fn new(qps: Option<u32>) -> Self {
        match qps.and_then(NonZeroU32::new) {
            Some(qps) => RateGate::Limited(RateLimiter::direct(Quota::per_second(qps))),
            None => RateGate::Unlimited,
        }
    }

    /// Waits until a token is available. `Ping` and the auth-token exchange must
    /// bypass this call to avoid a deadlock on startup (see the module's callers).
    pub async fn acquire(&self) {
        if let RateGate::Limited(limiter) = self {
            limiter.until_ready().await;
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
