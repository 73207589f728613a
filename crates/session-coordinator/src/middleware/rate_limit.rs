//! Per-client-address rate limiting.
//!
//! Each remote IP gets its own GCRA bucket holding `per_minute` requests,
//! refilled evenly over a minute. The peer address comes from axum's
//! `ConnectInfo`; requests without one (in-process callers) share the
//! unspecified address.
//!
//! Limits are per instance, not shared across replicas.

use crate::errors::SessionError;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, warn};

/// Bucket count above which refilled buckets are pruned.
const PRUNE_THRESHOLD: usize = 10_000;

/// Keyed limiter shared by every request through the layer.
#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<DefaultKeyedRateLimiter<IpAddr>>,
}

impl RateLimitState {
    #[must_use]
    pub fn per_minute(requests: NonZeroU32) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(requests))),
        }
    }

    /// Take one request from `ip`'s bucket.
    ///
    /// # Errors
    ///
    /// `RateLimited` once the bucket is empty.
    pub fn check(&self, ip: IpAddr) -> Result<(), SessionError> {
        self.limiter.check_key(&ip).map_err(|_| {
            warn!(target: "sc.middleware.rate_limit", client_ip = %ip, "Rate limit exceeded");
            SessionError::RateLimited(ip.to_string())
        })?;

        if self.limiter.len() > PRUNE_THRESHOLD {
            self.limiter.retain_recent();
            debug!(
                target: "sc.middleware.rate_limit",
                buckets = self.limiter.len(),
                "Pruned idle rate limit buckets"
            );
        }
        Ok(())
    }
}

/// Rejects a request with 429 once its client address exhausts its quota.
pub async fn rate_limit(
    State(state): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Result<Response, SessionError> {
    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |info| info.0.ip());

    state.check(ip)?;
    Ok(next.run(req).await)
}
