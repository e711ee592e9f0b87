//! Per-IP request limiting for the API routes.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroU32,
    time::Duration,
};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter,
};
use tracing::warn;

use crate::{config::RateLimitConfig, error::ApiError, state::AppState};

/// Above this many tracked keys, idle entries are pruned.
const PRUNE_THRESHOLD: usize = 10_000;

pub struct IpRateLimiter {
    inner: RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>,
}

impl IpRateLimiter {
    /// `max_requests` per `window_secs`, all of which may arrive at once.
    pub fn new(cfg: &RateLimitConfig) -> Self {
        Self {
            inner: RateLimiter::keyed(quota(cfg)),
        }
    }

    /// Err carries the seconds until the next request from `ip` is admitted.
    pub fn check(&self, ip: IpAddr) -> Result<(), u64> {
        if self.inner.len() > PRUNE_THRESHOLD {
            self.inner.retain_recent();
        }
        self.inner.check_key(&ip).map_err(|not_until| {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            // round up so clients never retry too early
            wait.as_secs() + u64::from(wait.subsec_nanos() > 0)
        })
    }
}

fn quota(cfg: &RateLimitConfig) -> Quota {
    let burst = NonZeroU32::new(cfg.max_requests).unwrap_or(NonZeroU32::MIN);
    let window = Duration::from_secs(cfg.window_secs.max(1));
    Quota::with_period(window / burst.get())
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

/// Direct peer first, then the first `x-forwarded-for` hop.
fn client_ip(req: &Request) -> IpAddr {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip();
    }
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = client_ip(&req);
    if let Err(retry_after_secs) = state.limiter.check(ip) {
        warn!(%ip, retry_after_secs, "rate limit exceeded");
        return Err(ApiError::RateLimited { retry_after_secs });
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn limiter(max_requests: u32, window_secs: u64) -> IpRateLimiter {
        IpRateLimiter::new(&RateLimitConfig {
            max_requests,
            window_secs,
        })
    }

    #[test]
    fn admits_max_then_rejects() {
        let l = limiter(3, 900);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        for _ in 0..3 {
            assert!(l.check(ip).is_ok());
        }
        let retry = l.check(ip).unwrap_err();
        assert!(retry > 0 && retry <= 900);
    }

    #[test]
    fn keys_are_independent() {
        let l = limiter(1, 60);
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(l.check(a).is_ok());
        assert!(l.check(a).is_err());
        assert!(l.check(b).is_ok());
    }

    #[test]
    fn zero_max_still_admits_one() {
        let l = limiter(0, 60);
        let ip: IpAddr = "10.0.0.3".parse().unwrap();
        assert!(l.check(ip).is_ok());
        assert!(l.check(ip).is_err());
    }

    #[test]
    fn client_ip_prefers_connect_info() {
        let mut req = Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req), "203.0.113.9".parse::<IpAddr>().unwrap());

        req.extensions_mut()
            .insert(ConnectInfo("192.0.2.4:5000".parse::<SocketAddr>().unwrap()));
        assert_eq!(client_ip(&req), "192.0.2.4".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn unknown_peer_falls_back_to_unspecified() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&req), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }
}
