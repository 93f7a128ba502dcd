//! Per-client rate limiting.
//!
//! Each pool keeps one token bucket per client IP. Buckets idle for longer
//! than the configured TTL are dropped, and the pool never tracks more than
//! `cache_size` clients: when full, the least recently seen client is
//! evicted to make room.
//!
//! Two pools run side by side, one for `/admin/*` and one for the public
//! endpoints. They share nothing, so exhausting one never throttles the
//! other.
//!
//! Configure via environment variables (`ADMIN` or `CHECK`):
//! - RATE_LIMIT_{POOL}_RPS (default: 5)
//! - RATE_LIMIT_{POOL}_BURST (default: 10)
//! - RATE_LIMIT_{POOL}_ENABLED (default: true)
//! - RATE_LIMIT_{POOL}_CACHE_SIZE (default: 5000)
//! - RATE_LIMIT_{POOL}_CACHE_TTL_SECS (default: 3600)

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr};
use std::num::NonZeroU32;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

use crate::db::AppState;
use crate::error::AppError;
use crate::extractors::ClientIp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Sustained refill rate.
    pub requests_per_second: u32,
    /// Bucket capacity.
    pub burst: u32,
    /// Maximum number of client IPs tracked at once.
    pub cache_size: usize,
    /// Idle time after which a client's bucket is forgotten.
    pub cache_ttl: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 5,
            burst: 10,
            cache_size: 5000,
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

impl RateLimitConfig {
    /// Let every request through (useful for tests).
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

struct Bucket {
    limiter: DefaultDirectRateLimiter,
    last_seen: Instant,
    /// This client's key in [`Buckets::recency`].
    seq: u64,
}

struct Buckets {
    by_ip: HashMap<IpAddr, Bucket>,
    /// Clients ordered by last use, oldest first. Holds exactly the keys of
    /// `by_ip`.
    recency: BTreeMap<u64, IpAddr>,
    next_seq: u64,
}

impl Buckets {
    /// Drop clients idle for at least `ttl`, oldest first.
    fn expire_idle(&mut self, now: Instant, ttl: Duration) {
        while let Some((&seq, &ip)) = self.recency.first_key_value() {
            if self
                .by_ip
                .get(&ip)
                .is_some_and(|b| now.duration_since(b.last_seen) < ttl)
            {
                break;
            }
            self.recency.remove(&seq);
            self.by_ip.remove(&ip);
        }
    }

    fn evict_least_recent(&mut self) {
        if let Some((_, ip)) = self.recency.pop_first() {
            self.by_ip.remove(&ip);
        }
    }

    /// Mark `bucket` as the most recently used.
    fn touch(recency: &mut BTreeMap<u64, IpAddr>, next_seq: &mut u64, ip: IpAddr, bucket: &mut Bucket) {
        recency.remove(&bucket.seq);
        bucket.seq = *next_seq;
        *next_seq += 1;
        recency.insert(bucket.seq, ip);
    }
}

/// One rate-limit pool.
pub struct ClientRateLimiter {
    config: RateLimitConfig,
    /// None when the limiter lets everything through.
    quota: Option<Quota>,
    buckets: Mutex<Buckets>,
}

impl ClientRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let quota = if config.enabled {
            NonZeroU32::new(config.requests_per_second).map(|rps| {
                Quota::per_second(rps).allow_burst(NonZeroU32::new(config.burst).unwrap_or(rps))
            })
        } else {
            None
        };

        if config.enabled && quota.is_none() {
            tracing::warn!("Rate limiter enabled with 0 requests per second, treating as disabled");
        }

        Self {
            config,
            quota,
            buckets: Mutex::new(Buckets {
                by_ip: HashMap::new(),
                recency: BTreeMap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Take one token from `ip`'s bucket. Returns false when it is empty.
    pub fn check(&self, ip: IpAddr) -> bool {
        let Some(quota) = self.quota else {
            return true;
        };

        let ttl = self.config.cache_ttl;
        let mut guard = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        // Read the clock under the lock so recency order matches `last_seen`.
        let now = Instant::now();
        guard.expire_idle(now, ttl);

        if !guard.by_ip.contains_key(&ip) && guard.by_ip.len() >= self.config.cache_size.max(1) {
            guard.evict_least_recent();
        }

        let Buckets {
            by_ip,
            recency,
            next_seq,
        } = &mut *guard;
        let bucket = by_ip.entry(ip).or_insert_with(|| Bucket {
            limiter: RateLimiter::direct(quota),
            last_seen: now,
            seq: u64::MAX,
        });
        Buckets::touch(recency, next_seq, ip, bucket);
        bucket.last_seen = now;
        bucket.limiter.check().is_ok()
    }

    /// Number of client IPs currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_ip
            .len()
    }
}

/// Key a request is limited under. Requests without a peer address share
/// one bucket.
fn limiter_key(client: &ClientIp) -> IpAddr {
    client
        .resolved
        .or(client.peer)
        .map(|ip| ip.to_canonical())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

fn enforce(limiter: &ClientRateLimiter, client: &ClientIp, path: &str) -> Result<(), AppError> {
    let key = limiter_key(client);
    if limiter.check(key) {
        Ok(())
    } else {
        tracing::info!(ip = %key, path, "Rate limit exceeded");
        Err(AppError::TooManyRequests)
    }
}

/// Middleware for the admin pool.
pub async fn admin_rate_limit(
    State(state): State<AppState>,
    client: ClientIp,
    request: Request,
    next: Next,
) -> Response {
    match enforce(&state.admin_rate_limiter, &client, request.uri().path()) {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

/// Middleware for the public pool.
pub async fn check_rate_limit(
    State(state): State<AppState>,
    client: ClientIp,
    request: Request,
    next: Next,
) -> Response {
    match enforce(&state.check_rate_limiter, &client, request.uri().path()) {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn config(rps: u32, burst: u32) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_second: rps,
            burst,
            ..RateLimitConfig::default()
        }
    }

    #[test]
    fn test_burst_then_reject() {
        let limiter = ClientRateLimiter::new(config(1, 3));
        let client = ip("10.0.0.1");
        assert!(limiter.check(client));
        assert!(limiter.check(client));
        assert!(limiter.check(client));
        assert!(!limiter.check(client));
    }

    #[test]
    fn test_clients_have_independent_buckets() {
        let limiter = ClientRateLimiter::new(config(1, 1));
        assert!(limiter.check(ip("10.0.0.1")));
        assert!(!limiter.check(ip("10.0.0.1")));
        assert!(limiter.check(ip("10.0.0.2")));
    }

    #[test]
    fn test_disabled_lets_everything_through() {
        let limiter = ClientRateLimiter::new(RateLimitConfig {
            burst: 1,
            ..RateLimitConfig::disabled()
        });
        for _ in 0..100 {
            assert!(limiter.check(ip("10.0.0.1")));
        }
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn test_zero_rate_is_treated_as_disabled() {
        let limiter = ClientRateLimiter::new(config(0, 0));
        for _ in 0..20 {
            assert!(limiter.check(ip("10.0.0.1")));
        }
    }

    #[test]
    fn test_cache_size_evicts_least_recent() {
        let limiter = ClientRateLimiter::new(RateLimitConfig {
            cache_size: 2,
            ..config(1, 1)
        });
        assert!(limiter.check(ip("10.0.0.1")));
        std::thread::sleep(Duration::from_millis(2));
        assert!(limiter.check(ip("10.0.0.2")));
        std::thread::sleep(Duration::from_millis(2));
        assert!(limiter.check(ip("10.0.0.3")));
        assert_eq!(limiter.tracked_clients(), 2);

        // 10.0.0.1 was evicted, so it starts with a full bucket again.
        assert!(limiter.check(ip("10.0.0.1")));
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn test_recently_seen_client_survives_eviction() {
        let limiter = ClientRateLimiter::new(RateLimitConfig {
            cache_size: 2,
            ..config(1, 1)
        });
        assert!(limiter.check(ip("10.0.0.1")));
        assert!(limiter.check(ip("10.0.0.2")));
        // Using 10.0.0.1 again makes 10.0.0.2 the oldest
        assert!(!limiter.check(ip("10.0.0.1")));
        assert!(limiter.check(ip("10.0.0.3")));

        // 10.0.0.1 kept its empty bucket; 10.0.0.2 was the one dropped
        assert!(!limiter.check(ip("10.0.0.1")));
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn test_flood_of_distinct_clients_stays_bounded() {
        let limiter = ClientRateLimiter::new(RateLimitConfig {
            cache_size: 100,
            ..config(1, 1)
        });
        for n in 0..5_000u32 {
            assert!(limiter.check(IpAddr::V4(Ipv4Addr::from(0x0a00_0000 + n))));
        }
        assert_eq!(limiter.tracked_clients(), 100);

        let buckets = limiter.buckets.lock().unwrap();
        assert_eq!(buckets.recency.len(), buckets.by_ip.len());
        // The newest clients are the ones kept
        assert!(buckets.by_ip.contains_key(&IpAddr::V4(Ipv4Addr::from(0x0a00_0000 + 4_999))));
        assert!(!buckets.by_ip.contains_key(&IpAddr::V4(Ipv4Addr::from(0x0a00_0000))));
    }

    #[test]
    fn test_idle_buckets_expire() {
        let limiter = ClientRateLimiter::new(RateLimitConfig {
            cache_ttl: Duration::from_millis(20),
            ..config(1, 1)
        });
        assert!(limiter.check(ip("10.0.0.1")));
        assert!(!limiter.check(ip("10.0.0.1")));
        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.check(ip("10.0.0.1")));
    }

    #[test]
    fn test_limiter_key_prefers_resolved_address() {
        let client = ClientIp {
            peer: Some(ip("10.0.0.1")),
            resolved: Some(ip("203.0.113.7")),
        };
        assert_eq!(limiter_key(&client), ip("203.0.113.7"));

        let mapped = ClientIp {
            peer: Some(ip("::ffff:203.0.113.7")),
            resolved: Some(ip("::ffff:203.0.113.7")),
        };
        assert_eq!(limiter_key(&mapped), ip("203.0.113.7"));

        let unknown = ClientIp {
            peer: None,
            resolved: None,
        };
        assert_eq!(limiter_key(&unknown), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }
}
