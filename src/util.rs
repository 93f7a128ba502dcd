use std::net::IpAddr;

use axum::http::HeaderMap;
use chrono::{DateTime, Months, TimeDelta, Utc};
use ipnet::IpNet;

use crate::error::{AppError, Result};

pub const LICENSE_KEY_HEADER: &str = "x-license-key";

/// License key sent in the `X-License-Key` header, if any.
pub fn extract_license_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(LICENSE_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Extract a Bearer token from the Authorization header.
///
/// Returns the token string without the "Bearer " prefix, or None if
/// the header is missing, malformed, or empty after the prefix.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

/// Client address as the service sees it.
///
/// The TCP peer is authoritative unless it lies inside a trusted proxy
/// network. Then `X-Forwarded-For` is walked from the right, skipping hops
/// that are themselves trusted proxies, and the first other address wins.
/// Entries to the left of that one were written by the client and are
/// never consulted. A malformed entry on the path falls back to the peer.
pub fn resolve_client_ip(peer: IpAddr, headers: &HeaderMap, trusted_proxies: &[IpNet]) -> IpAddr {
    let is_trusted = |ip: IpAddr| trusted_proxies.iter().any(|net| net.contains(&ip.to_canonical()));
    if !is_trusted(peer) {
        return peer;
    }

    let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) else {
        return peer;
    };

    let mut client = peer;
    for entry in forwarded.rsplit(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Ok(ip) = entry.parse::<IpAddr>() else {
            return peer;
        };
        client = ip;
        if !is_trusted(ip) {
            break;
        }
    }
    client
}

/// Parse a comma-separated list of CIDR blocks or bare addresses.
pub fn parse_networks(input: &str) -> std::result::Result<Vec<IpNet>, String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<IpNet>()
                .or_else(|_| s.parse::<IpAddr>().map(IpNet::from))
                .map_err(|_| format!("invalid network: {}", s))
        })
        .collect()
}

/// Turn a relative duration such as `30m`, `12h`, `7d`, `2w`, `3mo` or `1y`
/// into an absolute unix timestamp counted from `from`.
pub fn parse_expiration_duration(input: &str, from: i64) -> Result<i64> {
    let invalid = |why: &str| AppError::BadRequest(format!("Invalid duration format: {}", why));

    let input = input.trim();
    if input.len() < 2 {
        return Err(invalid("duration too short"));
    }

    let (amount, unit) = match input.strip_suffix("mo") {
        Some(amount) => (amount, "mo"),
        None => {
            let last = input.chars().last().map_or(0, char::len_utf8);
            input.split_at(input.len() - last)
        }
    };
    let amount: i64 = amount.parse().map_err(|_| invalid("invalid number"))?;
    if amount < 0 {
        return Err(invalid("duration cannot be negative"));
    }

    let start = DateTime::<Utc>::from_timestamp(from, 0).ok_or_else(|| invalid("invalid base time"))?;
    let minutes = |m: i64| TimeDelta::try_minutes(m).ok_or_else(|| invalid("duration too large"));
    let months = |m: i64| {
        u32::try_from(m)
            .ok()
            .and_then(|m| start.checked_add_months(Months::new(m)))
            .ok_or_else(|| invalid("duration too large"))
    };

    let end = match unit {
        "m" => start.checked_add_signed(minutes(amount)?),
        "h" => start.checked_add_signed(minutes(amount.saturating_mul(60))?),
        "d" => start.checked_add_signed(minutes(amount.saturating_mul(60 * 24))?),
        "w" => start.checked_add_signed(minutes(amount.saturating_mul(60 * 24 * 7))?),
        "mo" => Some(months(amount)?),
        "y" => Some(months(amount.saturating_mul(12))?),
        other => return Err(invalid(&format!("unknown unit {:?}", other))),
    };

    end.map(|t| t.timestamp()).ok_or_else(|| invalid("duration too large"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const BASE: i64 = 1_700_000_000; // 2023-11-14T22:13:20Z

    #[test]
    fn test_duration_units() {
        assert_eq!(parse_expiration_duration("30m", BASE).unwrap(), BASE + 30 * 60);
        assert_eq!(parse_expiration_duration("2h", BASE).unwrap(), BASE + 2 * 3600);
        assert_eq!(parse_expiration_duration("3d", BASE).unwrap(), BASE + 3 * 86400);
        assert_eq!(parse_expiration_duration("2w", BASE).unwrap(), BASE + 14 * 86400);
    }

    #[test]
    fn test_duration_calendar_units() {
        // Nov 14 -> Dec 14 is 30 days; Nov 14 2023 -> Nov 14 2024 spans Feb 29.
        assert_eq!(parse_expiration_duration("1mo", BASE).unwrap(), BASE + 30 * 86400);
        assert_eq!(parse_expiration_duration("1y", BASE).unwrap(), BASE + 366 * 86400);
    }

    #[test]
    fn test_duration_rejects_garbage() {
        for input in ["", "d", "5", "xd", "5x", "-1d", "1.5h", "mo"] {
            assert!(parse_expiration_duration(input, BASE).is_err(), "{:?}", input);
        }
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);
        headers.insert("Authorization", HeaderValue::from_static("Bearer s3cret"));
        assert_eq!(extract_bearer_token(&headers), Some("s3cret"));
        headers.insert("Authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer_token(&headers), None);
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn forwarded(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_client_ip_ignores_forwarded_from_untrusted_peer() {
        let headers = forwarded("203.0.113.9");
        assert_eq!(resolve_client_ip(ip("198.51.100.1"), &headers, &[]), ip("198.51.100.1"));
    }

    #[test]
    fn test_client_ip_skips_forged_entries_left_of_the_proxy_hop() {
        // The client sent "10.20.30.40"; the proxy appended the real peer.
        let trusted = parse_networks("10.0.0.0/8").unwrap();
        let headers = forwarded("10.20.30.40, 198.51.100.77");
        assert_eq!(resolve_client_ip(ip("10.1.2.3"), &headers, &trusted), ip("198.51.100.77"));

        let headers = forwarded("203.0.113.5, 198.51.100.77");
        assert_eq!(resolve_client_ip(ip("10.1.2.3"), &headers, &trusted), ip("198.51.100.77"));
    }

    #[test]
    fn test_client_ip_skips_chained_trusted_proxies() {
        let trusted = parse_networks("10.0.0.0/8").unwrap();
        let headers = forwarded("198.51.100.77, 10.0.0.5, 10.0.0.6");
        assert_eq!(resolve_client_ip(ip("10.1.2.3"), &headers, &trusted), ip("198.51.100.77"));

        // Every hop trusted: the leftmost one is the client.
        let headers = forwarded("10.0.0.4, 10.0.0.5");
        assert_eq!(resolve_client_ip(ip("10.1.2.3"), &headers, &trusted), ip("10.0.0.4"));
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        let trusted = parse_networks("10.0.0.0/8").unwrap();
        let peer = ip("10.1.2.3");
        assert_eq!(resolve_client_ip(peer, &HeaderMap::new(), &trusted), peer);
        assert_eq!(resolve_client_ip(peer, &forwarded("not-an-ip"), &trusted), peer);
        assert_eq!(resolve_client_ip(peer, &forwarded(" , "), &trusted), peer);
    }

    #[test]
    fn test_parse_networks() {
        let nets = parse_networks("10.0.0.0/8, 127.0.0.1,,::1").unwrap();
        assert_eq!(nets.len(), 3);
        assert!(parse_networks("not-a-net").is_err());
    }
}
