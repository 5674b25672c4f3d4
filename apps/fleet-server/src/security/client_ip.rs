//! Client IP resolution honouring optional proxy trust (§4.F).

use axum::http::HeaderMap;

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Resolves the client IP used as the rate-limiter key. When
/// `trust_proxy_headers` is false, only `peer` (the socket's remote host)
/// is considered — proxy headers are attacker-controlled otherwise.
pub fn resolve_client_ip(headers: &HeaderMap, peer: &str, trust_proxy_headers: bool) -> String {
    if !trust_proxy_headers {
        return peer.to_string();
    }

    if let Some(value) = headers.get(FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        if let Some(first) = value.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return first.to_string();
        }
    }

    if let Some(value) = headers.get(REAL_IP).and_then(|v| v.to_str().ok()) {
        if !value.trim().is_empty() {
            return value.trim().to_string();
        }
    }

    peer.to_string()
}
