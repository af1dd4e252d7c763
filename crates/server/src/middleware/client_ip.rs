//! Caller identity for rate limiting and node affinity.

use axum::http::{HeaderMap, HeaderName};
use std::net::SocketAddr;

static X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Caller key for a request: `X-Real-IP`, else the first `X-Forwarded-For` entry, else the
/// peer address of the connection.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(ip) = header_str(headers, &X_REAL_IP) {
        return ip.to_string();
    }

    if let Some(ip) = header_str(headers, &X_FORWARDED_FOR)
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return ip.to_string();
    }

    peer.ip().to_string()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim).filter(|v| !v.is_empty())
}
