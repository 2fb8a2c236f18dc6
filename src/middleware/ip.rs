//! Client IP extraction.
//!
//! # Header Priority
//!
//! 1. `X-Forwarded-For`, first comma-separated entry
//! 2. `X-Real-IP`
//! 3. The transport peer address from axum's `ConnectInfo`
//! 4. [`UNKNOWN_IP`]
//!
//! Empty header values are skipped. These headers are client controlled, so
//! per-client admission keys are only meaningful behind a reverse proxy that
//! overwrites them.

use std::borrow::Cow;
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;

/// Fallback when no client IP can be determined.
///
/// All such requests share one admission key.
pub const UNKNOWN_IP: &str = "unknown";

/// Where the client IP came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractedIp<'a> {
    FromXff(&'a str),
    FromRealIp(&'a str),
    NotFound,
}

#[inline]
fn extract_ip_from_headers<B>(req: &Request<B>) -> ExtractedIp<'_> {
    // Format: "client, proxy1, proxy2" - we want the first (client) IP
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next().map(str::trim)
        && !first_ip.is_empty()
    {
        return ExtractedIp::FromXff(first_ip);
    }

    if let Some(real_ip) = req.headers().get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return ExtractedIp::FromRealIp(value.trim());
    }

    ExtractedIp::NotFound
}

/// Client identifier for a request.
///
/// Returns `Cow::Borrowed` only for the [`UNKNOWN_IP`] fallback.
#[inline]
pub fn client_ip<B>(req: &Request<B>) -> Cow<'static, str> {
    match extract_ip_from_headers(req) {
        ExtractedIp::FromXff(ip) | ExtractedIp::FromRealIp(ip) => Cow::Owned(ip.to_string()),
        ExtractedIp::NotFound => match req.extensions().get::<ConnectInfo<SocketAddr>>() {
            Some(ConnectInfo(addr)) => Cow::Owned(addr.ip().to_string()),
            None => Cow::Borrowed(UNKNOWN_IP),
        },
    }
}

/// Transport peer address, if the server recorded one.
pub fn remote_addr<B>(req: &Request<B>) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}
