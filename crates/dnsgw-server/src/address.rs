//! Caller address resolution
//!
//! REST calls reach the RPC endpoint through the gateway's loopback dial, so
//! the transport peer of those calls is the server itself. The gateway
//! forwards the real client in `x-forwarded-for`; that header wins when
//! present. Direct gRPC callers are identified by their transport peer.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;

/// Metadata key carrying the forwarded client chain
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Best-known public address of the caller
///
/// 1. first element of the first `x-forwarded-for` value, if non-empty
/// 2. transport peer IP, without port
/// 3. empty string
pub fn caller_address<T>(request: &tonic::Request<T>) -> String {
    if let Some(forwarded) = request
        .metadata()
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(first_forwarded)
    {
        return forwarded;
    }

    peer_addr(request)
        .map(|addr| addr.ip().to_string())
        .unwrap_or_default()
}

fn first_forwarded(value: &str) -> Option<String> {
    let first = value.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}

fn peer_addr<T>(request: &tonic::Request<T>) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
        .or_else(|| request.remote_addr())
}
