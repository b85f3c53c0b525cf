use axum::{
    extract::{ConnectInfo, Request},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, SocketAddr};

/// Best-known address of the calling client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

/// `X-Real-IP`, then the first `X-Forwarded-For` hop
pub fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());

    real_ip.or_else(|| {
        headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse().ok())
    })
}

/// Record the client address as a request extension and on the request span
pub async fn real_ip_middleware(mut request: Request, next: Next) -> Response {
    let ip = forwarded_ip(request.headers()).or_else(|| {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    });

    if let Some(ip) = ip {
        tracing::Span::current().record("client_ip", tracing::field::display(ip));
        request.extensions_mut().insert(ClientIp(ip));
    }

    next.run(request).await
}
