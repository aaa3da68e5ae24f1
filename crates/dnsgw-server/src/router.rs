//! Protocol router
//!
//! Every request arriving on the shared listener passes through
//! [`ProtocolRouter`]. HTTP/2 requests with a gRPC content type go straight
//! to the RPC service; everything else is REST and goes to the gateway,
//! after CORS negotiation.

use std::convert::Infallible;
use std::task::{Context, Poll};

use axum::body::Body;
use futures::future::BoxFuture;
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_REQUEST_METHOD, CONTENT_TYPE, ORIGIN,
};
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Version};
use tower::{Service, ServiceExt};
use tower::util::BoxCloneSyncService;

/// Boxed HTTP service shared by the RPC and gateway sides
pub type HttpService = BoxCloneSyncService<Request<Body>, Response<Body>, Infallible>;

/// Headers a browser may send on REST calls
pub const PREFLIGHT_ALLOW_HEADERS: &str = "Content-Type,Accept,Authorization";

/// Methods a browser may use on REST calls
pub const PREFLIGHT_ALLOW_METHODS: &str = "GET,HEAD,POST,PUT,DELETE";

/// Destination of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// gRPC call for the RPC endpoint
    Rpc,
    /// Anything else: REST, static files, docs
    Gateway,
}

/// Classify a request by protocol version and content type
pub fn classify(version: Version, headers: &HeaderMap) -> Route {
    let grpc = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("application/grpc"));

    if version == Version::HTTP_2 && grpc {
        Route::Rpc
    } else {
        Route::Gateway
    }
}

/// Whether a request is a CORS preflight
///
/// `Origin` is not required; the allow-origin header is only added when it
/// is present.
pub fn is_preflight(method: &Method, headers: &HeaderMap) -> bool {
    *method == Method::OPTIONS && headers.contains_key(ACCESS_CONTROL_REQUEST_METHOD)
}

/// Single HTTP handler for the shared listener
#[derive(Clone)]
pub struct ProtocolRouter {
    rpc: HttpService,
    gateway: Option<HttpService>,
}

impl ProtocolRouter {
    /// Router dispatching between both sides
    pub fn new(rpc: HttpService, gateway: HttpService) -> Self {
        Self {
            rpc,
            gateway: Some(gateway),
        }
    }

    /// Router without a gateway: every request goes to the RPC service
    pub fn rpc_only(rpc: HttpService) -> Self {
        Self { rpc, gateway: None }
    }
}

impl std::fmt::Debug for ProtocolRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolRouter")
            .field("gateway", &self.gateway.is_some())
            .finish_non_exhaustive()
    }
}

impl Service<Request<Body>> for ProtocolRouter {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response<Body>, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Both sides are cloned per call below.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let gateway = match (&self.gateway, classify(req.version(), req.headers())) {
            (Some(gateway), Route::Gateway) => gateway.clone(),
            _ => {
                let rpc = self.rpc.clone();
                return Box::pin(rpc.oneshot(req));
            }
        };

        let origin = req.headers().get(ORIGIN).cloned();

        if is_preflight(req.method(), req.headers()) {
            tracing::debug!(path = %req.uri().path(), "answering CORS preflight");
            let mut response = preflight_response();
            allow_origin(response.headers_mut(), origin);
            return Box::pin(async move { Ok(response) });
        }

        Box::pin(async move {
            let mut response = gateway.oneshot(req).await?;
            allow_origin(response.headers_mut(), origin);
            Ok(response)
        })
    }
}

fn preflight_response() -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(PREFLIGHT_ALLOW_HEADERS),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(PREFLIGHT_ALLOW_METHODS),
    );
    response
}

fn allow_origin(headers: &mut HeaderMap, origin: Option<HeaderValue>) {
    if let Some(origin) = origin {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_grpc_over_h2_is_rpc() {
        let grpc = headers(&[("content-type", "application/grpc")]);
        assert_eq!(classify(Version::HTTP_2, &grpc), Route::Rpc);

        let grpc_proto = headers(&[("content-type", "application/grpc+proto")]);
        assert_eq!(classify(Version::HTTP_2, &grpc_proto), Route::Rpc);
    }

    #[test]
    fn test_everything_else_is_gateway() {
        let grpc = headers(&[("content-type", "application/grpc")]);
        assert_eq!(classify(Version::HTTP_11, &grpc), Route::Gateway);

        let json = headers(&[("content-type", "application/json")]);
        assert_eq!(classify(Version::HTTP_2, &json), Route::Gateway);

        assert_eq!(classify(Version::HTTP_2, &HeaderMap::new()), Route::Gateway);
    }

    #[test]
    fn test_preflight_detection() {
        let with_method = headers(&[("access-control-request-method", "POST")]);
        assert!(is_preflight(&Method::OPTIONS, &with_method));
        assert!(!is_preflight(&Method::GET, &with_method));
        assert!(!is_preflight(&Method::OPTIONS, &HeaderMap::new()));
    }
}
