//! REST gateway
//!
//! JSON/REST translation of the RPC contract, plus static hosting:
//!
//! | Path | Served by |
//! |---|---|
//! | `POST /v1/dns/UpdateRecord` | RPC `UpdateRecord` over the loopback channel |
//! | `GET /v1/dns/GetCallerAddress` | RPC `GetCallerAddress` over the loopback channel |
//! | `/v1/*` (anything else) | JSON `NotFound` |
//! | `GET /swagger.json` | embedded OpenAPI document |
//! | `/swagger/*` | `<web_root>/swagger` |
//! | `/static/*` | `<web_root>/static` |
//! | everything else | `<web_root>/dist` |
//!
//! The gateway reaches the RPC endpoint the same way an external client
//! would: over TLS to the shared listener, trusting the process's own
//! certificate. The caller's W3C trace context travels with each call.

pub mod error;
pub mod handlers;

use std::net::SocketAddr;
use std::path::Path;

use axum::Router;
use axum::routing::{any, get, post};
use tonic::transport::{Channel, Endpoint};
use tower::util::BoxCloneSyncService;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::error::ServerError;
use crate::proto::dns_service_client::DnsServiceClient;
use crate::router::HttpService;
use crate::tls::TlsMaterial;

pub use error::GatewayError;

/// State shared by the REST handlers
#[derive(Debug, Clone)]
pub struct GatewayState {
    client: DnsServiceClient<Channel>,
}

impl GatewayState {
    /// Handlers call the RPC endpoint through `channel`
    pub fn new(channel: Channel) -> Self {
        Self {
            client: DnsServiceClient::new(channel),
        }
    }
}

/// Dial the RPC endpoint at `addr` over TLS
///
/// The channel connects lazily and reconnects on its own; only invalid
/// settings fail here. Must be called from within a tokio runtime.
pub fn dial(tls: &TlsMaterial, addr: SocketAddr) -> Result<Channel, ServerError> {
    let endpoint = Endpoint::from_shared(format!("https://{addr}"))
        .map_err(ServerError::Dial)?
        .tls_config(tls.client_tls())
        .map_err(ServerError::Dial)?;

    tracing::debug!(%addr, server_name = tls.server_name(), "Gateway channel configured");
    Ok(endpoint.connect_lazy())
}

/// Build the gateway router
pub fn gateway_router(state: GatewayState, web_root: &Path) -> Router {
    crate::telemetry::install_propagator();

    Router::new()
        .route(
            "/v1/dns/UpdateRecord",
            post(handlers::update_record).fallback(handlers::method_not_allowed),
        )
        .route(
            "/v1/dns/GetCallerAddress",
            get(handlers::get_caller_address).fallback(handlers::method_not_allowed),
        )
        .route("/v1/{*rest}", any(handlers::not_found))
        .route("/swagger.json", get(handlers::swagger_json))
        .nest_service("/swagger", ServeDir::new(web_root.join("swagger")))
        .nest_service("/static", ServeDir::new(web_root.join("static")))
        .fallback_service(ServeDir::new(web_root.join("dist")))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Gateway router boxed for the protocol router
pub fn build_gateway_service(state: GatewayState, web_root: &Path) -> HttpService {
    BoxCloneSyncService::new(gateway_router(state, web_root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    /// Channel to a port nothing listens on
    fn dead_channel() -> Channel {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        Endpoint::from_shared(format!("http://{addr}"))
            .unwrap()
            .connect_lazy()
    }

    fn router_with(web_root: &Path) -> Router {
        gateway_router(GatewayState::new(dead_channel()), web_root)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_swagger_json_is_embedded() {
        let dir = tempfile::tempdir().unwrap();
        let response = router_with(dir.path())
            .oneshot(Request::get("/swagger.json").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let doc = body_json(response).await;
        assert_eq!(doc["swagger"], "2.0");
        assert!(doc["paths"]["/v1/dns/UpdateRecord"].is_object());
    }

    #[tokio::test]
    async fn test_unknown_api_path_is_json_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let response = router_with(dir.path())
            .oneshot(Request::get("/v1/dns/Nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["code"], 5);
        assert_eq!(body["details"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_wrong_method_is_not_implemented() {
        let dir = tempfile::tempdir().unwrap();
        let response = router_with(dir.path())
            .oneshot(Request::get("/v1/dns/UpdateRecord").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(body_json(response).await["code"], 12);
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let response = router_with(dir.path())
            .oneshot(
                Request::post("/v1/dns/UpdateRecord")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{oops"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], 3);
    }

    #[tokio::test]
    async fn test_unreachable_rpc_is_service_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let response = router_with(dir.path())
            .oneshot(Request::get("/v1/dns/GetCallerAddress").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["code"], 14);
    }

    #[tokio::test]
    async fn test_static_roots() {
        let dir = tempfile::tempdir().unwrap();
        for (sub, file, content) in [
            ("dist", "index.html", "<html>app</html>"),
            ("static", "app.css", "body{}"),
            ("swagger", "index.html", "<html>docs</html>"),
        ] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
            std::fs::write(dir.path().join(sub).join(file), content).unwrap();
        }
        let router = router_with(dir.path());

        for (path, expected) in [
            ("/", "<html>app</html>"),
            ("/index.html", "<html>app</html>"),
            ("/static/app.css", "body{}"),
            ("/swagger/index.html", "<html>docs</html>"),
        ] {
            let response = router
                .clone()
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{path}");
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            assert_eq!(&bytes[..], expected.as_bytes(), "{path}");
        }

        let missing = router
            .oneshot(Request::get("/nothing-here.js").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
