//! Listener and bootstrap
//!
//! [`DnsGatewayServer`] wires the pieces together in a fixed order:
//!
//! 1. load the TLS material (fatal on error)
//! 2. build the RPC service with its interceptor chain
//! 3. dial the RPC endpoint for the gateway (fatal on error)
//! 4. compose the protocol router
//!
//! Serving then runs one accept loop on one TCP listener. Each connection
//! gets its own task that performs the TLS handshake and serves HTTP/1.1 or
//! HTTP/2 with the router.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use dnsgw_core::{RecordUpdater, ServerConfig};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;

use crate::error::ServerError;
use crate::gateway::{self, GatewayState};
use crate::router::ProtocolRouter;
use crate::rpc;
use crate::tls::TlsMaterial;

/// Dual-protocol server on a single TLS port
pub struct DnsGatewayServer {
    config: ServerConfig,
    tls: Arc<TlsMaterial>,
    acceptor: TlsAcceptor,
    router: ProtocolRouter,
}

impl DnsGatewayServer {
    /// Build the server
    ///
    /// Must be called from within a tokio runtime: the gateway's channel is
    /// created here.
    pub fn new(config: ServerConfig, updater: Arc<dyn RecordUpdater>) -> Result<Self, ServerError> {
        let tls = Arc::new(TlsMaterial::load(
            config.cert_path(),
            config.key_path(),
            config.server_name.clone(),
        )?);

        let rpc = rpc::build_rpc_service(updater);

        let channel = gateway::dial(&tls, config.loopback_addr())?;
        let gateway = gateway::build_gateway_service(GatewayState::new(channel), &config.web_root);

        let router = ProtocolRouter::new(rpc, gateway);
        let acceptor = tls.acceptor();

        Ok(Self {
            config,
            tls,
            acceptor,
            router,
        })
    }

    /// Configuration the server was built from
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Shared TLS material
    pub fn tls(&self) -> Arc<TlsMaterial> {
        Arc::clone(&self.tls)
    }

    /// Bind the configured address and serve until the listener becomes unusable
    pub async fn serve(self) -> Result<(), ServerError> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        self.serve_with_listener(listener).await
    }

    /// Serve on an already bound listener
    ///
    /// Dropped connections and descriptor exhaustion do not stop serving;
    /// only an error that leaves the listener unusable is returned.
    pub async fn serve_with_listener(self, listener: TcpListener) -> Result<(), ServerError> {
        if let Ok(local) = listener.local_addr() {
            tracing::info!(
                addr = %local,
                server_name = self.tls.server_name(),
                "Serving gRPC and REST"
            );
        }

        let mut backoff = AcceptBackoff::default();

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => {
                    backoff.reset();
                    accepted
                }
                Err(e) => match classify_accept_error(&e) {
                    AcceptFailure::Connection => {
                        tracing::debug!(error = %e, "Connection dropped before accept");
                        continue;
                    }
                    AcceptFailure::Transient => {
                        let delay = backoff.next_delay();
                        tracing::warn!(
                            error = %e,
                            retry_in_ms = delay.as_millis() as u64,
                            "Accept failed; retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    AcceptFailure::Fatal => {
                        tracing::error!(error = %e, "Accept failed");
                        return Err(ServerError::Accept(e));
                    }
                },
            };

            let acceptor = self.acceptor.clone();
            let router = self.router.clone();
            tokio::spawn(serve_connection(acceptor, stream, peer, router));
        }
    }
}

impl std::fmt::Debug for DnsGatewayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsGatewayServer")
            .field("listen_addr", &self.config.listen_addr())
            .field("server_name", &self.tls.server_name())
            .finish_non_exhaustive()
    }
}

/// First delay after a failed accept
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);

/// Cap on the accept retry delay
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// How an accept error affects the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptFailure {
    /// One pending connection went away; accept the next one
    Connection,
    /// The process is short of descriptors or buffers; retry after a delay
    Transient,
    /// The listener itself is unusable
    Fatal,
}

fn classify_accept_error(e: &io::Error) -> AcceptFailure {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused => AcceptFailure::Connection,
        io::ErrorKind::InvalidInput | io::ErrorKind::Unsupported => AcceptFailure::Fatal,
        _ => AcceptFailure::Transient,
    }
}

/// Doubling delay, reset by the next successful accept
#[derive(Debug, Default)]
struct AcceptBackoff {
    current: Option<Duration>,
}

impl AcceptBackoff {
    fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => ACCEPT_BACKOFF_MIN,
            Some(previous) => (previous * 2).min(ACCEPT_BACKOFF_MAX),
        };
        self.current = Some(delay);
        delay
    }

    fn reset(&mut self) {
        self.current = None;
    }
}

async fn serve_connection(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    peer: SocketAddr,
    router: ProtocolRouter,
) {
    let tls = match acceptor.accept(stream).await {
        Ok(tls) => tls,
        Err(e) => {
            tracing::debug!(%peer, error = %e, "TLS handshake failed");
            return;
        }
    };

    let service = hyper::service::service_fn(move |mut req: http::Request<Incoming>| {
        req.extensions_mut().insert(ConnectInfo(peer));
        router.clone().oneshot(req.map(Body::new))
    });

    if let Err(e) = auto::Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(tls), service)
        .await
    {
        tracing::debug!(%peer, error = %e, "Connection closed with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    use async_trait::async_trait;
    use dnsgw_core::{RecordUpdate, UpdateReceipt};
    use rcgen::{CertificateParams, KeyPair};

    struct NoopUpdater;

    #[async_trait]
    impl RecordUpdater for NoopUpdater {
        async fn update_record(
            &self,
            update: &RecordUpdate,
        ) -> Result<UpdateReceipt, dnsgw_core::Error> {
            Ok(UpdateReceipt {
                record_id: update.record_id.clone(),
                request_id: "noop".to_string(),
            })
        }

        fn provider_name(&self) -> &'static str {
            "noop"
        }
    }

    #[tokio::test]
    async fn test_acceptor_serves_the_loaded_material() {
        let dir = tempfile::tempdir().unwrap();
        let key_pair = KeyPair::generate().unwrap();
        let cert = CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .self_signed(&key_pair)
            .unwrap();
        std::fs::write(dir.path().join("tls.pem"), cert.pem()).unwrap();
        std::fs::write(dir.path().join("tls.key"), key_pair.serialize_pem()).unwrap();

        let config = ServerConfig::new(dir.path().to_path_buf(), "localhost")
            .with_host(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let server = DnsGatewayServer::new(config, Arc::new(NoopUpdater)).unwrap();

        let tls = server.tls();
        assert!(Arc::ptr_eq(&tls, &server.tls));
        assert!(Arc::ptr_eq(server.acceptor.config(), &tls.server_config()));
        assert_eq!(tls.server_name(), "localhost");
    }

    #[test]
    fn test_dropped_connections_are_skipped() {
        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionRefused,
        ] {
            assert_eq!(
                classify_accept_error(&io::Error::from(kind)),
                AcceptFailure::Connection
            );
        }
    }

    #[test]
    fn test_descriptor_exhaustion_is_transient() {
        // EMFILE and ENFILE on Linux
        for errno in [24, 23] {
            assert_eq!(
                classify_accept_error(&io::Error::from_raw_os_error(errno)),
                AcceptFailure::Transient
            );
        }
        assert_eq!(
            classify_accept_error(&io::Error::from(io::ErrorKind::OutOfMemory)),
            AcceptFailure::Transient
        );
    }

    #[test]
    fn test_unusable_listener_is_fatal() {
        assert_eq!(
            classify_accept_error(&io::Error::from(io::ErrorKind::InvalidInput)),
            AcceptFailure::Fatal
        );
    }

    #[test]
    fn test_backoff_doubles_up_to_cap_and_resets() {
        let mut backoff = AcceptBackoff::default();
        assert_eq!(backoff.next_delay(), Duration::from_millis(5));
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));

        for _ in 0..20 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), ACCEPT_BACKOFF_MAX);

        backoff.reset();
        assert_eq!(backoff.next_delay(), ACCEPT_BACKOFF_MIN);
    }
}
