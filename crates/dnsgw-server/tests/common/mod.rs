//! Test doubles and common utilities for server contract tests
//!
//! Provides a recording updater with scripted outcomes, throwaway TLS
//! material and a helper that runs a real server on an ephemeral port.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dnsgw_core::{Error, RecordUpdate, RecordUpdater, ServerConfig, UpdateReceipt};
use dnsgw_server::DnsGatewayServer;
use dnsgw_server::proto::dns_service_client::DnsServiceClient;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};

/// Server name the test certificates are issued for
pub const SERVER_NAME: &str = "localhost";

/// What a [`RecordingUpdater`] does when called
#[derive(Clone)]
pub enum Outcome {
    /// Succeed with a receipt
    Succeed,
    /// Fail with the error built by this function
    Fail(fn() -> Error),
    /// Panic inside the handler
    Panic,
}

/// A RecordUpdater that records every call
pub struct RecordingUpdater {
    outcome: Outcome,
    calls: AtomicUsize,
    updates: Mutex<Vec<RecordUpdate>>,
}

impl RecordingUpdater {
    pub fn new(outcome: Outcome) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            calls: AtomicUsize::new(0),
            updates: Mutex::new(Vec::new()),
        })
    }

    pub fn succeeding() -> Arc<Self> {
        Self::new(Outcome::Succeed)
    }

    pub fn failing(error: fn() -> Error) -> Arc<Self> {
        Self::new(Outcome::Fail(error))
    }

    pub fn panicking() -> Arc<Self> {
        Self::new(Outcome::Panic)
    }

    /// Number of update_record() calls
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The most recent update handed to the updater
    pub fn last_update(&self) -> Option<RecordUpdate> {
        self.updates.lock().unwrap().last().cloned()
    }
}

#[async_trait::async_trait]
impl RecordUpdater for RecordingUpdater {
    async fn update_record(&self, update: &RecordUpdate) -> Result<UpdateReceipt, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.updates.lock().unwrap().push(update.clone());

        match &self.outcome {
            Outcome::Succeed => Ok(UpdateReceipt {
                request_id: "test-request".to_string(),
                record_id: update.record_id.clone(),
            }),
            Outcome::Fail(error) => Err(error()),
            Outcome::Panic => panic!("updater blew up"),
        }
    }

    fn provider_name(&self) -> &'static str {
        "recording"
    }
}

/// A complete, valid UpdateRecordRequest
pub fn full_request() -> dnsgw_server::proto::UpdateRecordRequest {
    dnsgw_server::proto::UpdateRecordRequest {
        access_key_id: "LTAI-test".to_string(),
        access_key_secret: "super-secret".to_string(),
        endpoint: "alidns.cn-hangzhou.aliyuncs.com".to_string(),
        record_id: "1234567890".to_string(),
        rr: "home".to_string(),
        r#type: "A".to_string(),
        value: "203.0.113.5".to_string(),
    }
}

/// CA-issued server certificate written to a temporary directory
///
/// `tls.pem` holds the leaf followed by the CA; `tls.key` the leaf key.
pub struct TestCerts {
    dir: tempfile::TempDir,
    pub ca_pem: String,
}

impl TestCerts {
    pub fn generate() -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "dnsgw test CA");
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let mut leaf_params =
            CertificateParams::new(vec![SERVER_NAME.to_string(), "127.0.0.1".to_string()])
                .unwrap();
        leaf_params
            .distinguished_name
            .push(DnType::CommonName, SERVER_NAME);
        let leaf_cert = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).unwrap();

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("tls.pem"),
            format!("{}{}", leaf_cert.pem(), ca_cert.pem()),
        )
        .unwrap();
        std::fs::write(dir.path().join("tls.key"), leaf_key.serialize_pem()).unwrap();

        Self {
            dir,
            ca_pem: ca_cert.pem(),
        }
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Directory path, for configs
    pub fn dir_buf(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }
}

/// A server running on an ephemeral loopback port
pub struct TestServer {
    pub addr: SocketAddr,
    pub certs: TestCerts,
    handle: JoinHandle<Result<(), dnsgw_server::ServerError>>,
}

impl TestServer {
    /// Start a server backed by `updater`, with the cert dir as web root
    pub async fn start(updater: Arc<dyn RecordUpdater>) -> Self {
        let certs = TestCerts::generate();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = ServerConfig::new(certs.dir_buf(), SERVER_NAME)
            .with_host(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_port(addr.port())
            .with_web_root(certs.dir_buf());

        let server = DnsGatewayServer::new(config, updater).expect("server construction succeeds");
        let handle = tokio::spawn(server.serve_with_listener(listener));

        Self {
            addr,
            certs,
            handle,
        }
    }

    /// gRPC client trusting the test CA
    pub async fn grpc_client(&self) -> DnsServiceClient<Channel> {
        let tls = ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(&self.certs.ca_pem))
            .domain_name(SERVER_NAME);
        let channel = Endpoint::from_shared(format!("https://{}", self.addr))
            .unwrap()
            .tls_config(tls)
            .unwrap()
            .connect()
            .await
            .expect("gRPC client connects");

        DnsServiceClient::new(channel)
    }

    /// HTTPS client trusting the test CA, speaking HTTP/2 via ALPN
    pub fn rest_client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .use_rustls_tls()
            .add_root_certificate(
                reqwest::Certificate::from_pem(self.certs.ca_pem.as_bytes()).unwrap(),
            )
            .resolve(SERVER_NAME, self.addr)
            .build()
            .unwrap()
    }

    /// URL for a REST path
    pub fn url(&self, path: &str) -> String {
        format!("https://{}:{}{}", SERVER_NAME, self.addr.port(), path)
    }

    /// Whether the accept loop is still running
    pub fn is_serving(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
