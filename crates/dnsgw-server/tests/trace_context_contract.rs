//! Architectural Contract Test: One Trace Across the Loopback Hop
//!
//! A REST request becomes a second, internal gRPC call. This test checks
//! that the W3C `traceparent` sent with the REST request parents the
//! `grpc.server` span of that internal call.
//!
//! Constraints verified:
//! - A REST `traceparent` reaches the RPC span of the loopback call
//! - A gRPC `traceparent` reaches the RPC span directly
//!
//! If this test fails, the gateway has stopped forwarding trace context
//! and REST calls show up as unrelated traces.

mod common;

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use common::*;
use dnsgw_server::proto::GetCallerAddressRequest;
use tonic::metadata::MetadataValue;
use tracing::Level;

const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";

/// Log sink shared between the subscriber and the test
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap();
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn rpc_span_lines(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|line| line.contains("grpc.server"))
            .collect()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Route this thread's events into a buffer for the rest of the test
fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(Level::INFO)
        .finish();

    (logs, tracing::subscriber::set_default(subscriber))
}

#[tokio::test]
async fn rest_traceparent_reaches_rpc_span() {
    let (logs, _guard) = capture_logs();
    let server = TestServer::start(RecordingUpdater::succeeding()).await;

    let response = server
        .rest_client()
        .get(server.url("/v1/dns/GetCallerAddress"))
        .header("traceparent", TRACEPARENT)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let rpc_lines = logs.rpc_span_lines();
    assert!(!rpc_lines.is_empty(), "loopback call logged no RPC events");
    assert!(
        rpc_lines.iter().any(|line| line.contains(TRACE_ID)),
        "RPC span did not join the REST trace: {rpc_lines:#?}"
    );
}

#[tokio::test]
async fn grpc_traceparent_reaches_rpc_span() {
    let (logs, _guard) = capture_logs();
    let server = TestServer::start(RecordingUpdater::succeeding()).await;
    let mut client = server.grpc_client().await;

    let mut request = tonic::Request::new(GetCallerAddressRequest {});
    request
        .metadata_mut()
        .insert("traceparent", MetadataValue::from_static(TRACEPARENT));
    client.get_caller_address(request).await.unwrap();

    let rpc_lines = logs.rpc_span_lines();
    assert!(
        rpc_lines.iter().any(|line| line.contains(TRACE_ID)),
        "RPC span did not join the caller's trace: {rpc_lines:#?}"
    );
}
