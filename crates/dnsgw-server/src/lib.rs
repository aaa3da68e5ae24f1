// # dnsgw-server
//
// Dual-protocol server front for the DNS update gateway.
//
// One TLS listener serves both wire formats of the same API:
// - **gRPC**: `dnsgw.v1.DnsService`, handled by `RecordService`
// - **REST/JSON**: `/v1/dns/*`, translated into gRPC calls on a loopback
//   channel, plus static documentation and asset hosting
//
// ## Request Flow
//
// ```text
// TCP accept -> TLS (ALPN h2) -> ProtocolRouter
//   |-- HTTP/2 + application/grpc
//   |     -> interceptors -> RecordService -> RecordUpdater
//   `-- anything else
//         -> CORS -> gateway router -> loopback gRPC call
// ```
//
// ## Usage
//
// ```rust,ignore
// let config = ServerConfig::from_env()?;
// let server = DnsGatewayServer::new(config, Arc::new(updater))?;
// server.serve().await?;
// ```

pub mod address;
pub mod error;
pub mod gateway;
pub mod proto;
pub mod router;
pub mod rpc;
pub mod server;
pub mod telemetry;
pub mod tls;

pub use address::caller_address;
pub use error::ServerError;
pub use router::{HttpService, ProtocolRouter, Route, classify};
pub use rpc::RecordService;
pub use server::DnsGatewayServer;
pub use tls::{TlsError, TlsMaterial};
