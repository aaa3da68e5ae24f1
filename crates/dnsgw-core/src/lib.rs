// # dnsgw-core
//
// Core library for the dual-protocol DNS update gateway.
//
// ## Architecture Overview
//
// The gateway serves one small API over gRPC and REST on a single TLS port.
// This crate holds the pieces shared by the server front and by providers:
// - **RecordUpdater**: Trait for applying a DNS record change via a provider API
// - **ServerConfig**: Immutable process configuration, read once from the environment
// - **Error**: The error type providers return and the server front propagates
//
// ## Design Principles
//
// 1. **Opaque Collaborator**: The server front never inspects provider behavior
// 2. **No Retry**: Provider errors are surfaced to callers unchanged
// 3. **Immutable Configuration**: Nothing is reloaded at runtime

pub mod config;
pub mod error;
pub mod traits;

// Re-export core types for convenience
pub use config::{ProviderMode, ServerConfig};
pub use error::{Error, Result};
pub use traits::{RecordUpdate, RecordUpdater, UpdateReceipt};
