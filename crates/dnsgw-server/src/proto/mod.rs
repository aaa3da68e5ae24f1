//! Generated protobuf and gRPC bindings for `dnsgw.v1`
//!
//! Regenerate from `proto/dnsgw/v1/dns.proto` with `tonic-prost-build`
//! (client and server enabled) when the contract changes.

#[allow(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
pub mod dnsgw {
    pub mod v1 {
        include!("dnsgw.v1.rs");
    }
}

pub use dnsgw::v1::*;

/// OpenAPI (swagger v2) description of the REST surface
pub const SWAGGER_JSON: &str = include_str!("../../proto/dnsgw/v1/dns.swagger.json");
