//! Error types for the server front

use std::net::SocketAddr;

use crate::tls::TlsError;

/// Errors that stop the server
///
/// [`ServerError::Tls`] and [`ServerError::Dial`] come from construction;
/// the others come from the listener.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// TLS material could not be loaded
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// The gateway's loopback channel could not be configured
    #[error("Failed to configure gateway channel: {0}")]
    Dial(#[source] tonic::transport::Error),

    /// The listener could not bind
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that failed to bind
        addr: SocketAddr,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Accepting a connection failed
    #[error("Failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),
}

impl ServerError {
    /// Whether the error came from building the server rather than from
    /// the listener
    pub fn is_startup(&self) -> bool {
        matches!(self, Self::Tls(_) | Self::Dial(_))
    }
}
