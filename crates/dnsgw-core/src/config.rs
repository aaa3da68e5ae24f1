//! Configuration types for the DNS gateway
//!
//! All configuration is read once at process start, from environment
//! variables, and is immutable afterwards.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `DNSGW_CERT_DIR` | required | Directory holding `tls.pem` and `tls.key` |
//! | `DNSGW_SERVER_NAME` | required | TLS server name, also verified by the gateway dial |
//! | `DNSGW_HOST` | `0.0.0.0` | Listen address |
//! | `DNSGW_PORT` | `8443` | Listen port, shared by gRPC and REST |
//! | `DNSGW_WEB_ROOT` | `.` | Parent directory of `dist/`, `static/` and `swagger/` |
//! | `DNSGW_LOG_LEVEL` | `info` | trace, debug, info, warn or error |
//! | `DNSGW_MODE` | `live` | `live` or `dry-run` (provider makes no changes) |

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;

/// Certificate file name inside the certificate directory
pub const CERT_FILE_NAME: &str = "tls.pem";

/// Private key file name inside the certificate directory
pub const KEY_FILE_NAME: &str = "tls.key";

/// Default listen port
pub const DEFAULT_PORT: u16 = 8443;

/// Provider operating mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProviderMode {
    /// Perform real DNS updates
    #[default]
    Live,
    /// Log intended updates without performing them
    DryRun,
}

impl ProviderMode {
    fn parse(value: &str) -> Result<Self, crate::Error> {
        match value.to_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "dry-run" => Ok(Self::DryRun),
            other => Err(crate::Error::config(format!(
                "DNSGW_MODE '{}' is not supported. Supported modes: live, dry-run",
                other
            ))),
        }
    }
}

/// Server configuration
///
/// Holds everything the server front needs: where the TLS material lives,
/// which name it is presented under and where to listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Directory containing `tls.pem` and `tls.key`
    pub cert_dir: PathBuf,

    /// TLS server name
    pub server_name: String,

    /// Listen host
    pub host: IpAddr,

    /// Listen port
    pub port: u16,

    /// Parent directory of the static asset roots
    pub web_root: PathBuf,

    /// Log level name
    pub log_level: String,

    /// Provider operating mode
    pub mode: ProviderMode,
}

impl ServerConfig {
    /// Create a configuration with defaults for everything but the
    /// certificate directory and server name
    pub fn new(cert_dir: impl Into<PathBuf>, server_name: impl Into<String>) -> Self {
        Self {
            cert_dir: cert_dir.into(),
            server_name: server_name.into(),
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            web_root: PathBuf::from("."),
            log_level: "info".to_string(),
            mode: ProviderMode::Live,
        }
    }

    /// Set the listen port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the listen host
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Set the web root
    pub fn with_web_root(mut self, web_root: impl Into<PathBuf>) -> Self {
        self.web_root = web_root.into();
        self
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, crate::Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// `from_env` is a thin wrapper over this; tests pass a map instead of
    /// touching the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, crate::Error> {
        let cert_dir = lookup("DNSGW_CERT_DIR").ok_or_else(|| {
            crate::Error::config(
                "DNSGW_CERT_DIR is required. Set it via: export DNSGW_CERT_DIR=/etc/dnsgw/certs/",
            )
        })?;
        let server_name = lookup("DNSGW_SERVER_NAME").ok_or_else(|| {
            crate::Error::config(
                "DNSGW_SERVER_NAME is required. \
                 Set it via: export DNSGW_SERVER_NAME=dns.example.com",
            )
        })?;

        let mut config = Self::new(cert_dir, server_name);

        if let Some(host) = lookup("DNSGW_HOST") {
            config.host = host.trim().parse().map_err(|_| {
                crate::Error::config(format!("DNSGW_HOST must be an IP address. Got: {}", host))
            })?;
        }

        if let Some(port) = lookup("DNSGW_PORT") {
            config.port = port.trim().parse().map_err(|_| {
                crate::Error::config(format!(
                    "DNSGW_PORT must be a number between 1 and 65535. Got: {}",
                    port
                ))
            })?;
        }

        if let Some(web_root) = lookup("DNSGW_WEB_ROOT") {
            config.web_root = PathBuf::from(web_root);
        }

        if let Some(level) = lookup("DNSGW_LOG_LEVEL") {
            config.log_level = level;
        }

        if let Some(mode) = lookup("DNSGW_MODE") {
            config.mode = ProviderMode::parse(&mode)?;
        }

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.cert_dir.as_os_str().is_empty() {
            return Err(crate::Error::config("DNSGW_CERT_DIR cannot be empty"));
        }

        if self.server_name.is_empty() {
            return Err(crate::Error::config("DNSGW_SERVER_NAME cannot be empty"));
        }

        if self.server_name.parse::<IpAddr>().is_err() {
            validate_dns_name(&self.server_name)?;
        }

        if self.port == 0 {
            return Err(crate::Error::config(
                "DNSGW_PORT must be between 1 and 65535. Got: 0",
            ));
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(crate::Error::config(format!(
                    "DNSGW_LOG_LEVEL '{}' is not valid. \
                    Valid levels: trace, debug, info, warn, error",
                    self.log_level
                )));
            }
        }

        Ok(())
    }

    /// Path of the certificate chain (PEM)
    pub fn cert_path(&self) -> PathBuf {
        self.cert_dir.join(CERT_FILE_NAME)
    }

    /// Path of the private key (PEM)
    pub fn key_path(&self) -> PathBuf {
        self.cert_dir.join(KEY_FILE_NAME)
    }

    /// Address the listener binds to
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Address the REST gateway dials to reach the RPC endpoint
    ///
    /// An unspecified listen host maps to the loopback address of the same
    /// family; a concrete host is dialed as is.
    pub fn loopback_addr(&self) -> SocketAddr {
        let host = match self.host {
            IpAddr::V4(v4) if v4.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(v6) if v6.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            other => other,
        };
        SocketAddr::new(host, self.port)
    }
}

/// Validate that a string is a plausible DNS name for TLS verification
///
/// Basic RFC 1035 checks; a leading `*.` wildcard label is not accepted
/// because the gateway dials this exact name.
fn validate_dns_name(name: &str) -> Result<(), crate::Error> {
    if name.len() > 253 {
        return Err(crate::Error::config(format!(
            "DNSGW_SERVER_NAME too long: {} chars (max 253)",
            name.len()
        )));
    }

    for label in name.trim_end_matches('.').split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(crate::Error::config(format!(
                "DNSGW_SERVER_NAME has an invalid label: '{}'",
                name
            )));
        }

        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            || label.starts_with('-')
            || label.ends_with('-')
        {
            return Err(crate::Error::config(format!(
                "DNSGW_SERVER_NAME label contains invalid characters. Label: '{}'. \
                Valid: alphanumeric and hyphen, not at either end.",
                label
            )));
        }
    }

    Ok(())
}
