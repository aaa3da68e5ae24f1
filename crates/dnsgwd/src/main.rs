// # dnsgwd - DNS Gateway Daemon
//
// ⚠️ ARCHITECTURAL CONSTRAINTS ⚠️
//
// - This is a THIN integration layer ONLY
// - DO NOT add request handling, DNS logic, or retry logic here
// - Serving logic lives in dnsgw-server, provider logic in dnsgw-provider-alidns
// - Configuration is via environment variables ONLY
//
// The dnsgwd daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Building the Alibaba Cloud DNS updater
// 4. Serving gRPC and REST on one TLS port until a signal arrives
//
// ## Configuration
//
// - `DNSGW_CERT_DIR`: Directory holding `tls.pem` and `tls.key` (required)
// - `DNSGW_SERVER_NAME`: TLS server name (required)
// - `DNSGW_HOST`: Listen address (default `0.0.0.0`)
// - `DNSGW_PORT`: Listen port (default `8443`)
// - `DNSGW_WEB_ROOT`: Parent of `dist/`, `static/` and `swagger/` (default `.`)
// - `DNSGW_LOG_LEVEL`: trace, debug, info, warn, error (default `info`)
// - `DNSGW_MODE`: `live` or `dry-run` (default `live`)
//
// ## Example
//
// ```bash
// export DNSGW_CERT_DIR=/etc/dnsgw/certs/
// export DNSGW_SERVER_NAME=dns.example.com
// export DNSGW_PORT=8443
//
// dnsgwd
// ```

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use dnsgw_core::ServerConfig;
use dnsgw_provider_alidns::AlidnsUpdater;
use dnsgw_server::{DnsGatewayServer, ServerError};
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::layer::SubscriberExt;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DnsgwExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<DnsgwExitCode> for ExitCode {
    fn from(code: DnsgwExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match ServerConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return DnsgwExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return DnsgwExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Spans become OpenTelemetry spans so inbound `traceparent` headers
    // parent them and their trace ids show up in the logs
    let provider = SdkTracerProvider::builder().build();
    let otel_layer = tracing_opentelemetry::layer().with_tracer(provider.tracer("dnsgwd"));

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish()
        .with(otel_layer);

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DnsgwExitCode::ConfigError.into();
    }
    dnsgw_server::telemetry::install_propagator();

    // Fails only if another provider is already installed
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Starting dnsgwd daemon");
    info!(
        listen = %config.listen_addr(),
        server_name = %config.server_name,
        mode = ?config.mode,
        "Configuration loaded"
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DnsgwExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(run_daemon(config));

    if let Err(e) = provider.shutdown() {
        eprintln!("Error shutting down tracer provider: {e:?}");
    }
    code.into()
}

/// Build the server and serve until a shutdown signal or a fatal error
async fn run_daemon(config: ServerConfig) -> DnsgwExitCode {
    let updater = match AlidnsUpdater::new(config.mode) {
        Ok(updater) => Arc::new(updater),
        Err(e) => {
            error!("Failed to create alidns updater: {}", e);
            return DnsgwExitCode::ConfigError;
        }
    };

    let server = match DnsGatewayServer::new(config, updater) {
        Ok(server) => server,
        Err(e) => {
            error!("Startup failed: {}", e);
            return exit_code_for(&e);
        }
    };

    tokio::select! {
        result = server.serve() => match result {
            Ok(()) => DnsgwExitCode::CleanShutdown,
            Err(e) => {
                error!("Server error: {}", e);
                exit_code_for(&e)
            }
        },
        signal = wait_for_shutdown() => match signal {
            Ok(signal) => {
                info!("Received shutdown signal: {}", signal);
                info!("Shutting down daemon");
                DnsgwExitCode::CleanShutdown
            }
            Err(e) => {
                error!("Shutdown error: {}", e);
                DnsgwExitCode::RuntimeError
            }
        },
    }
}

fn exit_code_for(error: &ServerError) -> DnsgwExitCode {
    if error.is_startup() {
        DnsgwExitCode::ConfigError
    } else {
        DnsgwExitCode::RuntimeError
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
