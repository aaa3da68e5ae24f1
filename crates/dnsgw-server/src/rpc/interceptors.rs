//! Interceptor chain around the gRPC service
//!
//! Applied as tower layers on the HTTP level so unary and streaming calls
//! are covered alike. Outermost first:
//!
//! 1. [`RpcTraceLayer`]: one `grpc.server` span per call, parented on the
//!    inbound W3C trace context
//! 2. [`RpcLoggingLayer`]: start/finish events with the resulting code
//! 3. [`RecoveryLayer`]: handler panics become `INTERNAL` responses

use std::any::Any;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::FutureExt;
use futures::future::BoxFuture;
use http::{HeaderMap, Request, Response};
use tonic::{Code, Status};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service, ServiceBuilder};
use tracing::Instrument;
use tracing::instrument::Instrumented;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::router::HttpService;
use crate::telemetry;

/// Wrap a gRPC service in the interceptor chain and box it for the router
pub fn layer_rpc<S>(service: S) -> HttpService
where
    S: Service<
            Request<axum::body::Body>,
            Response = Response<tonic::body::Body>,
            Error = Infallible,
        > + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
{
    telemetry::install_propagator();

    let service = ServiceBuilder::new()
        .map_response(|res: Response<tonic::body::Body>| res.map(axum::body::Body::new))
        .layer(RpcTraceLayer)
        .layer(RpcLoggingLayer)
        .layer(RecoveryLayer)
        .service(service);

    BoxCloneSyncService::new(service)
}

/// Split `/package.Service/Method` into service and method names
fn split_path(path: &str) -> (&str, &str) {
    let trimmed = path.trim_start_matches('/');
    trimmed.split_once('/').unwrap_or((trimmed, ""))
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Opens a `grpc.server` span around each call
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcTraceLayer;

impl<S> Layer<S> for RpcTraceLayer {
    type Service = RpcTrace<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RpcTrace { inner }
    }
}

/// Service produced by [`RpcTraceLayer`]
#[derive(Debug, Clone)]
pub struct RpcTrace<S> {
    inner: S,
}

impl<S, B> Service<Request<B>> for RpcTrace<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Instrumented<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let (service, method) = split_path(req.uri().path());
        let span = tracing::info_span!(
            "grpc.server",
            otel.kind = "server",
            rpc.system = "grpc",
            rpc.service = %service,
            rpc.method = %method,
            trace_id = tracing::field::Empty,
        );

        let parent = telemetry::extract_context(req.headers());
        // No-op without an OpenTelemetry layer; the recorded id below comes
        // from the inbound context either way.
        let _ = span.set_parent(parent.clone());
        if let Some(trace_id) =
            telemetry::trace_id(&parent).or_else(|| telemetry::trace_id(&span.context()))
        {
            span.record("trace_id", tracing::field::display(trace_id));
        }

        let future = span.in_scope(|| self.inner.call(req));
        future.instrument(span)
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logs the start and the outcome of each call
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcLoggingLayer;

impl<S> Layer<S> for RpcLoggingLayer {
    type Service = RpcLogging<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RpcLogging { inner }
    }
}

/// Service produced by [`RpcLoggingLayer`]
#[derive(Debug, Clone)]
pub struct RpcLogging<S> {
    inner: S,
}

impl<S, B, ResBody> Service<Request<B>> for RpcLogging<S>
where
    S: Service<Request<B>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let method = req.uri().path().to_string();
        let started = Instant::now();
        tracing::info!(grpc.method = %method, "started call");

        let future = self.inner.call(req);
        Box::pin(async move {
            let result = future.await;
            match &result {
                Ok(res) => log_finished(&method, response_code(res.headers()), started),
                Err(_) => tracing::error!(
                    grpc.method = %method,
                    grpc.time_ms = started.elapsed().as_millis() as u64,
                    "finished call with transport error"
                ),
            }
            result
        })
    }
}

/// Code carried in the response headers; trailers-only responses put it
/// there, a successful stream leaves it for the trailers
fn response_code(headers: &HeaderMap) -> Code {
    headers
        .get(Status::GRPC_STATUS)
        .map(|value| Code::from_bytes(value.as_bytes()))
        .unwrap_or(Code::Ok)
}

fn log_finished(method: &str, code: Code, started: Instant) {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match code {
        Code::Ok
        | Code::Cancelled
        | Code::InvalidArgument
        | Code::NotFound
        | Code::AlreadyExists
        | Code::Unauthenticated => tracing::info!(
            grpc.method = %method,
            grpc.code = ?code,
            grpc.time_ms = elapsed_ms,
            "finished call"
        ),
        Code::DeadlineExceeded
        | Code::PermissionDenied
        | Code::ResourceExhausted
        | Code::FailedPrecondition
        | Code::Aborted
        | Code::OutOfRange
        | Code::Unavailable => tracing::warn!(
            grpc.method = %method,
            grpc.code = ?code,
            grpc.time_ms = elapsed_ms,
            "finished call"
        ),
        Code::Unknown | Code::Unimplemented | Code::Internal | Code::DataLoss => tracing::error!(
            grpc.method = %method,
            grpc.code = ?code,
            grpc.time_ms = elapsed_ms,
            "finished call"
        ),
    }
}

// ---------------------------------------------------------------------------
// Panic recovery
// ---------------------------------------------------------------------------

/// Converts handler panics into `INTERNAL` responses
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryLayer;

impl<S> Layer<S> for RecoveryLayer {
    type Service = Recovery<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Recovery { inner }
    }
}

/// Service produced by [`RecoveryLayer`]
#[derive(Debug, Clone)]
pub struct Recovery<S> {
    inner: S,
}

impl<S, B, ResBody> Service<Request<B>> for Recovery<S>
where
    S: Service<Request<B>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| self.inner.call(req))) {
            Ok(future) => future,
            Err(payload) => {
                let response = panic_response(payload.as_ref());
                return Box::pin(async move { Ok(response) });
            }
        };

        Box::pin(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Ok(panic_response(payload.as_ref())),
            }
        })
    }
}

fn panic_response<B: Default>(payload: &(dyn Any + Send)) -> Response<B> {
    let message = panic_message(payload);
    tracing::error!(panic = %message, "recovered from handler panic");
    Status::internal(format!("panic triggered: {message}")).into_http()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
