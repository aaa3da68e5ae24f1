//! W3C trace context propagation
//!
//! The RPC interceptors extract an inbound `traceparent` into the parent of
//! the `grpc.server` span. The REST gateway injects its context into the
//! loopback call, so a REST request and the RPC call it turns into share
//! one trace.
//!
//! Span export is up to the subscriber: with a `tracing-opentelemetry`
//! layer installed, spans become OpenTelemetry spans under these parents.

use std::sync::Once;

use http::HeaderMap;
use opentelemetry::propagation::{Extractor, Injector};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::{Context, global};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tonic::metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue};

static PROPAGATOR: Once = Once::new();

/// Install the W3C trace context propagator as the global propagator
///
/// Idempotent; called when the RPC service and the gateway are built.
pub fn install_propagator() {
    PROPAGATOR.call_once(|| {
        global::set_text_map_propagator(TraceContextPropagator::new());
    });
}

/// Read-only view of HTTP headers for propagators
pub struct HeaderExtractor<'a>(pub &'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

/// Writable view of gRPC request metadata for propagators
pub struct MetadataInjector<'a>(pub &'a mut MetadataMap);

impl Injector for MetadataInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let Ok(key) = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
            && let Ok(value) = MetadataValue::<Ascii>::try_from(value.as_str())
        {
            self.0.insert(key, value);
        }
    }
}

/// Remote parent context carried by `headers`, if any
pub fn extract_context(headers: &HeaderMap) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

/// Write `cx` into outgoing gRPC metadata
pub fn inject_context(cx: &Context, metadata: &mut MetadataMap) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(cx, &mut MetadataInjector(metadata))
    });
}

/// Hex trace id of the span in `cx`, when it is valid
pub fn trace_id(cx: &Context) -> Option<String> {
    let span = cx.span();
    let span_context = span.span_context();
    span_context
        .is_valid()
        .then(|| span_context.trace_id().to_string())
}
