//! REST handlers
//!
//! Each handler decodes the JSON request, forwards it to the RPC endpoint
//! over the loopback channel and renders the reply as JSON.

use std::net::SocketAddr;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::request::Parts;
use axum::response::IntoResponse;
use serde::{Deserialize, Deserializer, Serialize};
use tonic::metadata::{MetadataMap, MetadataValue};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::GatewayState;
use super::error::GatewayError;
use crate::address::X_FORWARDED_FOR;
use crate::proto::{GetCallerAddressRequest, UpdateRecordRequest};
use crate::telemetry;

/// Metadata key carrying the original `Host`
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 64 * 1024;

/// JSON form of `UpdateRecordRequest`
///
/// Field names follow the protobuf JSON mapping; the original proto names
/// are accepted too. Missing and `null` fields read as empty, unknown ones
/// are ignored.
#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateRecordBody {
    #[serde(alias = "access_key_id", deserialize_with = "null_as_empty")]
    pub access_key_id: String,
    #[serde(alias = "access_key_secret", deserialize_with = "null_as_empty")]
    pub access_key_secret: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub endpoint: String,
    #[serde(alias = "record_id", deserialize_with = "null_as_empty")]
    pub record_id: String,
    #[serde(alias = "RR", deserialize_with = "null_as_empty")]
    pub rr: String,
    #[serde(rename = "type", deserialize_with = "null_as_empty")]
    pub record_type: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub value: String,
}

/// Proto-JSON reads `null` on a scalar as the default value
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl From<UpdateRecordBody> for UpdateRecordRequest {
    fn from(body: UpdateRecordBody) -> Self {
        Self {
            access_key_id: body.access_key_id,
            access_key_secret: body.access_key_secret,
            endpoint: body.endpoint,
            record_id: body.record_id,
            rr: body.rr,
            r#type: body.record_type,
            value: body.value,
        }
    }
}

/// JSON form of `UpdateRecordResponse`
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateRecordReply {
    pub message: String,
}

/// JSON form of `GetCallerAddressResponse`
#[derive(Debug, Serialize, Deserialize)]
pub struct CallerAddressReply {
    pub data: String,
}

/// `POST /v1/dns/UpdateRecord`
pub async fn update_record(
    State(state): State<GatewayState>,
    req: Request,
) -> Result<Json<UpdateRecordReply>, GatewayError> {
    let (parts, body) = req.into_parts();

    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| GatewayError::invalid_argument(e.to_string()))?;
    let payload = decode_body(&bytes)?;

    let mut request = tonic::Request::new(UpdateRecordRequest::from(payload));
    forward_metadata(&parts, request.metadata_mut());

    let mut client = state.client.clone();
    let reply = client.update_record(request).await?.into_inner();

    Ok(Json(UpdateRecordReply {
        message: reply.message,
    }))
}

/// `GET /v1/dns/GetCallerAddress`
pub async fn get_caller_address(
    State(state): State<GatewayState>,
    req: Request,
) -> Result<Json<CallerAddressReply>, GatewayError> {
    let (parts, _body) = req.into_parts();

    let mut request = tonic::Request::new(GetCallerAddressRequest {});
    forward_metadata(&parts, request.metadata_mut());

    let mut client = state.client.clone();
    let reply = client.get_caller_address(request).await?.into_inner();

    Ok(Json(CallerAddressReply { data: reply.data }))
}

/// Any other `/v1/*` path
pub async fn not_found() -> GatewayError {
    GatewayError::not_found()
}

/// Known `/v1/*` path with the wrong method
pub async fn method_not_allowed() -> GatewayError {
    GatewayError::method_not_allowed()
}

/// `GET /swagger.json`
pub async fn swagger_json() -> impl IntoResponse {
    ([(CONTENT_TYPE, "application/json")], crate::proto::SWAGGER_JSON)
}

/// An empty body decodes to an empty message
fn decode_body(bytes: &Bytes) -> Result<UpdateRecordBody, GatewayError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(UpdateRecordBody::default());
    }

    serde_json::from_slice(bytes).map_err(|e| GatewayError::invalid_argument(e.to_string()))
}

/// Attach `x-forwarded-for`, `x-forwarded-host` and the trace context for
/// the RPC endpoint
fn forward_metadata(parts: &Parts, metadata: &mut MetadataMap) {
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let inbound = parts
        .headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    if let Some(forwarded) = forwarded_for(inbound, peer.as_deref())
        && let Ok(value) = MetadataValue::try_from(forwarded.as_str())
    {
        metadata.insert(X_FORWARDED_FOR, value);
    }

    let host = parts
        .headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|authority| authority.to_string()));
    if let Some(host) = host
        && let Ok(value) = MetadataValue::try_from(host.as_str())
    {
        metadata.insert(X_FORWARDED_HOST, value);
    }

    forward_trace_context(parts, metadata);
}

/// Continue the caller's trace in the loopback call
///
/// The gateway's request span joins an inbound trace and is propagated when
/// an OpenTelemetry layer backs it; otherwise the inbound context is passed
/// on unchanged.
fn forward_trace_context(parts: &Parts, metadata: &mut MetadataMap) {
    let inbound = telemetry::extract_context(&parts.headers);
    let span = tracing::Span::current();

    let cx = match telemetry::trace_id(&inbound) {
        Some(inbound_id) => {
            let _ = span.set_parent(inbound.clone());
            let own = span.context();
            if telemetry::trace_id(&own).as_deref() == Some(inbound_id.as_str()) {
                own
            } else {
                inbound
            }
        }
        None => span.context(),
    };

    telemetry::inject_context(&cx, metadata);
}

/// Inbound chain with the peer appended, or whichever one is known
fn forwarded_for(inbound: Option<&str>, peer: Option<&str>) -> Option<String> {
    match (inbound, peer) {
        (Some(inbound), Some(peer)) => Some(format!("{inbound}, {peer}")),
        (Some(inbound), None) => Some(inbound.to_string()),
        (None, Some(peer)) => Some(peer.to_string()),
        (None, None) => None,
    }
}
