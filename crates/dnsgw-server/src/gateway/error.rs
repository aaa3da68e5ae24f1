//! REST rendering of gRPC statuses
//!
//! Failures on the REST side carry the status the RPC endpoint returned (or
//! the one the gateway produced itself) and render as
//! `{"code": <grpc code>, "message": "...", "details": []}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tonic::{Code, Status};

/// Non-standard "client closed request" status
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Error returned by gateway handlers
#[derive(Debug)]
pub struct GatewayError(pub Status);

impl GatewayError {
    /// Request could not be decoded
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self(Status::invalid_argument(message))
    }

    /// No route for the path
    pub fn not_found() -> Self {
        Self(Status::not_found("Not Found"))
    }

    /// Path exists but not for this method
    pub fn method_not_allowed() -> Self {
        Self(Status::unimplemented("Method Not Allowed"))
    }

    /// gRPC code carried by this error
    pub fn code(&self) -> Code {
        self.0.code()
    }
}

impl From<Status> for GatewayError {
    fn from(status: Status) -> Self {
        Self(status)
    }
}

/// JSON body of an error response
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric gRPC code
    pub code: i32,
    /// Status message
    pub message: String,
    /// Always empty; kept for wire compatibility
    pub details: Vec<serde_json::Value>,
}

/// HTTP status for a gRPC code
pub fn http_status(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::Cancelled => {
            StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST)
        }
        Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => {
            StatusCode::BAD_REQUEST
        }
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists | Code::Aborted => StatusCode::CONFLICT,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::Unknown | Code::Internal | Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = http_status(self.0.code());
        let body = ErrorBody {
            code: self.0.code() as i32,
            message: self.0.message().to_string(),
            details: Vec::new(),
        };

        (status, Json(body)).into_response()
    }
}
