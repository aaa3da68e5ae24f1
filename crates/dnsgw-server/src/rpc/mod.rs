//! RPC endpoint
//!
//! [`RecordService`] implements the generated `DnsService` contract on top of
//! a [`RecordUpdater`]. [`build_rpc_service`] wraps it in the interceptor
//! chain and boxes it for the protocol router.

pub mod interceptors;

use std::sync::Arc;

use dnsgw_core::{RecordUpdate, RecordUpdater};
use tonic::{Request, Response, Status};

use crate::address::caller_address;
use crate::proto::dns_service_server::{DnsService, DnsServiceServer};
use crate::proto::{
    GetCallerAddressRequest, GetCallerAddressResponse, UpdateRecordRequest, UpdateRecordResponse,
};
use crate::router::HttpService;

/// Success message returned by `UpdateRecord`
pub const UPDATE_OK_MESSAGE: &str = "record updated";

/// gRPC implementation of the DNS service
#[derive(Clone)]
pub struct RecordService {
    updater: Arc<dyn RecordUpdater>,
}

impl RecordService {
    /// Create a service delegating updates to `updater`
    pub fn new(updater: Arc<dyn RecordUpdater>) -> Self {
        Self { updater }
    }
}

impl std::fmt::Debug for RecordService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordService")
            .field("provider", &self.updater.provider_name())
            .finish()
    }
}

#[tonic::async_trait]
impl DnsService for RecordService {
    async fn update_record(
        &self,
        request: Request<UpdateRecordRequest>,
    ) -> Result<Response<UpdateRecordResponse>, Status> {
        if let Some(field) = first_missing_field(request.get_ref()) {
            tracing::info!(field, "UpdateRecord rejected: missing field");
            return Err(Status::invalid_argument(format!("{field} is required")));
        }

        let resolved = request
            .get_ref()
            .value
            .is_empty()
            .then(|| caller_address(&request));
        let req = request.into_inner();

        let update = RecordUpdate {
            access_key_id: req.access_key_id,
            access_key_secret: req.access_key_secret,
            endpoint: req.endpoint,
            record_id: req.record_id,
            rr: req.rr,
            record_type: req.r#type,
            value: resolved.unwrap_or(req.value),
        };

        tracing::info!(
            provider = self.updater.provider_name(),
            endpoint = %update.endpoint,
            record_id = %update.record_id,
            rr = %update.rr,
            record_type = %update.record_type,
            value = %update.value,
            "Updating DNS record"
        );

        match self.updater.update_record(&update).await {
            Ok(receipt) => {
                tracing::info!(
                    record_id = %receipt.record_id,
                    request_id = %receipt.request_id,
                    "DNS record updated"
                );
                Ok(Response::new(UpdateRecordResponse {
                    message: UPDATE_OK_MESSAGE.to_string(),
                }))
            }
            Err(e) => {
                log_update_failure(&update.record_id, &e);
                Err(status_from_error(&e))
            }
        }
    }

    async fn get_caller_address(
        &self,
        request: Request<GetCallerAddressRequest>,
    ) -> Result<Response<GetCallerAddressResponse>, Status> {
        Ok(Response::new(GetCallerAddressResponse {
            data: caller_address(&request),
        }))
    }
}

/// Name of the first required field that is empty, in declaration order
///
/// `value` is optional: it falls back to the caller's address.
fn first_missing_field(req: &UpdateRecordRequest) -> Option<&'static str> {
    [
        ("access_key_id", &req.access_key_id),
        ("access_key_secret", &req.access_key_secret),
        ("endpoint", &req.endpoint),
        ("record_id", &req.record_id),
        ("rr", &req.rr),
        ("type", &req.r#type),
    ]
    .into_iter()
    .find(|(_, value)| value.is_empty())
    .map(|(name, _)| name)
}

/// Client errors log at INFO, the rest at WARN
fn log_update_failure(record_id: &str, err: &dnsgw_core::Error) {
    if err.is_client_error() {
        tracing::info!(record_id, error = %err, "DNS record update rejected");
    } else {
        tracing::warn!(record_id, error = %err, "DNS record update failed");
    }
}

/// Map a collaborator error onto a gRPC status, keeping its message
pub fn status_from_error(err: &dnsgw_core::Error) -> Status {
    use dnsgw_core::Error;

    let message = err.to_string();
    match err {
        Error::InvalidInput(_) => Status::invalid_argument(message),
        Error::NotFound(_) => Status::not_found(message),
        Error::Authentication(_) => Status::unauthenticated(message),
        Error::RateLimited(_) => Status::resource_exhausted(message),
        _ => Status::unknown(message),
    }
}

/// Build the RPC service with its interceptor chain
pub fn build_rpc_service(updater: Arc<dyn RecordUpdater>) -> HttpService {
    interceptors::layer_rpc(DnsServiceServer::new(RecordService::new(updater)))
}
