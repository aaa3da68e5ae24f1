// # Alibaba Cloud DNS Record Updater
//
// Implements `RecordUpdater` on top of the Alibaba Cloud DNS (alidns)
// `UpdateDomainRecord` API.
//
// - ✅ One signed HTTPS request per update
// - ✅ Credentials come with each update; nothing is cached between calls
// - ✅ HTTP timeout configured (30 seconds)
// - ✅ API error codes mapped onto the gateway's error kinds
// - ✅ Dry-run mode for safe testing
// - ❌ NO retry logic (callers own retries)
// - ❌ NO background tasks
//
// ## Security Requirements
//
// - The access key secret NEVER appears in logs or `Debug` output
// - The secret only leaves the process as part of the HMAC key
//
// ## API Reference
//
// - Endpoint: `https://<endpoint>/` (e.g. `alidns.cn-hangzhou.aliyuncs.com`)
// - Action: `UpdateDomainRecord`, Version `2015-01-09`
// - Signature: HMAC-SHA1, signature version 1.0 (see [`signature`])

pub mod signature;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use dnsgw_core::{Error, ProviderMode, RecordUpdate, RecordUpdater, Result, UpdateReceipt};
use serde::Deserialize;

/// Provider name used in logs and errors
pub const PROVIDER_NAME: &str = "alidns";

/// API version of the DNS service
const API_VERSION: &str = "2015-01-09";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Alibaba Cloud DNS updater
///
/// Stateless apart from the HTTP client: every [`RecordUpdate`] carries its
/// own credentials and endpoint.
///
/// # Dry-Run Mode
///
/// In [`ProviderMode::DryRun`] the updater logs the intended change and
/// returns a synthetic receipt without contacting the API.
pub struct AlidnsUpdater {
    /// HTTP client for API requests
    client: reqwest::Client,

    /// Live or dry-run
    mode: ProviderMode,

    /// URL scheme for the endpoint; `https` outside of tests
    scheme: &'static str,
}

impl std::fmt::Debug for AlidnsUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlidnsUpdater")
            .field("mode", &self.mode)
            .field("scheme", &self.scheme)
            .finish()
    }
}

impl AlidnsUpdater {
    /// Create an updater in the given mode
    pub fn new(mode: ProviderMode) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        if mode == ProviderMode::DryRun {
            tracing::warn!("alidns updater running in DRY-RUN mode - no changes will be made");
        }

        Ok(Self {
            client,
            mode,
            scheme: "https",
        })
    }

    /// Talk plain HTTP to the endpoint, for a local stand-in of the API
    pub fn with_plain_http(mut self) -> Self {
        self.scheme = "http";
        self
    }

    /// Operating mode
    pub fn mode(&self) -> ProviderMode {
        self.mode
    }

    /// Build the signed request URL for an update
    ///
    /// `nonce` and `timestamp` are parameters so the result is reproducible.
    pub fn signed_url(
        &self,
        update: &RecordUpdate,
        nonce: &str,
        timestamp: &str,
    ) -> Result<String> {
        let endpoint = update.endpoint.trim().trim_end_matches('/');
        if endpoint.is_empty() || endpoint.contains("://") || endpoint.contains('/') {
            return Err(Error::invalid_input(format!(
                "endpoint must be a host name, e.g. alidns.cn-hangzhou.aliyuncs.com. Got: {}",
                update.endpoint
            )));
        }

        let params = BTreeMap::from([
            ("AccessKeyId", update.access_key_id.clone()),
            ("Action", "UpdateDomainRecord".to_string()),
            ("Format", "JSON".to_string()),
            ("RR", update.rr.clone()),
            ("RecordId", update.record_id.clone()),
            ("SignatureMethod", "HMAC-SHA1".to_string()),
            ("SignatureNonce", nonce.to_string()),
            ("SignatureVersion", "1.0".to_string()),
            ("Timestamp", timestamp.to_string()),
            ("Type", update.record_type.clone()),
            ("Value", update.value.clone()),
            ("Version", API_VERSION.to_string()),
        ]);

        let query = signature::canonical_query(&params);
        let signature = signature::sign(
            &update.access_key_secret,
            &signature::string_to_sign("GET", &query),
        );

        Ok(format!(
            "{}://{}/?{}&Signature={}",
            self.scheme,
            endpoint,
            query,
            signature::encode(&signature)
        ))
    }
}

/// Successful `UpdateDomainRecord` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UpdateResponse {
    #[serde(default)]
    request_id: String,
    #[serde(default)]
    record_id: String,
}

/// Error response of the RPC-style API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiErrorResponse {
    #[serde(default)]
    request_id: String,
    code: String,
    #[serde(default)]
    message: String,
}

/// Map an API failure onto the gateway's error kinds
///
/// Codes are checked before HTTP statuses: `InvalidAccessKeyId.NotFound`
/// is an authentication failure, not a missing record.
pub fn map_api_error(status: u16, code: &str, message: &str) -> Error {
    let detail = format!("{}: {}", code, message);

    if code.starts_with("InvalidAccessKeyId")
        || code == "SignatureDoesNotMatch"
        || code.starts_with("Forbidden")
        || code == "IncompleteSignature"
    {
        return Error::auth(detail);
    }
    if code.starts_with("Throttling") {
        return Error::rate_limited(detail);
    }
    if code.ends_with("NotFound") {
        return Error::not_found(detail);
    }

    match status {
        401 | 403 => Error::auth(detail),
        404 => Error::not_found(detail),
        429 => Error::rate_limited(detail),
        _ => Error::provider(PROVIDER_NAME, detail),
    }
}

#[async_trait]
impl RecordUpdater for AlidnsUpdater {
    /// Apply an update through `UpdateDomainRecord`
    ///
    /// One GET request; no retry. The error is returned to the caller as is.
    async fn update_record(&self, update: &RecordUpdate) -> Result<UpdateReceipt> {
        tracing::info!(
            endpoint = %update.endpoint,
            record_id = %update.record_id,
            rr = %update.rr,
            record_type = %update.record_type,
            value = %update.value,
            mode = if self.mode == ProviderMode::DryRun { "DRY-RUN" } else { "LIVE" },
            "Updating alidns record"
        );

        let nonce = uuid::Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let url = self.signed_url(update, &nonce, &timestamp)?;

        if self.mode == ProviderMode::DryRun {
            tracing::info!(
                "[DRY-RUN] Would send UpdateDomainRecord for record {} ({} {} -> {})",
                update.record_id,
                update.rr,
                update.record_type,
                update.value
            );
            return Ok(UpdateReceipt {
                request_id: format!("dry-run-{}", nonce),
                record_id: update.record_id.clone(),
            });
        }

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| {
                Error::http(format!(
                    "alidns request to {} failed: {}",
                    update.endpoint,
                    e.without_url()
                ))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| {
                Error::http(format!("Failed to read alidns response: {}", e.without_url()))
            })?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<ApiErrorResponse>(&body) {
                Ok(api_error) => {
                    tracing::debug!(
                        request_id = %api_error.request_id,
                        code = %api_error.code,
                        "alidns returned an error"
                    );
                    map_api_error(status.as_u16(), &api_error.code, &api_error.message)
                }
                Err(_) => map_api_error(
                    status.as_u16(),
                    &format!("HTTP{}", status.as_u16()),
                    body.trim(),
                ),
            });
        }

        let parsed: UpdateResponse = serde_json::from_str(&body)
            .map_err(|e| {
                Error::provider(PROVIDER_NAME, format!("Failed to parse response: {}", e))
            })?;

        tracing::info!(
            request_id = %parsed.request_id,
            record_id = %parsed.record_id,
            "alidns record updated"
        );

        Ok(UpdateReceipt {
            request_id: parsed.request_id,
            record_id: if parsed.record_id.is_empty() {
                update.record_id.clone()
            } else {
                parsed.record_id
            },
        })
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }
}
