// # Record Updater Trait
//
// Defines the interface between the server front and the DNS provider that
// actually changes a record.
//
// ## Implementations
//
// - Alibaba Cloud DNS: `dnsgw-provider-alidns` crate
//
// ## Usage
//
// ```rust,ignore
// use dnsgw_core::{RecordUpdate, RecordUpdater};
//
// async fn apply(updater: &dyn RecordUpdater) -> dnsgw_core::Result<()> {
//     let update = RecordUpdate {
//         access_key_id: "LTAI...".into(),
//         access_key_secret: "...".into(),
//         endpoint: "alidns.cn-hangzhou.aliyuncs.com".into(),
//         record_id: "1234567890".into(),
//         rr: "home".into(),
//         record_type: "A".into(),
//         value: "203.0.113.5".into(),
//     };
//     updater.update_record(&update).await?;
//     Ok(())
// }
// ```

use async_trait::async_trait;

/// A single DNS record change, with credentials supplied by the caller
///
/// Every field is required by the time an update reaches a
/// [`RecordUpdater`]: the server front resolves an empty `value` to the
/// caller's address before building one of these.
#[derive(Clone, PartialEq, Eq)]
pub struct RecordUpdate {
    /// Provider access key id
    pub access_key_id: String,
    /// Provider access key secret
    /// ⚠️ NEVER log this value
    pub access_key_secret: String,
    /// Provider API endpoint host (e.g. "alidns.cn-hangzhou.aliyuncs.com")
    pub endpoint: String,
    /// Provider-specific record id
    pub record_id: String,
    /// Host record (e.g. "www", "@")
    pub rr: String,
    /// Record type (e.g. "A", "AAAA", "CNAME")
    pub record_type: String,
    /// New record value
    pub value: String,
}

// Custom Debug implementation that hides the access key secret
impl std::fmt::Debug for RecordUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordUpdate")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<REDACTED>")
            .field("endpoint", &self.endpoint)
            .field("record_id", &self.record_id)
            .field("rr", &self.rr)
            .field("record_type", &self.record_type)
            .field("value", &self.value)
            .finish()
    }
}

/// Provider acknowledgement of an applied update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReceipt {
    /// Provider request id, for correlating with provider-side logs
    pub request_id: String,
    /// Record id the provider reports as updated
    pub record_id: String,
}

/// Trait for DNS record updater implementations
///
/// The server front treats an updater as an opaque collaborator: it hands
/// over a validated [`RecordUpdate`] and passes whatever error comes back to
/// the caller without wrapping or retrying it.
///
/// # Thread Safety
///
/// Implementations are shared across every connection task and must be
/// `Send + Sync`. There is no locking around calls; two updates for the same
/// record may run concurrently and the provider decides which one wins.
///
/// # Capabilities
///
/// ## Allowed
/// - ✅ Perform HTTP/HTTPS API calls to the provider endpoint
/// - ✅ Parse provider-specific responses
/// - ✅ Return success or failure
///
/// ## Forbidden
/// - ❌ Retry or back off (callers own retry policy)
/// - ❌ Spawn tasks or threads
/// - ❌ Cache credentials beyond the single call
/// - ❌ Log `access_key_secret`
///
/// # Cancellation
///
/// The future may be dropped when the caller hangs up. An update that was
/// already sent may still complete at the provider; there is no rollback.
#[async_trait]
pub trait RecordUpdater: Send + Sync {
    /// Apply an update to a DNS record
    ///
    /// # Returns
    ///
    /// - `Ok(UpdateReceipt)`: The provider accepted the change
    /// - `Err(Error)`: The change failed; the error is surfaced to the caller unchanged
    async fn update_record(&self, update: &RecordUpdate) -> Result<UpdateReceipt, crate::Error>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoUpdater;

    #[async_trait]
    impl RecordUpdater for EchoUpdater {
        async fn update_record(
            &self,
            update: &RecordUpdate,
        ) -> Result<UpdateReceipt, crate::Error> {
            Ok(UpdateReceipt {
                request_id: "req-1".to_string(),
                record_id: update.record_id.clone(),
            })
        }

        fn provider_name(&self) -> &'static str {
            "echo"
        }
    }

    fn sample_update() -> RecordUpdate {
        RecordUpdate {
            access_key_id: "id".to_string(),
            access_key_secret: "secret_value_12345".to_string(),
            endpoint: "alidns.aliyuncs.com".to_string(),
            record_id: "42".to_string(),
            rr: "home".to_string(),
            record_type: "A".to_string(),
            value: "203.0.113.5".to_string(),
        }
    }

    #[test]
    fn test_secret_not_exposed_in_debug() {
        let debug_str = format!("{:?}", sample_update());
        assert!(!debug_str.contains("secret_value_12345"));
        assert!(debug_str.contains("<REDACTED>"));
        assert!(debug_str.contains("203.0.113.5"));
    }

    #[test]
    fn test_updater_is_object_safe() {
        let updater: Box<dyn RecordUpdater> = Box::new(EchoUpdater);
        let receipt = tokio_test::block_on(updater.update_record(&sample_update())).unwrap();
        assert_eq!(receipt.record_id, "42");
        assert_eq!(updater.provider_name(), "echo");
    }
}
