//! Alibaba Cloud RPC-style request signing (signature version 1.0)
//!
//! 1. Sort parameters by key
//! 2. Percent-encode keys and values per RFC 3986 and join as `k=v&k=v`
//! 3. String to sign: `GET&%2F&` + encoded canonical query
//! 4. HMAC-SHA1 keyed with `<secret>&`, base64 encoded

use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use ring::hmac;

/// Unreserved characters (RFC 3986 section 2.3) stay as is
const RFC3986: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode a key or value
pub fn encode(value: &str) -> String {
    utf8_percent_encode(value, RFC3986).to_string()
}

/// Sorted, encoded `k=v&k=v` query
pub fn canonical_query(params: &BTreeMap<&str, String>) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", encode(key), encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// String to sign for a request with the given canonical query
pub fn string_to_sign(method: &str, canonical_query: &str) -> String {
    format!("{}&{}&{}", method, encode("/"), encode(canonical_query))
}

/// Base64 HMAC-SHA1 signature of `string_to_sign`
pub fn sign(access_key_secret: &str, string_to_sign: &str) -> String {
    let key = hmac::Key::new(
        hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
        format!("{access_key_secret}&").as_bytes(),
    );
    let tag = hmac::sign(&key, string_to_sign.as_bytes());
    general_purpose::STANDARD.encode(tag.as_ref())
}
