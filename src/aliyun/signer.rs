//! Signature version 1.0 of the RPC style API.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use ring::hmac;

use super::credentials::Credentials;

/// RFC 3986, only `A-Za-z0-9-_.~` stays as is.
const ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const SIGNATURE_METHOD: &str = "HMAC-SHA1";
const SIGNATURE_VERSION: &str = "1.0";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn percent_encode(input: &str) -> String {
    utf8_percent_encode(input, ENCODE_SET).to_string()
}

/// Parameters sorted by name, both sides percent encoded.
pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", percent_encode(key), percent_encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn string_to_sign(method: &str, canonical: &str) -> String {
    format!(
        "{method}&{}&{}",
        percent_encode("/"),
        percent_encode(canonical)
    )
}

/// Base64 encoded HMAC-SHA1 of `data`, keyed with `<secret>&`.
pub fn sign(secret: &str, data: &str) -> String {
    let key = hmac::Key::new(
        hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
        format!("{secret}&").as_bytes(),
    );
    let tag = hmac::sign(&key, data.as_bytes());

    STANDARD.encode(tag.as_ref())
}

/// Adds the common parameters to `params` and returns the signed query
/// string of a `GET` request.
pub fn signed_query(
    mut params: BTreeMap<String, String>,
    version: &str,
    credentials: &Credentials,
    nonce: &str,
    now: DateTime<Utc>,
) -> String {
    let common = [
        ("Format", "JSON"),
        ("Version", version),
        ("AccessKeyId", credentials.access_key_id.as_str()),
        ("SignatureMethod", SIGNATURE_METHOD),
        ("SignatureVersion", SIGNATURE_VERSION),
        ("SignatureNonce", nonce),
    ];
    for (key, value) in common {
        params.insert(key.to_string(), value.to_string());
    }
    params.insert(
        "Timestamp".to_string(),
        now.format(TIMESTAMP_FORMAT).to_string(),
    );
    if let Some(token) = &credentials.security_token {
        params.insert("SecurityToken".to_string(), token.clone());
    }

    let canonical = canonical_query(&params);
    let signature = sign(
        &credentials.access_key_secret,
        &string_to_sign("GET", &canonical),
    );

    format!("{canonical}&Signature={}", percent_encode(&signature))
}
