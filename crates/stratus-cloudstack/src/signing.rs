//! Request signing
//!
//! The control plane authenticates a command by recomputing an
//! HMAC-SHA1 over its canonical query string: parameters sorted by
//! lower-cased name, values URL-encoded with `%20` for spaces, the whole
//! string lower-cased. The same encoded pairs are sent on the wire so
//! that both sides hash identical bytes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::collections::BTreeMap;

/// Encode a value the way the control plane expects (`+` becomes `%20`)
pub fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Canonical `key=value&...` string, keys sorted case-insensitively
pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (k.to_lowercase(), format!("{}={}", k, encode(v))))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    pairs
        .into_iter()
        .map(|(_, pair)| pair)
        .collect::<Vec<_>>()
        .join("&")
}

/// Base64 HMAC-SHA1 signature of an already canonical query
pub fn sign(query: &str, secret: &str) -> String {
    let mut mac =
        Hmac::<Sha1>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(query.to_lowercase().as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Full signed query string ready to append to the endpoint
pub fn signed_query(params: &BTreeMap<String, String>, secret: &str) -> String {
    let query = canonical_query(params);
    let signature = sign(&query, secret);
    format!("{}&signature={}", query, encode(&signature))
}
