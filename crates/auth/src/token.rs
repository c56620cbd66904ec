//! Token codec: bearer string → claims, without contacting the network.

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde_json::Value;
use thiserror::Error;

use crate::Claims;

/// base64url that accepts both padded and unpadded input.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected 3 dot-separated segments, found {found}")]
    SegmentCount { found: usize },

    #[error("payload segment is not valid base64url: {0}")]
    Base64(String),

    #[error("payload segment is not valid JSON: {0}")]
    Json(String),

    #[error("payload is not a JSON object")]
    NotAnObject,
}

/// Decode the claims payload of a `header.payload.signature` token.
///
/// This establishes **structure only**. The header and signature segments are
/// never inspected and no signature verification is performed: the client
/// holds no key material. Whether the server still honors the token is decided
/// by the remote validation round-trip, not here.
pub fn decode_claims(token: &str) -> Result<Claims, DecodeError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(DecodeError::SegmentCount {
            found: segments.len(),
        });
    }

    let bytes = URL_SAFE_LENIENT
        .decode(segments[1])
        .map_err(|e| DecodeError::Base64(e.to_string()))?;

    let value: Value =
        serde_json::from_slice(&bytes).map_err(|e| DecodeError::Json(e.to_string()))?;

    match value {
        Value::Object(map) => Ok(Claims::from_map(map)),
        _ => Err(DecodeError::NotAnObject),
    }
}

/// Encode a claims payload into an unsigned `header.payload.signature` token.
///
/// Test-support helper; the signature segment is a fixed placeholder.
#[cfg(test)]
pub(crate) fn encode_unsigned(payload: &Value) -> String {
    let header = URL_SAFE_LENIENT.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_LENIENT.encode(payload.to_string());
    format!("{header}.{body}.signature")
}
