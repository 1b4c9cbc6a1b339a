//! Transport encoding of license artifacts.
//!
//! A token is `base64url(canonical_json(artifact))`, padded on output and
//! accepted with or without padding on input.
//!
//! The artifact itself is canonically serialized, but only the canonical
//! bytes of its `payload` member are covered by the signature. The verifier
//! re-derives those bytes from the decoded payload rather than trusting the
//! outer encoding.

use crate::canonical::canonicalize;
use crate::error::{LicenseError, LicenseResult};
use base64::{
    Engine,
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Artifact format version understood by this crate.
pub const ARTIFACT_VERSION: u32 = 1;

/// The only supported signature algorithm.
pub const ALGORITHM_ED25519: &str = "ed25519";

/// URL-safe base64, padded on encode, padding-indifferent on decode.
pub(crate) const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The signed wire object before transport encoding.
///
/// `version` and `algorithm` are not signed; the verifier checks them against
/// [`ARTIFACT_VERSION`] and [`ALGORITHM_ED25519`] before trusting the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseArtifact {
    /// Format version.
    pub version: u32,
    /// Signature algorithm tag.
    pub algorithm: String,
    /// Payload exactly as signed.
    pub payload: Map<String, Value>,
    /// base64url signature over the canonical payload bytes.
    pub signature: String,
}

impl LicenseArtifact {
    /// Canonical bytes of the payload, i.e. the signed message.
    #[must_use]
    pub fn signed_bytes(&self) -> Vec<u8> {
        canonicalize(&Value::Object(self.payload.clone()))
    }

    /// Decodes the signature field.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Malformed`] if the signature is not base64url.
    pub fn signature_bytes(&self) -> LicenseResult<Vec<u8>> {
        URL_SAFE_LENIENT
            .decode(self.signature.trim())
            .map_err(|e| LicenseError::Malformed(format!("signature is not base64url: {e}")))
    }

    /// JSON form of the artifact.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the artifact cannot be represented.
    pub fn to_value(&self) -> LicenseResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Encodes an artifact into a transport token.
///
/// # Errors
///
/// Returns a serialization error if the artifact cannot be represented.
pub fn encode_token(artifact: &LicenseArtifact) -> LicenseResult<String> {
    let value = artifact.to_value()?;
    Ok(URL_SAFE_LENIENT.encode(canonicalize(&value)))
}

/// Decodes a transport token into a JSON object without interpreting it.
///
/// # Errors
///
/// Returns [`LicenseError::Malformed`] for invalid base64, non-JSON data, or
/// JSON that is not an object.
pub fn decode_token_object(token: &str) -> LicenseResult<Map<String, Value>> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return Err(LicenseError::Malformed("token is empty".to_string()));
    }
    let bytes = URL_SAFE_LENIENT
        .decode(trimmed)
        .map_err(|e| LicenseError::Malformed(format!("token is not valid base64: {e}")))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| LicenseError::Malformed(format!("token did not decode to JSON: {e}")))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(LicenseError::Malformed("token must decode to an object".to_string())),
    }
}

/// Decodes a transport token into an artifact.
///
/// Structural only: version and algorithm are returned as found and are
/// checked by the verifier.
///
/// # Errors
///
/// Returns [`LicenseError::Malformed`] if the token does not decode or any
/// artifact member is missing or of the wrong type.
pub fn decode_token(token: &str) -> LicenseResult<LicenseArtifact> {
    let object = decode_token_object(token)?;
    serde_json::from_value(Value::Object(object))
        .map_err(|e| LicenseError::Malformed(format!("malformed license artifact: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> LicenseArtifact {
        let payload = json!({"tenant": {"id": "acme"}, "token_id": "t-1"});
        LicenseArtifact {
            version: ARTIFACT_VERSION,
            algorithm: ALGORITHM_ED25519.to_string(),
            payload: payload.as_object().cloned().unwrap(),
            signature: URL_SAFE_LENIENT.encode([7u8; 64]),
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let artifact = sample();
        let token = encode_token(&artifact).unwrap();
        assert_eq!(decode_token(&token).unwrap(), artifact);
    }

    #[test]
    fn unpadded_tokens_are_accepted() {
        let artifact = sample();
        let token = encode_token(&artifact).unwrap();
        let unpadded = token.trim_end_matches('=');
        assert_eq!(decode_token(unpadded).unwrap(), artifact);
    }

    #[test]
    fn token_is_canonical_json() {
        let token = encode_token(&sample()).unwrap();
        let raw = URL_SAFE_LENIENT.decode(token).unwrap();
        let text = String::from_utf8(raw).unwrap();
        assert!(text.starts_with(r#"{"algorithm":"ed25519","payload":{"tenant":{"id":"acme"}"#));
    }

    #[test]
    fn rejects_non_base64() {
        assert!(matches!(decode_token("%%%not-base64%%%"), Err(LicenseError::Malformed(_))));
    }

    #[test]
    fn rejects_non_json() {
        let token = URL_SAFE_LENIENT.encode(b"definitely not json");
        assert!(matches!(decode_token(&token), Err(LicenseError::Malformed(_))));
    }

    #[test]
    fn rejects_non_object_json() {
        let token = URL_SAFE_LENIENT.encode(b"[1,2,3]");
        assert!(matches!(decode_token(&token), Err(LicenseError::Malformed(_))));
    }

    #[test]
    fn rejects_missing_members() {
        let token = URL_SAFE_LENIENT.encode(br#"{"version":1,"algorithm":"ed25519"}"#);
        assert!(matches!(decode_token(&token), Err(LicenseError::Malformed(_))));
    }

    #[test]
    fn signed_bytes_are_canonical_payload() {
        let artifact = sample();
        assert_eq!(artifact.signed_bytes(), br#"{"tenant":{"id":"acme"},"token_id":"t-1"}"#);
    }
}
