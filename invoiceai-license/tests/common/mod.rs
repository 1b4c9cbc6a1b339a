//! Shared test helpers for license tests.

#![allow(dead_code)]

use base64::{Engine, engine::general_purpose::URL_SAFE};
use chrono::{DateTime, Duration, TimeZone, Utc};
use ed25519_dalek::{Signer, SigningKey};
use invoiceai_license::{
    IssueRequest, LicenseArtifact, LicenseSigner, LicenseVerifier, TenantInfo, canonicalize,
    encode_token, generate_license_artifact,
};
use serde_json::{Map, Value};

/// Fixed 32-byte seed for a deterministic key pair.
pub const TEST_SEED: [u8; 32] = [
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26,
    27, 28, 29, 30, 31, 32,
];

/// A second, unrelated seed.
pub const OTHER_SEED: [u8; 32] = [9; 32];

/// Deterministic signer and its matching verifier.
pub fn test_keypair() -> (LicenseSigner, LicenseVerifier) {
    let signer = LicenseSigner::from_bytes(&TEST_SEED);
    let verifier = LicenseVerifier::new(signer.verifying_key());
    (signer, verifier)
}

/// Reference instant all fixtures are built around.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Issues a license for `tenant` valid from `t0()` for `days`.
pub fn issue(signer: &LicenseSigner, tenant: &str, features: &[&str], days: i64) -> String {
    let mut request =
        IssueRequest::new(TenantInfo::new(tenant), t0() + Duration::days(days)).issued_at(t0());
    for feature in features {
        request = request.feature(*feature);
    }
    generate_license_artifact(signer, request).unwrap().token
}

/// Issues a license with an explicit token id.
pub fn issue_with_token_id(
    signer: &LicenseSigner,
    tenant: &str,
    token_id: &str,
    features: &[&str],
) -> String {
    let mut request = IssueRequest::new(TenantInfo::new(tenant), t0() + Duration::days(30))
        .issued_at(t0())
        .token_id(token_id);
    for feature in features {
        request = request.feature(*feature);
    }
    generate_license_artifact(signer, request).unwrap().token
}

/// Signs an arbitrary payload object with a raw dalek key, bypassing the
/// issuance checks.
pub fn sign_raw_payload(seed: &[u8; 32], payload: Value, version: u32, algorithm: &str) -> String {
    let payload: Map<String, Value> = payload.as_object().cloned().unwrap();
    let key = SigningKey::from_bytes(seed);
    let signature = key.sign(&canonicalize(&Value::Object(payload.clone())));
    let artifact = LicenseArtifact {
        version,
        algorithm: algorithm.to_string(),
        payload,
        signature: URL_SAFE.encode(signature.to_bytes()),
    };
    encode_token(&artifact).unwrap()
}

/// Builds a token from an artifact without re-signing.
pub fn reencode(artifact: &LicenseArtifact) -> String {
    encode_token(artifact).unwrap()
}
