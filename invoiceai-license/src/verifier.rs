//! Offline license verification against a trusted Ed25519 public key.
//!
//! Check order is fixed: decode, version/algorithm, signature, payload
//! schema, expiry. Revocation and feature checks happen afterwards in
//! [`crate::claims`] and [`crate::revocation`].

use crate::codec::{ALGORITHM_ED25519, ARTIFACT_VERSION, LicenseArtifact, decode_token};
use crate::error::{LicenseError, LicenseResult};
use crate::payload::LicensePayload;
use chrono::{DateTime, Utc};
use ed25519_dalek::pkcs8::DecodePublicKey;
use ed25519_dalek::{Signature, VerifyingKey};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where the trusted public key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// SPKI PEM file on disk.
    File(PathBuf),
    /// SPKI PEM text supplied inline.
    InlinePem(String),
}

impl KeySource {
    /// Reads the PEM text for this source.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Configuration`] if the file cannot be read or
    /// the inline value is blank.
    pub fn read_pem(&self) -> LicenseResult<String> {
        let pem = match self {
            Self::File(path) => std::fs::read_to_string(path).map_err(|e| {
                LicenseError::Configuration(format!(
                    "public key not readable at {}: {e}",
                    path.display()
                ))
            })?,
            Self::InlinePem(pem) => pem.clone(),
        };
        let pem = pem.trim().to_string();
        if pem.is_empty() {
            return Err(LicenseError::Configuration("public key is empty".to_string()));
        }
        Ok(pem)
    }
}

/// Verifies license tokens. Immutable after construction, so one instance
/// can be shared across threads behind an `Arc`.
#[derive(Debug, Clone)]
pub struct LicenseVerifier {
    key: VerifyingKey,
}

impl LicenseVerifier {
    /// Wraps an already parsed key.
    #[must_use]
    pub fn new(key: VerifyingKey) -> Self {
        Self { key }
    }

    /// Builds a verifier from a raw 32-byte public key.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Configuration`] if the bytes are not a valid point.
    pub fn from_bytes(bytes: &[u8; 32]) -> LicenseResult<Self> {
        VerifyingKey::from_bytes(bytes)
            .map(Self::new)
            .map_err(|_| {
                LicenseError::Configuration("invalid Ed25519 public key bytes".to_string())
            })
    }

    /// Parses an SPKI PEM public key.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Configuration`] if the PEM is invalid or not Ed25519.
    pub fn from_public_key_pem(pem: &str) -> LicenseResult<Self> {
        let pem = pem.trim();
        if pem.is_empty() {
            return Err(LicenseError::Configuration(
                "public key string must not be empty".to_string(),
            ));
        }
        VerifyingKey::from_public_key_pem(pem)
            .map(Self::new)
            .map_err(|e| {
                LicenseError::Configuration(format!("public key must be an Ed25519 PEM key: {e}"))
            })
    }

    /// Loads an SPKI PEM public key file.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Configuration`] if the file is missing, unreadable,
    /// or does not hold an Ed25519 public key.
    pub fn from_public_key_path(path: impl AsRef<Path>) -> LicenseResult<Self> {
        Self::from_key_source(&KeySource::File(path.as_ref().to_path_buf()))
    }

    /// Resolves a [`KeySource`] into a verifier.
    ///
    /// # Errors
    ///
    /// Same as [`LicenseVerifier::from_public_key_pem`] plus unreadable files.
    pub fn from_key_source(source: &KeySource) -> LicenseResult<Self> {
        Self::from_public_key_pem(&source.read_pem()?)
    }

    /// The trusted public key.
    #[must_use]
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.key
    }

    /// Verifies a token against the current time.
    ///
    /// # Errors
    ///
    /// See [`LicenseVerifier::verify_at`].
    pub fn verify(&self, token: &str) -> LicenseResult<LicensePayload> {
        self.verify_at(token, Utc::now())
    }

    /// Verifies a token as of `now`.
    ///
    /// # Errors
    ///
    /// - [`LicenseError::Malformed`]: undecodable token, wrong version or
    ///   algorithm, bad signature encoding, or payload failing the schema
    /// - [`LicenseError::InvalidSignature`]: signature does not match
    /// - [`LicenseError::Expired`]: `expires_at <= now`
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> LicenseResult<LicensePayload> {
        let artifact = decode_token(token)?;
        self.verify_artifact_at(&artifact, now)
    }

    /// Verifies an already decoded artifact as of `now`.
    ///
    /// # Errors
    ///
    /// Same as [`LicenseVerifier::verify_at`].
    pub fn verify_artifact_at(
        &self,
        artifact: &LicenseArtifact,
        now: DateTime<Utc>,
    ) -> LicenseResult<LicensePayload> {
        if artifact.algorithm != ALGORITHM_ED25519 {
            return Err(LicenseError::Malformed("unsupported license algorithm".to_string()));
        }
        if artifact.version != ARTIFACT_VERSION {
            return Err(LicenseError::Malformed("unsupported license version".to_string()));
        }

        let signature_bytes = artifact.signature_bytes()?;
        let signature = Signature::from_slice(&signature_bytes)
            .map_err(|_| LicenseError::Malformed("invalid signature length".to_string()))?;

        self.key
            .verify_strict(&artifact.signed_bytes(), &signature)
            .map_err(|_| LicenseError::InvalidSignature)?;

        let payload = LicensePayload::from_value(Value::Object(artifact.payload.clone()))?;

        if payload.is_expired_at(now) {
            debug!(
                token_id = %payload.token_id,
                expires_at = %payload.expires_at,
                "license expired"
            );
            return Err(LicenseError::Expired(payload.expires_at));
        }

        Ok(payload)
    }
}
