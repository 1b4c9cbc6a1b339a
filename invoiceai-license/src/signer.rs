//! Authority-side license issuance.
//!
//! Signing is raw Ed25519 (not prehashed) over the canonical payload bytes.
//! Private keys are PKCS#8 PEM, optionally passphrase-encrypted, matching
//! what `openssl genpkey -algorithm ed25519 [-aes256]` produces.

use crate::canonical::canonicalize;
use crate::codec::{
    ALGORITHM_ED25519, ARTIFACT_VERSION, LicenseArtifact, URL_SAFE_LENIENT, encode_token,
};
use crate::error::{LicenseError, LicenseResult};
use crate::payload::{LicensePayload, TenantInfo};
use base64::Engine;
use chrono::{DateTime, SubsecRound, Utc};
use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use pkcs8::LineEnding;
use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

/// Ed25519 signature length in bytes.
pub const SIGNATURE_LEN: usize = 64;

const ENCRYPTED_PEM_LABEL: &str = "ENCRYPTED PRIVATE KEY";

/// An Ed25519 private key used to issue licenses.
pub struct LicenseSigner {
    key: SigningKey,
    key_id: Option<String>,
}

impl std::fmt::Debug for LicenseSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseSigner")
            .field("key", &"[REDACTED]")
            .field("key_id", &self.key_id)
            .finish()
    }
}

impl LicenseSigner {
    /// Generates a fresh random signing key.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
            key_id: None,
        }
    }

    /// Creates a signer from a raw 32-byte secret.
    #[must_use]
    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(secret),
            key_id: None,
        }
    }

    /// Loads a PKCS#8 PEM private key, decrypting it when a passphrase is given.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Signing`] if the key is not Ed25519, is
    /// encrypted without a passphrase, or the passphrase is wrong.
    pub fn from_pem(pem: &str, passphrase: Option<&[u8]>) -> LicenseResult<Self> {
        let encrypted = pem.contains(ENCRYPTED_PEM_LABEL);
        let key = match (encrypted, passphrase) {
            (true, Some(pass)) => SigningKey::from_pkcs8_encrypted_pem(pem, pass).map_err(|e| {
                LicenseError::Signing(format!(
                    "could not decrypt private key (wrong passphrase?): {e}"
                ))
            })?,
            (true, None) => {
                return Err(LicenseError::Signing(
                    "private key is encrypted; a passphrase is required".to_string(),
                ));
            }
            (false, _) => SigningKey::from_pkcs8_pem(pem).map_err(|e| {
                LicenseError::Signing(format!("private key is not Ed25519 PKCS#8 PEM: {e}"))
            })?,
        };
        Ok(Self { key, key_id: None })
    }

    /// Reads and loads a PEM private key file.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Configuration`] if the file cannot be read, or
    /// the errors of [`LicenseSigner::from_pem`].
    pub fn from_pem_file(path: impl AsRef<Path>, passphrase: Option<&[u8]>) -> LicenseResult<Self> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path).map_err(|e| {
            LicenseError::Configuration(format!(
                "private key not readable at {}: {e}",
                path.display()
            ))
        })?;
        Self::from_pem(&pem, passphrase)
    }

    /// Tags artifacts issued by this signer with a key identifier.
    #[must_use]
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        let key_id = key_id.into();
        self.key_id = normalize_optional(Some(key_id));
        self
    }

    /// Returns the configured key identifier.
    #[must_use]
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// Signs a message.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.key.sign(message).to_bytes()
    }

    /// Returns the matching public key.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Public key as SPKI PEM, the format the verifier loads.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Signing`] if encoding fails.
    pub fn public_key_pem(&self) -> LicenseResult<String> {
        self.key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| LicenseError::Signing(format!("could not encode public key: {e}")))
    }

    /// Private key as PKCS#8 PEM, encrypted when a passphrase is given.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Signing`] if encoding or encryption fails.
    pub fn private_key_pem(&self, passphrase: Option<&[u8]>) -> LicenseResult<String> {
        let pem = match passphrase {
            Some(pass) => self.key.to_pkcs8_encrypted_pem(&mut OsRng, pass, LineEnding::LF),
            None => self.key.to_pkcs8_pem(LineEnding::LF),
        }
        .map_err(|e| LicenseError::Signing(format!("could not encode private key: {e}")))?;
        Ok((*pem).clone())
    }
}

/// Signs `message` with a PEM private key.
///
/// # Errors
///
/// Returns [`LicenseError::Signing`] if the key cannot be loaded or decrypted.
pub fn sign(
    private_key_pem: &str,
    message: &[u8],
    passphrase: Option<&[u8]>,
) -> LicenseResult<[u8; SIGNATURE_LEN]> {
    Ok(LicenseSigner::from_pem(private_key_pem, passphrase)?.sign(message))
}

/// What an issuer asks for; normalized into a [`LicensePayload`] at issuance.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub tenant: TenantInfo,
    pub features: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub device: Option<String>,
    pub key_id: Option<String>,
    /// Defaults to a random UUID.
    pub token_id: Option<String>,
}

impl IssueRequest {
    /// Starts a request issued now and expiring at `expires_at`.
    pub fn new(tenant: TenantInfo, expires_at: DateTime<Utc>) -> Self {
        Self {
            tenant,
            features: Vec::new(),
            issued_at: Utc::now(),
            expires_at,
            device: None,
            key_id: None,
            token_id: None,
        }
    }

    /// Appends a feature flag.
    #[must_use]
    pub fn feature(mut self, name: impl Into<String>) -> Self {
        self.features.push(name.into());
        self
    }

    /// Overrides the issuance time.
    #[must_use]
    pub fn issued_at(mut self, at: DateTime<Utc>) -> Self {
        self.issued_at = at;
        self
    }

    /// Binds the license to a device identifier.
    #[must_use]
    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Fixes the token id instead of generating one.
    #[must_use]
    pub fn token_id(mut self, token_id: impl Into<String>) -> Self {
        self.token_id = Some(token_id.into());
        self
    }

    /// Validates and normalizes the request into the payload that gets signed.
    ///
    /// Optional values that are blank are omitted; features are trimmed,
    /// blank entries dropped, and duplicates removed keeping first position.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidIssuance`] if `expires_at` is not after
    /// `issued_at` or the tenant id is blank.
    pub fn into_payload(self) -> LicenseResult<LicensePayload> {
        let issued_at = self.issued_at.trunc_subsecs(0);
        let expires_at = self.expires_at.trunc_subsecs(0);
        if expires_at <= issued_at {
            return Err(LicenseError::InvalidIssuance(
                "expiration must be after the issuance timestamp".to_string(),
            ));
        }

        let tenant_id = self.tenant.id.trim().to_string();
        if tenant_id.is_empty() {
            return Err(LicenseError::InvalidIssuance("tenant id must not be empty".to_string()));
        }
        let tenant = TenantInfo {
            id: tenant_id,
            name: normalize_optional(self.tenant.name),
            metadata: self
                .tenant
                .metadata
                .into_iter()
                .filter_map(|(k, v)| {
                    let key = k.trim().to_string();
                    (!key.is_empty()).then(|| (key, v.trim().to_string()))
                })
                .collect(),
        };

        let features = normalize_features(self.features);
        if features.is_empty() {
            warn!(
                tenant = %tenant.id,
                "issuing license with no features; it will be rejected at verification"
            );
        }

        let token_id =
            normalize_optional(self.token_id).unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(LicensePayload {
            tenant,
            features,
            issued_at,
            expires_at,
            token_id,
            device: normalize_optional(self.device),
            key_id: normalize_optional(self.key_id),
        })
    }
}

/// A freshly signed license: the artifact and its transport token.
#[derive(Debug, Clone)]
pub struct IssuedLicense {
    pub payload: LicensePayload,
    pub artifact: LicenseArtifact,
    pub token: String,
}

/// Builds, signs, and encodes a license artifact.
///
/// The request's `key_id` wins over the signer's.
///
/// # Errors
///
/// Returns [`LicenseError::InvalidIssuance`] for an invalid request, or a
/// serialization error if the artifact cannot be encoded.
pub fn generate_license_artifact(
    signer: &LicenseSigner,
    mut request: IssueRequest,
) -> LicenseResult<IssuedLicense> {
    if request.key_id.is_none() {
        request.key_id = signer.key_id.clone();
    }
    let payload = request.into_payload()?;

    let payload_value = payload.to_value()?;
    let payload_map = match payload_value {
        serde_json::Value::Object(map) => map,
        _ => return Err(LicenseError::InvalidIssuance("payload must be an object".to_string())),
    };
    let message = canonicalize(&serde_json::Value::Object(payload_map.clone()));
    let signature = signer.sign(&message);

    let artifact = LicenseArtifact {
        version: ARTIFACT_VERSION,
        algorithm: ALGORITHM_ED25519.to_string(),
        payload: payload_map,
        signature: URL_SAFE_LENIENT.encode(signature),
    };
    let token = encode_token(&artifact)?;
    debug!(token_id = %payload.token_id, tenant = %payload.tenant.id, "issued license");

    Ok(IssuedLicense { payload, artifact, token })
}

/// Trims features, drops blanks, and removes duplicates keeping first position.
#[must_use]
pub fn normalize_features<I, S>(features: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut cleaned: Vec<String> = Vec::new();
    for feature in features {
        let name = feature.as_ref().trim();
        if !name.is_empty() && !cleaned.iter().any(|c| c == name) {
            cleaned.push(name.to_string());
        }
    }
    cleaned
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
