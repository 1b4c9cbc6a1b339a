//! Licensing for InvoiceAI deployments.
//!
//! This crate handles:
//! - Issuing signed license artifacts with an Ed25519 private key
//! - Offline verification against a trusted public key
//! - Feature gating and revocation of verified licenses
//! - A local 7-day trial when no license key is configured
//!
//! # Token Format
//!
//! A token is `base64url(json(artifact))` where the artifact is
//! `{"version": 1, "algorithm": "ed25519", "payload": {...}, "signature": "..."}`.
//! The signature covers the canonical JSON of the payload: sorted keys,
//! no insignificant whitespace, non-ASCII emitted as UTF-8.
//!
//! # Verification Order
//!
//! decode, version and algorithm, signature, payload schema, expiry,
//! feature permissions, revocation. A forged or tampered token therefore
//! never reaches the expiry or revocation checks.

mod canonical;
mod claims;
mod codec;
mod config;
mod device;
mod error;
mod payload;
mod revocation;
mod service;
mod signer;
mod trial;
mod verifier;

pub use canonical::{canonical_string, canonicalize, canonicalize_serialize};
pub use claims::{ClaimsSource, LicenseClaims, TRIAL_SUBJECT, build_claims, ensure_feature};
pub use codec::{
    ALGORITHM_ED25519, ARTIFACT_VERSION, LicenseArtifact, decode_token, decode_token_object,
    encode_token,
};
pub use config::{
    ENV_ALGORITHM, ENV_PUBLIC_KEY, ENV_PUBLIC_KEY_PATH, ENV_REVOKED_JTIS, ENV_REVOKED_SUBJECTS,
    LicenseSettings,
};
pub use device::{DeviceFingerprint, FINGERPRINT_PREFIX};
pub use error::{LicenseError, LicenseResult};
pub use payload::{LicensePayload, TenantInfo, format_timestamp, parse_timestamp};
pub use revocation::{RevocationList, RevocationMatch};
pub use service::{HEADER_NAME, LicenseService};
pub use signer::{
    IssueRequest, IssuedLicense, LicenseSigner, SIGNATURE_LEN, generate_license_artifact,
    normalize_features, sign,
};
pub use trial::{
    DEFAULT_TRIAL_FEATURES, DEFAULT_TRIAL_PATH, TRIAL_DURATION_DAYS, TRIAL_PATH_ENV, TrialState,
    TrialStatus, TrialStore, default_trial_features, default_trial_path, get_trial_status,
    resolve_trial_claims,
};
pub use verifier::{KeySource, LicenseVerifier};
