//! Error types for license issuance and verification.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Licensing-specific errors.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// No trusted key configured, key unreadable, or key of the wrong type.
    #[error("license configuration error: {0}")]
    Configuration(String),

    /// Token failed to decode, or the artifact/payload is structurally invalid.
    #[error("malformed license token: {0}")]
    Malformed(String),

    /// Ed25519 signature verification failed.
    #[error("license signature invalid")]
    InvalidSignature,

    /// Signature is valid but the license is past its expiry.
    #[error("license expired on {0}")]
    Expired(DateTime<Utc>),

    /// License token id or tenant id is on the revocation list.
    #[error("license has been revoked")]
    Revoked,

    /// Verified payload grants no features at all.
    #[error("license payload is missing feature permissions")]
    MissingFeatures,

    /// Claims do not include a required feature.
    #[error("license does not permit '{0}' operations")]
    FeatureNotPermitted(String),

    /// A license is required but none was presented.
    #[error("missing license token")]
    MissingToken,

    /// No license is configured and the local trial window has closed.
    #[error("trial period has expired")]
    TrialExpired,

    /// Issuance request rejected before signing.
    #[error("invalid license request: {0}")]
    InvalidIssuance(String),

    /// Caller supplied an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Private key could not be loaded or decrypted for signing.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Trial state or artifact file could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LicenseError {
    /// HTTP-equivalent status code for surfacing this error to a client.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingToken | Self::Malformed(_) | Self::InvalidSignature => 401,
            Self::Expired(_)
            | Self::Revoked
            | Self::MissingFeatures
            | Self::FeatureNotPermitted(_)
            | Self::TrialExpired => 403,
            Self::Configuration(_) => 503,
            Self::InvalidIssuance(_) | Self::InvalidArgument(_) => 400,
            Self::Signing(_) | Self::Storage(_) | Self::Serialization(_) => 500,
        }
    }

    /// Message that is safe to return to the presenter of a token.
    ///
    /// Malformed and forged tokens share one message.
    #[must_use]
    pub fn public_detail(&self) -> String {
        match self {
            Self::MissingToken => "Missing license token.".to_string(),
            Self::Malformed(_) | Self::InvalidSignature => "License token is invalid.".to_string(),
            Self::Expired(_) => "License token has expired.".to_string(),
            Self::Revoked => "License token revoked.".to_string(),
            Self::MissingFeatures => "License payload is missing feature permissions.".to_string(),
            Self::FeatureNotPermitted(feature) => {
                format!("License does not permit '{feature}' operations.")
            }
            Self::TrialExpired => "Trial period has expired. Advanced features are disabled \
                                   until a license is applied."
                .to_string(),
            Self::Configuration(_) => "License verification unavailable.".to_string(),
            Self::InvalidIssuance(_) | Self::InvalidArgument(_) => self.to_string(),
            Self::Signing(_) | Self::Storage(_) | Self::Serialization(_) => {
                "Internal license error.".to_string()
            }
        }
    }

    /// Returns true for failures that mean "not authenticated" (401).
    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        self.status_code() == 401
    }
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;
