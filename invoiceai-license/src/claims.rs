//! Verified, request-scoped license claims and feature gating.
//!
//! Request-handling code should gate functionality through
//! [`LicenseClaims::has_feature`] / [`ensure_feature`] only, never by reading
//! payload fields directly.

use crate::device::DeviceFingerprint;
use crate::error::{LicenseError, LicenseResult};
use crate::payload::{LicensePayload, TenantInfo};
use crate::trial::TrialStatus;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;

/// Subject used for claims derived from the local trial.
pub const TRIAL_SUBJECT: &str = "trial";

/// Where a set of claims came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimsSource {
    /// A signed license that passed verification.
    License(Box<LicensePayload>),
    /// The local trial grant.
    Trial {
        started_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
}

/// Normalized view of a verified license or an active trial.
#[derive(Debug, Clone, PartialEq)]
pub struct LicenseClaims {
    raw: Map<String, Value>,
    features: BTreeSet<String>,
    source: ClaimsSource,
}

impl LicenseClaims {
    /// Builds claims from a verified payload.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::MissingFeatures`] if no non-blank feature remains;
    /// a license that grants nothing is invalid, not unrestricted.
    pub fn from_payload(payload: LicensePayload) -> LicenseResult<Self> {
        let features = normalize_feature_set(&payload.features)?;
        let raw = match payload.to_value()? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Ok(Self {
            raw,
            features,
            source: ClaimsSource::License(Box::new(payload)),
        })
    }

    /// Builds claims for an active trial.
    #[must_use]
    pub fn from_trial(status: &TrialStatus) -> Self {
        let features: BTreeSet<String> = status.features.clone();
        let raw = json!({
            "sub": TRIAL_SUBJECT,
            "jti": format!("trial-{}", status.started_at.timestamp()),
            "exp": status.expires_at.timestamp(),
            "features": features.iter().collect::<Vec<_>>(),
            "trial": true,
        });
        Self {
            raw: match raw {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            features,
            source: ClaimsSource::Trial {
                started_at: status.started_at,
                expires_at: status.expires_at,
            },
        }
    }

    /// Returns true if `feature` is granted.
    #[must_use]
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature.trim())
    }

    /// Fails with [`LicenseError::FeatureNotPermitted`] when `feature` is not granted.
    ///
    /// # Errors
    ///
    /// Also returns [`LicenseError::InvalidArgument`] for a blank feature name.
    pub fn ensure_feature(&self, feature: &str) -> LicenseResult<&Self> {
        let name = feature.trim();
        if name.is_empty() {
            return Err(LicenseError::InvalidArgument(
                "feature name must be a non-empty string".to_string(),
            ));
        }
        if !self.features.contains(name) {
            return Err(LicenseError::FeatureNotPermitted(name.to_string()));
        }
        Ok(self)
    }

    /// Granted features, sorted.
    #[must_use]
    pub fn features(&self) -> &BTreeSet<String> {
        &self.features
    }

    /// The verified payload, absent for trial claims.
    #[must_use]
    pub fn payload(&self) -> Option<&LicensePayload> {
        match &self.source {
            ClaimsSource::License(payload) => Some(&**payload),
            ClaimsSource::Trial { .. } => None,
        }
    }

    #[must_use]
    pub fn source(&self) -> &ClaimsSource {
        &self.source
    }

    #[must_use]
    pub fn is_trial(&self) -> bool {
        matches!(self.source, ClaimsSource::Trial { .. })
    }

    /// Tenant of a signed license.
    #[must_use]
    pub fn tenant(&self) -> Option<&TenantInfo> {
        self.payload().map(|p| &p.tenant)
    }

    /// Tenant id, or the trial subject.
    #[must_use]
    pub fn subject(&self) -> &str {
        self.payload().map_or(TRIAL_SUBJECT, |p| p.tenant.id.as_str())
    }

    /// Token id of a signed license.
    #[must_use]
    pub fn token_id(&self) -> Option<&str> {
        self.payload().map(|p| p.token_id.as_str())
    }

    /// Expiry in UTC.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        match &self.source {
            ClaimsSource::License(payload) => payload.expires_at,
            ClaimsSource::Trial { expires_at, .. } => *expires_at,
        }
    }

    /// Looks up a tenant metadata entry.
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.tenant().and_then(|t| t.metadata.get(key)).map(String::as_str)
    }

    /// Returns true if the license is bound to `device`. Unbound licenses and
    /// trial claims return false.
    #[must_use]
    pub fn is_bound_to(&self, device: &DeviceFingerprint) -> bool {
        self.payload()
            .and_then(|p| p.device.as_deref())
            .is_some_and(|bound| bound == device.id())
    }

    /// The claims as a JSON object, as seen by request handlers that log or
    /// echo them.
    #[must_use]
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }
}

/// Normalizes a verified payload into claims.
///
/// # Errors
///
/// See [`LicenseClaims::from_payload`].
pub fn build_claims(payload: LicensePayload) -> LicenseResult<LicenseClaims> {
    LicenseClaims::from_payload(payload)
}

/// Gate for optional claims: absent claims mean no license was presented.
///
/// # Errors
///
/// Returns [`LicenseError::MissingToken`] for `None`,
/// [`LicenseError::InvalidArgument`] for a blank feature name, and
/// [`LicenseError::FeatureNotPermitted`] when the feature is not granted.
pub fn ensure_feature<'a>(
    claims: Option<&'a LicenseClaims>,
    feature: &str,
) -> LicenseResult<&'a LicenseClaims> {
    if feature.trim().is_empty() {
        return Err(LicenseError::InvalidArgument(
            "feature name must be a non-empty string".to_string(),
        ));
    }
    claims.ok_or(LicenseError::MissingToken)?.ensure_feature(feature)
}

fn normalize_feature_set(values: &[String]) -> LicenseResult<BTreeSet<String>> {
    let features: BTreeSet<String> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect();
    if features.is_empty() {
        return Err(LicenseError::MissingFeatures);
    }
    Ok(features)
}
