//! Framework-agnostic request gate.
//!
//! A [`LicenseService`] turns the value of the `X-License` header into
//! [`LicenseClaims`] or a [`LicenseError`] whose `status_code()` and
//! `public_detail()` are ready to hand back to the caller. With no trusted
//! key configured it falls back to the local trial.

use crate::claims::{LicenseClaims, build_claims};
use crate::config::LicenseSettings;
use crate::error::{LicenseError, LicenseResult};
use crate::revocation::RevocationList;
use crate::trial::TrialStore;
use crate::verifier::LicenseVerifier;
use chrono::{DateTime, Utc};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Request header carrying the license token.
pub const HEADER_NAME: &str = "X-License";

/// Everything one request is judged against. Replaced as a whole, never mutated.
#[derive(Debug)]
struct GateSnapshot {
    verifier: Option<Arc<LicenseVerifier>>,
    revocations: Arc<RevocationList>,
    trial: Arc<TrialStore>,
}

impl GateSnapshot {
    /// `previous_trial` is reused when it points at the same file, so first-use
    /// initialization stays serialized across reloads.
    fn from_settings(
        settings: &LicenseSettings,
        previous_trial: Option<&Arc<TrialStore>>,
    ) -> LicenseResult<Self> {
        let verifier = settings
            .key_source()?
            .map(|source| LicenseVerifier::from_key_source(&source))
            .transpose()?
            .map(Arc::new);
        let trial = match previous_trial {
            Some(trial) if trial.path() == settings.trial_path.as_path() => Arc::clone(trial),
            _ => Arc::new(TrialStore::new(settings.trial_path.clone())),
        };
        Ok(Self {
            verifier,
            revocations: Arc::new(settings.revocation_list()),
            trial,
        })
    }
}

/// Shared license gate. Cheap to share behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct LicenseService {
    snapshot: RwLock<Arc<GateSnapshot>>,
}

impl LicenseService {
    /// Builds a gate from settings.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Configuration`] if the key settings are
    /// contradictory, the algorithm is unsupported, or the key is unusable.
    pub fn from_settings(settings: &LicenseSettings) -> LicenseResult<Self> {
        let snapshot = GateSnapshot::from_settings(settings, None)?;
        log_mode(&snapshot);
        Ok(Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Builds a gate from the process environment.
    ///
    /// # Errors
    ///
    /// See [`LicenseService::from_settings`].
    pub fn from_env() -> LicenseResult<Self> {
        Self::from_settings(&LicenseSettings::from_env()?)
    }

    /// Applies new settings. On error the previous configuration stays in force.
    ///
    /// # Errors
    ///
    /// See [`LicenseService::from_settings`].
    pub fn reload(&self, settings: &LicenseSettings) -> LicenseResult<()> {
        let previous = self.current();
        let next = match GateSnapshot::from_settings(settings, Some(&previous.trial)) {
            Ok(next) => next,
            Err(e) => {
                warn!(error = %e, "license reload rejected; keeping previous configuration");
                return Err(e);
            }
        };
        log_mode(&next);
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        Ok(())
    }

    /// Swaps in a new revocation list, keeping the trusted key and trial store.
    pub fn replace_revocations(&self, list: RevocationList) {
        info!(
            revoked_tokens = list.token_count(),
            revoked_tenants = list.tenant_count(),
            "revocation list replaced"
        );
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let next = GateSnapshot {
            verifier: guard.verifier.clone(),
            revocations: Arc::new(list),
            trial: Arc::clone(&guard.trial),
        };
        *guard = Arc::new(next);
    }

    /// The revocation list in force right now.
    #[must_use]
    pub fn revocations(&self) -> Arc<RevocationList> {
        Arc::clone(&self.current().revocations)
    }

    /// Returns true if a trusted key is configured.
    #[must_use]
    pub fn is_license_configured(&self) -> bool {
        self.current().verifier.is_some()
    }

    /// Authorizes a request against the current time.
    ///
    /// # Errors
    ///
    /// See [`LicenseService::authorize_at`].
    pub fn authorize(&self, header: Option<&str>) -> LicenseResult<LicenseClaims> {
        self.authorize_at(header, Utc::now())
    }

    /// Authorizes a request as of `now`.
    ///
    /// # Errors
    ///
    /// With a key configured: [`LicenseError::MissingToken`] for an absent or
    /// blank header, then any verification, claims, or revocation failure.
    /// Without one: [`LicenseError::TrialExpired`] once the trial window has
    /// closed, or [`LicenseError::Storage`] if trial state cannot be kept.
    pub fn authorize_at(
        &self,
        header: Option<&str>,
        now: DateTime<Utc>,
    ) -> LicenseResult<LicenseClaims> {
        let snapshot = self.current();
        let Some(verifier) = snapshot.verifier.as_deref() else {
            let (status, claims) = snapshot.trial.resolve_claims_at(now)?;
            return claims.ok_or_else(|| {
                debug!(expires_at = %status.expires_at, "trial expired");
                LicenseError::TrialExpired
            });
        };

        let token = header
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(LicenseError::MissingToken)?;
        let payload = verifier.verify_at(token, now).inspect_err(|e| {
            debug!(error = %e, "license token rejected");
        })?;
        let claims = build_claims(payload)?;
        if let Some(payload) = claims.payload() {
            snapshot.revocations.check(payload)?;
        }
        debug!(tenant = %claims.subject(), "license accepted");
        Ok(claims)
    }

    /// Authorizes a request and requires `feature`.
    ///
    /// # Errors
    ///
    /// Any [`LicenseService::authorize_at`] failure, then
    /// [`LicenseError::FeatureNotPermitted`].
    pub fn require_feature_at(
        &self,
        header: Option<&str>,
        feature: &str,
        now: DateTime<Utc>,
    ) -> LicenseResult<LicenseClaims> {
        let claims = self.authorize_at(header, now)?;
        claims.ensure_feature(feature)?;
        Ok(claims)
    }

    /// [`LicenseService::require_feature_at`] with the current time.
    ///
    /// # Errors
    ///
    /// See [`LicenseService::require_feature_at`].
    pub fn require_feature(
        &self,
        header: Option<&str>,
        feature: &str,
    ) -> LicenseResult<LicenseClaims> {
        self.require_feature_at(header, feature, Utc::now())
    }

    fn current(&self) -> Arc<GateSnapshot> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

fn log_mode(snapshot: &GateSnapshot) {
    if snapshot.verifier.is_some() {
        info!(
            revoked_tokens = snapshot.revocations.token_count(),
            revoked_tenants = snapshot.revocations.tenant_count(),
            "license verification enabled"
        );
    } else {
        info!(
            trial_path = %snapshot.trial.path().display(),
            "no license key configured; using local trial"
        );
    }
}
