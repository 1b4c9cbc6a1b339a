//! Out-of-the-box 7-day trial used when no license key is configured.
//!
//! The trial window is anchored to first use and persisted as
//! `{"started_at": ..., "expires_at": ...}`. Later reads reload the file and
//! recompute validity; the window is never re-issued while the file is
//! intact. A missing, unreadable-as-JSON, or inconsistent file
//! (`expires_at <= started_at`) starts a new window. The file is not
//! tamper-resistant and is not a security boundary.

use crate::claims::LicenseClaims;
use crate::error::{LicenseError, LicenseResult};
use crate::payload::{format_timestamp, parse_timestamp};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Trial length in days.
pub const TRIAL_DURATION_DAYS: i64 = 7;

/// Default location of the trial state file, relative to the working directory.
pub const DEFAULT_TRIAL_PATH: &str = "data/trial_license.json";

/// Environment variable overriding [`DEFAULT_TRIAL_PATH`].
pub const TRIAL_PATH_ENV: &str = "AI_INVOICE_TRIAL_PATH";

/// Features granted while the trial is active.
pub const DEFAULT_TRIAL_FEATURES: [&str; 6] = [
    "classify",
    "extract",
    "predict",
    "predictive",
    "predictive_train",
    "train",
];

/// Lifecycle of the trial grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialState {
    Active,
    Expired,
}

/// Trial window as of a particular read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialStatus {
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// `now < expires_at` at read time.
    pub valid: bool,
    pub features: BTreeSet<String>,
}

impl TrialStatus {
    fn at(started_at: DateTime<Utc>, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            started_at,
            expires_at,
            valid: now < expires_at,
            features: default_trial_features(),
        }
    }

    #[must_use]
    pub fn state(&self) -> TrialState {
        if self.valid {
            TrialState::Active
        } else {
            TrialState::Expired
        }
    }

    /// Time left in the window, zero once expired.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    /// Claims granted by this trial, or `None` once expired.
    #[must_use]
    pub fn claims(&self) -> Option<LicenseClaims> {
        self.valid.then(|| LicenseClaims::from_trial(self))
    }
}

/// The fixed trial feature set.
#[must_use]
pub fn default_trial_features() -> BTreeSet<String> {
    DEFAULT_TRIAL_FEATURES.iter().map(|f| (*f).to_string()).collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedTrial {
    started_at: String,
    expires_at: String,
}

/// File-backed trial state.
#[derive(Debug)]
pub struct TrialStore {
    path: PathBuf,
    // Serializes read-or-initialize so concurrent first reads agree on one window.
    guard: Mutex<()>,
}

impl TrialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    /// Store at `$AI_INVOICE_TRIAL_PATH`, or [`DEFAULT_TRIAL_PATH`].
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(default_trial_path())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current trial status, starting the trial on first use.
    ///
    /// # Errors
    ///
    /// See [`TrialStore::status_at`].
    pub fn status(&self) -> LicenseResult<TrialStatus> {
        self.status_at(Utc::now())
    }

    /// Trial status as of `now`, starting the trial if none is persisted.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Storage`] if the state file exists but cannot
    /// be read, or a new window cannot be written.
    pub fn status_at(&self, now: DateTime<Utc>) -> LicenseResult<TrialStatus> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);

        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return self.initialize(now),
            Err(e) => {
                return Err(LicenseError::Storage(format!(
                    "trial state not readable at {}: {e}",
                    self.path.display()
                )));
            }
        };

        let Some((started_at, expires_at)) = parse_persisted(&contents) else {
            warn!(
                path = %self.path.display(),
                "trial state corrupt; starting a new trial window"
            );
            return self.initialize(now);
        };
        if expires_at <= started_at {
            warn!(
                path = %self.path.display(),
                "trial state inconsistent; starting a new trial window"
            );
            return self.initialize(now);
        }

        let status = TrialStatus::at(started_at, expires_at, now);
        debug!(valid = status.valid, expires_at = %status.expires_at, "loaded trial state");
        Ok(status)
    }

    /// Trial status plus claims while active.
    ///
    /// # Errors
    ///
    /// See [`TrialStore::status_at`].
    pub fn resolve_claims_at(
        &self,
        now: DateTime<Utc>,
    ) -> LicenseResult<(TrialStatus, Option<LicenseClaims>)> {
        let status = self.status_at(now)?;
        let claims = status.claims();
        Ok((status, claims))
    }

    /// [`TrialStore::resolve_claims_at`] with the current time.
    ///
    /// # Errors
    ///
    /// See [`TrialStore::status_at`].
    pub fn resolve_claims(&self) -> LicenseResult<(TrialStatus, Option<LicenseClaims>)> {
        self.resolve_claims_at(Utc::now())
    }

    fn initialize(&self, now: DateTime<Utc>) -> LicenseResult<TrialStatus> {
        let started_at = now.trunc_subsecs(0);
        let expires_at = started_at + Duration::days(TRIAL_DURATION_DAYS);
        self.persist(started_at, expires_at)?;
        info!(
            path = %self.path.display(),
            expires_at = %format_timestamp(&expires_at),
            "started local trial"
        );
        Ok(TrialStatus::at(started_at, expires_at, now))
    }

    fn persist(&self, started_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> LicenseResult<()> {
        let record = PersistedTrial {
            started_at: format_timestamp(&started_at),
            expires_at: format_timestamp(&expires_at),
        };
        let mut bytes = serde_json::to_vec_pretty(&record)?;
        bytes.push(b'\n');
        write_atomic(&self.path, &bytes)
    }
}

/// Trial status from the default store.
///
/// # Errors
///
/// See [`TrialStore::status_at`].
pub fn get_trial_status(
    store: &TrialStore,
    now: Option<DateTime<Utc>>,
) -> LicenseResult<TrialStatus> {
    store.status_at(now.unwrap_or_else(Utc::now))
}

/// Trial status and, while active, its claims.
///
/// # Errors
///
/// See [`TrialStore::status_at`].
pub fn resolve_trial_claims(
    store: &TrialStore,
    now: Option<DateTime<Utc>>,
) -> LicenseResult<(TrialStatus, Option<LicenseClaims>)> {
    store.resolve_claims_at(now.unwrap_or_else(Utc::now))
}

/// Resolves the trial path from the environment.
#[must_use]
pub fn default_trial_path() -> PathBuf {
    match std::env::var(TRIAL_PATH_ENV) {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value.trim()),
        _ => PathBuf::from(DEFAULT_TRIAL_PATH),
    }
}

fn parse_persisted(contents: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let record: PersistedTrial = serde_json::from_str(contents).ok()?;
    let started_at = parse_timestamp(&record.started_at).ok()?;
    let expires_at = parse_timestamp(&record.expires_at).ok()?;
    Some((started_at, expires_at))
}

/// Writes `bytes` to a temp file beside `path`, then renames it into place.
/// The temp file is removed if any step fails.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> LicenseResult<()> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)
        .map_err(|e| LicenseError::Storage(format!("creating {}: {e}", parent.display())))?;

    let mut temp = tempfile::NamedTempFile::new_in(&parent).map_err(|e| {
        LicenseError::Storage(format!("creating temp file in {}: {e}", parent.display()))
    })?;
    temp.write_all(bytes)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|e| {
            LicenseError::Storage(format!("writing temp file for {}: {e}", path.display()))
        })?;
    temp.persist(path).map_err(|e| {
        LicenseError::Storage(format!(
            "renaming temp file to {}: {}",
            path.display(),
            e.error
        ))
    })?;
    Ok(())
}
