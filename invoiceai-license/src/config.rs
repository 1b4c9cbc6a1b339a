//! License settings from the environment or a TOML file.
//!
//! Environment variables:
//! - `LICENSE_PUBLIC_KEY_PATH` / `LICENSE_PUBLIC_KEY`: trusted key, path or inline PEM
//! - `LICENSE_ALGORITHM`: must be `ed25519` (any case)
//! - `LICENSE_REVOKED_JTIS` / `LICENSE_REVOKED_SUBJECTS`: comma-separated
//! - `AI_INVOICE_TRIAL_PATH`: trial state file

use crate::codec::ALGORITHM_ED25519;
use crate::error::{LicenseError, LicenseResult};
use crate::revocation::RevocationList;
use crate::trial::{DEFAULT_TRIAL_PATH, TRIAL_PATH_ENV};
use crate::verifier::KeySource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::info;

pub const ENV_PUBLIC_KEY_PATH: &str = "LICENSE_PUBLIC_KEY_PATH";
pub const ENV_PUBLIC_KEY: &str = "LICENSE_PUBLIC_KEY";
pub const ENV_ALGORITHM: &str = "LICENSE_ALGORITHM";
pub const ENV_REVOKED_JTIS: &str = "LICENSE_REVOKED_JTIS";
pub const ENV_REVOKED_SUBJECTS: &str = "LICENSE_REVOKED_SUBJECTS";

/// Immutable license configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LicenseSettings {
    pub license_public_key_path: Option<PathBuf>,
    pub license_public_key: Option<String>,
    #[serde(default = "default_algorithm")]
    pub license_algorithm: String,
    pub license_revoked_jtis: BTreeSet<String>,
    pub license_revoked_subjects: BTreeSet<String>,
    #[serde(default = "default_trial_path")]
    pub trial_path: PathBuf,
}

fn default_algorithm() -> String {
    ALGORITHM_ED25519.to_string()
}

fn default_trial_path() -> PathBuf {
    PathBuf::from(DEFAULT_TRIAL_PATH)
}

impl Default for LicenseSettings {
    fn default() -> Self {
        Self {
            license_public_key_path: None,
            license_public_key: None,
            license_algorithm: default_algorithm(),
            license_revoked_jtis: BTreeSet::new(),
            license_revoked_subjects: BTreeSet::new(),
            trial_path: default_trial_path(),
        }
    }
}

impl LicenseSettings {
    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// See [`LicenseSettings::from_lookup`].
    pub fn from_env() -> LicenseResult<Self> {
        Self::from_lookup(|name| std::env::var_os(name))
    }

    /// Reads settings through an arbitrary variable lookup.
    ///
    /// Path variables are taken as raw OS strings.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Configuration`] if a non-path variable is not
    /// valid UTF-8.
    pub fn from_lookup<F, V>(lookup: F) -> LicenseResult<Self>
    where
        F: Fn(&str) -> Option<V>,
        V: Into<OsString>,
    {
        let text = |name: &str| -> LicenseResult<Option<String>> {
            lookup(name)
                .map(|value| {
                    value.into().into_string().map_err(|_| {
                        LicenseError::Configuration(format!("{name} is not valid UTF-8"))
                    })
                })
                .transpose()
        };

        let mut settings = Self::default();
        if let Some(path) = lookup(ENV_PUBLIC_KEY_PATH) {
            let path: OsString = path.into();
            settings.license_public_key_path = Some(PathBuf::from(path));
        }
        if let Some(pem) = text(ENV_PUBLIC_KEY)? {
            settings.license_public_key = Some(pem);
        }
        if let Some(alg) = text(ENV_ALGORITHM)? {
            settings.license_algorithm = alg;
        }
        if let Some(csv) = text(ENV_REVOKED_JTIS)? {
            settings.license_revoked_jtis = split_csv(&csv);
        }
        if let Some(csv) = text(ENV_REVOKED_SUBJECTS)? {
            settings.license_revoked_subjects = split_csv(&csv);
        }
        if let Some(path) = lookup(TRIAL_PATH_ENV) {
            let path: OsString = path.into();
            settings.trial_path = PathBuf::from(path);
        }
        Ok(settings.normalized())
    }

    /// Parses settings from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Configuration`] if the TOML is invalid.
    pub fn from_toml_str(contents: &str) -> LicenseResult<Self> {
        let settings: Self = toml::from_str(contents)
            .map_err(|e| LicenseError::Configuration(format!("invalid license settings: {e}")))?;
        Ok(settings.normalized())
    }

    /// Loads settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Configuration`] if the file is unreadable or invalid.
    pub fn load_from(path: impl AsRef<Path>) -> LicenseResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            LicenseError::Configuration(format!(
                "license settings not readable at {}: {e}",
                path.display()
            ))
        })?;
        let settings = Self::from_toml_str(&contents)?;
        info!(path = %path.display(), "loaded license settings");
        Ok(settings)
    }

    /// Trims strings, turns blanks into `None`, drops blank revocation entries.
    ///
    /// Paths that are not valid UTF-8 are kept untouched.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.license_public_key_path = self
            .license_public_key_path
            .map(|p| match p.to_str() {
                Some(s) => PathBuf::from(s.trim()),
                None => p,
            })
            .filter(|p| !p.as_os_str().is_empty());
        // Inline keys may arrive on one line with escaped newlines.
        self.license_public_key = self
            .license_public_key
            .map(|s| s.trim().replace("\\n", "\n"))
            .filter(|s| !s.is_empty());
        self.license_algorithm = match self.license_algorithm.trim() {
            "" => default_algorithm(),
            alg => alg.to_string(),
        };
        self.license_revoked_jtis = normalize_set(self.license_revoked_jtis);
        self.license_revoked_subjects = normalize_set(self.license_revoked_subjects);
        if self.trial_path.as_os_str().is_empty() {
            self.trial_path = default_trial_path();
        }
        self
    }

    /// Resolves the trusted key source.
    ///
    /// `Ok(None)` means no license is configured and the trial applies.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Configuration`] if both a path and an inline
    /// key are set, or the algorithm is not Ed25519.
    pub fn key_source(&self) -> LicenseResult<Option<KeySource>> {
        self.check_algorithm()?;
        match (&self.license_public_key_path, &self.license_public_key) {
            (Some(_), Some(_)) => Err(LicenseError::Configuration(format!(
                "set exactly one of {ENV_PUBLIC_KEY_PATH} or {ENV_PUBLIC_KEY}"
            ))),
            (Some(path), None) => Ok(Some(KeySource::File(path.clone()))),
            (None, Some(pem)) => Ok(Some(KeySource::InlinePem(pem.clone()))),
            (None, None) => Ok(None),
        }
    }

    /// Revocation snapshot built from these settings.
    #[must_use]
    pub fn revocation_list(&self) -> RevocationList {
        RevocationList::new(&self.license_revoked_jtis, &self.license_revoked_subjects)
    }

    fn check_algorithm(&self) -> LicenseResult<()> {
        if self.license_algorithm.eq_ignore_ascii_case(ALGORITHM_ED25519) {
            Ok(())
        } else {
            Err(LicenseError::Configuration(format!(
                "unsupported license algorithm {:?}; only {ALGORITHM_ED25519} is supported",
                self.license_algorithm
            )))
        }
    }
}

fn split_csv(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_set(values: BTreeSet<String>) -> BTreeSet<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}
