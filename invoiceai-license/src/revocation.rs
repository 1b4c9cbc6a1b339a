//! Revocation of otherwise valid licenses by token id or tenant id.
//!
//! A [`RevocationList`] is immutable. The service swaps it together with the
//! trusted key as one snapshot.

use crate::error::{LicenseError, LicenseResult};
use crate::payload::LicensePayload;
use std::collections::HashSet;
use tracing::warn;

/// Which anchor matched a revoked license.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationMatch {
    TokenId,
    TenantId,
}

/// Snapshot of revoked token ids and tenant ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevocationList {
    token_ids: HashSet<String>,
    tenant_ids: HashSet<String>,
}

impl RevocationList {
    /// Builds a list, trimming entries and dropping blanks.
    pub fn new<T, U>(token_ids: T, tenant_ids: U) -> Self
    where
        T: IntoIterator,
        T::Item: AsRef<str>,
        U: IntoIterator,
        U::Item: AsRef<str>,
    {
        Self {
            token_ids: normalize(token_ids),
            tenant_ids: normalize(tenant_ids),
        }
    }

    /// A list that revokes nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_token_revoked(&self, token_id: &str) -> bool {
        self.token_ids.contains(token_id)
    }

    #[must_use]
    pub fn is_tenant_revoked(&self, tenant_id: &str) -> bool {
        self.tenant_ids.contains(tenant_id)
    }

    /// Returns which anchor, if any, revokes `payload`. Token id is checked first.
    #[must_use]
    pub fn find_match(&self, payload: &LicensePayload) -> Option<RevocationMatch> {
        if self.is_token_revoked(&payload.token_id) {
            Some(RevocationMatch::TokenId)
        } else if self.is_tenant_revoked(&payload.tenant.id) {
            Some(RevocationMatch::TenantId)
        } else {
            None
        }
    }

    /// Rejects a revoked payload.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Revoked`] if the token id or tenant id is listed.
    pub fn check(&self, payload: &LicensePayload) -> LicenseResult<()> {
        match self.find_match(payload) {
            Some(anchor) => {
                warn!(
                    token_id = %payload.token_id,
                    tenant = %payload.tenant.id,
                    ?anchor,
                    "rejected revoked license"
                );
                Err(LicenseError::Revoked)
            }
            None => Ok(()),
        }
    }

    /// Number of revoked token ids.
    #[must_use]
    pub fn token_count(&self) -> usize {
        self.token_ids.len()
    }

    /// Number of revoked tenant ids.
    #[must_use]
    pub fn tenant_count(&self) -> usize {
        self.tenant_ids.len()
    }
}

fn normalize<I>(values: I) -> HashSet<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    values
        .into_iter()
        .map(|v| v.as_ref().trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}
