//! The signed license payload and its timestamp encoding.
//!
//! Timestamps are always carried as strings (`2024-01-01T00:00:00Z`) so the
//! canonical encoding never has to format a float or an epoch number.

use crate::error::{LicenseError, LicenseResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Naive layouts accepted in addition to RFC 3339. Naive values are UTC.
const NAIVE_LAYOUTS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Offset-carrying layouts that RFC 3339 parsing rejects (space separator).
const OFFSET_LAYOUTS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Parses an ISO-8601 timestamp and normalizes it to UTC.
///
/// Accepts a `Z` suffix, a numeric offset, or no suffix at all (assumed UTC).
/// A bare date is midnight UTC.
///
/// # Errors
///
/// Returns [`LicenseError::Malformed`] if the value is not a recognizable timestamp.
pub fn parse_timestamp(value: &str) -> LicenseResult<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LicenseError::Malformed("empty timestamp".to_string()));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    let zulu_stripped = trimmed
        .strip_suffix('Z')
        .or_else(|| trimmed.strip_suffix('z'))
        .unwrap_or(trimmed);

    for layout in OFFSET_LAYOUTS {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, layout) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    for layout in NAIVE_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(zulu_stripped, layout) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(zulu_stripped, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }

    Err(LicenseError::Malformed(format!("unrecognized timestamp: {trimmed}")))
}

/// Formats a timestamp as second-precision UTC with a trailing `Z`.
#[must_use]
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.trunc_subsecs(0).to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) mod utc_string {
    use super::*;

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timestamp(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

/// The tenant a license is issued to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantInfo {
    /// Stable tenant identifier; one of the two revocation anchors.
    pub id: String,
    /// Human-friendly label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Free-form tenant attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl TenantInfo {
    /// Creates a tenant with only an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// The signed content of a license artifact.
///
/// Immutable after issuance: the signature covers the canonical bytes of
/// exactly these fields, so any edit invalidates the license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LicensePayload {
    /// Licensed tenant.
    pub tenant: TenantInfo,
    /// Granted feature flags, in issuer order.
    #[serde(default)]
    pub features: Vec<String>,
    /// Issuance time (UTC, second precision).
    #[serde(with = "utc_string")]
    pub issued_at: DateTime<Utc>,
    /// Expiry time (UTC, second precision).
    #[serde(with = "utc_string")]
    pub expires_at: DateTime<Utc>,
    /// Unique token identifier; the other revocation anchor.
    pub token_id: String,
    /// Optional device binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Identifier of the signing key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

impl LicensePayload {
    /// Parses and schema-checks a payload from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Malformed`] on unknown fields, missing
    /// `tenant.id`/`token_id`, or unparseable timestamps.
    pub fn from_value(value: serde_json::Value) -> LicenseResult<Self> {
        let payload: Self = serde_json::from_value(value)
            .map_err(|e| LicenseError::Malformed(format!("invalid payload: {e}")))?;
        payload.validate()?;
        Ok(payload)
    }

    /// Checks the identifiers that revocation depends on.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Malformed`] when `tenant.id` or `token_id` is blank.
    pub fn validate(&self) -> LicenseResult<()> {
        if self.tenant.id.trim().is_empty() {
            return Err(LicenseError::Malformed("tenant.id is empty".to_string()));
        }
        if self.token_id.trim().is_empty() {
            return Err(LicenseError::Malformed("token_id is empty".to_string()));
        }
        Ok(())
    }

    /// Returns true if `now` is at or past the expiry.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// JSON form of the payload, as embedded in the artifact.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the payload cannot be represented.
    pub fn to_value(&self) -> LicenseResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn parses_zulu_offset_and_naive_forms() {
        let expected = utc(2024, 1, 1, 12, 30, 0);
        assert_eq!(parse_timestamp("2024-01-01T12:30:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-01T12:30:00+00:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-01T14:30:00+02:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-01T12:30:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-01 12:30:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-01T12:30").unwrap(), expected);
    }

    #[test]
    fn parses_fractional_seconds() {
        let dt = parse_timestamp("2024-01-01T00:00:00.123456+00:00").unwrap();
        assert_eq!(dt.timestamp(), utc(2024, 1, 1, 0, 0, 0).timestamp());
    }

    #[test]
    fn bare_date_is_midnight_utc() {
        assert_eq!(parse_timestamp("2024-02-01").unwrap(), utc(2024, 2, 1, 0, 0, 0));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(parse_timestamp("yesterday"), Err(LicenseError::Malformed(_))));
        assert!(matches!(parse_timestamp("  "), Err(LicenseError::Malformed(_))));
    }

    #[test]
    fn formats_with_seconds_and_z() {
        let dt = parse_timestamp("2024-01-01T12:30:00.999+00:00").unwrap();
        assert_eq!(format_timestamp(&dt), "2024-01-01T12:30:00Z");
    }

    #[test]
    fn optional_fields_are_omitted() {
        let payload = LicensePayload {
            tenant: TenantInfo::new("acme"),
            features: vec!["extract".into()],
            issued_at: utc(2024, 1, 1, 0, 0, 0),
            expires_at: utc(2024, 2, 1, 0, 0, 0),
            token_id: "t-1".into(),
            device: None,
            key_id: None,
        };
        let value = payload.to_value().unwrap();
        assert_eq!(
            value,
            json!({
                "tenant": {"id": "acme"},
                "features": ["extract"],
                "issued_at": "2024-01-01T00:00:00Z",
                "expires_at": "2024-02-01T00:00:00Z",
                "token_id": "t-1"
            })
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let value = json!({
            "tenant": {"id": "acme"},
            "features": ["extract"],
            "issued_at": "2024-01-01T00:00:00Z",
            "expires_at": "2024-02-01T00:00:00Z",
            "token_id": "t-1",
            "admin": true
        });
        assert!(matches!(LicensePayload::from_value(value), Err(LicenseError::Malformed(_))));
    }

    #[test]
    fn blank_identifiers_are_rejected() {
        let value = json!({
            "tenant": {"id": " "},
            "issued_at": "2024-01-01T00:00:00Z",
            "expires_at": "2024-02-01T00:00:00Z",
            "token_id": "t-1"
        });
        assert!(matches!(LicensePayload::from_value(value), Err(LicenseError::Malformed(_))));
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let payload = LicensePayload {
            tenant: TenantInfo::new("acme"),
            features: vec![],
            issued_at: utc(2024, 1, 1, 0, 0, 0),
            expires_at: utc(2024, 2, 1, 0, 0, 0),
            token_id: "t".into(),
            device: None,
            key_id: None,
        };
        assert!(payload.is_expired_at(utc(2024, 2, 1, 0, 0, 0)));
        assert!(!payload.is_expired_at(utc(2024, 1, 31, 23, 59, 59)));
    }
}
