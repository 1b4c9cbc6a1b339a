use chrono::{TimeZone, Utc};
use invoiceai_license::LicenseError;

#[test]
fn error_display_configuration() {
    let err = LicenseError::Configuration("no key".into());
    let msg = format!("{err}");
    assert!(msg.contains("configuration"));
    assert!(msg.contains("no key"));
}

#[test]
fn error_display_expired_includes_instant() {
    let err = LicenseError::Expired(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    let msg = format!("{err}");
    assert!(msg.contains("expired"));
    assert!(msg.contains("2025-01-01"));
}

#[test]
fn error_display_feature_not_permitted() {
    let err = LicenseError::FeatureNotPermitted("train".into());
    assert_eq!(format!("{err}"), "license does not permit 'train' operations");
}

#[test]
fn error_from_serde_json() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err: LicenseError = json_err.into();
    assert!(matches!(err, LicenseError::Serialization(_)));
    assert_eq!(err.status_code(), 500);
}

#[test]
fn status_codes() {
    assert_eq!(LicenseError::MissingToken.status_code(), 401);
    assert_eq!(LicenseError::Malformed("x".into()).status_code(), 401);
    assert_eq!(LicenseError::InvalidSignature.status_code(), 401);
    assert_eq!(LicenseError::Expired(Utc::now()).status_code(), 403);
    assert_eq!(LicenseError::Revoked.status_code(), 403);
    assert_eq!(LicenseError::MissingFeatures.status_code(), 403);
    assert_eq!(LicenseError::TrialExpired.status_code(), 403);
    assert_eq!(LicenseError::Configuration("x".into()).status_code(), 503);
    assert_eq!(LicenseError::InvalidIssuance("x".into()).status_code(), 400);
    assert_eq!(LicenseError::Storage("x".into()).status_code(), 500);
}

#[test]
fn malformed_and_forged_share_public_detail() {
    let malformed = LicenseError::Malformed("token is not valid base64".into());
    assert_eq!(malformed.public_detail(), LicenseError::InvalidSignature.public_detail());
    assert!(!malformed.public_detail().contains("base64"));
    assert!(malformed.is_authentication_failure());
    assert!(!LicenseError::Revoked.is_authentication_failure());
}

#[test]
fn public_detail_hides_internal_errors() {
    let err = LicenseError::Storage("/var/lib/secret/path: permission denied".into());
    assert!(!err.public_detail().contains("/var/lib"));
    let err = LicenseError::Configuration("public key not readable at /etc/key.pem".into());
    assert_eq!(err.public_detail(), "License verification unavailable.");
}
