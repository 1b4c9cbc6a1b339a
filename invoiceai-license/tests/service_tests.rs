mod common;

use chrono::Duration;
use common::{issue, issue_with_token_id, t0, test_keypair};
use invoiceai_license::{
    LicenseError, LicenseService, LicenseSettings, LicenseSigner, RevocationList, TRIAL_SUBJECT,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

fn licensed_settings(dir: &tempfile::TempDir) -> LicenseSettings {
    let (signer, _) = test_keypair();
    LicenseSettings {
        license_public_key: Some(signer.public_key_pem().unwrap()),
        trial_path: dir.path().join("trial.json"),
        ..LicenseSettings::default()
    }
}

fn trial_settings(dir: &tempfile::TempDir) -> LicenseSettings {
    LicenseSettings {
        trial_path: dir.path().join("trial.json"),
        ..LicenseSettings::default()
    }
}

#[test]
fn valid_header_yields_claims() {
    let dir = tempfile::tempdir().unwrap();
    let service = LicenseService::from_settings(&licensed_settings(&dir)).unwrap();
    let (signer, _) = test_keypair();
    let token = issue(&signer, "acme", &["extract"], 30);

    assert!(service.is_license_configured());
    let claims = service.authorize_at(Some(&token), t0()).unwrap();
    assert_eq!(claims.subject(), "acme");
    assert!(!claims.is_trial());
}

#[test]
fn missing_or_blank_header_is_401() {
    let dir = tempfile::tempdir().unwrap();
    let service = LicenseService::from_settings(&licensed_settings(&dir)).unwrap();

    for header in [None, Some(""), Some("   ")] {
        let err = service.authorize_at(header, t0()).unwrap_err();
        assert!(matches!(err, LicenseError::MissingToken));
        assert_eq!(err.status_code(), 401);
    }
}

#[test]
fn forged_and_malformed_tokens_look_the_same() {
    let dir = tempfile::tempdir().unwrap();
    let service = LicenseService::from_settings(&licensed_settings(&dir)).unwrap();
    let forger = LicenseSigner::from_bytes(&common::OTHER_SEED);
    let forged = issue(&forger, "acme", &["extract"], 30);

    let forged_err = service.authorize_at(Some(&forged), t0()).unwrap_err();
    let garbage_err = service.authorize_at(Some("%%%"), t0()).unwrap_err();
    assert_eq!(forged_err.status_code(), 401);
    assert_eq!(garbage_err.status_code(), 401);
    assert_eq!(forged_err.public_detail(), garbage_err.public_detail());
}

#[test]
fn expired_license_is_403() {
    let dir = tempfile::tempdir().unwrap();
    let service = LicenseService::from_settings(&licensed_settings(&dir)).unwrap();
    let (signer, _) = test_keypair();
    let token = issue(&signer, "acme", &["extract"], 1);

    let err = service.authorize_at(Some(&token), t0() + Duration::days(2)).unwrap_err();
    assert!(matches!(err, LicenseError::Expired(_)));
    assert_eq!(err.status_code(), 403);
}

#[test]
fn revocations_from_settings_apply() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = licensed_settings(&dir);
    settings.license_revoked_jtis = BTreeSet::from(["tok-revoked".to_string()]);
    let service = LicenseService::from_settings(&settings).unwrap();
    let (signer, _) = test_keypair();

    let revoked = issue_with_token_id(&signer, "acme", "tok-revoked", &["extract"]);
    let fine = issue_with_token_id(&signer, "acme", "tok-fine", &["extract"]);
    assert!(matches!(service.authorize_at(Some(&revoked), t0()), Err(LicenseError::Revoked)));
    assert!(service.authorize_at(Some(&fine), t0()).is_ok());
}

#[test]
fn reload_swaps_revocations() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = licensed_settings(&dir);
    let service = LicenseService::from_settings(&settings).unwrap();
    let (signer, _) = test_keypair();
    let token = issue(&signer, "acme", &["extract"], 30);
    assert!(service.authorize_at(Some(&token), t0()).is_ok());

    settings.license_revoked_subjects = BTreeSet::from(["acme".to_string()]);
    service.reload(&settings).unwrap();
    assert!(matches!(service.authorize_at(Some(&token), t0()), Err(LicenseError::Revoked)));

    service.replace_revocations(RevocationList::empty());
    assert!(service.authorize_at(Some(&token), t0()).is_ok());
    assert!(service.is_license_configured());
}

#[test]
fn reload_never_pairs_a_key_with_another_configurations_revocations() {
    let dir = tempfile::tempdir().unwrap();
    let (old_signer, _) = test_keypair();
    let new_signer = LicenseSigner::from_bytes(&common::OTHER_SEED);

    // Old settings trust the old key and revoke nothing. New settings trust
    // the new key and revoke acme. A token from the new key for acme must be
    // rejected under both.
    let old_settings = licensed_settings(&dir);
    let new_settings = LicenseSettings {
        license_public_key: Some(new_signer.public_key_pem().unwrap()),
        license_revoked_subjects: BTreeSet::from(["acme".to_string()]),
        ..trial_settings(&dir)
    };
    let token = issue(&new_signer, "acme", &["extract"], 30);
    let control = issue(&old_signer, "globex", &["extract"], 30);

    let service = Arc::new(LicenseService::from_settings(&old_settings).unwrap());
    let done = Arc::new(AtomicBool::new(false));
    let reloader = {
        let service = Arc::clone(&service);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Relaxed) {
                service.reload(&new_settings).unwrap();
                service.reload(&old_settings).unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            let token = token.clone();
            thread::spawn(move || {
                (0..5_000)
                    .filter(|_| service.authorize_at(Some(&token), t0()).is_ok())
                    .count()
            })
        })
        .collect();
    let accepted: usize = readers.into_iter().map(|r| r.join().unwrap()).sum();
    done.store(true, Ordering::Relaxed);
    reloader.join().unwrap();

    assert_eq!(accepted, 0);
    service.reload(&licensed_settings(&dir)).unwrap();
    assert!(service.authorize_at(Some(&control), t0()).is_ok());
}

#[test]
fn replacing_revocations_keeps_the_trusted_key() {
    let dir = tempfile::tempdir().unwrap();
    let service = LicenseService::from_settings(&licensed_settings(&dir)).unwrap();
    let (signer, _) = test_keypair();
    let token = issue_with_token_id(&signer, "acme", "tok-7", &["extract"]);

    service.replace_revocations(RevocationList::new(["tok-7"], Vec::<String>::new()));
    assert!(service.revocations().is_token_revoked("tok-7"));
    assert!(matches!(service.authorize_at(Some(&token), t0()), Err(LicenseError::Revoked)));

    let forger = LicenseSigner::from_bytes(&common::OTHER_SEED);
    let forged = issue(&forger, "globex", &["extract"], 30);
    assert!(matches!(
        service.authorize_at(Some(&forged), t0()),
        Err(LicenseError::InvalidSignature)
    ));
}

#[test]
fn reload_with_same_trial_path_keeps_the_trial_window() {
    let dir = tempfile::tempdir().unwrap();
    let service = LicenseService::from_settings(&trial_settings(&dir)).unwrap();
    let first = service.authorize_at(None, t0()).unwrap();

    let mut settings = trial_settings(&dir);
    settings.license_revoked_jtis = BTreeSet::from(["tok-1".to_string()]);
    service.reload(&settings).unwrap();

    let again = service.authorize_at(None, t0() + Duration::days(3)).unwrap();
    assert_eq!(first.expires_at(), again.expires_at());
}

#[test]
fn failed_reload_keeps_previous_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let service = LicenseService::from_settings(&licensed_settings(&dir)).unwrap();
    let (signer, _) = test_keypair();
    let token = issue(&signer, "acme", &["extract"], 30);

    let broken = LicenseSettings {
        license_algorithm: "rs256".to_string(),
        ..licensed_settings(&dir)
    };
    let err = service.reload(&broken).unwrap_err();
    assert_eq!(err.status_code(), 503);
    assert!(service.authorize_at(Some(&token), t0()).is_ok());
}

#[test]
fn contradictory_key_settings_fail_construction() {
    let dir = tempfile::tempdir().unwrap();
    let settings = LicenseSettings {
        license_public_key_path: Some(dir.path().join("key.pem")),
        ..licensed_settings(&dir)
    };
    assert!(matches!(
        LicenseService::from_settings(&settings),
        Err(LicenseError::Configuration(_))
    ));
}

#[test]
fn no_key_falls_back_to_trial() {
    let dir = tempfile::tempdir().unwrap();
    let service = LicenseService::from_settings(&trial_settings(&dir)).unwrap();
    assert!(!service.is_license_configured());

    // The header is ignored in trial mode.
    let claims = service.authorize_at(None, t0()).unwrap();
    assert!(claims.is_trial());
    assert_eq!(claims.subject(), TRIAL_SUBJECT);
    assert!(service.require_feature_at(None, "classify", t0()).is_ok());
    assert!(matches!(
        service.require_feature_at(None, "export", t0()),
        Err(LicenseError::FeatureNotPermitted(_))
    ));
}

#[test]
fn expired_trial_is_403_with_trial_message() {
    let dir = tempfile::tempdir().unwrap();
    let service = LicenseService::from_settings(&trial_settings(&dir)).unwrap();
    service.authorize_at(None, t0()).unwrap();

    let err = service.authorize_at(None, t0() + Duration::days(8)).unwrap_err();
    assert!(matches!(err, LicenseError::TrialExpired));
    assert_eq!(err.status_code(), 403);
    assert!(err.public_detail().starts_with("Trial period has expired."));
}

#[test]
fn reload_from_trial_to_licensed() {
    let dir = tempfile::tempdir().unwrap();
    let service = LicenseService::from_settings(&trial_settings(&dir)).unwrap();
    assert!(service.authorize_at(None, t0()).unwrap().is_trial());

    service.reload(&licensed_settings(&dir)).unwrap();
    assert!(matches!(service.authorize_at(None, t0()), Err(LicenseError::MissingToken)));
}

#[test]
fn require_feature_checks_license_features() {
    let dir = tempfile::tempdir().unwrap();
    let service = LicenseService::from_settings(&licensed_settings(&dir)).unwrap();
    let (signer, _) = test_keypair();
    let token = issue(&signer, "acme", &["extract", "predict"], 30);

    assert!(service.require_feature_at(Some(&token), "predict", t0()).is_ok());
    let err = service.require_feature_at(Some(&token), "classify", t0()).unwrap_err();
    assert_eq!(err.public_detail(), "License does not permit 'classify' operations.");
}
