//! Revocation entry points over the full pipeline.

mod common;

use acmeca::prelude::*;
use acmeca::{RevocationTarget, StorageAuthority, spki_digest};
use common::{TestPipeline, csr, rsa_csr};
use jiff::Span;

/// Issue a certificate and hand back (serial, DER, subscriber key digest)
async fn issued_certificate(
    pipeline: &TestPipeline,
    registration_id: i64,
    names: &[&str],
    rsa: bool,
) -> (String, Vec<u8>) {
    let order = pipeline.ready_order(registration_id, names).await;
    let csr_der = if rsa { rsa_csr(names) } else { csr(names, None) };
    let (order, _) = pipeline
        .ra
        .finalize_order(acmeca::FinalizeOrderRequest {
            registration_id,
            order_id: order.id,
            csr_der,
            deadline: None,
        })
        .await
        .unwrap();
    let serial = order.certificate_serial.unwrap();
    let cert = pipeline.store.get_certificate(&serial).await.unwrap();
    (serial, cert.der)
}

#[tokio::test]
async fn applicant_revocation_honors_reason() {
    let pipeline = TestPipeline::new();
    let (account, _) = pipeline.register_account().await;
    let (serial, der) = issued_certificate(&pipeline, account.id, &["a.example.com"], false).await;

    pipeline
        .ra
        .revoke_cert_by_applicant(account.id, &der, RevocationReason::Superseded)
        .await
        .unwrap();

    let status = pipeline.store.get_certificate_status(&serial).await.unwrap();
    assert_eq!(status.revoked_reason, Some(RevocationReason::Superseded));
    assert!(status.revoked_at.is_some());
}

#[tokio::test]
async fn certificate_hold_is_always_refused() {
    let pipeline = TestPipeline::new();
    let (account, _) = pipeline.register_account().await;
    let (_, der) = issued_certificate(&pipeline, account.id, &["a.example.com"], false).await;

    let err = pipeline
        .ra
        .revoke_cert_by_applicant(account.id, &der, RevocationReason::CertificateHold)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Malformed);
}

#[tokio::test]
async fn third_party_needs_control_of_every_name() {
    let pipeline = TestPipeline::new();
    let (owner, _) = pipeline.register_account().await;
    let (other, _) = pipeline.register_account().await;
    let (serial, der) =
        issued_certificate(&pipeline, owner.id, &["a.example.com", "b.example.com"], false).await;

    // the other account controls nothing: refused
    let err = pipeline
        .ra
        .revoke_cert_by_applicant(other.id, &der, RevocationReason::Unspecified)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    // give the other account valid authorizations for both names
    let order = pipeline
        .ra
        .new_order(
            other.id,
            &["a.example.com".to_string(), "b.example.com".to_string()],
        )
        .await
        .unwrap();
    pipeline.validate_order(other.id, &order).await;

    // now it works, but the reason is forced to cessationOfOperation
    pipeline
        .ra
        .revoke_cert_by_applicant(other.id, &der, RevocationReason::Superseded)
        .await
        .unwrap();
    let status = pipeline.store.get_certificate_status(&serial).await.unwrap();
    assert_eq!(
        status.revoked_reason,
        Some(RevocationReason::CessationOfOperation)
    );
}

#[tokio::test]
async fn revoke_by_key_blocks_the_key_and_upgrades_once() {
    let pipeline = TestPipeline::new();
    let (account, _) = pipeline.register_account().await;
    let (serial, der) = issued_certificate(&pipeline, account.id, &["a.example.com"], true).await;

    // an earlier, mild revocation
    pipeline
        .ra
        .revoke_cert_by_applicant(account.id, &der, RevocationReason::Superseded)
        .await
        .unwrap();

    // the key holder shows up: upgraded to keyCompromise, key blocked
    pipeline.ra.revoke_cert_by_key(&der).await.unwrap();
    let status = pipeline.store.get_certificate_status(&serial).await.unwrap();
    assert_eq!(status.revoked_reason, Some(RevocationReason::KeyCompromise));

    let (_, cert) = x509_parser::parse_x509_certificate(&der).unwrap();
    let digest = spki_digest(cert.public_key().raw);
    assert!(pipeline.store.key_blocked(&digest).await.unwrap());

    // a second upgrade attempt surfaces AlreadyRevoked
    let err = pipeline.ra.revoke_cert_by_key(&der).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyRevoked);
}

#[tokio::test]
async fn blocked_key_stops_future_issuance() {
    let pipeline = TestPipeline::new();
    let (account, _) = pipeline.register_account().await;
    let (_, der) = issued_certificate(&pipeline, account.id, &["a.example.com"], true).await;

    pipeline.ra.revoke_cert_by_key(&der).await.unwrap();

    // the same RSA key in a new CSR is now refused at the CA
    let order = pipeline.ready_order(account.id, &["b.example.com"]).await;
    let err = pipeline
        .ra
        .finalize_order(acmeca::FinalizeOrderRequest {
            registration_id: account.id,
            order_id: order.id,
            csr_der: rsa_csr(&["b.example.com"]),
            deadline: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadPublicKey);
}

#[tokio::test]
async fn administrative_revocation_rules() {
    let pipeline = TestPipeline::new();
    let (account, _) = pipeline.register_account().await;
    let (serial, der) = issued_certificate(&pipeline, account.id, &["a.example.com"], true).await;

    // admin identifier is mandatory
    let err = pipeline
        .ra
        .administratively_revoke(
            "  ",
            RevocationTarget::Serial(serial.clone()),
            RevocationReason::Unspecified,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Malformed);

    // keyCompromise needs the DER, a serial is not enough
    let err = pipeline
        .ra
        .administratively_revoke(
            "ops@example.net",
            RevocationTarget::Serial(serial.clone()),
            RevocationReason::KeyCompromise,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Malformed);

    // unspecified by serial works and does not block the key
    pipeline
        .ra
        .administratively_revoke(
            "ops@example.net",
            RevocationTarget::Serial(serial.clone()),
            RevocationReason::Unspecified,
        )
        .await
        .unwrap();
    let (_, cert) = x509_parser::parse_x509_certificate(&der).unwrap();
    let digest = spki_digest(cert.public_key().raw);
    assert!(!pipeline.store.key_blocked(&digest).await.unwrap());

    // keyCompromise with the DER upgrades the revocation and blocks
    pipeline
        .ra
        .administratively_revoke(
            "ops@example.net",
            RevocationTarget::Der(der.clone()),
            RevocationReason::KeyCompromise,
        )
        .await
        .unwrap();
    assert!(pipeline.store.key_blocked(&digest).await.unwrap());
    let status = pipeline.store.get_certificate_status(&serial).await.unwrap();
    assert_eq!(status.revoked_reason, Some(RevocationReason::KeyCompromise));
}

#[tokio::test]
async fn ocsp_refresh_is_recorded_after_revocation() {
    let pipeline = TestPipeline::new();
    let (account, _) = pipeline.register_account().await;
    let (serial, der) = issued_certificate(&pipeline, account.id, &["a.example.com"], false).await;

    let before = pipeline.store.get_certificate_status(&serial).await.unwrap();
    pipeline.clock.advance(Span::new().hours(1));
    pipeline
        .ra
        .revoke_cert_by_applicant(account.id, &der, RevocationReason::Unspecified)
        .await
        .unwrap();

    let after = pipeline.store.get_certificate_status(&serial).await.unwrap();
    assert!(after.ocsp_last_updated > before.ocsp_last_updated);
}
