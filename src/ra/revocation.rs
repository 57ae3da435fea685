//! The three revocation entry points.
//!
//! Applicants revoke with a reason of their choosing (within limits),
//! key holders always land on keyCompromise and block the key, and
//! administrators revoke by serial or DER. All paths converge on the SA
//! revocation write, a fresh OCSP response, and a best-effort cache
//! purge.

use crate::ca::ocsp::OcspCertStatus;
use crate::ca::spki_digest;
use crate::error::{CaError, ErrorKind, Result};
use crate::sa::{RevocationRequest, StorageAuthority};
use crate::types::RevocationReason;

use super::RegistrationAuthority;

/// Reasons a subscriber may request; everything else is refused.
/// certificateHold in particular is never honored.
const APPLICANT_REASONS: [RevocationReason; 5] = [
    RevocationReason::Unspecified,
    RevocationReason::KeyCompromise,
    RevocationReason::AffiliationChanged,
    RevocationReason::Superseded,
    RevocationReason::CessationOfOperation,
];

/// The certificate being revoked, by DER or by serial
pub enum RevocationTarget {
    Der(Vec<u8>),
    Serial(String),
}

/// Fields pulled out of a certificate for revocation decisions
struct ParsedCert {
    serial: String,
    names: Vec<String>,
    spki_der: Vec<u8>,
}

fn parse_certificate(der: &[u8]) -> Result<ParsedCert> {
    use x509_parser::prelude::*;

    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| CaError::malformed(format!("parsing certificate: {}", e)))?;
    let names = cert
        .subject_alternative_name()
        .ok()
        .flatten()
        .map(|ext| {
            ext.value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_ascii_lowercase()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(ParsedCert {
        serial: hex::encode_upper(cert.raw_serial()),
        names,
        spki_der: cert.public_key().raw.to_vec(),
    })
}

impl RegistrationAuthority {
    /// Revocation requested by an account, either the one that ordered
    /// the certificate or one that can prove control of all its names.
    pub async fn revoke_cert_by_applicant(
        &self,
        registration_id: i64,
        cert_der: &[u8],
        requested_reason: RevocationReason,
    ) -> Result<()> {
        if requested_reason == RevocationReason::CertificateHold {
            return Err(CaError::malformed(
                "certificateHold is never an acceptable revocation reason",
            ));
        }
        if !APPLICANT_REASONS.contains(&requested_reason) {
            return Err(CaError::malformed(format!(
                "reason code {} is not acceptable from applicants",
                requested_reason.as_u8()
            )));
        }

        let parsed = parse_certificate(cert_der)?;
        let stored = self.sa.get_certificate(&parsed.serial).await?;

        let reason = if stored.registration_id == registration_id {
            requested_reason
        } else {
            // a third party must hold valid authorizations for every name
            let now = self.clock.now();
            let held = self
                .sa
                .get_valid_authorizations(registration_id, &parsed.names, now)
                .await?;
            if let Some(missing) = parsed.names.iter().find(|name| !held.contains_key(*name)) {
                return Err(CaError::unauthorized(format!(
                    "requester does not control \"{}\"",
                    missing
                )));
            }
            RevocationReason::CessationOfOperation
        };

        self.sa
            .revoke_certificate(RevocationRequest {
                serial: parsed.serial.clone(),
                reason,
                revoked_at: self.clock.now(),
            })
            .await?;
        self.metrics.revocations.with_label_values(&["applicant"]).inc();
        self.refresh_revocation_artifacts(&parsed.serial, reason).await;
        Ok(())
    }

    /// Revocation proven by a signature with the certificate key itself.
    /// The reason is always keyCompromise and the key is blocked.
    pub async fn revoke_cert_by_key(&self, cert_der: &[u8]) -> Result<()> {
        let parsed = parse_certificate(cert_der)?;
        // ensure we know the certificate at all before touching state
        self.sa.get_certificate(&parsed.serial).await?;

        let request = RevocationRequest {
            serial: parsed.serial.clone(),
            reason: RevocationReason::KeyCompromise,
            revoked_at: self.clock.now(),
        };
        match self.sa.revoke_certificate(request.clone()).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyRevoked => {
                // one upgrade to keyCompromise is allowed; a second
                // attempt propagates AlreadyRevoked and adds nothing
                self.sa.update_revoked_certificate(request).await?;
            }
            Err(e) => return Err(e),
        }
        self.sa
            .add_blocked_key(&spki_digest(&parsed.spki_der), "API", None)
            .await?;
        self.metrics.revocations.with_label_values(&["key"]).inc();
        self.refresh_revocation_artifacts(&parsed.serial, RevocationReason::KeyCompromise)
            .await;
        Ok(())
    }

    /// Revocation by an operator. keyCompromise requires the DER so the
    /// key can be extracted and blocked.
    pub async fn administratively_revoke(
        &self,
        admin: &str,
        target: RevocationTarget,
        reason: RevocationReason,
    ) -> Result<()> {
        if admin.trim().is_empty() {
            return Err(CaError::malformed(
                "administrative revocation needs a non-empty admin identifier",
            ));
        }
        let (serial, spki_der) = match &target {
            RevocationTarget::Der(der) => {
                let parsed = parse_certificate(der)?;
                (parsed.serial, Some(parsed.spki_der))
            }
            RevocationTarget::Serial(serial) => (serial.to_ascii_uppercase(), None),
        };
        if reason == RevocationReason::KeyCompromise && spki_der.is_none() {
            return Err(CaError::malformed(
                "revoking for keyCompromise needs the certificate DER, not just a serial",
            ));
        }

        self.sa.get_certificate(&serial).await?;
        let request = RevocationRequest {
            serial: serial.clone(),
            reason,
            revoked_at: self.clock.now(),
        };
        match self.sa.revoke_certificate(request.clone()).await {
            Ok(()) => {}
            Err(e)
                if e.kind() == ErrorKind::AlreadyRevoked
                    && reason == RevocationReason::KeyCompromise =>
            {
                self.sa.update_revoked_certificate(request).await?;
            }
            Err(e) => return Err(e),
        }
        if reason == RevocationReason::KeyCompromise
            && let Some(spki) = spki_der
        {
            self.sa
                .add_blocked_key(&spki_digest(&spki), admin, Some("admin revocation".to_string()))
                .await?;
        }
        tracing::info!(
            target: "audit",
            event = "administrativeRevocation",
            admin,
            serial = %serial,
            reason = reason.as_u8(),
            "certificate administratively revoked"
        );
        self.metrics.revocations.with_label_values(&["admin"]).inc();
        self.refresh_revocation_artifacts(&serial, reason).await;
        Ok(())
    }

    /// Regenerate OCSP for a freshly revoked serial and purge the CDN.
    /// Both steps are best-effort; the revocation itself already stuck.
    async fn refresh_revocation_artifacts(&self, serial: &str, reason: RevocationReason) {
        let revoked_at = self.clock.now();
        match self
            .ca
            .generate_ocsp(
                serial,
                OcspCertStatus::Revoked {
                    revoked_at,
                    reason: Some(reason),
                },
            )
            .await
        {
            Ok(_der) => {
                if let Err(e) = self.sa.set_ocsp_updated(serial, revoked_at).await {
                    tracing::warn!(serial, "recording OCSP refresh: {}", e);
                }
            }
            Err(e) => tracing::warn!(serial, "regenerating OCSP after revocation: {}", e),
        }

        let url = format!(
            "{}/{}",
            self.config.ocsp_purge_base.trim_end_matches('/'),
            serial
        );
        if let Err(e) = self.purger.purge(&[url]).await {
            tracing::warn!(serial, "OCSP cache purge failed: {}", e);
        }
    }
}
