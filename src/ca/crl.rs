/// CRL shard construction over rcgen.
use crate::error::{CaError, Result};
use crate::types::RevocationReason;
use jiff::Timestamp;

/// One revoked serial destined for a shard
#[derive(Debug, Clone)]
pub struct CrlEntry {
    /// Raw serial bytes
    pub serial: Vec<u8>,
    pub revoked_at: Timestamp,
    pub reason: Option<RevocationReason>,
}

fn to_offset(at: Timestamp) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(at.as_second())
        .map_err(|e| CaError::internal(format!("timestamp out of range: {}", e)))
}

fn reason_code(reason: RevocationReason) -> rcgen::RevocationReason {
    use rcgen::RevocationReason as R;
    match reason {
        RevocationReason::Unspecified => R::Unspecified,
        RevocationReason::KeyCompromise => R::KeyCompromise,
        RevocationReason::CaCompromise => R::CaCompromise,
        RevocationReason::AffiliationChanged => R::AffiliationChanged,
        RevocationReason::Superseded => R::Superseded,
        RevocationReason::CessationOfOperation => R::CessationOfOperation,
        RevocationReason::CertificateHold => R::CertificateHold,
        RevocationReason::RemoveFromCrl => R::RemoveFromCrl,
        RevocationReason::PrivilegeWithdrawn => R::PrivilegeWithdrawn,
        RevocationReason::AaCompromise => R::AaCompromise,
    }
}

/// Sign one CRL shard. The CRL number is derived from thisUpdate so a
/// regenerated shard always supersedes its predecessor.
pub fn build_crl(
    issuer: &rcgen::Issuer<'static, rcgen::KeyPair>,
    this_update: Timestamp,
    next_update: Timestamp,
    entries: &[CrlEntry],
) -> Result<Vec<u8>> {
    if next_update <= this_update {
        return Err(CaError::internal("CRL nextUpdate precedes thisUpdate"));
    }

    let revoked_certs = entries
        .iter()
        .map(|entry| {
            Ok(rcgen::RevokedCertParams {
                serial_number: rcgen::SerialNumber::from(entry.serial.clone()),
                revocation_time: to_offset(entry.revoked_at)?,
                reason_code: entry.reason.map(reason_code),
                invalidity_date: None,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let params = rcgen::CertificateRevocationListParams {
        this_update: to_offset(this_update)?,
        next_update: to_offset(next_update)?,
        crl_number: rcgen::SerialNumber::from(this_update.as_second() as u64),
        issuing_distribution_point: None,
        revoked_certs,
        key_identifier_method: rcgen::KeyIdMethod::Sha256,
    };
    let crl = params
        .signed_by(issuer)
        .map_err(|e| CaError::internal(format!("signing CRL: {}", e)))?;
    Ok(crl.der().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> rcgen::Issuer<'static, rcgen::KeyPair> {
        let mut params = rcgen::CertificateParams::new(vec![]).unwrap();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let mut dn = rcgen::DistinguishedName::new();
        dn.push(rcgen::DnType::CommonName, "crl test issuer");
        params.distinguished_name = dn;
        params
            .key_usages
            .push(rcgen::KeyUsagePurpose::CrlSign);
        let key = rcgen::KeyPair::generate().unwrap();
        rcgen::Issuer::new(params, key)
    }

    #[test]
    fn builds_signed_shard() {
        let this_update: Timestamp = "2025-06-01T00:00:00Z".parse().unwrap();
        let next_update: Timestamp = "2025-06-09T00:00:00Z".parse().unwrap();
        let entries = vec![CrlEntry {
            serial: vec![0x7F; 20],
            revoked_at: this_update,
            reason: Some(RevocationReason::KeyCompromise),
        }];
        let der = build_crl(&issuer(), this_update, next_update, &entries).unwrap();
        assert_eq!(der[0], 0x30);
        assert!(der.len() > 100);
    }

    #[test]
    fn empty_shard_is_fine() {
        let this_update: Timestamp = "2025-06-01T00:00:00Z".parse().unwrap();
        let next_update: Timestamp = "2025-06-09T00:00:00Z".parse().unwrap();
        assert!(build_crl(&issuer(), this_update, next_update, &[]).is_ok());
    }

    #[test]
    fn rejects_inverted_window() {
        let this_update: Timestamp = "2025-06-01T00:00:00Z".parse().unwrap();
        assert!(build_crl(&issuer(), this_update, this_update, &[]).is_err());
    }
}
