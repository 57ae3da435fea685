//! Certificate authority: signs precertificates and final certificates,
//! and produces OCSP responses and CRL shards.
//!
//! Issuance is two-phase. The precertificate carries the critical CT
//! poison extension and goes to the logs; once the RA brings back SCTs,
//! the matching final certificate is signed with the same serial and
//! validity, the poison swapped for the SCT list. A lint pass over a
//! throwaway-signed candidate gates both phases.

pub mod crl;
pub mod goodkey;
pub mod lint;
pub mod ocsp;
pub mod profile;

use crate::clock::SharedClock;
use crate::config::CaConfig;
use crate::ctpolicy::client::{Sct, encode_sct_list};
use crate::error::{CaError, Result};
use crate::features::Features;
use crate::metrics::SharedMetrics;
use crate::sa::StorageAuthority;
use crate::types::RevocationReason;
use async_trait::async_trait;
use jiff::{Span, Timestamp};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub use goodkey::{KeyPolicy, spki_digest};
pub use profile::{CsrProfile, KeyAlgorithm, ParsedCsr};

/// CT poison (1.3.6.1.4.1.11129.2.4.3)
const OID_CT_POISON: [u64; 10] = [1, 3, 6, 1, 4, 1, 11129, 2, 4, 3];
/// SCT list (1.3.6.1.4.1.11129.2.4.2)
const OID_SCT_LIST: [u64; 10] = [1, 3, 6, 1, 4, 1, 11129, 2, 4, 2];
/// TLS feature (must-staple)
const OID_TLS_FEATURE: [u64; 9] = [1, 3, 6, 1, 5, 5, 7, 1, 24];

/// A signed precertificate, ready for CT submission
#[derive(Debug, Clone)]
pub struct Precertificate {
    pub der: Vec<u8>,
    /// Uppercase hex serial
    pub serial: String,
    pub issuer_id: i64,
    pub not_before: Timestamp,
    pub not_after: Timestamp,
}

/// The final, SCT-bearing certificate
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub der: Vec<u8>,
    pub serial: String,
    pub issuer_id: i64,
    pub not_before: Timestamp,
    pub not_after: Timestamp,
}

/// The CA surface used by the RA
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    async fn issue_precertificate(
        &self,
        csr_der: &[u8],
        order_id: i64,
        registration_id: i64,
    ) -> Result<Precertificate>;

    async fn issue_certificate_for_precertificate(
        &self,
        precert_der: &[u8],
        scts: &[Sct],
    ) -> Result<IssuedCertificate>;

    async fn generate_ocsp(
        &self,
        serial: &str,
        status: ocsp::OcspCertStatus,
    ) -> Result<Vec<u8>>;

    async fn generate_crl(
        &self,
        issuer_id: i64,
        shard_id: u32,
        this_update: Timestamp,
        entries: &[crl::CrlEntry],
    ) -> Result<Vec<u8>>;

    /// The issuer certificate chain for a given issuer id, leaf-first
    fn issuer_chain(&self, issuer_id: i64) -> Result<Vec<Vec<u8>>>;
}

/// One issuing intermediate held in memory.
///
/// The same key signs certificates through rcgen and OCSP/CRL structures
/// through the raw ECDSA signer; both are derived from one PKCS#8 blob.
pub struct Issuer {
    pub id: i64,
    pub name: String,
    /// Which subscriber key family this issuer serves
    pub serves: KeyAlgorithm,
    signer: rcgen::Issuer<'static, rcgen::KeyPair>,
    raw_signer: aws_lc_rs::signature::EcdsaKeyPair,
    public_key_der: Vec<u8>,
    cert_der: Vec<u8>,
}

impl Issuer {
    /// Generate a fresh issuer (tests and bootstrap; production loads
    /// operator-provisioned keys through the same constructor path)
    pub fn generate(id: i64, name: &str, serves: KeyAlgorithm) -> Result<Self> {
        let key_pair = rcgen::KeyPair::generate()
            .map_err(|e| CaError::internal(format!("generating issuer key: {}", e)))?;
        let pkcs8 = key_pair.serialize_der();

        let mut params = rcgen::CertificateParams::new(vec![])
            .map_err(|e| CaError::internal(format!("issuer params: {}", e)))?;
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Constrained(0));
        let mut dn = rcgen::DistinguishedName::new();
        dn.push(rcgen::DnType::CommonName, name);
        params.distinguished_name = dn;
        params.key_usages = vec![
            rcgen::KeyUsagePurpose::KeyCertSign,
            rcgen::KeyUsagePurpose::CrlSign,
            rcgen::KeyUsagePurpose::DigitalSignature,
        ];
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| CaError::internal(format!("self-signing issuer: {}", e)))?;
        let cert_der = cert.der().to_vec();
        let public_key_der = rcgen::PublicKeyData::subject_public_key_info(&key_pair);

        let raw_signer = aws_lc_rs::signature::EcdsaKeyPair::from_pkcs8(
            &aws_lc_rs::signature::ECDSA_P256_SHA256_ASN1_SIGNING,
            &pkcs8,
        )
        .map_err(|e| CaError::internal(format!("loading issuer key for OCSP: {:?}", e)))?;

        Ok(Self {
            id,
            name: name.to_string(),
            serves,
            signer: rcgen::Issuer::new(params, key_pair),
            raw_signer,
            public_key_der,
            cert_der,
        })
    }

    pub fn certificate_der(&self) -> &[u8] {
        &self.cert_der
    }
}

impl ocsp::OcspSigner for Issuer {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let rng = aws_lc_rs::rand::SystemRandom::new();
        let signature = self
            .raw_signer
            .sign(&rng, message)
            .map_err(|_| CaError::internal("signing OCSP response"))?;
        Ok(signature.as_ref().to_vec())
    }

    fn public_key_der(&self) -> Vec<u8> {
        self.public_key_der.clone()
    }

    fn subject_name_der(&self) -> Vec<u8> {
        use x509_parser::prelude::*;
        X509Certificate::from_der(&self.cert_der)
            .map(|(_, cert)| cert.subject().as_raw().to_vec())
            .unwrap_or_default()
    }
}

/// A precertificate awaiting redemption
struct PendingPrecert {
    csr: rcgen::CertificateSigningRequestParams,
    params_der_names: Vec<String>,
    common_name: String,
    issuer_index: usize,
    serial_bytes: [u8; 20],
    not_before: Timestamp,
    not_after: Timestamp,
    must_staple: bool,
    rsa_subscriber: bool,
    redeemed: bool,
}

/// The certificate authority
pub struct CertificateAuthority {
    config: CaConfig,
    features: Features,
    clock: SharedClock,
    sa: Arc<dyn StorageAuthority>,
    profile: CsrProfile,
    linter: lint::CertificateLinter,
    issuers: Vec<Issuer>,
    /// Throwaway issuer that signs lint candidates
    lint_issuer: Issuer,
    pending: Mutex<HashMap<String, PendingPrecert>>,
    metrics: SharedMetrics,
}

impl CertificateAuthority {
    pub fn new(
        config: CaConfig,
        features: Features,
        clock: SharedClock,
        sa: Arc<dyn StorageAuthority>,
        issuers: Vec<Issuer>,
        metrics: SharedMetrics,
    ) -> Result<Self> {
        if issuers.is_empty() {
            return Err(CaError::internal("at least one issuer is required"));
        }
        let profile = CsrProfile::new(config.max_names, KeyPolicy::new(config.fermat_rounds));
        let linter = lint::CertificateLinter::new(
            &config.ignored_lints,
            lint::ExpectedProfile {
                validity_periods_secs: config.validity_periods_secs.clone(),
                max_names: config.max_names,
            },
        );
        let lint_issuer = Issuer::generate(-1, "lint sink", KeyAlgorithm::Ecdsa)?;
        Ok(Self {
            config,
            features,
            clock,
            sa,
            profile,
            linter,
            issuers,
            lint_issuer,
            pending: Mutex::new(HashMap::new()),
            metrics,
        })
    }

    fn pick_issuer(&self, key: KeyAlgorithm, registration_id: i64) -> Result<usize> {
        let want = match key {
            KeyAlgorithm::Ecdsa
                if self.features.ecdsa_for_all
                    || self.config.ecdsa_allowed_accounts.contains(&registration_id) =>
            {
                KeyAlgorithm::Ecdsa
            }
            _ => KeyAlgorithm::Rsa,
        };
        self.issuers
            .iter()
            .position(|issuer| issuer.serves == want)
            .or_else(|| {
                // an ECDSA-eligible request can still be served by the
                // RSA issuer pool, never the other way around
                (want == KeyAlgorithm::Ecdsa)
                    .then(|| {
                        self.issuers
                            .iter()
                            .position(|issuer| issuer.serves == KeyAlgorithm::Rsa)
                    })
                    .flatten()
            })
            .ok_or_else(|| CaError::internal("no issuer available for this key type"))
    }

    fn new_serial(&self) -> Result<[u8; 20]> {
        use rand::Rng;
        let mut serial = [0u8; 20];
        serial[0] = self.config.serial_prefix_byte()?;
        rand::rng().fill_bytes(&mut serial[1..]);
        Ok(serial)
    }

    /// Certificate params shared by the precertificate and the final
    /// certificate; only the CT extension differs.
    fn leaf_params(&self, pending: &PendingPrecert) -> Result<rcgen::CertificateParams> {
        let mut params = rcgen::CertificateParams::new(pending.params_der_names.clone())
            .map_err(|e| CaError::internal(format!("leaf params: {}", e)))?;
        let mut dn = rcgen::DistinguishedName::new();
        dn.push(rcgen::DnType::CommonName, pending.common_name.clone());
        params.distinguished_name = dn;
        params.serial_number = Some(rcgen::SerialNumber::from(pending.serial_bytes.to_vec()));
        params.not_before = time::OffsetDateTime::from_unix_timestamp(pending.not_before.as_second())
            .map_err(|e| CaError::internal(format!("notBefore: {}", e)))?;
        params.not_after = time::OffsetDateTime::from_unix_timestamp(pending.not_after.as_second())
            .map_err(|e| CaError::internal(format!("notAfter: {}", e)))?;
        params.use_authority_key_identifier_extension = true;
        params.key_usages = if pending.rsa_subscriber {
            vec![
                rcgen::KeyUsagePurpose::DigitalSignature,
                rcgen::KeyUsagePurpose::KeyEncipherment,
            ]
        } else {
            vec![rcgen::KeyUsagePurpose::DigitalSignature]
        };
        params.extended_key_usages = vec![
            rcgen::ExtendedKeyUsagePurpose::ServerAuth,
            rcgen::ExtendedKeyUsagePurpose::ClientAuth,
        ];
        let issuer = &self.issuers[pending.issuer_index];
        let shard = pending.serial_bytes[19] as u32 % self.config.crl_shards;
        params.crl_distribution_points = vec![rcgen::CrlDistributionPoint {
            uris: vec![format!(
                "{}/{}/{}.crl",
                self.config.crldp_base.trim_end_matches('/'),
                issuer.id,
                shard
            )],
        }];
        if pending.must_staple {
            params.custom_extensions.push(
                rcgen::CustomExtension::from_oid_content(
                    &OID_TLS_FEATURE,
                    profile::MUST_STAPLE_DER.to_vec(),
                ),
            );
        }
        Ok(params)
    }

    fn sign_leaf(
        &self,
        params: &rcgen::CertificateParams,
        pending: &PendingPrecert,
        lint_only: bool,
    ) -> Result<Vec<u8>> {
        let issuer = if lint_only {
            &self.lint_issuer
        } else {
            &self.issuers[pending.issuer_index]
        };
        let cert = params
            .clone()
            .signed_by(&pending.csr.public_key, &issuer.signer)
            .map_err(|e| CaError::internal(format!("signing leaf: {}", e)))?;
        Ok(cert.der().to_vec())
    }

    fn validity_window(&self, now: Timestamp) -> Result<(Timestamp, Timestamp)> {
        let not_before = now
            .checked_sub(Span::new().seconds(self.config.backdate_secs as i64))
            .map_err(|e| CaError::internal(format!("computing notBefore: {}", e)))?;
        // the final second of notAfter is inclusive
        let validity = self.config.validity_periods_secs[0];
        let not_after = not_before
            .checked_add(Span::new().seconds(validity as i64 - 1))
            .map_err(|e| CaError::internal(format!("computing notAfter: {}", e)))?;
        Ok((not_before, not_after))
    }
}

#[async_trait]
impl CertificateIssuer for CertificateAuthority {
    async fn issue_precertificate(
        &self,
        csr_der: &[u8],
        order_id: i64,
        registration_id: i64,
    ) -> Result<Precertificate> {
        let parsed = self.profile.parse_and_check(csr_der)?;

        let digest = spki_digest(&parsed.spki_der);
        if self.sa.key_blocked(&digest).await? {
            return Err(CaError::bad_public_key(
                "public key is on the blocked key list",
            ));
        }

        let issuer_index = self.pick_issuer(parsed.key_algorithm, registration_id)?;
        let serial_bytes = self.new_serial()?;
        let serial = hex::encode_upper(serial_bytes);
        let now = self.clock.now();
        let (not_before, not_after) = self.validity_window(now)?;

        let csr_der_owned = rustls_pki_types::CertificateSigningRequestDer::from(csr_der.to_vec());
        let csr = rcgen::CertificateSigningRequestParams::from_der(&csr_der_owned)
            .map_err(|e| CaError::bad_csr(format!("re-parsing CSR for signing: {}", e)))?;

        let pending = PendingPrecert {
            csr,
            params_der_names: parsed.names.clone(),
            common_name: parsed.common_name.clone(),
            issuer_index,
            serial_bytes,
            not_before,
            not_after,
            must_staple: parsed.must_staple,
            rsa_subscriber: parsed.key_algorithm == KeyAlgorithm::Rsa,
            redeemed: false,
        };

        let mut params = self.leaf_params(&pending)?;
        let mut poison =
            rcgen::CustomExtension::from_oid_content(&OID_CT_POISON, vec![0x05, 0x00]);
        poison.set_criticality(true);
        params.custom_extensions.push(poison);

        // lint gate runs against a throwaway-signed twin of the final form
        let lint_candidate = self.sign_leaf(&params, &pending, true)?;
        self.linter.check(&lint_candidate)?;

        let der = self.sign_leaf(&params, &pending, false)?;
        let issuer_id = self.issuers[issuer_index].id;

        tracing::info!(
            order = order_id,
            registration = registration_id,
            serial = %serial,
            issuer = issuer_id,
            "issued precertificate"
        );
        self.pending
            .lock()
            .expect("precert registry poisoned")
            .insert(serial.clone(), pending);

        Ok(Precertificate {
            der,
            serial,
            issuer_id,
            not_before,
            not_after,
        })
    }

    async fn issue_certificate_for_precertificate(
        &self,
        precert_der: &[u8],
        scts: &[Sct],
    ) -> Result<IssuedCertificate> {
        use x509_parser::prelude::*;

        if scts.is_empty() {
            return Err(CaError::missing_scts(
                "refusing to issue a final certificate with no SCTs",
            ));
        }
        let (_, parsed) = X509Certificate::from_der(precert_der)
            .map_err(|e| CaError::internal(format!("parsing precertificate: {}", e)))?;
        let serial = hex::encode_upper(parsed.raw_serial());

        let mut registry = self.pending.lock().expect("precert registry poisoned");
        let pending = registry.get_mut(&serial).ok_or_else(|| {
            CaError::not_found(format!("no precertificate with serial {}", serial))
        })?;
        if pending.redeemed {
            return Err(CaError::malformed(format!(
                "precertificate {} was already redeemed",
                serial
            )));
        }
        let issuer_id = self.issuers[pending.issuer_index].id;
        let not_before = pending.not_before;
        let not_after = pending.not_after;
        let mut params = self.leaf_params(pending)?;
        let sct_ext_value = {
            let tls_list = encode_sct_list(scts);
            let mut wrapped = vec![0x04];
            wrapped.extend(ocsp_der_len(tls_list.len()));
            wrapped.extend(tls_list);
            wrapped
        };
        params
            .custom_extensions
            .push(rcgen::CustomExtension::from_oid_content(
                &OID_SCT_LIST,
                sct_ext_value,
            ));
        let der = self.sign_leaf(&params, pending, false)?;
        pending.redeemed = true;
        let key_type = if pending.rsa_subscriber { "rsa" } else { "ecdsa" };
        drop(registry);

        self.metrics.issuances.with_label_values(&[key_type]).inc();
        tracing::info!(serial = %serial, issuer = issuer_id, scts = scts.len(), "issued final certificate");

        Ok(IssuedCertificate {
            der,
            serial,
            issuer_id,
            not_before,
            not_after,
        })
    }

    async fn generate_ocsp(
        &self,
        serial: &str,
        status: ocsp::OcspCertStatus,
    ) -> Result<Vec<u8>> {
        let cert = self.sa.get_certificate(serial).await?;
        let now = self.clock.now();
        if cert.not_after < now {
            return Err(CaError::not_found(format!(
                "serial {} is expired; no OCSP will be produced",
                serial
            )));
        }
        let issuer = self
            .issuers
            .iter()
            .find(|issuer| issuer.id == cert.issuer_id)
            .ok_or_else(|| CaError::internal(format!("unknown issuer {}", cert.issuer_id)))?;
        let detail = ocsp::OcspRequestDetail {
            serial: hex::decode(serial)
                .map_err(|e| CaError::malformed(format!("bad serial: {}", e)))?,
            status,
            this_update: now,
            next_update: now
                .checked_add(Span::new().seconds(self.config.ocsp_lifetime_secs as i64))
                .map_err(|e| CaError::internal(format!("computing nextUpdate: {}", e)))?,
        };
        ocsp::build_response(&detail, issuer)
    }

    async fn generate_crl(
        &self,
        issuer_id: i64,
        shard_id: u32,
        this_update: Timestamp,
        entries: &[crl::CrlEntry],
    ) -> Result<Vec<u8>> {
        if shard_id >= self.config.crl_shards {
            return Err(CaError::malformed(format!(
                "shard {} out of range (configured {})",
                shard_id, self.config.crl_shards
            )));
        }
        let issuer = self
            .issuers
            .iter()
            .find(|issuer| issuer.id == issuer_id)
            .ok_or_else(|| CaError::not_found(format!("unknown issuer {}", issuer_id)))?;
        let next_update = this_update
            .checked_add(Span::new().seconds(self.config.crl_lifetime_secs as i64))
            .map_err(|e| CaError::internal(format!("computing nextUpdate: {}", e)))?;
        crl::build_crl(&issuer.signer, this_update, next_update, entries)
    }

    fn issuer_chain(&self, issuer_id: i64) -> Result<Vec<Vec<u8>>> {
        self.issuers
            .iter()
            .find(|issuer| issuer.id == issuer_id)
            .map(|issuer| vec![issuer.cert_der.clone()])
            .ok_or_else(|| CaError::not_found(format!("unknown issuer {}", issuer_id)))
    }
}

/// DER length encoding, shared with the OCSP module's emitters
fn ocsp_der_len(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    let mut out = vec![0x80 | (bytes.len() - skip) as u8];
    out.extend_from_slice(&bytes[skip..]);
    out
}
