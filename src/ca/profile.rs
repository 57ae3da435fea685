//! CSR profile gates applied before any signing happens.
use crate::ca::goodkey::KeyPolicy;
use crate::error::{CaError, Result};
use crate::types::sorted_unique_names;
use x509_parser::prelude::*;

/// Longest CommonName the subject may carry, in bytes
pub const MAX_CN_BYTES: usize = 64;

/// DER value of a must-staple TLS-feature extension: SEQUENCE { INTEGER 5 }
pub const MUST_STAPLE_DER: [u8; 5] = [0x30, 0x03, 0x02, 0x01, 0x05];

/// OIDs of extensions a CSR may request
const OID_SAN: &str = "2.5.29.17";
const OID_TLS_FEATURE: &str = "1.3.6.1.5.5.7.1.24";
/// Requested extensions we recognize and deliberately ignore
const IGNORED_CSR_EXTENSIONS: [&str; 4] = [
    "2.5.29.15",         // keyUsage
    "2.5.29.37",         // extendedKeyUsage
    "2.5.29.19",         // basicConstraints
    "2.5.29.14",         // subjectKeyIdentifier
];

/// Signature algorithms a CSR may be signed with (SHA-256 or better)
const ALLOWED_SIG_ALGS: [&str; 6] = [
    "1.2.840.113549.1.1.11", // sha256WithRSAEncryption
    "1.2.840.113549.1.1.12", // sha384WithRSAEncryption
    "1.2.840.113549.1.1.13", // sha512WithRSAEncryption
    "1.2.840.10045.4.3.2",   // ecdsa-with-SHA256
    "1.2.840.10045.4.3.3",   // ecdsa-with-SHA384
    "1.2.840.10045.4.3.4",   // ecdsa-with-SHA512
];

/// The key family a CSR carries, used for issuer selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    Ecdsa,
}

/// A CSR that has passed every profile gate
#[derive(Debug, Clone)]
pub struct ParsedCsr {
    /// SAN DNS names plus the CN, canonicalized, sorted, deduplicated
    pub names: Vec<String>,
    /// The subject CN: taken from the CSR, or the first short-enough name
    pub common_name: String,
    /// Raw SubjectPublicKeyInfo DER
    pub spki_der: Vec<u8>,
    pub key_algorithm: KeyAlgorithm,
    /// Whether the certificate must carry the OCSP must-staple feature
    pub must_staple: bool,
}

/// Validates CSR structure, names, and key against the issuance profile
pub struct CsrProfile {
    max_names: usize,
    key_policy: KeyPolicy,
}

impl CsrProfile {
    pub fn new(max_names: usize, key_policy: KeyPolicy) -> Self {
        Self {
            max_names,
            key_policy,
        }
    }

    pub fn parse_and_check(&self, csr_der: &[u8]) -> Result<ParsedCsr> {
        let (rest, csr) = X509CertificationRequest::from_der(csr_der)
            .map_err(|e| CaError::bad_csr(format!("parsing CSR: {}", e)))?;
        if !rest.is_empty() {
            return Err(CaError::bad_csr("trailing bytes after CSR"));
        }

        let sig_oid = csr.signature_algorithm.algorithm.to_id_string();
        if !ALLOWED_SIG_ALGS.contains(&sig_oid.as_str()) {
            return Err(CaError::bad_csr(format!(
                "CSR signature algorithm {} is weaker than SHA-256",
                sig_oid
            )));
        }
        csr.verify_signature()
            .map_err(|e| CaError::bad_csr(format!("CSR signature does not verify: {}", e)))?;

        let info = &csr.certification_request_info;

        // subject: at most one CN, bounded length
        let mut cn_iter = info.subject.iter_common_name();
        let csr_cn = match cn_iter.next() {
            Some(cn) => Some(
                cn.as_str()
                    .map_err(|_| CaError::bad_csr("CommonName is not a string"))?
                    .to_ascii_lowercase(),
            ),
            None => None,
        };
        if cn_iter.next().is_some() {
            return Err(CaError::bad_csr("subject has more than one CommonName"));
        }
        if let Some(cn) = &csr_cn
            && cn.len() > MAX_CN_BYTES
        {
            return Err(CaError::bad_csr(format!(
                "CommonName is {} bytes; the limit is {}",
                cn.len(),
                MAX_CN_BYTES
            )));
        }

        let (san_names, must_staple) = self.requested_extensions(&csr)?;
        let mut names = san_names;
        if let Some(cn) = &csr_cn {
            names.push(cn.clone());
        }
        let names = sorted_unique_names(&names);
        if names.is_empty() {
            return Err(CaError::bad_csr("CSR contains no DNS identifiers"));
        }
        if names.len() > self.max_names {
            return Err(CaError::bad_csr(format!(
                "CSR contains {} identifiers; the limit is {}",
                names.len(),
                self.max_names
            )));
        }

        // something has to be short enough to serve as the CN
        let common_name = match csr_cn {
            Some(cn) => {
                if !names.contains(&cn) {
                    return Err(CaError::bad_csr(
                        "CommonName does not appear in the SAN set",
                    ));
                }
                cn
            }
            None => names
                .iter()
                .find(|name| name.len() <= MAX_CN_BYTES)
                .cloned()
                .ok_or_else(|| {
                    CaError::bad_csr(format!(
                        "every name exceeds {} bytes; none can be the CommonName",
                        MAX_CN_BYTES
                    ))
                })?,
        };

        let spki = &info.subject_pki;
        self.key_policy.check(spki)?;
        let key_algorithm = match spki.algorithm.algorithm.to_id_string().as_str() {
            "1.2.840.113549.1.1.1" => KeyAlgorithm::Rsa,
            _ => KeyAlgorithm::Ecdsa,
        };

        Ok(ParsedCsr {
            names,
            common_name,
            spki_der: spki.raw.to_vec(),
            key_algorithm,
            must_staple,
        })
    }

    /// Walk the requested extensions: collect SAN DNS names, accept a
    /// well-formed must-staple, reject anything unrecognized.
    fn requested_extensions(
        &self,
        csr: &X509CertificationRequest<'_>,
    ) -> Result<(Vec<String>, bool)> {
        let mut names = Vec::new();
        let mut must_staple = false;

        for attribute in csr.certification_request_info.iter_attributes() {
            let ParsedCriAttribute::ExtensionRequest(request) = attribute.parsed_attribute()
            else {
                continue;
            };
            for extension in &request.extensions {
                let oid = extension.oid.to_id_string();
                match oid.as_str() {
                    OID_SAN => {
                        let ParsedExtension::SubjectAlternativeName(san) =
                            extension.parsed_extension()
                        else {
                            return Err(CaError::bad_csr("malformed subjectAltName"));
                        };
                        for general_name in &san.general_names {
                            match general_name {
                                GeneralName::DNSName(dns) => {
                                    names.push(dns.to_ascii_lowercase());
                                }
                                other => {
                                    return Err(CaError::bad_csr(format!(
                                        "subjectAltName contains a non-DNS entry: {:?}",
                                        other
                                    )));
                                }
                            }
                        }
                    }
                    OID_TLS_FEATURE => {
                        if extension.value != MUST_STAPLE_DER {
                            return Err(CaError::bad_csr(
                                "TLS-feature extension requests something other than must-staple",
                            ));
                        }
                        must_staple = true;
                    }
                    recognized if IGNORED_CSR_EXTENSIONS.contains(&recognized) => {}
                    unrecognized => {
                        return Err(CaError::bad_csr(format!(
                            "CSR requests unrecognized extension {}",
                            unrecognized
                        )));
                    }
                }
            }
        }
        Ok((names, must_staple))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> CsrProfile {
        CsrProfile::new(100, KeyPolicy::new(10))
    }

    fn csr_for(names: &[&str], cn: Option<&str>) -> Vec<u8> {
        let mut params =
            rcgen::CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
                .unwrap();
        let mut dn = rcgen::DistinguishedName::new();
        if let Some(cn) = cn {
            dn.push(rcgen::DnType::CommonName, cn);
        }
        params.distinguished_name = dn;
        let key_pair = rcgen::KeyPair::generate().unwrap();
        params.serialize_request(&key_pair).unwrap().der().to_vec()
    }

    #[test]
    fn accepts_plain_csr() {
        let der = csr_for(&["b.example.com", "a.example.com"], Some("a.example.com"));
        let parsed = profile().parse_and_check(&der).unwrap();
        assert_eq!(parsed.names, vec!["a.example.com", "b.example.com"]);
        assert_eq!(parsed.common_name, "a.example.com");
        assert!(!parsed.must_staple);
        assert_eq!(parsed.key_algorithm, KeyAlgorithm::Ecdsa);
    }

    #[test]
    fn cn_must_be_in_san() {
        let der = csr_for(&["a.example.com"], Some("elsewhere.example.com"));
        let err = profile().parse_and_check(&der).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BadCsr);
    }

    #[test]
    fn cn_length_boundary() {
        // 64-byte CN is accepted, 65 is not
        let label = "a".repeat(52);
        let cn_64 = format!("{}.example.com", label); // 52 + 12 = 64
        assert_eq!(cn_64.len(), 64);
        let der = csr_for(&[cn_64.as_str()], Some(cn_64.as_str()));
        assert!(profile().parse_and_check(&der).is_ok());

        let label = "a".repeat(53);
        let cn_65 = format!("{}.example.com", label);
        assert_eq!(cn_65.len(), 65);
        let der = csr_for(&[cn_65.as_str()], Some(cn_65.as_str()));
        assert!(profile().parse_and_check(&der).is_err());
    }

    #[test]
    fn picks_a_short_name_when_cn_absent() {
        let long = format!("{}.example.com", "a".repeat(60));
        let der = csr_for(&[long.as_str(), "short.example.com"], None);
        let parsed = profile().parse_and_check(&der).unwrap();
        assert_eq!(parsed.common_name, "short.example.com");
    }

    #[test]
    fn name_count_limit() {
        let names: Vec<String> = (0..3).map(|i| format!("n{}.example.com", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let der = csr_for(&refs, None);
        let tight = CsrProfile::new(2, KeyPolicy::new(10));
        assert!(tight.parse_and_check(&der).is_err());
        assert!(CsrProfile::new(3, KeyPolicy::new(10)).parse_and_check(&der).is_ok());
    }
}
