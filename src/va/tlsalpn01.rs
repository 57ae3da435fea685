/// TLS-ALPN-01 challenge verification.
///
/// The probe negotiates `acme-tls/1` on port 443 and inspects the leaf
/// certificate itself; the usual chain verification is bypassed because
/// the subscriber presents a throwaway self-signed certificate whose only
/// job is carrying the acmeIdentifier extension.
use crate::config::VaConfig;
use crate::error::{CaError, Result};
use crate::features::Features;
use crate::types::ValidationRecord;
use crate::va::resolver::DnsResolver;
use rustls::pki_types::ServerName;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

/// id-pe-acmeIdentifier
const ACME_IDENTIFIER_OID: &str = "1.3.6.1.5.5.7.1.31";
const ALPN_PROTOCOL: &[u8] = b"acme-tls/1";
const TLS_PORT: u16 = 443;

pub struct TlsAlpn01Verifier {
    resolver: Arc<dyn DnsResolver>,
    config: VaConfig,
    features: Features,
}

impl TlsAlpn01Verifier {
    pub fn new(resolver: Arc<dyn DnsResolver>, config: VaConfig, features: Features) -> Self {
        Self {
            resolver,
            config,
            features,
        }
    }

    pub async fn verify(
        &self,
        domain: &str,
        expected_key_authorization: &str,
    ) -> (Vec<ValidationRecord>, Result<()>) {
        let mut record = ValidationRecord {
            hostname: domain.to_string(),
            addresses_resolved: vec![],
            address_used: None,
            url: format!("{}:{}", domain, TLS_PORT),
            port: TLS_PORT,
            response_codes: vec![],
        };

        let ips = match self.resolver.lookup_ips(domain).await {
            Ok(ips) => ips,
            Err(e) => return (vec![record], Err(e)),
        };
        record.addresses_resolved = ips.clone();
        if let Some(reserved) = ips
            .iter()
            .find(|ip| super::http01::address_is_reserved(**ip) && !self.features.allow_internal_addresses)
        {
            return (
                vec![record],
                Err(CaError::connection(format!(
                    "{} resolves to reserved address {}",
                    domain, reserved
                ))),
            );
        }
        let address = ips[0];
        record.address_used = Some(address);

        let outcome = tokio::time::timeout(
            Duration::from_secs(self.config.validation_timeout_secs),
            self.probe(domain, address, expected_key_authorization),
        )
        .await
        .unwrap_or_else(|_| {
            Err(CaError::connection(format!(
                "timeout connecting to {}:{}",
                domain, TLS_PORT
            )))
        });
        (vec![record], outcome)
    }

    async fn probe(
        &self,
        domain: &str,
        address: std::net::IpAddr,
        expected_key_authorization: &str,
    ) -> Result<()> {
        let mut tls_config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert::new()))
            .with_no_client_auth();
        tls_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

        let connector = TlsConnector::from(Arc::new(tls_config));
        let stream = TcpStream::connect((address, TLS_PORT))
            .await
            .map_err(|e| {
                CaError::connection(format!("connecting to {} ({}): {}", domain, address, e))
            })?;
        let server_name = ServerName::try_from(domain.to_string())
            .map_err(|_| CaError::malformed(format!("\"{}\" is not a valid SNI name", domain)))?;
        let tls = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| CaError::connection(format!("TLS handshake with {}: {}", domain, e)))?;

        let (_, session) = tls.get_ref();
        if session.alpn_protocol() != Some(ALPN_PROTOCOL) {
            return Err(CaError::unauthorized(format!(
                "{} did not negotiate the acme-tls/1 protocol",
                domain
            )));
        }
        let Some(certs) = session.peer_certificates() else {
            return Err(CaError::unauthorized(format!(
                "{} presented no certificate",
                domain
            )));
        };
        if certs.len() != 1 {
            return Err(CaError::unauthorized(format!(
                "{} presented a chain of {} certificates; expected a single self-signed leaf",
                domain,
                certs.len()
            )));
        }
        check_validation_cert(certs[0].as_ref(), domain, expected_key_authorization)
    }
}

/// Inspect the DER of a TLS-ALPN-01 validation certificate.
pub fn check_validation_cert(
    der: &[u8],
    domain: &str,
    expected_key_authorization: &str,
) -> Result<()> {
    use x509_parser::prelude::*;

    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| CaError::unauthorized(format!("parsing validation certificate: {}", e)))?;

    let sans: Vec<String> = cert
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
    if sans.len() != 1 || sans[0] != domain {
        return Err(CaError::unauthorized(format!(
            "validation certificate must name exactly [{}], got {:?}",
            domain, sans
        )));
    }

    let mut digest = Sha256::new();
    digest.update(expected_key_authorization.as_bytes());
    let expected: [u8; 32] = digest.finalize().into();
    // the extension value is an OCTET STRING wrapping the digest
    let mut expected_der = vec![0x04, 0x20];
    expected_der.extend_from_slice(&expected);

    for ext in cert.extensions() {
        if ext.oid.to_id_string() == ACME_IDENTIFIER_OID {
            if !ext.critical {
                return Err(CaError::unauthorized(
                    "acmeIdentifier extension must be critical",
                ));
            }
            if ext.value == expected_der.as_slice() {
                return Ok(());
            }
            return Err(CaError::unauthorized(
                "acmeIdentifier extension does not match the key authorization digest",
            ));
        }
    }
    Err(CaError::unauthorized(format!(
        "validation certificate for {} has no acmeIdentifier extension",
        domain
    )))
}

/// Verifier that accepts whatever the subscriber presents; the challenge
/// logic does its own inspection of the leaf.
#[derive(Debug)]
struct AcceptAnyCert {
    schemes: Vec<rustls::SignatureScheme>,
}

impl AcceptAnyCert {
    fn new() -> Self {
        Self {
            schemes: rustls::crypto::aws_lc_rs::default_provider()
                .signature_verification_algorithms
                .supported_schemes(),
        }
    }
}

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.schemes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::key_authorization_digest;

    /// Build the self-signed certificate a compliant subscriber would serve
    fn validation_cert(domain: &str, key_authorization: &str) -> Vec<u8> {
        let mut digest = Sha256::new();
        digest.update(key_authorization.as_bytes());
        let hash: [u8; 32] = digest.finalize().into();
        let mut value = vec![0x04, 0x20];
        value.extend_from_slice(&hash);

        let mut params = rcgen::CertificateParams::new(vec![domain.to_string()]).unwrap();
        let mut ext = rcgen::CustomExtension::from_oid_content(&[1, 3, 6, 1, 5, 5, 7, 1, 31], value);
        ext.set_criticality(true);
        params.custom_extensions.push(ext);
        let key_pair = rcgen::KeyPair::generate().unwrap();
        params.self_signed(&key_pair).unwrap().der().to_vec()
    }

    #[test]
    fn accepts_compliant_cert() {
        let key_authz = "token.thumbprint";
        let der = validation_cert("a.example.com", key_authz);
        assert!(check_validation_cert(&der, "a.example.com", key_authz).is_ok());
    }

    #[test]
    fn rejects_wrong_digest() {
        let der = validation_cert("a.example.com", "token.other-thumbprint");
        let err = check_validation_cert(&der, "a.example.com", "token.thumbprint").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unauthorized);
    }

    #[test]
    fn rejects_wrong_name() {
        let der = validation_cert("b.example.com", "token.thumbprint");
        assert!(check_validation_cert(&der, "a.example.com", "token.thumbprint").is_err());
    }

    #[test]
    fn rejects_missing_extension() {
        let mut params = rcgen::CertificateParams::new(vec!["a.example.com".to_string()]).unwrap();
        params.distinguished_name = rcgen::DistinguishedName::new();
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let der = params.self_signed(&key_pair).unwrap().der().to_vec();
        assert!(check_validation_cert(&der, "a.example.com", "token.thumbprint").is_err());
    }

    #[test]
    fn digest_helper_matches_extension_content() {
        // the TXT digest helper and the ALPN extension share the same hash
        let digest = key_authorization_digest("token.thumbprint");
        assert_eq!(digest.len(), 43);
    }
}
