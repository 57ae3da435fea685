//! RFC 6960 OCSP response construction.
//!
//! Responses are assembled as DER directly: the structure is small and
//! fixed (one SingleResponse, SHA-256 CertID, byKey responder), and no
//! crate in our stack emits BasicOCSPResponse. The emit helpers below
//! cover exactly the subset of DER this module needs.

use crate::error::{CaError, Result};
use crate::types::RevocationReason;
use jiff::Timestamp;
use sha2::{Digest, Sha256};

/// OID sha256 (2.16.840.1.101.3.4.2.1), pre-encoded
const OID_SHA256: &[u8] = &[0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];
/// OID ecdsa-with-SHA256 (1.2.840.10045.4.3.2), pre-encoded
const OID_ECDSA_SHA256: &[u8] = &[0x06, 0x08, 0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x02];
/// OID id-pkix-ocsp-basic (1.3.6.1.5.5.7.48.1.1), pre-encoded
const OID_OCSP_BASIC: &[u8] = &[0x06, 0x09, 0x2B, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x01, 0x01];

/// The status the response asserts for the certificate
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OcspCertStatus {
    Good,
    Revoked {
        revoked_at: Timestamp,
        reason: Option<RevocationReason>,
    },
}

/// Everything needed to build and sign one response
pub struct OcspRequestDetail {
    /// Serial as raw bytes (big-endian, no sign padding needed)
    pub serial: Vec<u8>,
    pub status: OcspCertStatus,
    pub this_update: Timestamp,
    pub next_update: Timestamp,
}

// -- DER emit helpers --

fn der_len(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    let mut out = vec![0x80 | (bytes.len() - skip) as u8];
    out.extend_from_slice(&bytes[skip..]);
    out
}

fn der_tagged(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend(der_len(content.len()));
    out.extend_from_slice(content);
    out
}

fn der_sequence(content: &[u8]) -> Vec<u8> {
    der_tagged(0x30, content)
}

fn der_octet_string(content: &[u8]) -> Vec<u8> {
    der_tagged(0x04, content)
}

fn der_integer(bytes: &[u8]) -> Vec<u8> {
    let trimmed: &[u8] = {
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        if skip == bytes.len() { &[0] } else { &bytes[skip..] }
    };
    let mut content = Vec::with_capacity(trimmed.len() + 1);
    if trimmed[0] & 0x80 != 0 {
        content.push(0);
    }
    content.extend_from_slice(trimmed);
    der_tagged(0x02, &content)
}

fn der_enumerated(value: u8) -> Vec<u8> {
    der_tagged(0x0A, &[value])
}

fn der_null() -> Vec<u8> {
    vec![0x05, 0x00]
}

fn der_bit_string(content: &[u8]) -> Vec<u8> {
    let mut inner = vec![0u8];
    inner.extend_from_slice(content);
    der_tagged(0x03, &inner)
}

fn der_generalized_time(at: Timestamp) -> Vec<u8> {
    let formatted = at.strftime("%Y%m%d%H%M%SZ").to_string();
    der_tagged(0x18, formatted.as_bytes())
}

/// AlgorithmIdentifier ::= SEQUENCE { algorithm OID, parameters NULL? }
fn algorithm_identifier(oid: &[u8], with_null_params: bool) -> Vec<u8> {
    let mut content = oid.to_vec();
    if with_null_params {
        content.extend(der_null());
    }
    der_sequence(&content)
}

/// Signer abstraction: the CA issuer provides the raw signature bytes
pub trait OcspSigner {
    /// ECDSA P-256 signature (ASN.1 DER form) over the message
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
    /// The issuer's SubjectPublicKeyInfo DER, for the byKey responder id
    fn public_key_der(&self) -> Vec<u8>;
    /// The issuer certificate's subject name DER, for the CertID name hash
    fn subject_name_der(&self) -> Vec<u8>;
}

/// Build and sign a BasicOCSPResponse wrapped in an OCSPResponse.
pub fn build_response(detail: &OcspRequestDetail, signer: &dyn OcspSigner) -> Result<Vec<u8>> {
    if detail.next_update <= detail.this_update {
        return Err(CaError::internal("nextUpdate precedes thisUpdate"));
    }

    // CertID: SHA-256 of issuer name and issuer public key
    let name_hash: [u8; 32] = Sha256::digest(signer.subject_name_der()).into();
    let spki = signer.public_key_der();
    let key_bits = extract_spki_key_bits(&spki)?;
    let key_hash: [u8; 32] = Sha256::digest(key_bits).into();

    let mut cert_id = algorithm_identifier(OID_SHA256, true);
    cert_id.extend(der_octet_string(&name_hash));
    cert_id.extend(der_octet_string(&key_hash));
    cert_id.extend(der_integer(&detail.serial));
    let cert_id = der_sequence(&cert_id);

    // certStatus CHOICE
    let cert_status = match detail.status {
        OcspCertStatus::Good => der_tagged(0x80, &[]),
        OcspCertStatus::Revoked { revoked_at, reason } => {
            let mut revoked_info = der_generalized_time(revoked_at);
            if let Some(reason) = reason {
                revoked_info.extend(der_tagged(0xA0, &der_enumerated(reason.as_u8())));
            }
            der_tagged(0xA1, &revoked_info)
        }
    };

    let mut single_response = cert_id;
    single_response.extend(cert_status);
    single_response.extend(der_generalized_time(detail.this_update));
    single_response.extend(der_tagged(0xA0, &der_generalized_time(detail.next_update)));
    let single_response = der_sequence(&single_response);

    // ResponseData with a byKey responder id
    let mut response_data = der_tagged(0xA2, &der_octet_string(&key_hash));
    response_data.extend(der_generalized_time(detail.this_update));
    response_data.extend(der_sequence(&single_response));
    let response_data = der_sequence(&response_data);

    let signature = signer.sign(&response_data)?;

    let mut basic = response_data;
    basic.extend(algorithm_identifier(OID_ECDSA_SHA256, false));
    basic.extend(der_bit_string(&signature));
    let basic = der_sequence(&basic);

    // OCSPResponse: status successful + responseBytes
    let mut response_bytes = OID_OCSP_BASIC.to_vec();
    response_bytes.extend(der_octet_string(&basic));
    let mut response = der_enumerated(0);
    response.extend(der_tagged(0xA0, &der_sequence(&response_bytes)));
    Ok(der_sequence(&response))
}

/// Pull the subjectPublicKey BIT STRING payload out of an SPKI, which is
/// what RFC 6960 hashes for the byKey responder id.
fn extract_spki_key_bits(spki_der: &[u8]) -> Result<&[u8]> {
    use x509_parser::prelude::*;
    let (_, spki) = SubjectPublicKeyInfo::from_der(spki_der)
        .map_err(|e| CaError::internal(format!("parsing issuer SPKI: {}", e)))?;
    // the lifetime of the parsed data is tied to the input slice
    let offset = spki_der.len() - spki.subject_public_key.data.len();
    Ok(&spki_der[offset..])
}
