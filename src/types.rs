/// Common types shared across the issuance pipeline
use serde::{Deserialize, Serialize};

/// Identifier for a name being authorized or issued for.
///
/// Only DNS identifiers exist in the core; the type tag is kept so the
/// wire shape matches RFC 8555 and front-ends can round-trip it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Identifier {
    /// Type: always "dns" today
    #[serde(rename = "type")]
    pub id_type: String,
    /// Domain name, possibly a wildcard `*.name`
    pub value: String,
}

impl Identifier {
    /// Create a DNS identifier
    pub fn dns(domain: impl Into<String>) -> Self {
        Self {
            id_type: "dns".to_string(),
            value: domain.into(),
        }
    }

    /// Whether the identifier is a wildcard name
    pub fn is_wildcard(&self) -> bool {
        self.value.starts_with("*.")
    }

    /// The name with any wildcard label stripped
    pub fn base_name(&self) -> &str {
        self.value.strip_prefix("*.").unwrap_or(&self.value)
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Canonicalize a DNS name for comparison: lowercase, trailing dot stripped.
///
/// U-labels are not converted here; names reaching the core must already be
/// A-labels, and the policy layer rejects anything non-ASCII.
pub fn canonicalize_name(name: &str) -> String {
    let name = name.strip_suffix('.').unwrap_or(name);
    name.to_ascii_lowercase()
}

/// Canonicalize a list of names: lowercase, strip trailing dots, dedupe
/// preserving first occurrence.
pub fn canonicalize_names(names: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let canon = canonicalize_name(name);
        if seen.insert(canon.clone()) {
            out.push(canon);
        }
    }
    out
}

/// The sorted, deduplicated form used for FQDN-set hashing and SAN checks.
pub fn sorted_unique_names(names: &[String]) -> Vec<String> {
    let mut out = canonicalize_names(names);
    out.sort();
    out
}

/// Challenge type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeType {
    /// HTTP-01 challenge
    #[serde(rename = "http-01")]
    Http01,
    /// DNS-01 challenge
    #[serde(rename = "dns-01")]
    Dns01,
    /// TLS-ALPN-01 challenge
    #[serde(rename = "tls-alpn-01")]
    TlsAlpn01,
}

impl ChallengeType {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeType::Http01 => "http-01",
            ChallengeType::Dns01 => "dns-01",
            ChallengeType::TlsAlpn01 => "tls-alpn-01",
        }
    }
}

impl std::str::FromStr for ChallengeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "http-01" => Ok(ChallengeType::Http01),
            "dns-01" => Ok(ChallengeType::Dns01),
            "tls-alpn-01" => Ok(ChallengeType::TlsAlpn01),
            _ => Err(format!("Unknown challenge type: {}", s)),
        }
    }
}

impl std::fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Challenge status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

impl ChallengeStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeStatus::Pending => "pending",
            ChallengeStatus::Processing => "processing",
            ChallengeStatus::Valid => "valid",
            ChallengeStatus::Invalid => "invalid",
        }
    }
}

impl std::fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Authorization status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

impl AuthorizationStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationStatus::Pending => "pending",
            AuthorizationStatus::Valid => "valid",
            AuthorizationStatus::Invalid => "invalid",
            AuthorizationStatus::Deactivated => "deactivated",
            AuthorizationStatus::Expired => "expired",
            AuthorizationStatus::Revoked => "revoked",
        }
    }
}

impl std::fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order status, derived from linked authorizations and the certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
    Expired,
}

impl OrderStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Ready => "ready",
            OrderStatus::Processing => "processing",
            OrderStatus::Valid => "valid",
            OrderStatus::Invalid => "invalid",
            OrderStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Account (registration) status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Valid,
    Deactivated,
    Revoked,
}

impl RegistrationStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Valid => "valid",
            RegistrationStatus::Deactivated => "deactivated",
            RegistrationStatus::Revoked => "revoked",
        }
    }
}

/// Certificate revocation reason codes from RFC 5280
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RevocationReason {
    Unspecified = 0,
    KeyCompromise = 1,
    CaCompromise = 2,
    AffiliationChanged = 3,
    Superseded = 4,
    CessationOfOperation = 5,
    CertificateHold = 6,
    RemoveFromCrl = 8,
    PrivilegeWithdrawn = 9,
    AaCompromise = 10,
}

impl RevocationReason {
    /// Get the numeric value
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse a numeric reason code
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(RevocationReason::Unspecified),
            1 => Some(RevocationReason::KeyCompromise),
            2 => Some(RevocationReason::CaCompromise),
            3 => Some(RevocationReason::AffiliationChanged),
            4 => Some(RevocationReason::Superseded),
            5 => Some(RevocationReason::CessationOfOperation),
            6 => Some(RevocationReason::CertificateHold),
            8 => Some(RevocationReason::RemoveFromCrl),
            9 => Some(RevocationReason::PrivilegeWithdrawn),
            10 => Some(RevocationReason::AaCompromise),
            _ => None,
        }
    }
}

/// One network step taken during challenge validation.
///
/// Persisted on the challenge so subscribers and auditors can see exactly
/// which addresses were probed and what came back.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationRecord {
    /// Hostname the record applies to
    pub hostname: String,
    /// All addresses resolution produced
    pub addresses_resolved: Vec<std::net::IpAddr>,
    /// The address actually dialed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_used: Option<std::net::IpAddr>,
    /// URL fetched (HTTP-01) or DNS query made (DNS-01)
    pub url: String,
    /// Port dialed
    pub port: u16,
    /// Response codes observed along the redirect chain, outermost first
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub response_codes: Vec<u16>,
}

/// The key authorization string a subscriber must present for a challenge.
pub fn key_authorization(token: &str, account_thumbprint: &str) -> String {
    format!("{}.{}", token, account_thumbprint)
}

/// SHA-256 digest of a key authorization, base64url-encoded without padding.
/// This is the value DNS-01 TXT records and TLS-ALPN-01 certificates carry.
pub fn key_authorization_digest(key_authorization: &str) -> String {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(key_authorization.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// A problem detail recorded on a failed challenge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProblemDetail {
    /// The error kind's problem-document type token
    pub kind: String,
    /// Human-readable detail
    pub detail: String,
}

impl ProblemDetail {
    pub fn new(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_wildcard() {
        let id = Identifier::dns("*.zombo.com");
        assert!(id.is_wildcard());
        assert_eq!(id.base_name(), "zombo.com");
        assert!(!Identifier::dns("zombo.com").is_wildcard());
    }

    #[test]
    fn canonicalize_strips_and_lowercases() {
        assert_eq!(canonicalize_name("WWW.Example.COM."), "www.example.com");
        assert_eq!(canonicalize_name("a.b"), "a.b");
    }

    #[test]
    fn canonicalize_list_dedupes_preserving_first() {
        let names = vec![
            "B.com".to_string(),
            "a.com.".to_string(),
            "b.COM".to_string(),
        ];
        assert_eq!(canonicalize_names(&names), vec!["b.com", "a.com"]);
        assert_eq!(sorted_unique_names(&names), vec!["a.com", "b.com"]);
    }

    #[test]
    fn challenge_type_round_trip() {
        assert_eq!(ChallengeType::Http01.as_str(), "http-01");
        assert_eq!(
            "tls-alpn-01".parse::<ChallengeType>(),
            Ok(ChallengeType::TlsAlpn01)
        );
        assert!("tls-sni-01".parse::<ChallengeType>().is_err());
    }

    #[test]
    fn revocation_reason_codes() {
        assert_eq!(RevocationReason::KeyCompromise.as_u8(), 1);
        assert_eq!(
            RevocationReason::from_u8(5),
            Some(RevocationReason::CessationOfOperation)
        );
        assert_eq!(RevocationReason::from_u8(7), None);
    }

    #[test]
    fn key_authorization_digest_is_base64url() {
        let digest = key_authorization_digest("token.thumbprint");
        assert_eq!(digest.len(), 43);
        assert!(!digest.contains('='));
    }
}
