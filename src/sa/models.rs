/// Persisted records owned by the storage authority.
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::types::{
    AuthorizationStatus, ChallengeStatus, ChallengeType, Identifier, OrderStatus, ProblemDetail,
    RegistrationStatus, RevocationReason, ValidationRecord, sorted_unique_names,
};

/// An ACME account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    /// Monotonic numeric id
    pub id: i64,
    /// SHA-256 of the account public key, hex. Unique across accounts
    pub key_digest: String,
    /// Contact URIs; each must be a syntactically valid mailto:
    pub contacts: Vec<String>,
    /// Address the account was registered from
    pub initial_ip: IpAddr,
    pub status: RegistrationStatus,
    /// Subscriber-agreement marker
    pub agreement: Option<String>,
    pub created_at: Timestamp,
}

/// Fields for creating a registration; the SA assigns the id
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub key_digest: String,
    pub contacts: Vec<String>,
    pub initial_ip: IpAddr,
    pub agreement: Option<String>,
}

/// Merge-update for a registration: absent fields are preserved
#[derive(Debug, Clone, Default)]
pub struct RegistrationUpdate {
    pub contacts: Option<Vec<String>>,
    pub agreement: Option<String>,
}

/// A single challenge under an authorization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,
    /// Unguessable random token presented to the subscriber
    pub token: String,
    pub status: ChallengeStatus,
    /// Failure detail once status is invalid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProblemDetail>,
    /// Network steps observed during the validation attempt
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub validation_records: Vec<ValidationRecord>,
    /// Set exactly when status transitions to valid or invalid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated_at: Option<Timestamp>,
}

impl Challenge {
    /// A fresh pending challenge with a random 128-bit token
    pub fn pending(challenge_type: ChallengeType) -> Self {
        use base64::Engine;
        use rand::Rng;

        let mut token_bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut token_bytes);
        Self {
            challenge_type,
            token: base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(token_bytes),
            status: ChallengeStatus::Pending,
            error: None,
            validation_records: vec![],
            validated_at: None,
        }
    }
}

/// Proof context for one (account, identifier) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authorization {
    pub id: i64,
    pub registration_id: i64,
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    pub expires: Timestamp,
    pub challenges: Vec<Challenge>,
}

impl Authorization {
    /// The attempted challenge, if any. At most one challenge ever leaves
    /// pending.
    pub fn attempted_challenge(&self) -> Option<&Challenge> {
        self.challenges
            .iter()
            .find(|c| c.status != ChallengeStatus::Pending)
    }

    /// Find a challenge by type
    pub fn challenge(&self, challenge_type: ChallengeType) -> Option<&Challenge> {
        self.challenges
            .iter()
            .find(|c| c.challenge_type == challenge_type)
    }

    /// Status with expiry derived at read time
    pub fn status_at(&self, now: Timestamp) -> AuthorizationStatus {
        match self.status {
            AuthorizationStatus::Pending | AuthorizationStatus::Valid if self.expires <= now => {
                AuthorizationStatus::Expired
            }
            other => other,
        }
    }
}

/// Authorization spec for atomic creation alongside an order; the SA
/// assigns the id
#[derive(Debug, Clone)]
pub struct AuthzSpec {
    pub identifier: Identifier,
    pub expires: Timestamp,
    pub challenges: Vec<Challenge>,
}

/// Finalization of one challenge attempt
#[derive(Debug, Clone)]
pub struct AuthorizationUpdate {
    pub challenge_type: ChallengeType,
    pub status: AuthorizationStatus,
    pub validation_records: Vec<ValidationRecord>,
    pub error: Option<ProblemDetail>,
    pub validated_at: Timestamp,
    /// New expiry; a successful validation stretches the authorization
    /// from its pending lifetime to the full valid lifetime
    pub expires: Option<Timestamp>,
}

/// A request to issue one certificate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub registration_id: i64,
    /// Lowercased, deduplicated, sorted; immutable after creation
    pub names: Vec<String>,
    pub expires: Timestamp,
    pub authorization_ids: Vec<i64>,
    /// Set once finalize begins
    pub begun_processing: bool,
    /// Problem recorded by a failed finalize
    pub error: Option<ProblemDetail>,
    /// Serial of the issued certificate, uppercase hex
    pub certificate_serial: Option<String>,
    pub created_at: Timestamp,
}

/// Atomic order + new-authorization creation
#[derive(Debug, Clone)]
pub struct NewOrderAndAuthzs {
    pub registration_id: i64,
    pub names: Vec<String>,
    pub expires: Timestamp,
    /// Authorizations being reused
    pub reused_authorization_ids: Vec<i64>,
    /// Authorizations to create
    pub new_authzs: Vec<AuthzSpec>,
}

/// Derive an order's status from its own fields and its authorizations.
///
/// Precedence: an attached certificate always wins, then a recorded error,
/// then processing, then expiry, then the authorization roll-up.
pub fn derive_order_status(order: &Order, authzs: &[Authorization], now: Timestamp) -> OrderStatus {
    if order.certificate_serial.is_some() {
        return OrderStatus::Valid;
    }
    if order.error.is_some() {
        return OrderStatus::Invalid;
    }
    if order.begun_processing {
        return OrderStatus::Processing;
    }
    if order.expires <= now {
        return OrderStatus::Expired;
    }
    let mut all_valid = true;
    for authz in authzs {
        match authz.status_at(now) {
            AuthorizationStatus::Valid => {}
            AuthorizationStatus::Pending => all_valid = false,
            _ => return OrderStatus::Invalid,
        }
    }
    if all_valid && !authzs.is_empty() {
        OrderStatus::Ready
    } else {
        OrderStatus::Pending
    }
}

/// Revocation state attached to every certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertStatus {
    Good,
    Revoked,
}

/// An issued certificate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    /// Uppercase hex, 20 bytes with the configured prefix byte
    pub serial: String,
    pub registration_id: i64,
    pub issuer_id: i64,
    pub der: Vec<u8>,
    pub issued_at: Timestamp,
    pub not_before: Timestamp,
    pub not_after: Timestamp,
}

/// Revocation bookkeeping, linked 1:1 by serial
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateStatus {
    pub serial: String,
    pub status: CertStatus,
    pub revoked_reason: Option<RevocationReason>,
    pub revoked_at: Option<Timestamp>,
    pub ocsp_last_updated: Option<Timestamp>,
}

/// A revocation applied through the SA
#[derive(Debug, Clone)]
pub struct RevocationRequest {
    pub serial: String,
    pub reason: RevocationReason,
    pub revoked_at: Timestamp,
}

/// Per-name issuance count with the oldest event, for retry-after math
#[derive(Debug, Clone, Default)]
pub struct NameCount {
    pub count: i64,
    pub earliest: Option<Timestamp>,
}

/// SHA-256 over the canonical (sorted, lowercased, deduplicated) name list.
/// Keys both duplicate-order detection and the FQDN-set rate limits.
pub fn fqdn_set_hash(names: &[String]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let canonical = sorted_unique_names(names);
    let mut hasher = Sha256::new();
    hasher.update(canonical.join(",").as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authz(status: AuthorizationStatus, expires: Timestamp) -> Authorization {
        Authorization {
            id: 1,
            registration_id: 1,
            identifier: Identifier::dns("a.example.com"),
            status,
            expires,
            challenges: vec![Challenge::pending(ChallengeType::Http01)],
        }
    }

    fn order(expires: Timestamp) -> Order {
        Order {
            id: 1,
            registration_id: 1,
            names: vec!["a.example.com".to_string()],
            expires,
            authorization_ids: vec![1],
            begun_processing: false,
            error: None,
            certificate_serial: None,
            created_at: "2025-01-01T00:00:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn order_status_derivation() {
        let now: Timestamp = "2025-01-02T00:00:00Z".parse().unwrap();
        let later: Timestamp = "2025-03-01T00:00:00Z".parse().unwrap();

        let o = order(later);
        let pending = [authz(AuthorizationStatus::Pending, later)];
        assert_eq!(derive_order_status(&o, &pending, now), OrderStatus::Pending);

        let valid = [authz(AuthorizationStatus::Valid, later)];
        assert_eq!(derive_order_status(&o, &valid, now), OrderStatus::Ready);

        let invalid = [authz(AuthorizationStatus::Invalid, later)];
        assert_eq!(derive_order_status(&o, &invalid, now), OrderStatus::Invalid);

        let mut processing = o.clone();
        processing.begun_processing = true;
        assert_eq!(
            derive_order_status(&processing, &valid, now),
            OrderStatus::Processing
        );

        let mut done = processing.clone();
        done.certificate_serial = Some("7FAB".to_string());
        assert_eq!(derive_order_status(&done, &valid, now), OrderStatus::Valid);

        let expired = order("2025-01-01T12:00:00Z".parse().unwrap());
        assert_eq!(
            derive_order_status(&expired, &valid, now),
            OrderStatus::Expired
        );
    }

    #[test]
    fn expired_authz_invalidates_order() {
        // a valid authorization past its expiry no longer counts
        let now: Timestamp = "2025-01-02T00:00:00Z".parse().unwrap();
        let later: Timestamp = "2025-03-01T00:00:00Z".parse().unwrap();
        let o = order(later);
        let stale = [authz(
            AuthorizationStatus::Valid,
            "2025-01-01T00:00:00Z".parse().unwrap(),
        )];
        assert_eq!(derive_order_status(&o, &stale, now), OrderStatus::Invalid);
    }

    #[test]
    fn fqdn_hash_ignores_order_and_case() {
        let a = fqdn_set_hash(&["B.com".to_string(), "a.com".to_string()]);
        let b = fqdn_set_hash(&["a.com".to_string(), "b.COM".to_string(), "a.com.".to_string()]);
        assert_eq!(a, b);

        let c = fqdn_set_hash(&["a.com".to_string()]);
        assert_ne!(a, c);
    }

    #[test]
    fn challenge_tokens_are_unique() {
        let a = Challenge::pending(ChallengeType::Dns01);
        let b = Challenge::pending(ChallengeType::Dns01);
        assert_ne!(a.token, b.token);
        assert_eq!(a.token.len(), 22);
    }
}
