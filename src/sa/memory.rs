//! In-memory storage authority.
//!
//! Reference semantics for the SA contract and the backend the test
//! harness runs on. One lock guards the whole store; the two cross-row
//! atomics (`new_order_and_authzs`, `add_certificate`) fall out of that
//! for free, and per-row writes are trivially linearizable.

use crate::clock::SharedClock;
use crate::error::{CaError, Result};
use crate::sa::models::*;
use crate::sa::StorageAuthority;
use crate::types::{AuthorizationStatus, ChallengeStatus, ProblemDetail, RegistrationStatus};
use async_trait::async_trait;
use jiff::{Span, Timestamp};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct IssuedName {
    name: String,
    issued_at: Timestamp,
}

#[derive(Debug, Clone)]
struct FqdnSetRow {
    hash: [u8; 32],
    issued_at: Timestamp,
}

#[derive(Debug, Clone)]
struct BlockedKey {
    source: String,
    comment: Option<String>,
    added_at: Timestamp,
}

#[derive(Default)]
struct Inner {
    next_registration_id: i64,
    next_authorization_id: i64,
    next_order_id: i64,
    registrations: HashMap<i64, Registration>,
    registration_id_by_key: HashMap<String, i64>,
    registration_ips: Vec<(IpAddr, Timestamp)>,
    authorizations: HashMap<i64, Authorization>,
    orders: HashMap<i64, Order>,
    orders_by_names: HashMap<(i64, [u8; 32]), Vec<i64>>,
    certificates: HashMap<String, Certificate>,
    certificate_statuses: HashMap<String, CertificateStatus>,
    issued_names: Vec<IssuedName>,
    fqdn_sets: Vec<FqdnSetRow>,
    blocked_keys: HashMap<String, BlockedKey>,
}

impl Inner {
    fn order_authzs(&self, order: &Order) -> Vec<Authorization> {
        order
            .authorization_ids
            .iter()
            .filter_map(|id| self.authorizations.get(id))
            .cloned()
            .collect()
    }

    fn order_status(&self, order: &Order, now: Timestamp) -> crate::types::OrderStatus {
        derive_order_status(order, &self.order_authzs(order), now)
    }
}

/// In-memory SA backend
pub struct MemoryStore {
    clock: SharedClock,
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }
}

fn window_start(window: Span, now: Timestamp) -> Timestamp {
    now.checked_sub(window).unwrap_or(Timestamp::MIN)
}

/// IPv6 registrations are counted per /48, IPv4 per address.
fn same_registration_source(a: IpAddr, b: IpAddr) -> bool {
    match (a, b) {
        (IpAddr::V4(a), IpAddr::V4(b)) => a == b,
        (IpAddr::V6(a), IpAddr::V6(b)) => a.octets()[..6] == b.octets()[..6],
        _ => false,
    }
}

#[async_trait]
impl StorageAuthority for MemoryStore {
    async fn new_registration(&self, req: RegistrationRequest) -> Result<Registration> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        if inner.registration_id_by_key.contains_key(&req.key_digest) {
            return Err(CaError::malformed(
                "account key is already in use by a different account",
            ));
        }
        inner.next_registration_id += 1;
        let registration = Registration {
            id: inner.next_registration_id,
            key_digest: req.key_digest.clone(),
            contacts: req.contacts,
            initial_ip: req.initial_ip,
            status: RegistrationStatus::Valid,
            agreement: req.agreement,
            created_at: now,
        };
        inner
            .registration_id_by_key
            .insert(req.key_digest, registration.id);
        inner.registration_ips.push((req.initial_ip, now));
        inner.registrations.insert(registration.id, registration.clone());
        Ok(registration)
    }

    async fn get_registration(&self, id: i64) -> Result<Registration> {
        let inner = self.inner.read().await;
        inner
            .registrations
            .get(&id)
            .cloned()
            .ok_or_else(|| CaError::not_found(format!("registration {} not found", id)))
    }

    async fn get_registration_by_key(&self, key_digest: &str) -> Result<Registration> {
        let inner = self.inner.read().await;
        inner
            .registration_id_by_key
            .get(key_digest)
            .and_then(|id| inner.registrations.get(id))
            .cloned()
            .ok_or_else(|| CaError::not_found("no registration for this key"))
    }

    async fn update_registration(
        &self,
        id: i64,
        update: RegistrationUpdate,
    ) -> Result<Registration> {
        let mut inner = self.inner.write().await;
        let registration = inner
            .registrations
            .get_mut(&id)
            .ok_or_else(|| CaError::not_found(format!("registration {} not found", id)))?;
        if let Some(contacts) = update.contacts {
            registration.contacts = contacts;
        }
        if let Some(agreement) = update.agreement {
            registration.agreement = Some(agreement);
        }
        Ok(registration.clone())
    }

    async fn deactivate_registration(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.write().await;
        let registration = inner
            .registrations
            .get_mut(&id)
            .ok_or_else(|| CaError::not_found(format!("registration {} not found", id)))?;
        if registration.status != RegistrationStatus::Valid {
            return Err(CaError::internal(format!(
                "registration {} is {}, not valid",
                id,
                registration.status.as_str()
            )));
        }
        registration.status = RegistrationStatus::Deactivated;
        Ok(())
    }

    async fn new_order_and_authzs(&self, req: NewOrderAndAuthzs) -> Result<Order> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;

        for id in &req.reused_authorization_ids {
            if !inner.authorizations.contains_key(id) {
                return Err(CaError::not_found(format!("authorization {} not found", id)));
            }
        }

        let mut authorization_ids = req.reused_authorization_ids.clone();
        for spec in req.new_authzs {
            inner.next_authorization_id += 1;
            let id = inner.next_authorization_id;
            inner.authorizations.insert(
                id,
                Authorization {
                    id,
                    registration_id: req.registration_id,
                    identifier: spec.identifier,
                    status: AuthorizationStatus::Pending,
                    expires: spec.expires,
                    challenges: spec.challenges,
                },
            );
            authorization_ids.push(id);
        }

        inner.next_order_id += 1;
        let order = Order {
            id: inner.next_order_id,
            registration_id: req.registration_id,
            names: req.names.clone(),
            expires: req.expires,
            authorization_ids,
            begun_processing: false,
            error: None,
            certificate_serial: None,
            created_at: now,
        };
        let key = (req.registration_id, fqdn_set_hash(&req.names));
        inner.orders_by_names.entry(key).or_default().push(order.id);
        inner.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get_authorization(&self, id: i64) -> Result<Authorization> {
        let inner = self.inner.read().await;
        inner
            .authorizations
            .get(&id)
            .cloned()
            .ok_or_else(|| CaError::not_found(format!("authorization {} not found", id)))
    }

    async fn get_valid_authorizations(
        &self,
        registration_id: i64,
        names: &[String],
        now: Timestamp,
    ) -> Result<HashMap<String, Authorization>> {
        let inner = self.inner.read().await;
        let mut found: HashMap<String, Authorization> = HashMap::new();
        for authz in inner.authorizations.values() {
            if authz.registration_id != registration_id
                || authz.status_at(now) != AuthorizationStatus::Valid
                || !names.contains(&authz.identifier.value)
            {
                continue;
            }
            // prefer the authorization that lives longest
            match found.get(&authz.identifier.value) {
                Some(existing) if existing.expires >= authz.expires => {}
                _ => {
                    found.insert(authz.identifier.value.clone(), authz.clone());
                }
            }
        }
        Ok(found)
    }

    async fn get_pending_authorizations(
        &self,
        registration_id: i64,
        names: &[String],
        now: Timestamp,
    ) -> Result<HashMap<String, Authorization>> {
        let inner = self.inner.read().await;
        let mut found: HashMap<String, Authorization> = HashMap::new();
        for authz in inner.authorizations.values() {
            if authz.registration_id != registration_id
                || authz.status_at(now) != AuthorizationStatus::Pending
                || !names.contains(&authz.identifier.value)
            {
                continue;
            }
            match found.get(&authz.identifier.value) {
                Some(existing) if existing.expires >= authz.expires => {}
                _ => {
                    found.insert(authz.identifier.value.clone(), authz.clone());
                }
            }
        }
        Ok(found)
    }

    async fn finalize_authorization(&self, id: i64, update: AuthorizationUpdate) -> Result<()> {
        if !matches!(
            update.status,
            AuthorizationStatus::Valid | AuthorizationStatus::Invalid
        ) {
            return Err(CaError::internal(format!(
                "cannot finalize authorization to status {}",
                update.status
            )));
        }
        let mut inner = self.inner.write().await;
        let authz = inner
            .authorizations
            .get_mut(&id)
            .ok_or_else(|| CaError::not_found(format!("authorization {} not found", id)))?;
        if authz.status != AuthorizationStatus::Pending {
            return Err(CaError::not_found(format!(
                "authorization {} is no longer pending",
                id
            )));
        }
        let challenge = authz
            .challenges
            .iter_mut()
            .find(|c| c.challenge_type == update.challenge_type)
            .ok_or_else(|| {
                CaError::not_found(format!(
                    "authorization {} has no {} challenge",
                    id, update.challenge_type
                ))
            })?;
        challenge.status = match update.status {
            AuthorizationStatus::Valid => ChallengeStatus::Valid,
            _ => ChallengeStatus::Invalid,
        };
        challenge.error = update.error;
        challenge.validation_records = update.validation_records;
        challenge.validated_at = Some(update.validated_at);
        authz.status = update.status;
        if let Some(expires) = update.expires {
            authz.expires = expires;
        }
        Ok(())
    }

    async fn deactivate_authorization(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.write().await;
        let authz = inner
            .authorizations
            .get_mut(&id)
            .ok_or_else(|| CaError::not_found(format!("authorization {} not found", id)))?;
        if authz.status != AuthorizationStatus::Valid {
            return Err(CaError::internal(format!(
                "authorization {} is {}, not valid",
                id, authz.status
            )));
        }
        authz.status = AuthorizationStatus::Deactivated;
        Ok(())
    }

    async fn count_pending_authorizations(
        &self,
        registration_id: i64,
        now: Timestamp,
    ) -> Result<i64> {
        let inner = self.inner.read().await;
        Ok(inner
            .authorizations
            .values()
            .filter(|a| {
                a.registration_id == registration_id
                    && a.status_at(now) == AuthorizationStatus::Pending
            })
            .count() as i64)
    }

    async fn count_invalid_authorizations(
        &self,
        registration_id: i64,
        hostname: &str,
        window: Span,
        now: Timestamp,
    ) -> Result<i64> {
        let start = window_start(window, now);
        let inner = self.inner.read().await;
        Ok(inner
            .authorizations
            .values()
            .filter(|a| {
                a.registration_id == registration_id
                    && a.status == AuthorizationStatus::Invalid
                    && a.identifier.value == hostname
                    && a.attempted_challenge()
                        .and_then(|c| c.validated_at)
                        .map(|t| t > start)
                        .unwrap_or(false)
            })
            .count() as i64)
    }

    async fn get_order(&self, id: i64) -> Result<Order> {
        let inner = self.inner.read().await;
        inner
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| CaError::not_found(format!("order {} not found", id)))
    }

    async fn get_order_for_names(
        &self,
        registration_id: i64,
        names: &[String],
        now: Timestamp,
    ) -> Result<Option<Order>> {
        let inner = self.inner.read().await;
        let key = (registration_id, fqdn_set_hash(names));
        let Some(ids) = inner.orders_by_names.get(&key) else {
            return Ok(None);
        };
        for id in ids.iter().rev() {
            if let Some(order) = inner.orders.get(id) {
                use crate::types::OrderStatus::*;
                if matches!(inner.order_status(order, now), Pending | Ready) {
                    return Ok(Some(order.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn set_order_processing(&self, id: i64, now: Timestamp) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(order) = inner.orders.get(&id) else {
            return Err(CaError::not_found(format!("order {} not found", id)));
        };
        if order.begun_processing {
            return Err(CaError::malformed(format!(
                "order {} is already being processed",
                id
            )));
        }
        if inner.order_status(order, now) != crate::types::OrderStatus::Ready {
            return Err(CaError::internal(format!("order {} is not ready", id)));
        }
        inner
            .orders
            .get_mut(&id)
            .expect("order present under lock")
            .begun_processing = true;
        Ok(())
    }

    async fn set_order_error(&self, id: i64, problem: ProblemDetail) -> Result<()> {
        let mut inner = self.inner.write().await;
        let order = inner
            .orders
            .get_mut(&id)
            .ok_or_else(|| CaError::not_found(format!("order {} not found", id)))?;
        if !order.begun_processing || order.certificate_serial.is_some() {
            return Err(CaError::internal(format!(
                "order {} is not in processing",
                id
            )));
        }
        order.error = Some(problem);
        Ok(())
    }

    async fn finalize_order(&self, id: i64, certificate_serial: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let order = inner
            .orders
            .get_mut(&id)
            .ok_or_else(|| CaError::not_found(format!("order {} not found", id)))?;
        if !order.begun_processing || order.error.is_some() {
            return Err(CaError::internal(format!(
                "order {} is not in processing",
                id
            )));
        }
        order.certificate_serial = Some(certificate_serial.to_string());
        Ok(())
    }

    async fn count_orders(
        &self,
        registration_id: i64,
        window: Span,
        now: Timestamp,
    ) -> Result<NameCount> {
        let start = window_start(window, now);
        let inner = self.inner.read().await;
        let mut count = NameCount::default();
        for order in inner.orders.values() {
            if order.registration_id == registration_id && order.created_at > start {
                count.count += 1;
                if count.earliest.map(|e| order.created_at < e).unwrap_or(true) {
                    count.earliest = Some(order.created_at);
                }
            }
        }
        Ok(count)
    }

    async fn add_certificate(&self, cert: Certificate, names: &[String]) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.certificates.contains_key(&cert.serial) {
            return Err(CaError::malformed(format!(
                "serial {} already exists",
                cert.serial
            )));
        }
        inner.certificate_statuses.insert(
            cert.serial.clone(),
            CertificateStatus {
                serial: cert.serial.clone(),
                status: CertStatus::Good,
                revoked_reason: None,
                revoked_at: None,
                ocsp_last_updated: Some(cert.issued_at),
            },
        );
        inner.fqdn_sets.push(FqdnSetRow {
            hash: fqdn_set_hash(names),
            issued_at: cert.issued_at,
        });
        for name in names {
            inner.issued_names.push(IssuedName {
                name: name.strip_prefix("*.").unwrap_or(name).to_string(),
                issued_at: cert.issued_at,
            });
        }
        inner.certificates.insert(cert.serial.clone(), cert);
        Ok(())
    }

    async fn get_certificate(&self, serial: &str) -> Result<Certificate> {
        let inner = self.inner.read().await;
        inner
            .certificates
            .get(serial)
            .cloned()
            .ok_or_else(|| CaError::not_found(format!("certificate {} not found", serial)))
    }

    async fn get_certificate_status(&self, serial: &str) -> Result<CertificateStatus> {
        let inner = self.inner.read().await;
        inner
            .certificate_statuses
            .get(serial)
            .cloned()
            .ok_or_else(|| CaError::not_found(format!("certificate {} not found", serial)))
    }

    async fn revoke_certificate(&self, req: RevocationRequest) -> Result<()> {
        let mut inner = self.inner.write().await;
        let status = inner
            .certificate_statuses
            .get_mut(&req.serial)
            .ok_or_else(|| CaError::not_found(format!("certificate {} not found", req.serial)))?;
        if status.status == CertStatus::Revoked {
            return Err(CaError::already_revoked(req.serial));
        }
        status.status = CertStatus::Revoked;
        status.revoked_reason = Some(req.reason);
        status.revoked_at = Some(req.revoked_at);
        Ok(())
    }

    async fn update_revoked_certificate(&self, req: RevocationRequest) -> Result<()> {
        let mut inner = self.inner.write().await;
        let status = inner
            .certificate_statuses
            .get_mut(&req.serial)
            .ok_or_else(|| CaError::not_found(format!("certificate {} not found", req.serial)))?;
        if status.status != CertStatus::Revoked {
            return Err(CaError::internal(format!(
                "certificate {} is not revoked",
                req.serial
            )));
        }
        if status.revoked_reason == Some(crate::types::RevocationReason::KeyCompromise) {
            return Err(CaError::already_revoked(req.serial));
        }
        status.revoked_reason = Some(req.reason);
        status.revoked_at = Some(req.revoked_at);
        Ok(())
    }

    async fn set_ocsp_updated(&self, serial: &str, now: Timestamp) -> Result<()> {
        let mut inner = self.inner.write().await;
        let status = inner
            .certificate_statuses
            .get_mut(serial)
            .ok_or_else(|| CaError::not_found(format!("certificate {} not found", serial)))?;
        status.ocsp_last_updated = Some(now);
        Ok(())
    }

    async fn count_certificates_by_names(
        &self,
        names: &[String],
        window: Span,
        now: Timestamp,
    ) -> Result<HashMap<String, NameCount>> {
        let start = window_start(window, now);
        let inner = self.inner.read().await;
        let mut counts: HashMap<String, NameCount> = HashMap::new();
        for name in names {
            let entry = counts.entry(name.clone()).or_default();
            for row in &inner.issued_names {
                if row.issued_at <= start {
                    continue;
                }
                let covered =
                    row.name == *name || row.name.ends_with(&format!(".{}", name));
                if covered {
                    entry.count += 1;
                    if entry.earliest.map(|e| row.issued_at < e).unwrap_or(true) {
                        entry.earliest = Some(row.issued_at);
                    }
                }
            }
        }
        Ok(counts)
    }

    async fn count_fqdn_sets(&self, names: &[String], window: Span, now: Timestamp) -> Result<i64> {
        let start = window_start(window, now);
        let hash = fqdn_set_hash(names);
        let inner = self.inner.read().await;
        Ok(inner
            .fqdn_sets
            .iter()
            .filter(|row| row.hash == hash && row.issued_at > start)
            .count() as i64)
    }

    async fn fqdn_set_timestamps_for_window(
        &self,
        names: &[String],
        window: Span,
        now: Timestamp,
    ) -> Result<Vec<Timestamp>> {
        let start = window_start(window, now);
        let hash = fqdn_set_hash(names);
        let inner = self.inner.read().await;
        let mut timestamps: Vec<Timestamp> = inner
            .fqdn_sets
            .iter()
            .filter(|row| row.hash == hash && row.issued_at > start)
            .map(|row| row.issued_at)
            .collect();
        timestamps.sort();
        Ok(timestamps)
    }

    async fn count_registrations_by_ip(
        &self,
        ip: IpAddr,
        window: Span,
        now: Timestamp,
    ) -> Result<i64> {
        let start = window_start(window, now);
        let inner = self.inner.read().await;
        Ok(inner
            .registration_ips
            .iter()
            .filter(|(source, at)| *at > start && same_registration_source(*source, ip))
            .count() as i64)
    }

    async fn key_blocked(&self, key_digest: &str) -> Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner.blocked_keys.contains_key(key_digest))
    }

    async fn add_blocked_key(
        &self,
        key_digest: &str,
        source: &str,
        comment: Option<String>,
    ) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        inner
            .blocked_keys
            .entry(key_digest.to_string())
            .or_insert(BlockedKey {
                source: source.to_string(),
                comment,
                added_at: now,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::types::{ChallengeType, Identifier, OrderStatus};

    fn store() -> (MemoryStore, FakeClock) {
        let clock = FakeClock::at("2025-06-01T00:00:00Z".parse().unwrap());
        (MemoryStore::new(Arc::new(clock.clone())), clock)
    }

    fn registration_request(digest: &str) -> RegistrationRequest {
        RegistrationRequest {
            key_digest: digest.to_string(),
            contacts: vec!["mailto:admin@example.com".to_string()],
            initial_ip: "198.51.100.7".parse().unwrap(),
            agreement: Some("v1".to_string()),
        }
    }

    async fn order_with_authz(
        store: &MemoryStore,
        registration_id: i64,
        name: &str,
    ) -> Order {
        let expires: Timestamp = "2025-06-08T00:00:00Z".parse().unwrap();
        store
            .new_order_and_authzs(NewOrderAndAuthzs {
                registration_id,
                names: vec![name.to_string()],
                expires,
                reused_authorization_ids: vec![],
                new_authzs: vec![AuthzSpec {
                    identifier: Identifier::dns(name),
                    expires,
                    challenges: vec![Challenge::pending(ChallengeType::Http01)],
                }],
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn registration_key_uniqueness() {
        let (store, _) = store();
        store.new_registration(registration_request("digest-1")).await.unwrap();
        assert!(store.new_registration(registration_request("digest-1")).await.is_err());
        let second = store.new_registration(registration_request("digest-2")).await.unwrap();
        assert_eq!(second.id, 2);
    }

    #[tokio::test]
    async fn update_registration_merges() {
        let (store, _) = store();
        let reg = store.new_registration(registration_request("digest-1")).await.unwrap();
        let updated = store
            .update_registration(
                reg.id,
                RegistrationUpdate {
                    contacts: Some(vec!["mailto:new@example.com".to_string()]),
                    agreement: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.contacts, vec!["mailto:new@example.com"]);
        // absent field preserved
        assert_eq!(updated.agreement.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn deactivate_registration_is_terminal() {
        let (store, _) = store();
        let reg = store.new_registration(registration_request("digest-1")).await.unwrap();
        store.deactivate_registration(reg.id).await.unwrap();
        assert!(store.deactivate_registration(reg.id).await.is_err());
    }

    #[tokio::test]
    async fn order_lifecycle_to_valid() {
        let (store, clock) = store();
        let reg = store.new_registration(registration_request("digest-1")).await.unwrap();
        let order = order_with_authz(&store, reg.id, "a.example.com").await;
        let now = clock.now();

        let authz_id = order.authorization_ids[0];
        store
            .finalize_authorization(
                authz_id,
                AuthorizationUpdate {
                    challenge_type: ChallengeType::Http01,
                    status: AuthorizationStatus::Valid,
                    validation_records: vec![],
                    error: None,
                    validated_at: now,
                    expires: None,
                },
            )
            .await
            .unwrap();

        store.set_order_processing(order.id, now).await.unwrap();
        // a racing second finalize loses
        assert!(store.set_order_processing(order.id, now).await.is_err());

        store.finalize_order(order.id, "7FAB").await.unwrap();
        let fetched = store.get_order(order.id).await.unwrap();
        assert_eq!(fetched.certificate_serial.as_deref(), Some("7FAB"));
    }

    #[tokio::test]
    async fn finalize_authorization_twice_is_not_found() {
        let (store, clock) = store();
        let reg = store.new_registration(registration_request("digest-1")).await.unwrap();
        let order = order_with_authz(&store, reg.id, "a.example.com").await;
        let update = AuthorizationUpdate {
            challenge_type: ChallengeType::Http01,
            status: AuthorizationStatus::Invalid,
            validation_records: vec![],
            error: Some(ProblemDetail::new("connection", "refused")),
            validated_at: clock.now(),
            expires: None,
        };
        store
            .finalize_authorization(order.authorization_ids[0], update.clone())
            .await
            .unwrap();
        let err = store
            .finalize_authorization(order.authorization_ids[0], update)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn pending_order_reuse_by_name_set() {
        let (store, clock) = store();
        let reg = store.new_registration(registration_request("digest-1")).await.unwrap();
        let order = order_with_authz(&store, reg.id, "a.example.com").await;

        let found = store
            .get_order_for_names(reg.id, &["a.example.com".to_string()], clock.now())
            .await
            .unwrap();
        assert_eq!(found.map(|o| o.id), Some(order.id));

        // different account sees nothing
        let other = store
            .get_order_for_names(reg.id + 1, &["a.example.com".to_string()], clock.now())
            .await
            .unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn revocation_transitions() {
        let (store, clock) = store();
        let now = clock.now();
        let cert = Certificate {
            serial: "7FAB".to_string(),
            registration_id: 1,
            issuer_id: 1,
            der: vec![0x30],
            issued_at: now,
            not_before: now,
            not_after: now.checked_add(Span::new().hours(90 * 24)).unwrap(),
        };
        store
            .add_certificate(cert, &["a.example.com".to_string()])
            .await
            .unwrap();

        store
            .revoke_certificate(RevocationRequest {
                serial: "7FAB".to_string(),
                reason: crate::types::RevocationReason::Unspecified,
                revoked_at: now,
            })
            .await
            .unwrap();

        // plain re-revocation is refused
        let err = store
            .revoke_certificate(RevocationRequest {
                serial: "7FAB".to_string(),
                reason: crate::types::RevocationReason::Unspecified,
                revoked_at: now,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::AlreadyRevoked);

        // upgrade to keyCompromise works exactly once
        store
            .update_revoked_certificate(RevocationRequest {
                serial: "7FAB".to_string(),
                reason: crate::types::RevocationReason::KeyCompromise,
                revoked_at: now,
            })
            .await
            .unwrap();
        let err = store
            .update_revoked_certificate(RevocationRequest {
                serial: "7FAB".to_string(),
                reason: crate::types::RevocationReason::KeyCompromise,
                revoked_at: now,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::AlreadyRevoked);
    }

    #[tokio::test]
    async fn name_counts_cover_subdomains() {
        let (store, clock) = store();
        let now = clock.now();
        for (i, name) in ["www.example.com", "api.example.com", "other.net"]
            .iter()
            .enumerate()
        {
            let cert = Certificate {
                serial: format!("7F{:02X}", i),
                registration_id: 1,
                issuer_id: 1,
                der: vec![0x30],
                issued_at: now,
                not_before: now,
                not_after: now.checked_add(Span::new().hours(90 * 24)).unwrap(),
            };
            store.add_certificate(cert, &[name.to_string()]).await.unwrap();
        }

        let counts = store
            .count_certificates_by_names(
                &["example.com".to_string()],
                Span::new().hours(7 * 24),
                clock.now(),
            )
            .await
            .unwrap();
        assert_eq!(counts["example.com"].count, 2);
        assert!(counts["example.com"].earliest.is_some());
    }

    #[tokio::test]
    async fn fqdn_set_counting_respects_window() {
        let (store, clock) = store();
        let names = vec!["a.com".to_string(), "b.com".to_string()];
        let now = clock.now();
        let cert = Certificate {
            serial: "7F01".to_string(),
            registration_id: 1,
            issuer_id: 1,
            der: vec![0x30],
            issued_at: now,
            not_before: now,
            not_after: now.checked_add(Span::new().hours(90 * 24)).unwrap(),
        };
        store.add_certificate(cert, &names).await.unwrap();

        clock.advance(Span::new().hours(3 * 24));
        assert_eq!(
            store
                .count_fqdn_sets(&names, Span::new().hours(7 * 24), clock.now())
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .count_fqdn_sets(&names, Span::new().hours(24), clock.now())
                .await
                .unwrap(),
            0
        );
        // same set, different order of names
        let reordered = vec!["b.com".to_string(), "a.com".to_string()];
        assert_eq!(
            store
                .fqdn_set_timestamps_for_window(&reordered, Span::new().hours(7 * 24), clock.now())
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn blocked_keys_are_idempotent() {
        let (store, _) = store();
        assert!(!store.key_blocked("digest").await.unwrap());
        store.add_blocked_key("digest", "API", None).await.unwrap();
        store.add_blocked_key("digest", "admin", None).await.unwrap();
        assert!(store.key_blocked("digest").await.unwrap());
    }

    #[tokio::test]
    async fn ipv6_registrations_count_per_block() {
        let (store, clock) = store();
        for i in 0..2u16 {
            store
                .new_registration(RegistrationRequest {
                    key_digest: format!("digest-{}", i),
                    contacts: vec![],
                    initial_ip: format!("2001:db8:1:{}::1", i).parse().unwrap(),
                    agreement: None,
                })
                .await
                .unwrap();
        }
        let count = store
            .count_registrations_by_ip(
                "2001:db8:1:ffff::2".parse().unwrap(),
                Span::new().hours(7 * 24),
                clock.now(),
            )
            .await
            .unwrap();
        assert_eq!(count, 2);
    }
}
