//! Storage authority: the sole owner of persistent state.
//!
//! Every mutation in the system passes through one of the operations on
//! this contract. Production backs it with a database; tests and the
//! reference pipeline use the in-memory implementation, which also pins
//! down the atomicity semantics a production store must honor.

pub mod memory;
pub mod models;

use crate::error::Result;
use async_trait::async_trait;
use jiff::{Span, Timestamp};
use std::collections::HashMap;
use std::net::IpAddr;

pub use memory::MemoryStore;
pub use models::{
    Authorization, AuthorizationUpdate, AuthzSpec, CertStatus, Certificate, CertificateStatus,
    Challenge, NameCount, NewOrderAndAuthzs, Order, Registration, RegistrationRequest,
    RegistrationUpdate, RevocationRequest, derive_order_status, fqdn_set_hash,
};

/// The closed set of storage operations.
///
/// Failure kinds are limited to NotFound, AlreadyExists, AlreadyRevoked,
/// and InternalServer. No operation ever moves a row's status backwards.
#[async_trait]
pub trait StorageAuthority: Send + Sync {
    // -- accounts --

    /// Create an account. Fails with AlreadyExists when the key digest is
    /// already registered.
    async fn new_registration(&self, req: RegistrationRequest) -> Result<Registration>;

    async fn get_registration(&self, id: i64) -> Result<Registration>;

    async fn get_registration_by_key(&self, key_digest: &str) -> Result<Registration>;

    /// Merge-update: fields absent in the update are preserved
    async fn update_registration(&self, id: i64, update: RegistrationUpdate)
    -> Result<Registration>;

    /// valid -> deactivated, terminal
    async fn deactivate_registration(&self, id: i64) -> Result<()>;

    // -- authorizations --

    /// Create the order and any new pending authorizations atomically
    async fn new_order_and_authzs(&self, req: NewOrderAndAuthzs) -> Result<Order>;

    async fn get_authorization(&self, id: i64) -> Result<Authorization>;

    /// Valid, unexpired authorizations for (account, names) keyed by name
    async fn get_valid_authorizations(
        &self,
        registration_id: i64,
        names: &[String],
        now: Timestamp,
    ) -> Result<HashMap<String, Authorization>>;

    /// Pending, unexpired authorizations for (account, names) keyed by name
    async fn get_pending_authorizations(
        &self,
        registration_id: i64,
        names: &[String],
        now: Timestamp,
    ) -> Result<HashMap<String, Authorization>>;

    /// Transition one challenge to valid or invalid and stamp validatedAt.
    /// Fails with NotFound when the authorization is no longer pending
    /// (a concurrent finalization got there first).
    async fn finalize_authorization(&self, id: i64, update: AuthorizationUpdate) -> Result<()>;

    /// valid -> deactivated only
    async fn deactivate_authorization(&self, id: i64) -> Result<()>;

    /// Pending, unexpired authorizations held by the account
    async fn count_pending_authorizations(&self, registration_id: i64, now: Timestamp)
    -> Result<i64>;

    async fn count_invalid_authorizations(
        &self,
        registration_id: i64,
        hostname: &str,
        window: Span,
        now: Timestamp,
    ) -> Result<i64>;

    // -- orders --

    /// Fetch an order; status is derived at read time
    async fn get_order(&self, id: i64) -> Result<Order>;

    /// An existing reusable (pending or ready, unexpired, error-free) order
    /// for the exact same name set, if one exists
    async fn get_order_for_names(
        &self,
        registration_id: i64,
        names: &[String],
        now: Timestamp,
    ) -> Result<Option<Order>>;

    /// Atomically mark a ready order as processing. A second caller
    /// receives AlreadyExists.
    async fn set_order_processing(&self, id: i64, now: Timestamp) -> Result<()>;

    /// processing -> invalid with a problem detail
    async fn set_order_error(&self, id: i64, problem: crate::types::ProblemDetail) -> Result<()>;

    /// Attach the serial, processing -> valid
    async fn finalize_order(&self, id: i64, certificate_serial: &str) -> Result<()>;

    async fn count_orders(
        &self,
        registration_id: i64,
        window: Span,
        now: Timestamp,
    ) -> Result<NameCount>;

    // -- certificates --

    /// Write certificate, status, FQDN set, and issued names atomically
    async fn add_certificate(&self, cert: Certificate, names: &[String]) -> Result<()>;

    async fn get_certificate(&self, serial: &str) -> Result<Certificate>;

    async fn get_certificate_status(&self, serial: &str) -> Result<CertificateStatus>;

    /// unrevoked -> revoked
    async fn revoke_certificate(&self, req: RevocationRequest) -> Result<()>;

    /// Re-revoke with a new reason; refuses if already keyCompromise
    async fn update_revoked_certificate(&self, req: RevocationRequest) -> Result<()>;

    /// Stamp a fresh OCSP generation time on the status row
    async fn set_ocsp_updated(&self, serial: &str, now: Timestamp) -> Result<()>;

    /// Per-name issuance counts (subdomains included) inside the window
    async fn count_certificates_by_names(
        &self,
        names: &[String],
        window: Span,
        now: Timestamp,
    ) -> Result<HashMap<String, NameCount>>;

    /// Issuances for this exact FQDN set inside the window
    async fn count_fqdn_sets(&self, names: &[String], window: Span, now: Timestamp) -> Result<i64>;

    /// Issuance timestamps for this exact FQDN set inside the window,
    /// oldest first
    async fn fqdn_set_timestamps_for_window(
        &self,
        names: &[String],
        window: Span,
        now: Timestamp,
    ) -> Result<Vec<Timestamp>>;

    async fn count_registrations_by_ip(
        &self,
        ip: IpAddr,
        window: Span,
        now: Timestamp,
    ) -> Result<i64>;

    // -- blocked keys --

    async fn key_blocked(&self, key_digest: &str) -> Result<bool>;

    /// Record a compromised key digest. Inserting an existing digest is a
    /// no-op, not an error.
    async fn add_blocked_key(
        &self,
        key_digest: &str,
        source: &str,
        comment: Option<String>,
    ) -> Result<()>;
}

/// Blanket implementation so components can hold `Arc<dyn StorageAuthority>`
/// or concrete `Arc<MemoryStore>` interchangeably.
#[async_trait]
impl<T: StorageAuthority + ?Sized> StorageAuthority for std::sync::Arc<T> {
    async fn new_registration(&self, req: RegistrationRequest) -> Result<Registration> {
        (**self).new_registration(req).await
    }
    async fn get_registration(&self, id: i64) -> Result<Registration> {
        (**self).get_registration(id).await
    }
    async fn get_registration_by_key(&self, key_digest: &str) -> Result<Registration> {
        (**self).get_registration_by_key(key_digest).await
    }
    async fn update_registration(
        &self,
        id: i64,
        update: RegistrationUpdate,
    ) -> Result<Registration> {
        (**self).update_registration(id, update).await
    }
    async fn deactivate_registration(&self, id: i64) -> Result<()> {
        (**self).deactivate_registration(id).await
    }
    async fn new_order_and_authzs(&self, req: NewOrderAndAuthzs) -> Result<Order> {
        (**self).new_order_and_authzs(req).await
    }
    async fn get_authorization(&self, id: i64) -> Result<Authorization> {
        (**self).get_authorization(id).await
    }
    async fn get_valid_authorizations(
        &self,
        registration_id: i64,
        names: &[String],
        now: Timestamp,
    ) -> Result<HashMap<String, Authorization>> {
        (**self)
            .get_valid_authorizations(registration_id, names, now)
            .await
    }
    async fn get_pending_authorizations(
        &self,
        registration_id: i64,
        names: &[String],
        now: Timestamp,
    ) -> Result<HashMap<String, Authorization>> {
        (**self)
            .get_pending_authorizations(registration_id, names, now)
            .await
    }
    async fn finalize_authorization(&self, id: i64, update: AuthorizationUpdate) -> Result<()> {
        (**self).finalize_authorization(id, update).await
    }
    async fn deactivate_authorization(&self, id: i64) -> Result<()> {
        (**self).deactivate_authorization(id).await
    }
    async fn count_pending_authorizations(
        &self,
        registration_id: i64,
        now: Timestamp,
    ) -> Result<i64> {
        (**self)
            .count_pending_authorizations(registration_id, now)
            .await
    }
    async fn count_invalid_authorizations(
        &self,
        registration_id: i64,
        hostname: &str,
        window: Span,
        now: Timestamp,
    ) -> Result<i64> {
        (**self)
            .count_invalid_authorizations(registration_id, hostname, window, now)
            .await
    }
    async fn get_order(&self, id: i64) -> Result<Order> {
        (**self).get_order(id).await
    }
    async fn get_order_for_names(
        &self,
        registration_id: i64,
        names: &[String],
        now: Timestamp,
    ) -> Result<Option<Order>> {
        (**self)
            .get_order_for_names(registration_id, names, now)
            .await
    }
    async fn set_order_processing(&self, id: i64, now: Timestamp) -> Result<()> {
        (**self).set_order_processing(id, now).await
    }
    async fn set_order_error(&self, id: i64, problem: crate::types::ProblemDetail) -> Result<()> {
        (**self).set_order_error(id, problem).await
    }
    async fn finalize_order(&self, id: i64, certificate_serial: &str) -> Result<()> {
        (**self).finalize_order(id, certificate_serial).await
    }
    async fn count_orders(
        &self,
        registration_id: i64,
        window: Span,
        now: Timestamp,
    ) -> Result<NameCount> {
        (**self).count_orders(registration_id, window, now).await
    }
    async fn add_certificate(&self, cert: Certificate, names: &[String]) -> Result<()> {
        (**self).add_certificate(cert, names).await
    }
    async fn get_certificate(&self, serial: &str) -> Result<Certificate> {
        (**self).get_certificate(serial).await
    }
    async fn get_certificate_status(&self, serial: &str) -> Result<CertificateStatus> {
        (**self).get_certificate_status(serial).await
    }
    async fn revoke_certificate(&self, req: RevocationRequest) -> Result<()> {
        (**self).revoke_certificate(req).await
    }
    async fn update_revoked_certificate(&self, req: RevocationRequest) -> Result<()> {
        (**self).update_revoked_certificate(req).await
    }
    async fn set_ocsp_updated(&self, serial: &str, now: Timestamp) -> Result<()> {
        (**self).set_ocsp_updated(serial, now).await
    }
    async fn count_certificates_by_names(
        &self,
        names: &[String],
        window: Span,
        now: Timestamp,
    ) -> Result<HashMap<String, NameCount>> {
        (**self)
            .count_certificates_by_names(names, window, now)
            .await
    }
    async fn count_fqdn_sets(&self, names: &[String], window: Span, now: Timestamp) -> Result<i64> {
        (**self).count_fqdn_sets(names, window, now).await
    }
    async fn fqdn_set_timestamps_for_window(
        &self,
        names: &[String],
        window: Span,
        now: Timestamp,
    ) -> Result<Vec<Timestamp>> {
        (**self)
            .fqdn_set_timestamps_for_window(names, window, now)
            .await
    }
    async fn count_registrations_by_ip(
        &self,
        ip: IpAddr,
        window: Span,
        now: Timestamp,
    ) -> Result<i64> {
        (**self).count_registrations_by_ip(ip, window, now).await
    }
    async fn key_blocked(&self, key_digest: &str) -> Result<bool> {
        (**self).key_blocked(key_digest).await
    }
    async fn add_blocked_key(
        &self,
        key_digest: &str,
        source: &str,
        comment: Option<String>,
    ) -> Result<()> {
        (**self).add_blocked_key(key_digest, source, comment).await
    }
}
