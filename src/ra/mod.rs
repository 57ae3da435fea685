//! Registration authority: the orchestrator of the issuance pipeline.
//!
//! The RA owns the order lifecycle end to end. It holds handles to the
//! other four components; none of them hold a reference back.

pub mod revocation;

use crate::ca::{CertificateIssuer, CsrProfile, KeyPolicy, spki_digest};
use crate::clock::SharedClock;
use crate::config::RaConfig;
use crate::ctpolicy::CtPolicy;
use crate::error::{CaError, ErrorKind, Result, SubError};
use crate::features::Features;
use crate::metrics::SharedMetrics;
use crate::policy::PolicyAuthority;
use crate::policy::ratelimit::{RateLimitHandle, UNLIMITED, retry_after};
use crate::sa::{
    Authorization, AuthorizationUpdate, AuthzSpec, Certificate, Challenge, NewOrderAndAuthzs,
    Order, StorageAuthority,
};
use crate::types::{
    AuthorizationStatus, ChallengeType, Identifier, OrderStatus, ProblemDetail,
    canonicalize_names, sorted_unique_names,
};
use crate::va::{ValidationRequest, Validator};
use jiff::Timestamp;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Best-effort CDN cache invalidation after revocation
#[async_trait::async_trait]
pub trait CachePurger: Send + Sync {
    async fn purge(&self, urls: &[String]) -> Result<()>;
}

/// Purger that does nothing, for deployments without a CDN in front of
/// OCSP
pub struct NoopPurger;

#[async_trait::async_trait]
impl CachePurger for NoopPurger {
    async fn purge(&self, _urls: &[String]) -> Result<()> {
        Ok(())
    }
}

/// Arguments to finalize_order
pub struct FinalizeOrderRequest {
    pub registration_id: i64,
    pub order_id: i64,
    pub csr_der: Vec<u8>,
    /// Remaining time the caller is willing to wait for CT
    pub deadline: Option<Duration>,
}

/// The audit line emitted once per issuance
#[derive(Debug, Serialize)]
struct CertificateRequestEvent<'a> {
    requester: i64,
    order_id: i64,
    serial_number: &'a str,
    common_name: &'a str,
    names: &'a [String],
    not_before: String,
    not_after: String,
    authorizations: HashMap<String, AuthzAuditEntry>,
}

#[derive(Debug, Serialize)]
struct AuthzAuditEntry {
    id: i64,
    challenge_type: String,
}

pub struct RegistrationAuthority {
    config: RaConfig,
    features: Features,
    clock: SharedClock,
    sa: Arc<dyn StorageAuthority>,
    va: Arc<dyn Validator>,
    ca: Arc<dyn CertificateIssuer>,
    ct: Arc<CtPolicy>,
    policy: Arc<PolicyAuthority>,
    limits: Arc<RateLimitHandle>,
    purger: Arc<dyn CachePurger>,
    metrics: SharedMetrics,
    csr_profile: CsrProfile,
    contact_re: regex::Regex,
}

impl RegistrationAuthority {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RaConfig,
        features: Features,
        clock: SharedClock,
        sa: Arc<dyn StorageAuthority>,
        va: Arc<dyn Validator>,
        ca: Arc<dyn CertificateIssuer>,
        ct: Arc<CtPolicy>,
        policy: Arc<PolicyAuthority>,
        limits: Arc<RateLimitHandle>,
        purger: Arc<dyn CachePurger>,
        metrics: SharedMetrics,
    ) -> Self {
        let csr_profile = CsrProfile::new(config.max_names, KeyPolicy::new(100));
        Self {
            config,
            features,
            clock,
            sa,
            va,
            ca,
            ct,
            policy,
            limits,
            purger,
            metrics,
            csr_profile,
            contact_re: regex::Regex::new(
                r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$",
            )
            .expect("contact regex"),
        }
    }

    fn enabled_challenges(&self) -> Vec<ChallengeType> {
        self.config
            .enabled_challenges
            .iter()
            .filter_map(|c| c.parse().ok())
            .collect()
    }

    fn challenge_enabled(&self, challenge_type: ChallengeType) -> bool {
        self.enabled_challenges().contains(&challenge_type)
    }

    /// Validate the contact list of a registration: every entry must be a
    /// mailto: URI with a plausible, non-local mailbox.
    pub fn validate_contacts(&self, contacts: &[String]) -> Result<()> {
        for contact in contacts {
            let Some(address) = contact.strip_prefix("mailto:") else {
                return Err(CaError::malformed(format!(
                    "contact \"{}\" is not a mailto: URI",
                    contact
                )));
            };
            if address.contains('?') || address.contains(',') {
                return Err(CaError::malformed(format!(
                    "contact \"{}\" contains hfields or multiple addresses",
                    contact
                )));
            }
            if !self.contact_re.is_match(address) {
                return Err(CaError::malformed(format!(
                    "\"{}\" is not a valid e-mail address",
                    address
                )));
            }
        }
        Ok(())
    }

    /// Create an account after contact validation and the per-IP limit.
    pub async fn new_registration(
        &self,
        key_digest: String,
        contacts: Vec<String>,
        initial_ip: std::net::IpAddr,
        agreement: Option<String>,
    ) -> Result<crate::sa::Registration> {
        self.validate_contacts(&contacts)?;
        let now = self.clock.now();

        let limit = &self.limits.current().registrations_per_ip;
        if limit.enabled() && limit.threshold != UNLIMITED {
            let count = self
                .sa
                .count_registrations_by_ip(initial_ip, limit.window(), now)
                .await?;
            if count >= limit.threshold {
                return Err(CaError::rate_limit(
                    "registrationsPerIP",
                    &format!("too many registrations from {}", initial_ip),
                ));
            }
        }
        self.sa
            .new_registration(crate::sa::RegistrationRequest {
                key_digest,
                contacts,
                initial_ip,
                agreement,
            })
            .await
    }

    /// Load an order's authorizations.
    ///
    /// The only error kind the RA ever retries: a transient InternalServer
    /// on these batch reads, with exponential backoff capped at one minute
    /// and at most ten attempts. Everything else surfaces verbatim.
    async fn order_authorizations(&self, order: &Order) -> Result<Vec<Authorization>> {
        const MAX_ATTEMPTS: u32 = 10;
        const BACKOFF_CAP: Duration = Duration::from_secs(60);

        let mut authzs = Vec::with_capacity(order.authorization_ids.len());
        for id in &order.authorization_ids {
            let mut attempt = 0u32;
            let authz = loop {
                match self.sa.get_authorization(*id).await {
                    Ok(authz) => break authz,
                    Err(e) if e.kind() == ErrorKind::InternalServer && attempt + 1 < MAX_ATTEMPTS => {
                        let backoff = Duration::from_millis(100 << attempt.min(16)).min(BACKOFF_CAP);
                        tracing::warn!(authz = id, attempt, "retrying authorization read: {}", e);
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            };
            authzs.push(authz);
        }
        Ok(authzs)
    }

    /// Fetch an order with its derived status, enforcing ownership.
    pub async fn get_order(&self, registration_id: i64, order_id: i64) -> Result<(Order, OrderStatus)> {
        let order = self.sa.get_order(order_id).await?;
        if order.registration_id != registration_id {
            return Err(CaError::unauthorized("order belongs to another account"));
        }
        let authzs = self.order_authorizations(&order).await?;
        let status = crate::sa::derive_order_status(&order, &authzs, self.clock.now());
        Ok((order, status))
    }

    // -- NewOrder --

    pub async fn new_order(&self, registration_id: i64, names: &[String]) -> Result<Order> {
        let names = canonicalize_names(names);
        if names.is_empty() {
            return Err(CaError::malformed("an order needs at least one name"));
        }
        if names.len() > self.config.max_names {
            return Err(CaError::malformed(format!(
                "order contains {} names; the limit is {}",
                names.len(),
                self.config.max_names
            )));
        }
        self.policy.will_issue_for_all(&names)?;

        let registration = self.sa.get_registration(registration_id).await?;
        if registration.status != crate::types::RegistrationStatus::Valid {
            return Err(CaError::unauthorized("account is not valid"));
        }

        let now = self.clock.now();
        let sorted = sorted_unique_names(&names);

        // an identical open order is handed back instead of a new one
        if let Some(existing) = self
            .sa
            .get_order_for_names(registration_id, &sorted, now)
            .await?
        {
            tracing::debug!(order = existing.id, "reusing open order for identical name set");
            self.metrics.new_orders.with_label_values(&["reused"]).inc();
            return Ok(existing);
        }

        self.check_order_limits(registration_id, &names, now).await?;

        // authorization reuse
        let identifiers: Vec<String> = names.clone();
        let reusable = if self.features.reuse_valid_authz {
            let padded = now
                .checked_add(self.config.authz_reuse_padding())
                .map_err(|e| CaError::internal(format!("authz padding: {}", e)))?;
            self.sa
                .get_valid_authorizations(registration_id, &identifiers, padded)
                .await?
        } else {
            self.sa
                .get_pending_authorizations(registration_id, &identifiers, now)
                .await?
        };

        let mut reused_ids = Vec::new();
        let mut reused_expiries = Vec::new();
        let mut missing = Vec::new();
        for name in &names {
            match reusable.get(name) {
                Some(authz) if self.authz_reusable(authz, name) => {
                    reused_ids.push(authz.id);
                    reused_expiries.push(authz.expires);
                }
                _ => missing.push(name.clone()),
            }
        }

        let pending_expiry = now
            .checked_add(self.config.pending_authorization_lifetime())
            .map_err(|e| CaError::internal(format!("authz expiry: {}", e)))?;
        let new_authzs: Vec<AuthzSpec> = missing
            .iter()
            .map(|name| {
                let identifier = Identifier::dns(name);
                let challenges = if identifier.is_wildcard() {
                    vec![Challenge::pending(ChallengeType::Dns01)]
                } else {
                    self.enabled_challenges()
                        .into_iter()
                        .map(Challenge::pending)
                        .collect()
                };
                AuthzSpec {
                    identifier,
                    expires: pending_expiry,
                    challenges,
                }
            })
            .collect();

        let mut expires = now
            .checked_add(self.config.order_lifetime())
            .map_err(|e| CaError::internal(format!("order expiry: {}", e)))?;
        for authz_expiry in reused_expiries
            .iter()
            .chain(new_authzs.iter().map(|a| &a.expires))
        {
            if *authz_expiry < expires {
                expires = *authz_expiry;
            }
        }

        let order = self
            .sa
            .new_order_and_authzs(NewOrderAndAuthzs {
                registration_id,
                names: sorted,
                expires,
                reused_authorization_ids: reused_ids,
                new_authzs,
            })
            .await?;
        self.metrics.new_orders.with_label_values(&["created"]).inc();
        tracing::info!(
            order = order.id,
            registration = registration_id,
            names = order.names.len(),
            "new order created"
        );
        Ok(order)
    }

    /// A valid authorization is only reused when its challenge type is
    /// still enabled, and never an http-01 validation for a wildcard.
    fn authz_reusable(&self, authz: &Authorization, name: &str) -> bool {
        if authz.status == AuthorizationStatus::Pending {
            return true;
        }
        let Some(challenge) = authz.attempted_challenge() else {
            return false;
        };
        if !self.challenge_enabled(challenge.challenge_type) {
            return false;
        }
        if name.starts_with("*.") && challenge.challenge_type == ChallengeType::Http01 {
            return false;
        }
        true
    }

    /// The rate-limit family, applied in a fixed order; the first failure
    /// aborts the order.
    async fn check_order_limits(
        &self,
        registration_id: i64,
        names: &[String],
        now: Timestamp,
    ) -> Result<()> {
        let limits = self.limits.current();

        // 1. certificates per registered domain
        let per_name = &limits.certificates_per_name;
        if per_name.enabled() {
            let mut bases: Vec<String> = names
                .iter()
                .map(|name| self.policy.base_domain(name).to_string())
                .collect();
            bases.sort();
            bases.dedup();
            let countable: Vec<String> = bases
                .iter()
                .filter(|base| per_name.threshold_for(base, registration_id) != UNLIMITED)
                .cloned()
                .collect();
            if !countable.is_empty() {
                let counts = self
                    .sa
                    .count_certificates_by_names(&countable, per_name.window(), now)
                    .await?;
                for base in &countable {
                    let count = counts.get(base).cloned().unwrap_or_default();
                    let threshold = per_name.threshold_for(base, registration_id);
                    if count.count >= threshold {
                        let detail =
                            format!("too many certificates already issued for \"{}\"", base);
                        return Err(match count.earliest {
                            Some(earliest) => CaError::rate_limit_after(
                                "certificatesPerName",
                                detail,
                                retry_after(earliest, per_name.window(), now),
                            ),
                            None => CaError::rate_limit("certificatesPerName", detail),
                        });
                    }
                }
            }
        }

        // 2. duplicate certificates for this exact name set
        let per_set = &limits.certificates_per_fqdn_set;
        if per_set.enabled() && per_set.threshold != UNLIMITED {
            let count = self.sa.count_fqdn_sets(names, per_set.window(), now).await?;
            if count >= per_set.threshold {
                let stamps = self
                    .sa
                    .fqdn_set_timestamps_for_window(names, per_set.window(), now)
                    .await?;
                let detail = "too many certificates already issued for this exact set of names";
                return Err(match stamps.first() {
                    Some(oldest) => CaError::rate_limit_after(
                        "certificatesPerFQDNSet",
                        detail,
                        retry_after(*oldest, per_set.window(), now),
                    ),
                    None => CaError::rate_limit("certificatesPerFQDNSet", detail),
                });
            }
        }

        // 3. the same, over a short window, to brake re-issuance churn
        let per_set_fast = &limits.certificates_per_fqdn_set_fast;
        if per_set_fast.enabled() && per_set_fast.threshold != UNLIMITED {
            let count = self
                .sa
                .count_fqdn_sets(names, per_set_fast.window(), now)
                .await?;
            if count >= per_set_fast.threshold {
                return Err(CaError::rate_limit(
                    "certificatesPerFQDNSetFast",
                    "this exact set of names was issued for too recently",
                ));
            }
        }

        // 4. new orders per account
        let per_account = &limits.new_orders_per_account;
        let per_account_threshold = per_account.threshold_for("", registration_id);
        if per_account.enabled() && per_account_threshold != UNLIMITED {
            let count = self
                .sa
                .count_orders(registration_id, per_account.window(), now)
                .await?;
            if count.count >= per_account_threshold {
                let detail = "too many new orders recently";
                return Err(match count.earliest {
                    Some(earliest) => CaError::rate_limit_after(
                        "newOrdersPerAccount",
                        detail,
                        retry_after(earliest, per_account.window(), now),
                    ),
                    None => CaError::rate_limit("newOrdersPerAccount", detail),
                });
            }
        }

        // 5. pending authorizations per account
        let pending = &limits.pending_authorizations_per_account;
        let pending_threshold = pending.threshold_for("", registration_id);
        if pending.enabled() && pending_threshold != UNLIMITED {
            let count = self
                .sa
                .count_pending_authorizations(registration_id, now)
                .await?;
            if count >= pending_threshold {
                return Err(CaError::rate_limit(
                    "pendingAuthorizationsPerAccount",
                    "too many currently pending authorizations",
                ));
            }
        }

        // 6. failed validations per account, per hostname
        let invalid = &limits.invalid_authorizations_per_account;
        if invalid.enabled() {
            for name in names {
                let threshold = invalid.threshold_for(name, registration_id);
                if threshold == UNLIMITED {
                    continue;
                }
                let count = self
                    .sa
                    .count_invalid_authorizations(registration_id, name, invalid.window(), now)
                    .await?;
                if count >= threshold {
                    return Err(CaError::rate_limit(
                        "invalidAuthorizationsPerAccount",
                        &format!("too many failed authorizations recently for \"{}\"", name),
                    ));
                }
            }
        }
        Ok(())
    }

    // -- PerformValidation --

    pub async fn perform_validation(
        &self,
        registration_id: i64,
        authorization_id: i64,
        challenge_type: ChallengeType,
        account_thumbprint: &str,
    ) -> Result<Authorization> {
        let authz = self.sa.get_authorization(authorization_id).await?;
        if authz.registration_id != registration_id {
            return Err(CaError::unauthorized(
                "authorization belongs to another account",
            ));
        }
        let now = self.clock.now();
        match authz.status_at(now) {
            AuthorizationStatus::Pending => {}
            AuthorizationStatus::Expired => {
                return Err(CaError::malformed("authorization has expired"));
            }
            other => {
                return Err(CaError::malformed(format!(
                    "authorization is {}, not pending",
                    other
                )));
            }
        }
        // a type that is disabled, or was never offered on this
        // authorization, reads the same to the client
        if !self.challenge_enabled(challenge_type) || authz.challenge(challenge_type).is_none() {
            return Err(CaError::malformed(format!(
                "challenge type \"{}\" no longer allowed",
                challenge_type
            )));
        }

        let request = ValidationRequest {
            authorization_id,
            identifier: authz.identifier.clone(),
            challenge_type,
            token: authz
                .challenge(challenge_type)
                .map(|c| c.token.clone())
                .unwrap_or_default(),
            account_thumbprint: account_thumbprint.to_string(),
        };
        let result = self.va.perform_validation(&request).await;

        let status = if result.passed() {
            AuthorizationStatus::Valid
        } else {
            AuthorizationStatus::Invalid
        };
        let expires = if status == AuthorizationStatus::Valid {
            Some(
                self.clock
                    .now()
                    .checked_add(self.config.authorization_lifetime())
                    .map_err(|e| CaError::internal(format!("authz lifetime: {}", e)))?,
            )
        } else {
            None
        };
        // a NotFound from this write means a concurrent attempt finalized
        // first; it is surfaced untouched and never retried
        self.sa
            .finalize_authorization(
                authorization_id,
                AuthorizationUpdate {
                    challenge_type,
                    status,
                    validation_records: result.records,
                    error: result.problem,
                    validated_at: self.clock.now(),
                    expires,
                },
            )
            .await?;
        self.sa.get_authorization(authorization_id).await
    }

    // -- FinalizeOrder --

    pub async fn finalize_order(&self, request: FinalizeOrderRequest) -> Result<(Order, OrderStatus)> {
        let (order, status) = self
            .get_order(request.registration_id, request.order_id)
            .await?;
        if status != OrderStatus::Ready {
            return Err(CaError::malformed(format!(
                "order status \"{}\" is not acceptable for finalization",
                status
            )));
        }

        let registration = self.sa.get_registration(request.registration_id).await?;
        let parsed_csr = self.csr_profile.parse_and_check(&request.csr_der)?;
        if spki_digest(&parsed_csr.spki_der) == registration.key_digest {
            return Err(CaError::malformed(
                "certificate public key must be different from the account key",
            ));
        }
        if parsed_csr.names != order.names {
            return Err(CaError::malformed(
                "CSR names do not match the names on the order",
            ));
        }
        self.policy.will_issue_for_all(&order.names)?;

        let authzs = self.order_authorizations(&order).await?;
        self.sa
            .set_order_processing(order.id, self.clock.now())
            .await?;

        match self
            .issue(&order, &authzs, &parsed_csr.common_name, request)
            .await
        {
            Ok(()) => {
                let order = self.sa.get_order(order.id).await?;
                Ok((order, OrderStatus::Valid))
            }
            Err(e) => {
                let problem = ProblemDetail::new(kind_token(e.kind()), e.to_string());
                if let Err(storage_err) = self.sa.set_order_error(order.id, problem).await {
                    tracing::error!(order = order.id, "recording order error: {}", storage_err);
                }
                Err(e)
            }
        }
    }

    /// Everything after SetOrderProcessing; any error here moves the
    /// order to invalid.
    async fn issue(
        &self,
        order: &Order,
        authzs: &[Authorization],
        common_name: &str,
        request: FinalizeOrderRequest,
    ) -> Result<()> {
        self.recheck_caa(order, authzs).await?;

        let precert = self
            .ca
            .issue_precertificate(&request.csr_der, order.id, order.registration_id)
            .await?;
        let mut chain = vec![precert.der.clone()];
        chain.extend(self.ca.issuer_chain(precert.issuer_id)?);
        self.ct.submit_info_logs(chain.clone(), precert.not_after);

        let sct_fetch = self.ct.get_scts(chain.clone(), precert.not_after);
        let scts = match request.deadline {
            Some(deadline) => tokio::time::timeout(deadline, sct_fetch)
                .await
                .unwrap_or_else(|_| {
                    Err(CaError::missing_scts(
                        "deadline expired before two SCTs arrived",
                    ))
                })?,
            None => sct_fetch.await?,
        };

        let issued = self
            .ca
            .issue_certificate_for_precertificate(&precert.der, &scts)
            .await?;

        self.sa
            .add_certificate(
                Certificate {
                    serial: issued.serial.clone(),
                    registration_id: order.registration_id,
                    issuer_id: issued.issuer_id,
                    der: issued.der.clone(),
                    issued_at: self.clock.now(),
                    not_before: issued.not_before,
                    not_after: issued.not_after,
                },
                &order.names,
            )
            .await?;
        self.sa.finalize_order(order.id, &issued.serial).await?;

        let mut final_chain = vec![issued.der.clone()];
        final_chain.extend(self.ca.issuer_chain(issued.issuer_id)?);
        self.ct.submit_final_cert(final_chain, issued.not_after);

        let authorizations: HashMap<String, AuthzAuditEntry> = authzs
            .iter()
            .map(|authz| {
                (
                    authz.identifier.value.clone(),
                    AuthzAuditEntry {
                        id: authz.id,
                        challenge_type: authz
                            .attempted_challenge()
                            .map(|c| c.challenge_type.to_string())
                            .unwrap_or_default(),
                    },
                )
            })
            .collect();
        let event = CertificateRequestEvent {
            requester: order.registration_id,
            order_id: order.id,
            serial_number: &issued.serial,
            common_name,
            names: &order.names,
            not_before: issued.not_before.to_string(),
            not_after: issued.not_after.to_string(),
            authorizations,
        };
        tracing::info!(
            target: "audit",
            event = "certificateRequestEvent",
            detail = %serde_json::to_string(&event).unwrap_or_default(),
            "certificate issued"
        );
        Ok(())
    }

    /// Re-check CAA for every authorization validated longer ago than the
    /// recheck bound.
    async fn recheck_caa(&self, order: &Order, authzs: &[Authorization]) -> Result<()> {
        let now = self.clock.now();
        let bound = now
            .checked_sub(self.config.caa_recheck_bound())
            .map_err(|e| CaError::internal(format!("recheck bound: {}", e)))?;

        let mut rechecked = 0usize;
        let mut sub_errors = Vec::new();
        for authz in authzs {
            let Some(challenge) = authz.attempted_challenge() else {
                continue;
            };
            let validated_at = challenge.validated_at.unwrap_or(now);
            if validated_at > bound {
                continue;
            }
            rechecked += 1;
            if let Some(problem) = self
                .va
                .is_caa_valid(&authz.identifier.value, challenge.challenge_type, None)
                .await
            {
                sub_errors.push(SubError {
                    identifier: authz.identifier.clone(),
                    kind: ErrorKind::Caa,
                    detail: problem.detail,
                });
            }
        }
        tracing::info!(
            target: "audit",
            event = "finalizationCaaCheck",
            requester = order.registration_id,
            reused = authzs.len() - rechecked,
            rechecked,
            "CAA recheck complete"
        );
        if !sub_errors.is_empty() {
            let names: Vec<&str> = sub_errors
                .iter()
                .map(|sub| sub.identifier.value.as_str())
                .collect();
            return Err(CaError::caa(
                format!("rechecking CAA for {} failed", names.join(", ")),
                sub_errors,
            ));
        }
        Ok(())
    }

    // -- deactivations --

    pub async fn deactivate_registration(&self, registration_id: i64) -> Result<()> {
        self.sa.deactivate_registration(registration_id).await
    }

    pub async fn deactivate_authorization(
        &self,
        registration_id: i64,
        authorization_id: i64,
    ) -> Result<()> {
        let authz = self.sa.get_authorization(authorization_id).await?;
        if authz.registration_id != registration_id {
            return Err(CaError::unauthorized(
                "authorization belongs to another account",
            ));
        }
        self.sa.deactivate_authorization(authorization_id).await
    }
}

/// The problem-document token for an error kind
pub(crate) fn kind_token(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Malformed => "malformed",
        ErrorKind::Unauthorized => "unauthorized",
        ErrorKind::NotFound => "notFound",
        ErrorKind::AlreadyRevoked => "alreadyRevoked",
        ErrorKind::RateLimit => "rateLimited",
        ErrorKind::Caa => "caa",
        ErrorKind::Dns => "dns",
        ErrorKind::Connection => "connection",
        ErrorKind::RejectedIdentifier => "rejectedIdentifier",
        ErrorKind::BadPublicKey => "badPublicKey",
        ErrorKind::BadCsr => "badCSR",
        ErrorKind::MissingScts => "serverInternal",
        ErrorKind::InternalServer => "serverInternal",
    }
}
