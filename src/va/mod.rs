//! Validation authority: executes single challenge attempts and CAA checks.
//!
//! The VA owns no state. Every call probes the subscriber's infrastructure
//! once and reports what it saw; the RA decides what the outcome means for
//! the authorization.

pub mod caa;
pub mod dns01;
pub mod http01;
pub mod resolver;
pub mod tlsalpn01;

use crate::config::VaConfig;
use crate::error::CaError;
use crate::features::Features;
use crate::metrics::SharedMetrics;
use crate::types::{ChallengeType, Identifier, ProblemDetail, ValidationRecord, key_authorization};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use resolver::{DnsResolver, HickoryDnsResolver, MockDnsResolver};

/// A single validation attempt
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    pub authorization_id: i64,
    pub identifier: Identifier,
    pub challenge_type: ChallengeType,
    pub token: String,
    /// The requesting account's JWK thumbprint, for key authorizations
    pub account_thumbprint: String,
}

/// What a validation attempt observed
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub records: Vec<ValidationRecord>,
    pub problem: Option<ProblemDetail>,
}

impl ValidationResult {
    pub fn passed(&self) -> bool {
        self.problem.is_none()
    }
}

/// The VA surface, implemented by the local VA and by handles to remote
/// perspectives.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Execute one challenge attempt
    async fn perform_validation(&self, request: &ValidationRequest) -> ValidationResult;

    /// Check CAA for a single domain. None means issuance is permitted.
    async fn is_caa_valid(
        &self,
        domain: &str,
        validation_method: ChallengeType,
        account_uri: Option<&str>,
    ) -> Option<ProblemDetail>;
}

/// The local validation authority, optionally fronting remote perspectives
pub struct ValidationAuthority {
    http01: http01::Http01Verifier,
    dns01: dns01::Dns01Verifier,
    tlsalpn01: tlsalpn01::TlsAlpn01Verifier,
    caa: caa::CaaChecker,
    remotes: Vec<Arc<dyn Validator>>,
    config: VaConfig,
    features: Features,
    metrics: SharedMetrics,
}

impl ValidationAuthority {
    pub fn new(
        resolver: Arc<dyn DnsResolver>,
        remotes: Vec<Arc<dyn Validator>>,
        config: VaConfig,
        features: Features,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            http01: http01::Http01Verifier::new(resolver.clone(), config.clone(), features),
            dns01: dns01::Dns01Verifier::new(resolver.clone()),
            tlsalpn01: tlsalpn01::TlsAlpn01Verifier::new(resolver.clone(), config.clone(), features),
            caa: caa::CaaChecker::new(resolver, config.clone()),
            remotes,
            config,
            features,
            metrics,
        }
    }

    async fn validate_locally(&self, request: &ValidationRequest) -> ValidationResult {
        let domain = request.identifier.base_name().to_string();
        let key_authz = key_authorization(&request.token, &request.account_thumbprint);

        if request.identifier.is_wildcard() && request.challenge_type != ChallengeType::Dns01 {
            return ValidationResult {
                records: vec![],
                problem: Some(ProblemDetail::new(
                    "malformed",
                    format!(
                        "wildcard identifiers can only be validated with dns-01, not {}",
                        request.challenge_type
                    ),
                )),
            };
        }

        let (records, outcome) = match request.challenge_type {
            ChallengeType::Http01 => self.http01.verify(&domain, &request.token, &key_authz).await,
            ChallengeType::Dns01 => self.dns01.verify(&domain, &key_authz).await,
            ChallengeType::TlsAlpn01 => self.tlsalpn01.verify(&domain, &key_authz).await,
        };
        ValidationResult {
            records,
            problem: outcome.err().map(|e| problem_from_error(&e)),
        }
    }

    /// Query every remote perspective in parallel and count how many
    /// actively disagree with a passing local result.
    async fn corroborate(&self, request: &ValidationRequest) -> Option<ProblemDetail> {
        if self.remotes.is_empty() {
            return None;
        }
        let timeout = Duration::from_secs(self.config.remote_timeout_secs);
        let mut handles = Vec::with_capacity(self.remotes.len());
        for remote in &self.remotes {
            let remote = remote.clone();
            let request = request.clone();
            handles.push(tokio::spawn(async move {
                tokio::time::timeout(timeout, remote.perform_validation(&request)).await
            }));
        }

        let mut disagreements = 0usize;
        let mut timeouts = 0usize;
        for handle in handles {
            match handle.await {
                Ok(Ok(result)) if result.passed() => {}
                Ok(Ok(_)) => disagreements += 1,
                // a perspective that never answered is only counted under
                // strict majority
                Ok(Err(_)) | Err(_) => timeouts += 1,
            }
        }
        let counted = if self.features.enforce_multi_va {
            disagreements + timeouts
        } else {
            disagreements
        };
        if counted > self.config.max_remote_failures {
            tracing::warn!(
                authz = request.authorization_id,
                disagreements,
                timeouts,
                "remote perspectives rejected a locally passing validation"
            );
            return Some(ProblemDetail::new(
                "unauthorized",
                format!(
                    "validation failed from {} of {} remote perspectives",
                    counted,
                    self.remotes.len()
                ),
            ));
        }
        None
    }
}

#[async_trait]
impl Validator for ValidationAuthority {
    async fn perform_validation(&self, request: &ValidationRequest) -> ValidationResult {
        tracing::info!(
            authz = request.authorization_id,
            identifier = %request.identifier,
            challenge = %request.challenge_type,
            "performing validation"
        );
        let mut result = self.validate_locally(request).await;
        if result.passed()
            && let Some(problem) = self.corroborate(request).await
        {
            result.problem = Some(problem);
        }

        let outcome = if result.passed() { "valid" } else { "invalid" };
        self.metrics
            .validations
            .with_label_values(&[request.challenge_type.as_str(), outcome])
            .inc();
        tracing::info!(outcome, records = result.records.len(), "validation finished");
        result
    }

    async fn is_caa_valid(
        &self,
        domain: &str,
        validation_method: ChallengeType,
        account_uri: Option<&str>,
    ) -> Option<ProblemDetail> {
        match self.caa.check(domain, validation_method, account_uri).await {
            Ok(problem) => problem,
            Err(e) => Some(problem_from_error(&e)),
        }
    }
}

/// Flatten an error into the problem detail recorded on a challenge
fn problem_from_error(err: &CaError) -> ProblemDetail {
    use crate::error::ErrorKind::*;
    let kind = match err.kind() {
        Dns => "dns",
        Connection => "connection",
        Unauthorized => "unauthorized",
        Malformed => "malformed",
        Caa => "caa",
        _ => "serverInternal",
    };
    ProblemDetail::new(kind, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsRegistry;
    use crate::types::key_authorization_digest;

    /// Remote perspective with a scripted answer
    struct ScriptedRemote {
        passes: bool,
        hangs: bool,
    }

    #[async_trait]
    impl Validator for ScriptedRemote {
        async fn perform_validation(&self, _request: &ValidationRequest) -> ValidationResult {
            if self.hangs {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            ValidationResult {
                records: vec![],
                problem: (!self.passes)
                    .then(|| ProblemDetail::new("unauthorized", "remote disagrees")),
            }
        }

        async fn is_caa_valid(
            &self,
            _domain: &str,
            _validation_method: ChallengeType,
            _account_uri: Option<&str>,
        ) -> Option<ProblemDetail> {
            None
        }
    }

    fn va_with_remotes(
        resolver: Arc<MockDnsResolver>,
        remotes: Vec<Arc<dyn Validator>>,
        features: Features,
    ) -> ValidationAuthority {
        let mut config = VaConfig::default();
        config.remote_timeout_secs = 1;
        config.max_remote_failures = 0;
        ValidationAuthority::new(
            resolver,
            remotes,
            config,
            features,
            Arc::new(MetricsRegistry::new()),
        )
    }

    fn dns_request() -> ValidationRequest {
        ValidationRequest {
            authorization_id: 1,
            identifier: Identifier::dns("a.example.com"),
            challenge_type: ChallengeType::Dns01,
            token: "tok".to_string(),
            account_thumbprint: "print".to_string(),
        }
    }

    async fn seed_passing_dns(resolver: &MockDnsResolver) {
        resolver
            .add_txt(
                "_acme-challenge.a.example.com",
                &key_authorization_digest(&key_authorization("tok", "print")),
            )
            .await;
    }

    #[tokio::test]
    async fn local_dns01_validation() {
        let resolver = Arc::new(MockDnsResolver::new());
        seed_passing_dns(&resolver).await;
        let va = va_with_remotes(resolver, vec![], Features::default());
        let result = va.perform_validation(&dns_request()).await;
        assert!(result.passed());
        assert_eq!(result.records.len(), 1);
    }

    #[tokio::test]
    async fn wildcard_refuses_http01() {
        let va = va_with_remotes(
            Arc::new(MockDnsResolver::new()),
            vec![],
            Features::default(),
        );
        let mut request = dns_request();
        request.identifier = Identifier::dns("*.zombo.com");
        request.challenge_type = ChallengeType::Http01;
        let result = va.perform_validation(&request).await;
        assert_eq!(result.problem.unwrap().kind, "malformed");
    }

    #[tokio::test]
    async fn remote_disagreement_overrides_local_pass() {
        let resolver = Arc::new(MockDnsResolver::new());
        seed_passing_dns(&resolver).await;
        let remotes: Vec<Arc<dyn Validator>> = vec![
            Arc::new(ScriptedRemote { passes: false, hangs: false }),
            Arc::new(ScriptedRemote { passes: true, hangs: false }),
        ];
        let va = va_with_remotes(resolver, remotes, Features::default());
        let result = va.perform_validation(&dns_request()).await;
        assert!(!result.passed());
    }

    #[tokio::test]
    async fn remote_timeout_ignored_without_enforcement() {
        let resolver = Arc::new(MockDnsResolver::new());
        seed_passing_dns(&resolver).await;
        let remotes: Vec<Arc<dyn Validator>> =
            vec![Arc::new(ScriptedRemote { passes: true, hangs: true })];
        let va = va_with_remotes(resolver, remotes, Features::default());
        let result = va.perform_validation(&dns_request()).await;
        assert!(result.passed());
    }

    #[tokio::test]
    async fn remote_timeout_counts_under_strict_majority() {
        let resolver = Arc::new(MockDnsResolver::new());
        seed_passing_dns(&resolver).await;
        let remotes: Vec<Arc<dyn Validator>> =
            vec![Arc::new(ScriptedRemote { passes: true, hangs: true })];
        let features = Features {
            enforce_multi_va: true,
            ..Features::default()
        };
        let va = va_with_remotes(resolver, remotes, features);
        let result = va.perform_validation(&dns_request()).await;
        assert!(!result.passed());
    }
}
