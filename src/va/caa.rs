/// CAA enforcement per RFC 8659, with the ACME extensions from RFC 8657
/// (validationmethods and accounturi parameters).
use crate::config::VaConfig;
use crate::error::Result;
use crate::types::{ChallengeType, ProblemDetail};
use crate::va::resolver::{CaaRecord, DnsResolver};
use std::sync::Arc;

pub struct CaaChecker {
    resolver: Arc<dyn DnsResolver>,
    config: VaConfig,
}

/// The parsed form of an issue/issuewild property value
#[derive(Debug, Clone, Default, PartialEq)]
struct IssueValue {
    /// Issuer domain; empty means "no CA may issue"
    issuer: String,
    /// `param=value` pairs after the issuer domain
    parameters: Vec<(String, String)>,
}

fn parse_issue_value(value: &str) -> IssueValue {
    let mut parts = value.split(';');
    let issuer = parts.next().unwrap_or("").trim().to_ascii_lowercase();
    let parameters = parts
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            Some((key.trim().to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect();
    IssueValue { issuer, parameters }
}

impl CaaChecker {
    pub fn new(resolver: Arc<dyn DnsResolver>, config: VaConfig) -> Self {
        Self { resolver, config }
    }

    /// Check CAA for a domain. Returns None when issuance is permitted.
    ///
    /// The name and all its ancestors up to the registrable parent are
    /// consulted; per RFC 8659 the first name with any CAA records is
    /// authoritative for the whole check.
    pub async fn check(
        &self,
        domain: &str,
        validation_method: ChallengeType,
        account_uri: Option<&str>,
    ) -> Result<Option<ProblemDetail>> {
        let (is_wildcard, base) = match domain.strip_prefix("*.") {
            Some(base) => (true, base),
            None => (false, domain),
        };

        let mut lookup_target = base.to_string();
        loop {
            let records = match self.resolver.lookup_caa(&lookup_target).await {
                Ok(records) => records,
                Err(e) => {
                    // DNSSEC breakage and lookup failure both block issuance,
                    // with a detail that distinguishes them from a forbidding
                    // record set
                    return Ok(Some(ProblemDetail::new(
                        "caa",
                        format!("CAA lookup for {} failed: {}", lookup_target, e),
                    )));
                }
            };
            if !records.is_empty() {
                return Ok(self.evaluate(
                    domain,
                    &lookup_target,
                    &records,
                    is_wildcard,
                    validation_method,
                    account_uri,
                ));
            }
            match lookup_target.split_once('.') {
                Some((_, parent)) if parent.contains('.') => {
                    lookup_target = parent.to_string();
                }
                _ => return Ok(None),
            }
        }
    }

    fn evaluate(
        &self,
        domain: &str,
        record_source: &str,
        records: &[CaaRecord],
        is_wildcard: bool,
        validation_method: ChallengeType,
        account_uri: Option<&str>,
    ) -> Option<ProblemDetail> {
        // a critical property we do not understand blocks issuance
        if let Some(unknown) = records.iter().find(|r| {
            r.critical && !matches!(r.tag.as_str(), "issue" | "issuewild" | "iodef")
        }) {
            return Some(ProblemDetail::new(
                "caa",
                format!(
                    "CAA record for {} has unknown critical property \"{}\"",
                    record_source, unknown.tag
                ),
            ));
        }

        for iodef in records.iter().filter(|r| r.tag == "iodef") {
            tracing::info!(domain, report_uri = %iodef.value, "CAA iodef reporting requested");
        }

        // wildcards consult issuewild first and fall back to issue
        let relevant: Vec<&CaaRecord> = if is_wildcard {
            let wild: Vec<&CaaRecord> = records.iter().filter(|r| r.tag == "issuewild").collect();
            if wild.is_empty() {
                records.iter().filter(|r| r.tag == "issue").collect()
            } else {
                wild
            }
        } else {
            records.iter().filter(|r| r.tag == "issue").collect()
        };
        if relevant.is_empty() {
            return None;
        }

        for record in &relevant {
            let value = parse_issue_value(&record.value);
            if !self.config.caa_identities.contains(&value.issuer) {
                continue;
            }
            if let Some(allowed) = value
                .parameters
                .iter()
                .find(|(key, _)| key == "validationmethods")
                .map(|(_, methods)| methods.clone())
                && !allowed
                    .split(',')
                    .any(|m| m.trim() == validation_method.as_str())
            {
                continue;
            }
            if let Some((_, required_uri)) = value
                .parameters
                .iter()
                .find(|(key, _)| key == "accounturi")
                && account_uri != Some(required_uri.as_str())
            {
                continue;
            }
            return None;
        }

        Some(ProblemDetail::new(
            "caa",
            format!(
                "CAA record for {} (found on {}) prevents issuance for \"{}\"",
                domain, record_source, domain
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::va::resolver::MockDnsResolver;

    fn checker(resolver: Arc<MockDnsResolver>) -> CaaChecker {
        let mut config = VaConfig::default();
        config.caa_identities = vec!["ca.example.net".to_string()];
        config.account_uri_prefixes = vec!["https://ca.example.net/acme/acct/".to_string()];
        CaaChecker::new(resolver, config)
    }

    #[tokio::test]
    async fn no_records_permit_issuance() {
        let resolver = Arc::new(MockDnsResolver::new());
        let checker = checker(resolver);
        let problem = checker
            .check("a.example.com", ChallengeType::Http01, None)
            .await
            .unwrap();
        assert!(problem.is_none());
    }

    #[tokio::test]
    async fn matching_issuer_permits() {
        let resolver = Arc::new(MockDnsResolver::new());
        resolver.add_caa("example.com", "issue", "ca.example.net").await;
        let checker = checker(resolver);
        assert!(
            checker
                .check("a.example.com", ChallengeType::Http01, None)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn foreign_issuer_blocks() {
        let resolver = Arc::new(MockDnsResolver::new());
        resolver.add_caa("example.com", "issue", "other-ca.example").await;
        let checker = checker(resolver);
        let problem = checker
            .check("a.example.com", ChallengeType::Http01, None)
            .await
            .unwrap();
        assert!(problem.unwrap().detail.contains("prevents issuance"));
    }

    #[tokio::test]
    async fn closest_record_set_is_authoritative() {
        let resolver = Arc::new(MockDnsResolver::new());
        resolver.add_caa("a.example.com", "issue", "other-ca.example").await;
        resolver.add_caa("example.com", "issue", "ca.example.net").await;
        let checker = checker(resolver);
        // the subdomain's own records win over the parent's
        assert!(
            checker
                .check("a.example.com", ChallengeType::Http01, None)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn wildcard_prefers_issuewild() {
        let resolver = Arc::new(MockDnsResolver::new());
        resolver.add_caa("zombo.com", "issue", "ca.example.net").await;
        resolver.add_caa("zombo.com", "issuewild", "other-ca.example").await;
        let checker = checker(resolver);

        // wildcard: issuewild wins and blocks
        assert!(
            checker
                .check("*.zombo.com", ChallengeType::Dns01, None)
                .await
                .unwrap()
                .is_some()
        );
        // plain name: issue permits
        assert!(
            checker
                .check("www.zombo.com", ChallengeType::Http01, None)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn wildcard_falls_back_to_issue() {
        let resolver = Arc::new(MockDnsResolver::new());
        resolver.add_caa("zombo.com", "issue", "ca.example.net").await;
        let checker = checker(resolver);
        assert!(
            checker
                .check("*.zombo.com", ChallengeType::Dns01, None)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn empty_issuer_blocks_everyone() {
        let resolver = Arc::new(MockDnsResolver::new());
        resolver.add_caa("example.com", "issue", ";").await;
        let checker = checker(resolver);
        assert!(
            checker
                .check("a.example.com", ChallengeType::Http01, None)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn validationmethods_restriction() {
        let resolver = Arc::new(MockDnsResolver::new());
        resolver
            .add_caa("example.com", "issue", "ca.example.net; validationmethods=dns-01")
            .await;
        let checker = checker(resolver);
        assert!(
            checker
                .check("a.example.com", ChallengeType::Dns01, None)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            checker
                .check("a.example.com", ChallengeType::Http01, None)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn accounturi_restriction() {
        let resolver = Arc::new(MockDnsResolver::new());
        resolver
            .add_caa(
                "example.com",
                "issue",
                "ca.example.net; accounturi=https://ca.example.net/acme/acct/42",
            )
            .await;
        let checker = checker(resolver);
        assert!(
            checker
                .check(
                    "a.example.com",
                    ChallengeType::Http01,
                    Some("https://ca.example.net/acme/acct/42"),
                )
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            checker
                .check(
                    "a.example.com",
                    ChallengeType::Http01,
                    Some("https://ca.example.net/acme/acct/7"),
                )
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            checker
                .check("a.example.com", ChallengeType::Http01, None)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn lookup_failure_blocks_with_distinct_detail() {
        let resolver = Arc::new(MockDnsResolver::new());
        resolver.break_caa("example.com").await;
        let checker = checker(resolver);
        let problem = checker
            .check("a.example.com", ChallengeType::Http01, None)
            .await
            .unwrap()
            .unwrap();
        assert!(problem.detail.contains("lookup"));
        assert!(problem.detail.contains("failed"));
    }

    #[tokio::test]
    async fn unknown_critical_property_blocks() {
        use crate::va::resolver::CaaRecord;

        let resolver = Arc::new(MockDnsResolver::new());
        resolver
            .add_caa_record(
                "example.com",
                CaaRecord {
                    critical: true,
                    tag: "futureproperty".to_string(),
                    value: "whatever".to_string(),
                },
            )
            .await;
        let checker = checker(resolver);
        let problem = checker
            .check("a.example.com", ChallengeType::Http01, None)
            .await
            .unwrap();
        assert!(problem.unwrap().detail.contains("critical"));
    }

    #[tokio::test]
    async fn unknown_noncritical_property_is_ignored() {
        let resolver = Arc::new(MockDnsResolver::new());
        resolver.add_caa("example.com", "futureproperty", "whatever").await;
        let checker = checker(resolver);
        assert!(
            checker
                .check("a.example.com", ChallengeType::Http01, None)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn issue_value_parsing() {
        let parsed = parse_issue_value("ca.example.net; accounturi=https://x; validationmethods=dns-01");
        assert_eq!(parsed.issuer, "ca.example.net");
        assert_eq!(parsed.parameters.len(), 2);

        let forbid = parse_issue_value(";");
        assert_eq!(forbid.issuer, "");
    }
}
