/// DNS-01 challenge verification.
use crate::error::{CaError, Result};
use crate::types::{ValidationRecord, key_authorization_digest};
use crate::va::resolver::DnsResolver;
use std::sync::Arc;

pub struct Dns01Verifier {
    resolver: Arc<dyn DnsResolver>,
}

impl Dns01Verifier {
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self { resolver }
    }

    /// Look for a TXT record at `_acme-challenge.{domain}` equal to the
    /// base64url SHA-256 of the key authorization. The domain reaching
    /// here already has any wildcard label stripped.
    pub async fn verify(
        &self,
        domain: &str,
        expected_key_authorization: &str,
    ) -> (Vec<ValidationRecord>, Result<()>) {
        let query = format!("_acme-challenge.{}", domain);
        let expected = key_authorization_digest(expected_key_authorization);

        let record = ValidationRecord {
            hostname: domain.to_string(),
            addresses_resolved: vec![],
            address_used: None,
            url: query.clone(),
            port: 53,
            response_codes: vec![],
        };

        let found = match self.resolver.lookup_txt(&query).await {
            Ok(found) => found,
            Err(e) => return (vec![record], Err(e)),
        };
        if found.is_empty() {
            return (
                vec![record],
                Err(CaError::unauthorized(format!(
                    "no TXT records found at {}",
                    query
                ))),
            );
        }
        if found.iter().any(|txt| *txt == expected) {
            return (vec![record], Ok(()));
        }
        (
            vec![record],
            Err(CaError::unauthorized(format!(
                "no TXT record at {} matched the key authorization digest ({} found)",
                query,
                found.len()
            ))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::va::resolver::MockDnsResolver;

    #[tokio::test]
    async fn matches_digest() {
        let resolver = Arc::new(MockDnsResolver::new());
        let key_authz = "token.thumbprint";
        resolver
            .add_txt("_acme-challenge.a.com", &key_authorization_digest(key_authz))
            .await;

        let verifier = Dns01Verifier::new(resolver);
        let (records, outcome) = verifier.verify("a.com", key_authz).await;
        assert!(outcome.is_ok());
        assert_eq!(records[0].url, "_acme-challenge.a.com");
    }

    #[tokio::test]
    async fn wrong_value_fails() {
        let resolver = Arc::new(MockDnsResolver::new());
        resolver.add_txt("_acme-challenge.a.com", "not-the-digest").await;

        let verifier = Dns01Verifier::new(resolver);
        let (_, outcome) = verifier.verify("a.com", "token.thumbprint").await;
        assert_eq!(
            outcome.unwrap_err().kind(),
            crate::error::ErrorKind::Unauthorized
        );
    }

    #[tokio::test]
    async fn missing_record_fails() {
        let verifier = Dns01Verifier::new(Arc::new(MockDnsResolver::new()));
        let (_, outcome) = verifier.verify("a.com", "token.thumbprint").await;
        assert!(outcome.is_err());
    }
}
