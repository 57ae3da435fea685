/// DNS seam for the validation authority.
///
/// Production resolves through hickory; tests drive validation against an
/// in-memory resolver seeded with exactly the records a scenario needs.
use crate::error::{CaError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One CAA record, decoupled from the resolver's wire types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaaRecord {
    /// Issuer-critical flag
    pub critical: bool,
    /// Property tag: issue, issuewild, iodef, or an unknown extension
    pub tag: String,
    /// Property value, e.g. `ca.example.net; accounturi=https://...`
    pub value: String,
}

/// Trait for DNS lookups during validation
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// TXT records at the given name, one string per record
    async fn lookup_txt(&self, fqdn: &str) -> Result<Vec<String>>;

    /// A and AAAA records, IPv6 first
    async fn lookup_ips(&self, fqdn: &str) -> Result<Vec<IpAddr>>;

    /// CAA records at exactly this name. Empty means "no records", which
    /// differs from a lookup failure (DNSSEC breakage is reported as Err)
    async fn lookup_caa(&self, fqdn: &str) -> Result<Vec<CaaRecord>>;
}

/// Production resolver over hickory
pub struct HickoryDnsResolver {
    resolver: hickory_resolver::TokioResolver,
}

impl HickoryDnsResolver {
    /// Resolver using the system configuration
    pub fn system() -> Result<Self> {
        let resolver = hickory_resolver::Resolver::builder_tokio()
            .map_err(|e| CaError::internal(format!("building resolver: {}", e)))?
            .build();
        Ok(Self { resolver })
    }
}

fn is_no_records(err: &hickory_resolver::ResolveError) -> bool {
    use hickory_resolver::ResolveErrorKind;
    use hickory_resolver::proto::ProtoErrorKind;
    match err.kind() {
        ResolveErrorKind::Proto(proto) => {
            matches!(proto.kind(), ProtoErrorKind::NoRecordsFound { .. })
        }
        _ => false,
    }
}

#[async_trait]
impl DnsResolver for HickoryDnsResolver {
    async fn lookup_txt(&self, fqdn: &str) -> Result<Vec<String>> {
        match self.resolver.txt_lookup(fqdn).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|txt| {
                    txt.iter()
                        .map(|part| String::from_utf8_lossy(part).into_owned())
                        .collect::<String>()
                })
                .collect()),
            Err(e) if is_no_records(&e) => Ok(vec![]),
            Err(e) => Err(CaError::dns(format!("looking up TXT for {}: {}", fqdn, e))),
        }
    }

    async fn lookup_ips(&self, fqdn: &str) -> Result<Vec<IpAddr>> {
        let mut ips = Vec::new();
        match self.resolver.ipv6_lookup(fqdn).await {
            Ok(lookup) => ips.extend(lookup.iter().map(|aaaa| IpAddr::V6(aaaa.0))),
            Err(e) if is_no_records(&e) => {}
            Err(e) => return Err(CaError::dns(format!("looking up AAAA for {}: {}", fqdn, e))),
        }
        match self.resolver.ipv4_lookup(fqdn).await {
            Ok(lookup) => ips.extend(lookup.iter().map(|a| IpAddr::V4(a.0))),
            Err(e) if is_no_records(&e) => {}
            Err(e) => return Err(CaError::dns(format!("looking up A for {}: {}", fqdn, e))),
        }
        if ips.is_empty() {
            return Err(CaError::dns(format!("no address records for {}", fqdn)));
        }
        Ok(ips)
    }

    async fn lookup_caa(&self, fqdn: &str) -> Result<Vec<CaaRecord>> {
        use hickory_resolver::proto::rr::{RecordType, rdata::caa::Value};

        let lookup = match self
            .resolver
            .lookup(fqdn, RecordType::CAA)
            .await
        {
            Ok(lookup) => lookup,
            Err(e) if is_no_records(&e) => return Ok(vec![]),
            Err(e) => {
                return Err(CaError::dns(format!("looking up CAA for {}: {}", fqdn, e)));
            }
        };

        let mut records = Vec::new();
        for rdata in lookup.iter() {
            let Some(caa) = rdata.as_caa() else { continue };
            let value = match caa.value() {
                Value::Issuer(issuer, params) => {
                    let mut out = issuer
                        .as_ref()
                        .map(|name| name.to_string().trim_end_matches('.').to_string())
                        .unwrap_or_default();
                    for param in params {
                        out.push_str("; ");
                        out.push_str(&param.to_string());
                    }
                    out
                }
                Value::Url(url) => url.to_string(),
                Value::Unknown(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            };
            records.push(CaaRecord {
                critical: caa.issuer_critical(),
                tag: caa.tag().to_string(),
                value,
            });
        }
        Ok(records)
    }
}

/// In-memory resolver for tests
#[derive(Default)]
pub struct MockDnsResolver {
    inner: Arc<RwLock<MockZones>>,
}

#[derive(Default)]
struct MockZones {
    txt: HashMap<String, Vec<String>>,
    ips: HashMap<String, Vec<IpAddr>>,
    caa: HashMap<String, Vec<CaaRecord>>,
    /// Names whose CAA lookup fails as if DNSSEC were broken
    caa_broken: Vec<String>,
}

impl MockDnsResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_txt(&self, fqdn: &str, value: &str) {
        let mut zones = self.inner.write().await;
        zones
            .txt
            .entry(fqdn.to_string())
            .or_default()
            .push(value.to_string());
    }

    pub async fn add_ip(&self, fqdn: &str, ip: IpAddr) {
        let mut zones = self.inner.write().await;
        zones.ips.entry(fqdn.to_string()).or_default().push(ip);
    }

    pub async fn add_caa(&self, fqdn: &str, tag: &str, value: &str) {
        let mut zones = self.inner.write().await;
        zones.caa.entry(fqdn.to_string()).or_default().push(CaaRecord {
            critical: false,
            tag: tag.to_string(),
            value: value.to_string(),
        });
    }

    pub async fn add_caa_record(&self, fqdn: &str, record: CaaRecord) {
        let mut zones = self.inner.write().await;
        zones.caa.entry(fqdn.to_string()).or_default().push(record);
    }

    pub async fn break_caa(&self, fqdn: &str) {
        let mut zones = self.inner.write().await;
        zones.caa_broken.push(fqdn.to_string());
    }
}

#[async_trait]
impl DnsResolver for MockDnsResolver {
    async fn lookup_txt(&self, fqdn: &str) -> Result<Vec<String>> {
        let zones = self.inner.read().await;
        Ok(zones.txt.get(fqdn).cloned().unwrap_or_default())
    }

    async fn lookup_ips(&self, fqdn: &str) -> Result<Vec<IpAddr>> {
        let zones = self.inner.read().await;
        match zones.ips.get(fqdn) {
            Some(ips) if !ips.is_empty() => Ok(ips.clone()),
            _ => Err(CaError::dns(format!("no address records for {}", fqdn))),
        }
    }

    async fn lookup_caa(&self, fqdn: &str) -> Result<Vec<CaaRecord>> {
        let zones = self.inner.read().await;
        if zones.caa_broken.iter().any(|name| name == fqdn) {
            return Err(CaError::dns(format!(
                "SERVFAIL looking up CAA for {} (possible DNSSEC failure)",
                fqdn
            )));
        }
        Ok(zones.caa.get(fqdn).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_round_trip() {
        let resolver = MockDnsResolver::new();
        resolver.add_txt("_acme-challenge.a.com", "digest").await;
        resolver.add_ip("a.com", "192.0.2.1".parse().unwrap()).await;
        resolver.add_caa("a.com", "issue", "ca.example.net").await;

        assert_eq!(
            resolver.lookup_txt("_acme-challenge.a.com").await.unwrap(),
            vec!["digest"]
        );
        assert_eq!(resolver.lookup_ips("a.com").await.unwrap().len(), 1);
        assert_eq!(resolver.lookup_caa("a.com").await.unwrap().len(), 1);
        assert!(resolver.lookup_ips("missing.com").await.is_err());
        assert!(resolver.lookup_caa("missing.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn broken_caa_is_an_error_not_empty() {
        let resolver = MockDnsResolver::new();
        resolver.break_caa("bad.com").await;
        assert!(resolver.lookup_caa("bad.com").await.is_err());
        assert!(resolver.lookup_caa("good.com").await.unwrap().is_empty());
    }
}
