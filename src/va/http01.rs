/// HTTP-01 challenge verification.
///
/// The probe resolves the target itself and dials one address per hop so
/// every step lands in the validation records, rather than letting the
/// HTTP client follow redirects invisibly.
use crate::config::VaConfig;
use crate::error::{CaError, Result};
use crate::features::Features;
use crate::types::ValidationRecord;
use crate::va::resolver::DnsResolver;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

/// Bytes of response body read before giving up on a comparison
const MAX_BODY: usize = 128;

/// The ports a redirect chain is allowed to land on
const ALLOWED_PORTS: [u16; 2] = [80, 443];

pub struct Http01Verifier {
    resolver: Arc<dyn DnsResolver>,
    config: VaConfig,
    features: Features,
}

impl Http01Verifier {
    pub fn new(resolver: Arc<dyn DnsResolver>, config: VaConfig, features: Features) -> Self {
        Self {
            resolver,
            config,
            features,
        }
    }

    /// Fetch `http://{domain}/.well-known/acme-challenge/{token}` and
    /// compare the body against the expected key authorization.
    pub async fn verify(
        &self,
        domain: &str,
        token: &str,
        expected_key_authorization: &str,
    ) -> (Vec<ValidationRecord>, Result<()>) {
        let mut records = Vec::new();
        let mut url = format!("http://{}/.well-known/acme-challenge/{}", domain, token);

        for _hop in 0..=self.config.max_redirects {
            let (host, port, scheme) = match split_url(&url) {
                Ok(parts) => parts,
                Err(e) => return (records, Err(e)),
            };
            if !ALLOWED_PORTS.contains(&port) {
                return (
                    records,
                    Err(CaError::connection(format!(
                        "redirect to disallowed port {} in {}",
                        port, url
                    ))),
                );
            }

            let ips = match self.resolver.lookup_ips(&host).await {
                Ok(ips) => ips,
                Err(e) => return (records, Err(e)),
            };
            if let Some(ip) = ips
                .iter()
                .find(|ip| address_is_reserved(**ip) && !self.features.allow_internal_addresses)
            {
                return (
                    records,
                    Err(CaError::connection(format!(
                        "{} resolves to reserved address {}",
                        host, ip
                    ))),
                );
            }
            let address = ips[0];

            let mut record = ValidationRecord {
                hostname: host.clone(),
                addresses_resolved: ips.clone(),
                address_used: Some(address),
                url: url.clone(),
                port,
                response_codes: vec![],
            };

            let response = match self.fetch(&url, &host, address, port, scheme).await {
                Ok(response) => response,
                Err(e) => {
                    records.push(record);
                    return (records, Err(e));
                }
            };
            let status = response.status().as_u16();
            record.response_codes.push(status);

            if response.status().is_redirection() {
                let Some(location) = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|l| l.to_str().ok())
                    .map(String::from)
                else {
                    records.push(record);
                    return (
                        records,
                        Err(CaError::connection(format!(
                            "{} returned a redirect with no Location",
                            url
                        ))),
                    );
                };
                records.push(record);
                url = resolve_location(&url, &location);
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return (
                        records,
                        Err(CaError::connection(format!(
                            "redirect to disallowed scheme in {}",
                            url
                        ))),
                    );
                }
                continue;
            }

            if status != 200 {
                records.push(record);
                return (
                    records,
                    Err(CaError::unauthorized(format!(
                        "fetching {}: status {}",
                        url, status
                    ))),
                );
            }

            let body = match response.bytes().await {
                Ok(body) => body,
                Err(e) => {
                    records.push(record);
                    return (
                        records,
                        Err(CaError::connection(format!("reading body from {}: {}", url, e))),
                    );
                }
            };
            records.push(record);
            let body = String::from_utf8_lossy(&body[..body.len().min(MAX_BODY)])
                .trim_end()
                .to_string();
            if body != expected_key_authorization {
                return (
                    records,
                    Err(CaError::unauthorized(format!(
                        "key authorization mismatch: expected \"{}\", got \"{}\"",
                        expected_key_authorization, body
                    ))),
                );
            }
            return (records, Ok(()));
        }

        (
            records,
            Err(CaError::connection(format!(
                "too many redirects (limit {})",
                self.config.max_redirects
            ))),
        )
    }

    async fn fetch(
        &self,
        url: &str,
        host: &str,
        address: IpAddr,
        port: u16,
        _scheme: &str,
    ) -> Result<reqwest::Response> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .resolve(host, SocketAddr::new(address, port))
            .timeout(Duration::from_secs(self.config.validation_timeout_secs))
            .user_agent(self.config.user_agent.clone())
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| CaError::internal(format!("building probe client: {}", e)))?;
        client
            .get(url)
            .send()
            .await
            .map_err(|e| CaError::connection(format!("fetching {}: {}", url, e)))
    }
}

/// Pull (host, port, scheme) out of a URL without a full parser
fn split_url(url: &str) -> Result<(String, u16, &str)> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| CaError::connection(format!("unparseable URL {}", url)))?;
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        other => {
            return Err(CaError::connection(format!(
                "disallowed scheme \"{}\"",
                other
            )));
        }
    };
    let authority = rest.split(['/', '?']).next().unwrap_or(rest);
    match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() => {
            let port = port
                .parse::<u16>()
                .map_err(|_| CaError::connection(format!("bad port in {}", url)))?;
            Ok((host.to_ascii_lowercase(), port, scheme))
        }
        _ => Ok((authority.to_ascii_lowercase(), default_port, scheme)),
    }
}

/// Join a Location header against the current URL
fn resolve_location(current: &str, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        return location.to_string();
    }
    if let Some(rest) = location.strip_prefix('/')
        && let Some((scheme, tail)) = current.split_once("://")
    {
        let authority = tail.split('/').next().unwrap_or(tail);
        return format!("{}://{}/{}", scheme, authority, rest);
    }
    location.to_string()
}

/// Loopback, private, link-local, and unspecified space is refused
pub(crate) fn address_is_reserved(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_splitting() {
        assert_eq!(
            split_url("http://a.example.com/.well-known/acme-challenge/tok").unwrap(),
            ("a.example.com".to_string(), 80, "http")
        );
        assert_eq!(
            split_url("https://A.example.com:443/x").unwrap(),
            ("a.example.com".to_string(), 443, "https")
        );
        assert!(split_url("ftp://a.example.com/x").is_err());
    }

    #[test]
    fn location_resolution() {
        assert_eq!(
            resolve_location("http://a.com/x", "https://b.com/y"),
            "https://b.com/y"
        );
        assert_eq!(
            resolve_location("http://a.com/x/y", "/z"),
            "http://a.com/z"
        );
    }

    #[test]
    fn reserved_addresses() {
        assert!(address_is_reserved("127.0.0.1".parse().unwrap()));
        assert!(address_is_reserved("10.1.2.3".parse().unwrap()));
        assert!(address_is_reserved("::1".parse().unwrap()));
        assert!(address_is_reserved("fd00::1".parse().unwrap()));
        assert!(!address_is_reserved("192.0.2.1".parse().unwrap()));
        assert!(!address_is_reserved("2001:db8::1".parse().unwrap()));
    }
}
