//! Lint gate: a to-be-signed certificate is signed with a throwaway key,
//! parsed back, and run through a ruleset before the real issuer ever
//! signs. Any finding above notice severity aborts issuance unless the
//! lint is explicitly ignored by name.

use crate::error::{CaError, Result};
use jiff::Timestamp;
use std::collections::HashSet;
use x509_parser::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Notice,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct LintFinding {
    /// Stable lint name, usable in the ignore list
    pub lint: &'static str,
    pub severity: Severity,
    pub detail: String,
}

/// What the lint ruleset expects of every leaf this CA signs
#[derive(Debug, Clone)]
pub struct ExpectedProfile {
    /// Acceptable validity periods in seconds, inclusive of the final second
    pub validity_periods_secs: Vec<u64>,
    pub max_names: usize,
}

pub struct CertificateLinter {
    ignored: HashSet<String>,
    profile: ExpectedProfile,
}

impl CertificateLinter {
    pub fn new(ignored_lints: &[String], profile: ExpectedProfile) -> Self {
        Self {
            ignored: ignored_lints.iter().cloned().collect(),
            profile,
        }
    }

    /// Run the ruleset over a candidate certificate in DER form.
    pub fn check(&self, der: &[u8]) -> Result<()> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| CaError::internal(format!("parsing lint candidate: {}", e)))?;

        let mut findings = Vec::new();
        self.lint_validity(&cert, &mut findings);
        self.lint_serial(&cert, &mut findings);
        self.lint_names(&cert, &mut findings);
        self.lint_key_usage(&cert, &mut findings);

        let blocking: Vec<&LintFinding> = findings
            .iter()
            .filter(|f| f.severity > Severity::Notice && !self.ignored.contains(f.lint))
            .collect();
        for finding in &findings {
            tracing::debug!(lint = finding.lint, ?finding.severity, "{}", finding.detail);
        }
        if let Some(first) = blocking.first() {
            return Err(CaError::internal(format!(
                "lint {} blocked issuance: {} ({} finding(s) total)",
                first.lint,
                first.detail,
                blocking.len()
            )));
        }
        Ok(())
    }

    fn lint_validity(&self, cert: &X509Certificate<'_>, findings: &mut Vec<LintFinding>) {
        let not_before = cert.validity().not_before.timestamp();
        let not_after = cert.validity().not_after.timestamp();
        // notAfter is inclusive, so the period covers one extra second
        let period = (not_after - not_before + 1) as u64;
        if !self.profile.validity_periods_secs.contains(&period) {
            findings.push(LintFinding {
                lint: "e_validity_period",
                severity: Severity::Error,
                detail: format!(
                    "validity of {}s is not an acceptable period {:?}",
                    period, self.profile.validity_periods_secs
                ),
            });
        }
    }

    fn lint_serial(&self, cert: &X509Certificate<'_>, findings: &mut Vec<LintFinding>) {
        let serial = cert.raw_serial();
        if serial.len() != 20 {
            findings.push(LintFinding {
                lint: "e_serial_length",
                severity: Severity::Error,
                detail: format!("serial is {} bytes, want 20", serial.len()),
            });
        }
        if serial.first().map(|b| b & 0x80 != 0).unwrap_or(true) {
            findings.push(LintFinding {
                lint: "e_serial_negative",
                severity: Severity::Error,
                detail: "serial would encode as a negative INTEGER".to_string(),
            });
        }
    }

    fn lint_names(&self, cert: &X509Certificate<'_>, findings: &mut Vec<LintFinding>) {
        let san: Vec<String> = cert
            .subject_alternative_name()
            .ok()
            .flatten()
            .map(|ext| {
                ext.value
                    .general_names
                    .iter()
                    .filter_map(|name| match name {
                        GeneralName::DNSName(dns) => Some(dns.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        if san.is_empty() {
            findings.push(LintFinding {
                lint: "e_san_missing",
                severity: Severity::Error,
                detail: "certificate has no DNS subjectAltName".to_string(),
            });
            return;
        }
        if san.len() > self.profile.max_names {
            findings.push(LintFinding {
                lint: "e_san_count",
                severity: Severity::Error,
                detail: format!("{} SAN entries exceed the {} limit", san.len(), self.profile.max_names),
            });
        }
        if let Some(cn) = cert.subject().iter_common_name().next()
            && let Ok(cn) = cn.as_str()
            && !san.iter().any(|name| name == cn)
        {
            findings.push(LintFinding {
                lint: "e_cn_not_in_san",
                severity: Severity::Error,
                detail: format!("CommonName {} is missing from the SAN set", cn),
            });
        }
    }

    fn lint_key_usage(&self, cert: &X509Certificate<'_>, findings: &mut Vec<LintFinding>) {
        match cert.key_usage() {
            Ok(Some(key_usage)) => {
                if !key_usage.value.digital_signature() {
                    findings.push(LintFinding {
                        lint: "e_key_usage",
                        severity: Severity::Error,
                        detail: "keyUsage lacks digitalSignature".to_string(),
                    });
                }
            }
            _ => findings.push(LintFinding {
                lint: "e_key_usage_missing",
                severity: Severity::Warn,
                detail: "certificate has no keyUsage extension".to_string(),
            }),
        }
        match cert.extended_key_usage() {
            Ok(Some(eku)) => {
                if !eku.value.server_auth || !eku.value.client_auth {
                    findings.push(LintFinding {
                        lint: "e_eku",
                        severity: Severity::Error,
                        detail: "extendedKeyUsage must be exactly serverAuth + clientAuth"
                            .to_string(),
                    });
                }
            }
            _ => findings.push(LintFinding {
                lint: "e_eku_missing",
                severity: Severity::Error,
                detail: "certificate has no extendedKeyUsage".to_string(),
            }),
        }
    }
}

/// Timestamps from the linted certificate, handy for callers that need
/// to cross-check what was actually encoded.
pub fn encoded_validity(der: &[u8]) -> Result<(Timestamp, Timestamp)> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| CaError::internal(format!("parsing certificate: {}", e)))?;
    let not_before = Timestamp::from_second(cert.validity().not_before.timestamp())
        .map_err(|e| CaError::internal(format!("notBefore out of range: {}", e)))?;
    let not_after = Timestamp::from_second(cert.validity().not_after.timestamp())
        .map_err(|e| CaError::internal(format!("notAfter out of range: {}", e)))?;
    Ok((not_before, not_after))
}
