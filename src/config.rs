//! Configuration for the issuance core.
//!
//! One TOML document configures all five components. Every section has
//! defaults so a test harness can build a working pipeline from
//! `Config::default()` and override only what it cares about.

use crate::error::{CaError, Result};
use jiff::Span;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ra: RaConfig,
    pub va: VaConfig,
    pub ca: CaConfig,
    pub ct: CtConfig,
    pub nonce: NonceConfig,
}

/// Registration Authority settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RaConfig {
    /// Maximum DNS names on one order
    pub max_names: usize,
    /// Order lifetime in seconds
    pub order_lifetime_secs: u64,
    /// Lifetime of a pending authorization, seconds (<= 29 days)
    pub pending_authorization_lifetime_secs: u64,
    /// Lifetime of a valid authorization, seconds (<= 397 days)
    pub authorization_lifetime_secs: u64,
    /// Margin a reused authorization must still have before expiry, seconds
    pub authz_reuse_padding_secs: u64,
    /// Challenges whose validations are currently accepted
    pub enabled_challenges: Vec<String>,
    /// Authorizations validated longer ago than this get a CAA recheck
    /// during finalize, seconds
    pub caa_recheck_bound_secs: u64,
    /// Base URL of the OCSP responder, for cache purges after revocation
    pub ocsp_purge_base: String,
}

impl Default for RaConfig {
    fn default() -> Self {
        Self {
            max_names: 100,
            order_lifetime_secs: 7 * 24 * 3600,
            pending_authorization_lifetime_secs: 7 * 24 * 3600,
            authorization_lifetime_secs: 30 * 24 * 3600,
            authz_reuse_padding_secs: 24 * 3600,
            enabled_challenges: vec![
                "http-01".to_string(),
                "dns-01".to_string(),
                "tls-alpn-01".to_string(),
            ],
            caa_recheck_bound_secs: 8 * 3600,
            ocsp_purge_base: "http://ocsp.example.net".to_string(),
        }
    }
}

impl RaConfig {
    pub fn order_lifetime(&self) -> Span {
        Span::new().seconds(self.order_lifetime_secs as i64)
    }

    pub fn pending_authorization_lifetime(&self) -> Span {
        Span::new().seconds(self.pending_authorization_lifetime_secs as i64)
    }

    pub fn authorization_lifetime(&self) -> Span {
        Span::new().seconds(self.authorization_lifetime_secs as i64)
    }

    pub fn authz_reuse_padding(&self) -> Span {
        Span::new().seconds(self.authz_reuse_padding_secs as i64)
    }

    pub fn caa_recheck_bound(&self) -> Span {
        Span::new().seconds(self.caa_recheck_bound_secs as i64)
    }
}

/// Validation Authority settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaConfig {
    /// Timeout for a single validation attempt, seconds
    pub validation_timeout_secs: u64,
    /// Maximum HTTP-01 redirects to follow
    pub max_redirects: usize,
    /// How many remote perspectives may disagree before the local result
    /// is discarded
    pub max_remote_failures: usize,
    /// Timeout for each remote perspective, seconds
    pub remote_timeout_secs: u64,
    /// User-Agent for HTTP-01 probes
    pub user_agent: String,
    /// Account URI prefixes accepted in CAA accounturi parameters
    pub account_uri_prefixes: Vec<String>,
    /// Issuer domains this CA recognizes as itself in CAA issue/issuewild
    pub caa_identities: Vec<String>,
}

impl Default for VaConfig {
    fn default() -> Self {
        Self {
            validation_timeout_secs: 30,
            max_redirects: 10,
            max_remote_failures: 1,
            remote_timeout_secs: 15,
            user_agent: "acmeca-va/0.3".to_string(),
            account_uri_prefixes: vec![],
            caa_identities: vec!["ca.example.net".to_string()],
        }
    }
}

/// Certificate Authority settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaConfig {
    /// Fixed first byte of every serial (hex string, e.g. "7f")
    pub serial_prefix: String,
    /// Acceptable certificate validity periods, seconds. Issuance picks
    /// the first entry; a CSR cannot request others
    pub validity_periods_secs: Vec<u64>,
    /// Backdate applied to notBefore, seconds (bounded by the 6h skew rule)
    pub backdate_secs: u64,
    /// OCSP response lifetime, seconds (<= 10 days)
    pub ocsp_lifetime_secs: u64,
    /// CRL shard lifetime, seconds (<= 10 days)
    pub crl_lifetime_secs: u64,
    /// Base URL for CRL distribution points
    pub crldp_base: String,
    /// Number of CRL shards per issuer
    pub crl_shards: u32,
    /// Maximum SAN entries, mirrored from the RA bound
    pub max_names: usize,
    /// Accounts allowed to draw an ECDSA issuer
    pub ecdsa_allowed_accounts: Vec<i64>,
    /// Lint names that may fire without aborting issuance
    pub ignored_lints: Vec<String>,
    /// Rounds of Fermat factorization attempted against RSA moduli
    pub fermat_rounds: u32,
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            serial_prefix: "7f".to_string(),
            validity_periods_secs: vec![90 * 24 * 3600],
            backdate_secs: 3600,
            ocsp_lifetime_secs: 4 * 24 * 3600,
            crl_lifetime_secs: 9 * 24 * 3600,
            crldp_base: "http://crl.example.net".to_string(),
            crl_shards: 128,
            max_names: 100,
            ecdsa_allowed_accounts: vec![],
            ignored_lints: vec![],
            fermat_rounds: 100,
        }
    }
}

impl CaConfig {
    /// The configured serial prefix byte
    pub fn serial_prefix_byte(&self) -> Result<u8> {
        let bytes = hex::decode(&self.serial_prefix)
            .map_err(|e| CaError::internal(format!("bad serial prefix: {}", e)))?;
        if bytes.len() != 1 {
            return Err(CaError::internal("serial prefix must be one byte"));
        }
        // keeps the DER INTEGER positive and the hex form free of
        // leading zeros
        if bytes[0] == 0 || bytes[0] >= 0x80 {
            return Err(CaError::internal(
                "serial prefix must be between 0x01 and 0x7f",
            ));
        }
        Ok(bytes[0])
    }
}

/// One CT log endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtLogConfig {
    /// Submission URL, e.g. "https://log.example/2026"
    pub url: String,
    /// Log public key, base64 DER (carried through into SCT verification
    /// by consumers; the core treats it as opaque)
    pub key: String,
    /// Start of the temporal shard, inclusive (RFC 3339)
    pub start_inclusive: jiff::Timestamp,
    /// End of the temporal shard, exclusive (RFC 3339)
    pub end_exclusive: jiff::Timestamp,
}

/// One CT operator group: logs run by a single operator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtGroupConfig {
    /// Operator name, e.g. "argon"
    pub name: String,
    pub logs: Vec<CtLogConfig>,
}

/// CT policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CtConfig {
    /// Operator groups eligible for SCT collection
    pub groups: Vec<CtGroupConfig>,
    /// Delay between successive group submissions, milliseconds.
    /// Zero means full parallelism
    pub stagger_ms: u64,
    /// Best-effort logs that receive precertificates
    pub info_logs: Vec<CtLogConfig>,
    /// Best-effort logs that receive final certificates
    pub final_logs: Vec<CtLogConfig>,
}

impl Default for CtConfig {
    fn default() -> Self {
        Self {
            groups: vec![],
            stagger_ms: 200,
            info_logs: vec![],
            final_logs: vec![],
        }
    }
}

/// Nonce service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NonceConfig {
    /// Upper bound on the anti-replay window
    pub max_used: usize,
    /// Listen address the prefix is derived from
    pub listen_address: String,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            max_used: 65536,
            listen_address: "127.0.0.1:9101".to_string(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CaError::internal(format!("reading config: {}", e)))?;
        Self::from_toml(&raw)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(raw).map_err(|e| CaError::internal(format!("parsing config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints the types cannot express
    pub fn validate(&self) -> Result<()> {
        const DAY: u64 = 24 * 3600;

        if self.ra.max_names == 0 {
            return Err(CaError::internal("ra.max_names must be positive"));
        }
        if self.ra.pending_authorization_lifetime_secs > 29 * DAY {
            return Err(CaError::internal(
                "ra.pending_authorization_lifetime_secs exceeds 29 days",
            ));
        }
        if self.ra.authorization_lifetime_secs > 397 * DAY {
            return Err(CaError::internal(
                "ra.authorization_lifetime_secs exceeds 397 days",
            ));
        }
        for challenge in &self.ra.enabled_challenges {
            challenge
                .parse::<crate::types::ChallengeType>()
                .map_err(CaError::internal)?;
        }
        self.ca.serial_prefix_byte()?;
        if self.ca.validity_periods_secs.is_empty() {
            return Err(CaError::internal("ca.validity_periods_secs is empty"));
        }
        if self.ca.ocsp_lifetime_secs > 10 * DAY {
            return Err(CaError::internal("ca.ocsp_lifetime_secs exceeds 10 days"));
        }
        if self.ca.crl_lifetime_secs > 10 * DAY {
            return Err(CaError::internal("ca.crl_lifetime_secs exceeds 10 days"));
        }
        if self.ca.crl_shards == 0 {
            return Err(CaError::internal("ca.crl_shards must be positive"));
        }
        for group in &self.ct.groups {
            if group.logs.is_empty() {
                return Err(CaError::internal(format!(
                    "ct group \"{}\" has no logs",
                    group.name
                )));
            }
        }
        if self.nonce.max_used == 0 {
            return Err(CaError::internal("nonce.max_used must be positive"));
        }
        Ok(())
    }
}
