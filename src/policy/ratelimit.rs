//! Rate-limit policy: thresholds, windows, and overrides.
//!
//! The whole policy is an immutable snapshot behind a swappable pointer.
//! A reload parses the file into a fresh snapshot and swaps it in; request
//! paths load the pointer once and never observe a partial update.

use crate::error::{CaError, Result};
use jiff::Span;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// A threshold of -1 means unlimited and short-circuits the count query.
pub const UNLIMITED: i64 = -1;

/// One rate-limit family
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitPolicy {
    /// Events allowed inside the window; -1 disables the limit
    pub threshold: i64,
    /// Window length in seconds
    pub window_secs: u64,
    /// Per-name threshold overrides
    pub overrides: HashMap<String, i64>,
    /// Per-account threshold overrides
    pub registration_overrides: HashMap<i64, i64>,
}

impl RateLimitPolicy {
    /// Whether this limit is configured at all
    pub fn enabled(&self) -> bool {
        self.threshold != 0
    }

    /// Window as a span
    pub fn window(&self) -> Span {
        Span::new().seconds(self.window_secs as i64)
    }

    /// Effective threshold for a (name, account) pair. Account overrides
    /// take precedence over name overrides.
    pub fn threshold_for(&self, name: &str, registration_id: i64) -> i64 {
        if let Some(t) = self.registration_overrides.get(&registration_id) {
            return *t;
        }
        if let Some(t) = self.overrides.get(name) {
            return *t;
        }
        self.threshold
    }
}

/// The full set of limit families applied by the RA, in application order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitPolicies {
    pub certificates_per_name: RateLimitPolicy,
    pub certificates_per_fqdn_set: RateLimitPolicy,
    pub certificates_per_fqdn_set_fast: RateLimitPolicy,
    pub new_orders_per_account: RateLimitPolicy,
    pub pending_authorizations_per_account: RateLimitPolicy,
    pub invalid_authorizations_per_account: RateLimitPolicy,
    pub registrations_per_ip: RateLimitPolicy,
}

impl RateLimitPolicies {
    /// Parse a policy document
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| CaError::internal(format!("parsing rate limits: {}", e)))
    }

    /// Load a policy document from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CaError::internal(format!("reading rate limits: {}", e)))?;
        Self::from_toml(&raw)
    }
}

/// Swappable handle to the current policy snapshot.
pub struct RateLimitHandle {
    current: RwLock<Arc<RateLimitPolicies>>,
}

impl RateLimitHandle {
    pub fn new(policies: RateLimitPolicies) -> Self {
        Self {
            current: RwLock::new(Arc::new(policies)),
        }
    }

    /// The snapshot to use for one request. Callers must not re-load
    /// mid-request.
    pub fn current(&self) -> Arc<RateLimitPolicies> {
        self.current.read().expect("rate limit lock poisoned").clone()
    }

    /// Atomically publish a new snapshot
    pub fn swap(&self, policies: RateLimitPolicies) {
        *self.current.write().expect("rate limit lock poisoned") = Arc::new(policies);
    }

    /// Re-read the policy file and publish it
    pub fn reload_from_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let fresh = RateLimitPolicies::from_file(path)?;
        self.swap(fresh);
        tracing::info!("rate limit policy reloaded");
        Ok(())
    }
}

/// The retry horizon for a tripped limit: when the oldest counted event
/// leaves the window.
pub fn retry_after(oldest_event: jiff::Timestamp, window: Span, now: jiff::Timestamp) -> Span {
    let reopens = oldest_event.checked_add(window).unwrap_or(now);
    if reopens <= now {
        Span::new()
    } else {
        reopens.since(now).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RateLimitPolicy {
        RateLimitPolicy {
            threshold: 2,
            window_secs: 7 * 24 * 3600,
            overrides: HashMap::from([("bigissuer.com".to_string(), 100)]),
            registration_overrides: HashMap::from([(42, 300)]),
        }
    }

    #[test]
    fn override_precedence() {
        let p = policy();
        assert_eq!(p.threshold_for("example.com", 1), 2);
        assert_eq!(p.threshold_for("bigissuer.com", 1), 100);
        assert_eq!(p.threshold_for("bigissuer.com", 42), 300);
    }

    #[test]
    fn unlimited_override() {
        let mut p = policy();
        p.overrides.insert("wide-open.org".to_string(), UNLIMITED);
        assert_eq!(p.threshold_for("wide-open.org", 1), UNLIMITED);
    }

    #[test]
    fn snapshot_swap_is_atomic_to_readers() {
        let handle = RateLimitHandle::new(RateLimitPolicies::default());
        let before = handle.current();
        assert_eq!(before.certificates_per_name.threshold, 0);

        let mut fresh = RateLimitPolicies::default();
        fresh.certificates_per_name.threshold = 50;
        handle.swap(fresh);

        // the old snapshot is unchanged, the new one is visible
        assert_eq!(before.certificates_per_name.threshold, 0);
        assert_eq!(handle.current().certificates_per_name.threshold, 50);
    }

    #[test]
    fn parses_policy_file() {
        let policies = RateLimitPolicies::from_toml(
            r#"
            [certificates_per_name]
            threshold = 2
            window_secs = 604800

            [certificates_per_name.overrides]
            "bigissuer.com" = 100
            "#,
        )
        .unwrap();
        assert_eq!(policies.certificates_per_name.threshold, 2);
        assert_eq!(
            policies.certificates_per_name.threshold_for("bigissuer.com", 7),
            100
        );
        // unset families parse as disabled
        assert!(!policies.new_orders_per_account.enabled());
    }

    #[test]
    fn retry_after_from_oldest_event() {
        let now: jiff::Timestamp = "2025-06-01T12:00:00Z".parse().unwrap();
        let oldest: jiff::Timestamp = "2025-06-01T00:00:00Z".parse().unwrap();
        let window = Span::new().hours(24);
        let wait = retry_after(oldest, window, now);
        assert_eq!(wait.total(jiff::Unit::Second).unwrap(), (12 * 3600) as f64);

        // event already outside the window: no wait
        let stale: jiff::Timestamp = "2025-05-30T00:00:00Z".parse().unwrap();
        assert!(retry_after(stale, window, now).is_zero());
    }
}
