//! Name policy: which identifiers this CA is willing to issue for.
//!
//! The policy authority is consulted by the RA for every name on a new
//! order and again at finalize time, and owns the public-suffix handling
//! used by the per-name rate limit.

pub mod ratelimit;

use crate::error::{CaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Configuration for the policy authority
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Names refused outright, together with all their subdomains
    pub blocked_names: Vec<String>,
    /// Public-suffix snapshot: a name equal to an entry is refused and
    /// counts on its own in per-name limits
    pub public_suffixes: Vec<String>,
    /// Exact suffixes that may be issued for despite being listed
    pub suffix_allowlist: Vec<String>,
}

/// Decides which DNS names are acceptable identifiers.
pub struct PolicyAuthority {
    blocked: HashSet<String>,
    suffixes: HashSet<String>,
    suffix_allowlist: HashSet<String>,
}

const MAX_NAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

impl PolicyAuthority {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            blocked: config
                .blocked_names
                .iter()
                .map(|n| crate::types::canonicalize_name(n))
                .collect(),
            suffixes: config
                .public_suffixes
                .iter()
                .map(|n| crate::types::canonicalize_name(n))
                .collect(),
            suffix_allowlist: config
                .suffix_allowlist
                .iter()
                .map(|n| crate::types::canonicalize_name(n))
                .collect(),
        }
    }

    /// Whether the CA will issue for one canonicalized name.
    ///
    /// `name` may carry a leading wildcard label; the rest of the name is
    /// then held to the same rules, and the wildcard base must not itself
    /// be a public suffix.
    pub fn will_issue_for(&self, name: &str) -> Result<()> {
        let (is_wildcard, base) = match name.strip_prefix("*.") {
            Some(base) => (true, base),
            None => (false, name),
        };

        self.check_syntax(name, base)?;

        if self.is_blocked(base) {
            return Err(CaError::rejected_identifier(format!(
                "policy forbids issuing for \"{}\"",
                name
            )));
        }
        if self.suffixes.contains(base) {
            if is_wildcard || !self.suffix_allowlist.contains(base) {
                return Err(CaError::rejected_identifier(format!(
                    "\"{}\" is a public suffix",
                    base
                )));
            }
        }
        Ok(())
    }

    /// Check every name on a proposed order, including wildcard overlap:
    /// `*.X` and `X` cannot coexist on one order.
    pub fn will_issue_for_all(&self, names: &[String]) -> Result<()> {
        let set: HashSet<&str> = names.iter().map(String::as_str).collect();
        for name in names {
            self.will_issue_for(name)?;
            if let Some(base) = name.strip_prefix("*.")
                && set.contains(base)
            {
                return Err(CaError::rejected_identifier(format!(
                    "order contains both \"{}\" and \"{}\"",
                    name, base
                )));
            }
        }
        Ok(())
    }

    /// The registrable base domain used as the per-name rate limit key.
    ///
    /// A name exactly equal to a listed suffix is its own key and does not
    /// roll up to a parent.
    pub fn base_domain<'a>(&self, name: &'a str) -> &'a str {
        let name = name.strip_prefix("*.").unwrap_or(name);
        if self.suffixes.contains(name) {
            return name;
        }
        // walk ancestors until the parent is a listed suffix
        let mut rest = name;
        while let Some((_, parent)) = rest.split_once('.') {
            if self.suffixes.contains(parent) {
                return rest;
            }
            rest = parent;
        }
        // no listed suffix: eTLD+1 degenerates to the last two labels
        let mut labels: Vec<&str> = name.split('.').collect();
        if labels.len() <= 2 {
            return name;
        }
        labels.drain(..labels.len() - 2);
        let tail_len: usize = labels.iter().map(|l| l.len()).sum::<usize>() + labels.len() - 1;
        &name[name.len() - tail_len..]
    }

    fn is_blocked(&self, name: &str) -> bool {
        if self.blocked.contains(name) {
            return true;
        }
        let mut rest = name;
        while let Some((_, parent)) = rest.split_once('.') {
            if self.blocked.contains(parent) {
                return true;
            }
            rest = parent;
        }
        false
    }

    fn check_syntax(&self, full: &str, base: &str) -> Result<()> {
        if base.is_empty() || full.len() > MAX_NAME_LEN {
            return Err(CaError::rejected_identifier(format!(
                "name \"{}\" has invalid length",
                full
            )));
        }
        if !full.is_ascii() {
            return Err(CaError::rejected_identifier(format!(
                "name \"{}\" contains non-ASCII characters; IDNs must be A-labels",
                full
            )));
        }
        if base.contains('*') {
            return Err(CaError::rejected_identifier(format!(
                "wildcard only allowed as the leftmost label of \"{}\"",
                full
            )));
        }
        if !base.contains('.') {
            return Err(CaError::rejected_identifier(format!(
                "name \"{}\" needs at least one dot",
                full
            )));
        }
        if base.parse::<std::net::IpAddr>().is_ok() {
            return Err(CaError::rejected_identifier(format!(
                "\"{}\" is an IP address, not a DNS name",
                full
            )));
        }
        for label in base.split('.') {
            if label.is_empty() || label.len() > MAX_LABEL_LEN {
                return Err(CaError::rejected_identifier(format!(
                    "name \"{}\" has an invalid label",
                    full
                )));
            }
            if label.starts_with('-') || label.ends_with('-') {
                return Err(CaError::rejected_identifier(format!(
                    "label \"{}\" begins or ends with a hyphen",
                    label
                )));
            }
            if !label
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
            {
                return Err(CaError::rejected_identifier(format!(
                    "label \"{}\" contains an invalid character",
                    label
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority() -> PolicyAuthority {
        PolicyAuthority::new(PolicyConfig {
            blocked_names: vec!["forbidden.example".to_string()],
            public_suffixes: vec!["com".to_string(), "co.uk".to_string()],
            suffix_allowlist: vec![],
        })
    }

    #[test]
    fn accepts_ordinary_names() {
        let pa = authority();
        assert!(pa.will_issue_for("a.example.com").is_ok());
        assert!(pa.will_issue_for("*.zombo.com").is_ok());
    }

    #[test]
    fn rejects_syntax_violations() {
        let pa = authority();
        assert!(pa.will_issue_for("com").is_err());
        assert!(pa.will_issue_for("exa mple.com").is_err());
        assert!(pa.will_issue_for("-leading.example.com").is_err());
        assert!(pa.will_issue_for("foo.*.example.com").is_err());
        assert!(pa.will_issue_for("10.0.0.1").is_err());
        assert!(pa.will_issue_for("münchen.example.com").is_err());
    }

    #[test]
    fn rejects_blocklist_and_subdomains() {
        let pa = authority();
        assert!(pa.will_issue_for("forbidden.example").is_err());
        assert!(pa.will_issue_for("sub.forbidden.example").is_err());
    }

    #[test]
    fn public_suffix_exact_match() {
        let pa = authority();
        assert!(pa.will_issue_for("co.uk").is_err());
        assert!(pa.will_issue_for("mysite.co.uk").is_ok());
        assert!(pa.will_issue_for("*.co.uk").is_err());

        let allowing = PolicyAuthority::new(PolicyConfig {
            blocked_names: vec![],
            public_suffixes: vec!["co.uk".to_string()],
            suffix_allowlist: vec!["co.uk".to_string()],
        });
        assert!(allowing.will_issue_for("co.uk").is_ok());
        // wildcard over a suffix stays refused even when allow-listed
        assert!(allowing.will_issue_for("*.co.uk").is_err());
    }

    #[test]
    fn wildcard_overlap_within_order() {
        let pa = authority();
        let ok = vec!["*.foo.example.com".to_string(), "bar.example.com".to_string()];
        assert!(pa.will_issue_for_all(&ok).is_ok());

        let clash = vec!["*.example.com".to_string(), "example.com".to_string()];
        assert!(pa.will_issue_for_all(&clash).is_err());
    }

    #[test]
    fn base_domain_rollup() {
        let pa = authority();
        assert_eq!(pa.base_domain("www.bigissuer.com"), "bigissuer.com");
        assert_eq!(pa.base_domain("a.b.example.co.uk"), "example.co.uk");
        assert_eq!(pa.base_domain("*.zombo.com"), "zombo.com");
        // an exact suffix is its own key
        assert_eq!(pa.base_domain("co.uk"), "co.uk");
    }
}
