/// Feature toggles, fixed at component construction.
///
/// There is no process-wide flag map: each component receives the set it was
/// built with and never observes changes, so tests instantiate fresh
/// components with exactly the flags they need.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Features {
    /// Allow any account with an ECDSA CSR key to draw an ECDSA issuer,
    /// not only accounts on the allow-list
    pub ecdsa_for_all: bool,
    /// Require a strict remote-perspective majority; a remote timeout then
    /// counts against the quorum instead of being ignored
    pub enforce_multi_va: bool,
    /// Reuse valid authorizations on new orders. When off, only pending
    /// authorizations from the same account are reused
    pub reuse_valid_authz: bool,
    /// Permit validation targets that resolve to loopback or private
    /// address space (test environments only)
    pub allow_internal_addresses: bool,
}

impl Features {
    /// Production defaults: authorization reuse on, everything else off
    pub fn production() -> Self {
        Self {
            reuse_valid_authz: true,
            ..Self::default()
        }
    }
}
