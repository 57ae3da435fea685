//! # AcmeCA - ACME Certificate Authority Core
//!
//! The issuance pipeline of an ACME certificate authority: five
//! cooperating components behind typed async interfaces.
//!
//! - **Storage Authority (SA)**: sole owner of persistent state
//! - **Validation Authority (VA)**: challenge execution and CAA checks
//! - **Certificate Authority (CA)**: precertificate and certificate
//!   signing, OCSP, CRLs
//! - **CT policy**: SCTs from two distinct log operators
//! - **Registration Authority (RA)**: the orchestrator owning the order
//!   lifecycle, rate limits, and revocation
//!
//! plus the single-use nonce service that gates the ACME front-end.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use acmeca::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> acmeca::Result<()> {
//! let clock: SharedClock = Arc::new(SystemClock);
//! let store = Arc::new(MemoryStore::new(clock.clone()));
//! // ... wire VA, CA, CT policy, and RA around the store
//! # Ok(())
//! # }
//! ```

// Module declarations
pub mod ca;
pub mod clock;
pub mod config;
pub mod ctpolicy;
pub mod error;
pub mod features;
pub mod metrics;
pub mod nonce;
pub mod policy;
pub mod ra;
pub mod sa;
pub mod types;
pub mod va;

// Re-exports for convenience
pub use ca::{
    CertificateAuthority, CertificateIssuer, CsrProfile, Issuer, IssuedCertificate, KeyAlgorithm,
    KeyPolicy, ParsedCsr, Precertificate, spki_digest,
};
pub use clock::{Clock, FakeClock, SharedClock, SystemClock};
pub use config::{CaConfig, Config, CtConfig, CtGroupConfig, CtLogConfig, NonceConfig, RaConfig, VaConfig};
pub use ctpolicy::{CtPolicy, HttpLogClient, LogClient, MockLogClient, Sct};
pub use error::{CaError, ErrorKind, Result, SubError};
pub use features::Features;
pub use metrics::{MetricsRegistry, SharedMetrics};
pub use nonce::{NonceRouter, NonceService};
pub use policy::ratelimit::{RateLimitHandle, RateLimitPolicies, RateLimitPolicy};
pub use policy::{PolicyAuthority, PolicyConfig};
pub use ra::{
    CachePurger, FinalizeOrderRequest, NoopPurger, RegistrationAuthority,
    revocation::RevocationTarget,
};
pub use sa::{
    Authorization, Certificate, CertificateStatus, MemoryStore, Order, Registration,
    StorageAuthority,
};
pub use types::{
    AuthorizationStatus, ChallengeStatus, ChallengeType, Identifier, OrderStatus, ProblemDetail,
    RegistrationStatus, RevocationReason, ValidationRecord, canonicalize_name, canonicalize_names,
    key_authorization, key_authorization_digest, sorted_unique_names,
};
pub use va::{
    DnsResolver, HickoryDnsResolver, MockDnsResolver, ValidationAuthority, ValidationRequest,
    ValidationResult, Validator,
};

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::{
        ca::{CertificateAuthority, CertificateIssuer, Issuer, KeyAlgorithm},
        clock::{Clock, FakeClock, SharedClock, SystemClock},
        config::Config,
        ctpolicy::{CtPolicy, MockLogClient, Sct},
        error::{CaError, ErrorKind, Result},
        features::Features,
        metrics::MetricsRegistry,
        nonce::{NonceRouter, NonceService},
        policy::ratelimit::{RateLimitHandle, RateLimitPolicies},
        policy::{PolicyAuthority, PolicyConfig},
        ra::{FinalizeOrderRequest, NoopPurger, RegistrationAuthority},
        sa::{MemoryStore, StorageAuthority},
        types::{AuthorizationStatus, ChallengeType, Identifier, OrderStatus, RevocationReason},
        va::{MockDnsResolver, ValidationAuthority, Validator},
    };
}
