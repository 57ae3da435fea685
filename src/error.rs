/// Error taxonomy shared by every component of the issuance core.
use jiff::Span;
use thiserror::Error;

use crate::types::Identifier;

/// Result type for issuance-core operations
pub type Result<T> = std::result::Result<T, CaError>;

/// A failure pinned to one identifier, carried inside an aggregate error.
///
/// Front-ends render these as the RFC 8555 `subproblems` array, so the
/// identifier association must survive every hop between components.
#[derive(Debug, Clone, PartialEq)]
pub struct SubError {
    /// The identifier this failure applies to
    pub identifier: Identifier,
    /// The failure itself, flattened to kind + detail
    pub kind: ErrorKind,
    /// Human-readable detail
    pub detail: String,
}

/// The closed set of error kinds every inter-component call classifies into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Malformed,
    Unauthorized,
    NotFound,
    AlreadyRevoked,
    RateLimit,
    Caa,
    Dns,
    Connection,
    RejectedIdentifier,
    BadPublicKey,
    BadCsr,
    MissingScts,
    InternalServer,
}

/// Error type for issuance-core operations
#[derive(Error, Debug, Clone)]
pub enum CaError {
    /// Request structure or contents invalid; client bug
    #[error("Malformed request: {0}")]
    Malformed(String),

    /// Account lacks control of a name or permission for an operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Object does not exist or has expired
    #[error("Not found: {0}")]
    NotFound(String),

    /// Certificate is already in the revoked state
    #[error("Certificate already revoked: {0}")]
    AlreadyRevoked(String),

    /// A rate limit tripped; `retry_after` is computed from the oldest
    /// event inside the policy window
    #[error("Rate limit \"{limit}\" exceeded: {detail}")]
    RateLimit {
        limit: String,
        detail: String,
        retry_after: Option<Span>,
    },

    /// CAA records forbid issuance; always aggregates per-name failures
    #[error("CAA check failed: {detail}")]
    Caa {
        detail: String,
        sub_errors: Vec<SubError>,
    },

    /// DNS resolution failed during validation
    #[error("DNS problem: {0}")]
    Dns(String),

    /// Network failure during validation
    #[error("Connection problem: {0}")]
    Connection(String),

    /// Policy forbids the name (blocklist, public suffix, punycode)
    #[error("Rejected identifier: {0}")]
    RejectedIdentifier(String),

    /// Key policy refused the CSR or account key
    #[error("Bad public key: {0}")]
    BadPublicKey(String),

    /// CSR structure or signature invalid
    #[error("Bad CSR: {0}")]
    BadCsr(String),

    /// CT policy could not obtain two distinct-operator SCTs
    #[error("Missing SCTs: {0}")]
    MissingScts(String),

    /// Anything else
    #[error("Internal error: {0}")]
    InternalServer(String),
}

impl CaError {
    /// Create a malformed-request error
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        CaError::Malformed(msg.into())
    }

    /// Create an unauthorized error
    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        CaError::Unauthorized(msg.into())
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        CaError::NotFound(msg.into())
    }

    /// Create an already-revoked error
    pub fn already_revoked<S: Into<String>>(msg: S) -> Self {
        CaError::AlreadyRevoked(msg.into())
    }

    /// Create a rate-limit error with no known retry horizon
    pub fn rate_limit<S: Into<String>, D: Into<String>>(limit: S, detail: D) -> Self {
        CaError::RateLimit {
            limit: limit.into(),
            detail: detail.into(),
            retry_after: None,
        }
    }

    /// Create a rate-limit error with a retry horizon
    pub fn rate_limit_after<S: Into<String>, D: Into<String>>(
        limit: S,
        detail: D,
        retry_after: Span,
    ) -> Self {
        CaError::RateLimit {
            limit: limit.into(),
            detail: detail.into(),
            retry_after: Some(retry_after),
        }
    }

    /// Create a CAA error aggregating per-name failures
    pub fn caa<S: Into<String>>(detail: S, sub_errors: Vec<SubError>) -> Self {
        CaError::Caa {
            detail: detail.into(),
            sub_errors,
        }
    }

    /// Create a DNS error
    pub fn dns<S: Into<String>>(msg: S) -> Self {
        CaError::Dns(msg.into())
    }

    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        CaError::Connection(msg.into())
    }

    /// Create a rejected-identifier error
    pub fn rejected_identifier<S: Into<String>>(msg: S) -> Self {
        CaError::RejectedIdentifier(msg.into())
    }

    /// Create a bad-public-key error
    pub fn bad_public_key<S: Into<String>>(msg: S) -> Self {
        CaError::BadPublicKey(msg.into())
    }

    /// Create a bad-CSR error
    pub fn bad_csr<S: Into<String>>(msg: S) -> Self {
        CaError::BadCsr(msg.into())
    }

    /// Create a missing-SCTs error
    pub fn missing_scts<S: Into<String>>(msg: S) -> Self {
        CaError::MissingScts(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        CaError::InternalServer(msg.into())
    }

    /// Classify this error into its kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaError::Malformed(_) => ErrorKind::Malformed,
            CaError::Unauthorized(_) => ErrorKind::Unauthorized,
            CaError::NotFound(_) => ErrorKind::NotFound,
            CaError::AlreadyRevoked(_) => ErrorKind::AlreadyRevoked,
            CaError::RateLimit { .. } => ErrorKind::RateLimit,
            CaError::Caa { .. } => ErrorKind::Caa,
            CaError::Dns(_) => ErrorKind::Dns,
            CaError::Connection(_) => ErrorKind::Connection,
            CaError::RejectedIdentifier(_) => ErrorKind::RejectedIdentifier,
            CaError::BadPublicKey(_) => ErrorKind::BadPublicKey,
            CaError::BadCsr(_) => ErrorKind::BadCsr,
            CaError::MissingScts(_) => ErrorKind::MissingScts,
            CaError::InternalServer(_) => ErrorKind::InternalServer,
        }
    }

    /// The retry horizon, present only on rate-limit errors
    pub fn retry_after(&self) -> Option<Span> {
        match self {
            CaError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Per-name sub-errors, present on aggregate kinds
    pub fn sub_errors(&self) -> &[SubError] {
        match self {
            CaError::Caa { sub_errors, .. } => sub_errors,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_classification() {
        assert_eq!(CaError::malformed("x").kind(), ErrorKind::Malformed);
        assert_eq!(
            CaError::rate_limit("newOrdersPerAccount", "too many").kind(),
            ErrorKind::RateLimit
        );
        assert_eq!(CaError::caa("no", vec![]).kind(), ErrorKind::Caa);
    }

    #[test]
    fn retry_after_only_on_rate_limits() {
        let err = CaError::rate_limit_after("certificatesPerName", "x", Span::new().hours(3));
        assert!(err.retry_after().is_some());
        assert!(CaError::malformed("x").retry_after().is_none());
    }

    #[test]
    fn sub_errors_preserved() {
        let sub = SubError {
            identifier: Identifier::dns("a.example.com"),
            kind: ErrorKind::Caa,
            detail: "CAA record forbids issuance".to_string(),
        };
        let err = CaError::caa("rechecking CAA failed", vec![sub.clone()]);
        assert_eq!(err.sub_errors(), &[sub]);
    }
}
