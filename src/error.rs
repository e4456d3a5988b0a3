//! Error types for the dependency checker

use thiserror::Error;

/// Main error type for checker and webhook operations
///
/// Every variant is fatal: the admission request that produced it is denied.
/// Soft conditions (a missing dependency target, a target without a version)
/// are never represented here; they are logged and reported through
/// [`crate::checker::SoftSkip`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A version string (image tag or version label) could not be parsed
    #[error("malformed version '{input}': {reason}")]
    MalformedVersion {
        /// The offending text
        input: String,
        /// Parser message
        reason: String,
    },

    /// A constraint expression could not be parsed
    #[error("malformed constraint '{expr}': {reason}")]
    MalformedConstraint {
        /// The offending expression
        expr: String,
        /// Parser message
        reason: String,
    },

    /// A service the subject depends on runs a version outside the declared range
    #[error("forward dependency check failed: {target} version ({version}) does not satisfy constraint ({constraint})")]
    ForwardViolation {
        /// Service the subject depends on
        target: String,
        /// Version that service currently runs
        version: String,
        /// Expression the subject declared
        constraint: String,
    },

    /// The subject's version breaks a constraint a sibling declared against it
    #[error("reverse dependency check failed: {subject} version ({version}) does not satisfy constraint ({constraint}) declared by {dependent}")]
    ReverseViolation {
        /// The workload being admitted
        subject: String,
        /// Its resolved version
        version: String,
        /// Sibling that declared the constraint
        dependent: String,
        /// The unsatisfied sub-expression
        constraint: String,
    },

    /// The image dependency lookup or the sibling listing failed
    #[error("lookup failed: {0}")]
    Lookup(String),

    /// Registry distribution API error
    #[error("registry error: {0}")]
    Registry(#[from] oci_client::errors::OciDistributionError),

    /// Listener or socket error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The admitted object is not a Deployment, StatefulSet or DaemonSet
    #[error("unsupported resource type: {0}")]
    UnsupportedKind(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a malformed version error
    pub fn malformed_version(input: impl Into<String>, reason: impl ToString) -> Self {
        Self::MalformedVersion {
            input: input.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a malformed constraint error
    pub fn malformed_constraint(expr: impl Into<String>, reason: impl ToString) -> Self {
        Self::MalformedConstraint {
            expr: expr.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a lookup error with the given message
    pub fn lookup(msg: impl Into<String>) -> Self {
        Self::Lookup(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error is a constraint violation rather than bad input or
    /// an unreachable collaborator
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            Error::ForwardViolation { .. } | Error::ReverseViolation { .. }
        )
    }
}
