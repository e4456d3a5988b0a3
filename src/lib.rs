//! Dictator - semantic-version dependency admission for Kubernetes workloads
//!
//! Workloads declare which versions of their sibling services they accept.
//! Dictator records those declarations on the workload when it is admitted
//! and refuses any rollout that would leave a declaration unsatisfied, in
//! either direction.
//!
//! # Metadata
//!
//! - label `wkm.welljoint.com/version` - the workload's own version
//! - annotation `<target>.wkm.welljoint.com/dependence` - a constraint
//!   expression on service `target`
//!
//! # Modules
//!
//! - [`version`] - lenient version parsing and extraction from image tags
//! - [`constraint`] - constraint expressions and dependency sets
//! - [`image`] - container image references
//! - [`workload`] - the common view of Deployments, StatefulSets and DaemonSets
//! - [`checker`] - extraction, resolution, forward/reverse checks, publishing
//! - [`registry`] - dependency lookup through the OCI distribution API
//! - [`cluster`] - sibling listing through the Kubernetes API
//! - [`webhook`] - mutating and validating admission handlers
//! - [`server`] - HTTPS server for the webhooks
//! - [`telemetry`] - tracing subscriber setup
//! - [`retry`] - backoff for transient collaborator failures
//! - [`error`] - error types

#![deny(missing_docs)]

pub mod checker;
pub mod cluster;
pub mod constraint;
pub mod error;
pub mod image;
pub mod registry;
pub mod retry;
pub mod server;
pub mod telemetry;
pub mod version;
pub mod webhook;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default listen address for the webhook server
///
/// Port 9443 is used instead of 443 to avoid requiring root privileges.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9443";
