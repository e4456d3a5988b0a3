//! Admission webhooks for Deployments, StatefulSets and DaemonSets
//!
//! - `POST /mutate` - record version and dependency constraints on the object
//! - `POST /validate` - deny objects that break, or are broken by, a dependency
//! - `GET /healthz` - liveness
//!
//! Every handler decodes an `AdmissionReview`, maps the object onto
//! [`crate::workload::Workload`] and hands it to the shared
//! [`Checker`]. Any checker error denies the request.

pub mod mutate;
pub mod validate;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::checker::{Checker, DependencyLookup};
use crate::cluster::WorkloadLister;

/// Shared state for webhook handlers
pub struct WebhookState {
    /// The checker, built once at startup
    pub checker: Checker,
    /// Image dependency lookup used by the mutating webhook
    pub lookup: Arc<dyn DependencyLookup>,
    /// Sibling listing used by the validating webhook
    pub lister: Arc<dyn WorkloadLister>,
}

impl WebhookState {
    /// Create webhook state from its collaborators
    pub fn new(
        checker: Checker,
        lookup: Arc<dyn DependencyLookup>,
        lister: Arc<dyn WorkloadLister>,
    ) -> Self {
        Self {
            checker,
            lookup,
            lister,
        }
    }
}

/// Create the webhook router
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate", post(mutate::mutate_handler))
        .route("/validate", post(validate::validate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::MockDependencyLookup;
    use crate::cluster::MockWorkloadLister;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_healthz() {
        let state = Arc::new(WebhookState::new(
            Checker::default(),
            Arc::new(MockDependencyLookup::new()),
            Arc::new(MockWorkloadLister::new()),
        ));

        let response = webhook_router(state)
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }
}
