//! Validating admission for workloads
//!
//! Lists the subject's namespace and runs the forward and reverse checks.
//! DELETE is always allowed.

use std::sync::Arc;

use axum::{extract::State, Json};
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
};
use tracing::{debug, error, info, warn};

use super::WebhookState;
use crate::workload::{Workload, WorkloadObject};

/// Handle validating admission review for workloads
pub async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let response = validate_workload(&state, &req).await;
    Json(response.into_review())
}

async fn validate_workload(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let uid = &request.uid;

    if matches!(request.operation, Operation::Delete) {
        debug!(uid = %uid, name = %request.name, "Allowing delete");
        return AdmissionResponse::from(request);
    }

    let obj = match &request.object {
        Some(obj) => obj,
        None => {
            debug!(uid = %uid, "No object in request, allowing");
            return AdmissionResponse::from(request);
        }
    };

    let workload = match WorkloadObject::from_dynamic(&request.kind.kind, obj) {
        Ok(w) => w,
        Err(e) => {
            warn!(uid = %uid, kind = %request.kind.kind, error = %e, "Rejecting workload");
            return AdmissionResponse::from(request).deny(e.to_string());
        }
    };

    let namespace = request
        .namespace
        .clone()
        .or_else(|| workload.metadata().namespace.clone())
        .unwrap_or_else(|| "default".to_string());

    let snapshot = match state.lister.list(&namespace).await {
        Ok(s) => s,
        Err(e) => {
            warn!(uid = %uid, namespace = %namespace, error = %e, "Failed to list workloads");
            return AdmissionResponse::from(request).deny(e.to_string());
        }
    };

    match state.checker.validate(&workload, &snapshot) {
        Ok(skipped) => {
            for skip in &skipped {
                info!(uid = %uid, workload = %workload.name(), skip = %skip, "Skipped dependency check");
            }
            AdmissionResponse::from(request)
        }
        Err(e) if e.is_violation() => {
            info!(uid = %uid, workload = %workload.name(), error = %e, "Denied by dependency constraint");
            AdmissionResponse::from(request).deny(e.to_string())
        }
        Err(e) => {
            warn!(uid = %uid, workload = %workload.name(), error = %e, "Dependency check failed");
            AdmissionResponse::from(request).deny(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{Checker, MockDependencyLookup};
    use crate::cluster::MockWorkloadLister;
    use crate::webhook::testing::{body_json, deployment_json, post, review};
    use crate::webhook::webhook_router;
    use crate::workload::testing::{deployment, with_dependency};
    use crate::workload::{Snapshot, VERSION_LABEL};
    use crate::Error;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router(lister: MockWorkloadLister) -> axum::Router {
        webhook_router(Arc::new(WebhookState::new(
            Checker::default(),
            Arc::new(MockDependencyLookup::new()),
            Arc::new(lister),
        )))
    }

    fn lister_returning(snapshot: fn() -> Snapshot) -> MockWorkloadLister {
        let mut lister = MockWorkloadLister::new();
        lister
            .expect_list()
            .withf(|namespace| namespace.to_string() == "prod")
            .times(1)
            .returning(move |_| Ok(snapshot()));
        lister
    }

    fn web() -> Value {
        deployment_json(
            "web",
            &["team/web:2.0.0"],
            json!({VERSION_LABEL: "2.0.0"}),
            json!({"api.wkm.welljoint.com/dependence": "^1.2"}),
        )
    }

    async fn allowed(router: axum::Router, body: Value) -> (bool, String) {
        let response = router.oneshot(post("/validate", &body)).await.unwrap();
        let body = body_json(response).await;
        let message = body["response"]["status"]["message"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        (body["response"]["allowed"] == true, message)
    }

    /// Story: A workload whose dependencies are satisfied is admitted
    #[tokio::test]
    async fn story_satisfied_dependencies_admitted() {
        let lister = lister_returning(|| {
            [deployment("api", &["api:1.4.0"])]
                .into_iter()
                .map(WorkloadObject::from)
                .collect()
        });

        let (ok, _) = allowed(router(lister), review("CREATE", "Deployment", "prod", web())).await;
        assert!(ok);
    }

    /// Story: An outdated dependency blocks the rollout
    #[tokio::test]
    async fn story_forward_violation_denied() {
        let lister = lister_returning(|| {
            [deployment("api", &["api:1.1.0"])]
                .into_iter()
                .map(WorkloadObject::from)
                .collect()
        });

        let (ok, message) =
            allowed(router(lister), review("UPDATE", "Deployment", "prod", web())).await;
        assert!(!ok);
        assert!(message.contains("api"), "{message}");
        assert!(message.contains("1.1.0"), "{message}");
    }

    /// Story: A rollout that would break a dependent is denied
    #[tokio::test]
    async fn story_reverse_violation_denied() {
        let lister = lister_returning(|| {
            [
                deployment("api", &["api:1.4.0"]),
                with_dependency(deployment("gateway", &["gateway:1.0.0"]), "web", "<2.0.0"),
            ]
            .into_iter()
            .map(WorkloadObject::from)
            .collect()
        });

        let (ok, message) =
            allowed(router(lister), review("UPDATE", "Deployment", "prod", web())).await;
        assert!(!ok);
        assert!(message.contains("gateway"), "{message}");
    }

    #[tokio::test]
    async fn test_missing_target_is_soft_skip() {
        let lister = lister_returning(Snapshot::new);
        let (ok, _) = allowed(router(lister), review("CREATE", "Deployment", "prod", web())).await;
        assert!(ok);
    }

    #[tokio::test]
    async fn test_malformed_annotation_denies() {
        let lister = lister_returning(|| {
            [deployment("api", &["api:1.4.0"])]
                .into_iter()
                .map(WorkloadObject::from)
                .collect()
        });
        let body = deployment_json(
            "web",
            &["team/web:2.0.0"],
            json!({VERSION_LABEL: "2.0.0"}),
            json!({"api.wkm.welljoint.com/dependence": ">>1.2"}),
        );

        let (ok, message) =
            allowed(router(lister), review("CREATE", "Deployment", "prod", body)).await;
        assert!(!ok);
        assert!(message.contains(">>1.2"), "{message}");
    }

    #[tokio::test]
    async fn test_listing_failure_denies() {
        let mut lister = MockWorkloadLister::new();
        lister
            .expect_list()
            .returning(|_| Err(Error::lookup("listing Deployment in prod: timed out")));

        let (ok, message) =
            allowed(router(lister), review("CREATE", "Deployment", "prod", web())).await;
        assert!(!ok);
        assert!(message.contains("timed out"), "{message}");
    }

    #[tokio::test]
    async fn test_delete_always_allowed() {
        let mut lister = MockWorkloadLister::new();
        lister.expect_list().times(0);

        let (ok, _) = allowed(router(lister), review("DELETE", "Deployment", "prod", web())).await;
        assert!(ok);
    }
}
