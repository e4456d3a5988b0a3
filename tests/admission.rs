//! Admission flow tests
//!
//! These tests tell the story of a rollout through both webhooks: the
//! mutating pass records what a workload is and what it needs, and the
//! validating pass holds the namespace to those records. Registry and
//! cluster are replaced by in-memory fakes.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use dictator::checker::{Checker, CheckerConfig, DependencyLookup};
use dictator::cluster::WorkloadLister;
use dictator::image::ImageRef;
use dictator::webhook::{webhook_router, WebhookState};
use dictator::workload::{Snapshot, WorkloadKind, WorkloadObject, VERSION_LABEL};
use dictator::Error;

// =============================================================================
// Fakes
// =============================================================================

/// Image labels keyed by fully qualified image reference
struct FakeRegistry(BTreeMap<String, BTreeMap<String, String>>);

#[async_trait]
impl DependencyLookup for FakeRegistry {
    async fn lookup(&self, image: &ImageRef) -> Result<BTreeMap<String, String>, Error> {
        self.0
            .get(&image.to_string())
            .cloned()
            .ok_or_else(|| Error::lookup(format!("{image}: manifest unknown")))
    }
}

/// Namespace contents, replaceable between requests
#[derive(Default)]
struct FakeCluster(Mutex<Vec<Value>>);

impl FakeCluster {
    fn set(&self, objects: Vec<Value>) {
        *self.0.lock().unwrap() = objects;
    }
}

#[async_trait]
impl WorkloadLister for FakeCluster {
    async fn list(&self, namespace: &str) -> Result<Snapshot, Error> {
        assert_eq!(namespace, "shop");
        let objects = self.0.lock().unwrap().clone();
        objects
            .into_iter()
            .map(|o| WorkloadObject::from_value(WorkloadKind::Deployment, o))
            .collect::<Result<Vec<_>, _>>()
            .map(|workloads| workloads.into_iter().collect())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn registry() -> FakeRegistry {
    let dep = |pairs: &[(&str, &str)]| -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    };
    FakeRegistry(
        [
            ("harbor:5000/shop/web:2.0.0", dep(&[("api", ">=1.2.0 <2.0.0")])),
            ("harbor:5000/shop/sidecar:1.0.0", dep(&[("api", "!=1.3.0")])),
            ("harbor:5000/shop/api:1.4.0", dep(&[])),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect(),
    )
}

fn deployment(name: &str, images: &[&str], labels: Value) -> Value {
    let containers: Vec<Value> = images
        .iter()
        .enumerate()
        .map(|(i, image)| json!({"name": format!("c{i}"), "image": image}))
        .collect();
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": name, "namespace": "shop", "labels": labels},
        "spec": {
            "selector": {"matchLabels": {"app": name}},
            "template": {
                "metadata": {"labels": {"app": name}},
                "spec": {"containers": containers}
            }
        }
    })
}

fn review(operation: &str, object: &Value) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "3b1f7a52-0000-4000-8000-00000000beef",
            "kind": {"group": "apps", "version": "v1", "kind": "Deployment"},
            "resource": {"group": "apps", "version": "v1", "resource": "deployments"},
            "operation": operation,
            "userInfo": {"username": "kubernetes-admin"},
            "name": object["metadata"]["name"],
            "namespace": "shop",
            "object": object,
            "dryRun": false
        }
    })
}

async fn call(app: &Router, uri: &str, body: &Value) -> Value {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice::<Value>(&bytes).unwrap()["response"].clone()
}

/// Run the mutating webhook and return the object as it would be stored
async fn admit(app: &Router, object: &Value) -> Value {
    let response = call(app, "/mutate", &review("CREATE", object)).await;
    assert_eq!(response["allowed"], true, "{response}");
    assert_eq!(response["patchType"], "JSONPatch", "{response}");

    let bytes: Vec<u8> = serde_json::from_value(response["patch"].clone()).unwrap();
    let patch: json_patch::Patch = serde_json::from_slice(&bytes).unwrap();
    let mut stored = object.clone();
    json_patch::patch(&mut stored, &patch).unwrap();
    stored
}

fn app(cluster: Arc<FakeCluster>) -> Router {
    let checker = Checker::new(CheckerConfig {
        default_registry: Some("harbor:5000".to_string()),
    });
    webhook_router(Arc::new(WebhookState::new(
        checker,
        Arc::new(registry()),
        cluster,
    )))
}

// =============================================================================
// Stories
// =============================================================================

/// Story: Constraints declared by every image of a workload are merged and
/// all of them hold when a sibling is checked
#[tokio::test]
async fn story_merged_constraints_gate_the_rollout() {
    let cluster = Arc::new(FakeCluster::default());
    let app = app(cluster.clone());

    let web = admit(
        &app,
        &deployment("web", &["shop/web:2.0.0", "shop/sidecar:1.0.0"], json!({})),
    )
    .await;
    assert_eq!(web["metadata"]["labels"][VERSION_LABEL], "2.0.0");
    assert_eq!(
        web["metadata"]["annotations"]["api.wkm.welljoint.com/dependence"],
        ">=1.2.0 <2.0.0,!=1.3.0"
    );

    // api 1.4.0 satisfies both clauses
    cluster.set(vec![deployment("api", &["shop/api:1.4.0"], json!({}))]);
    let response = call(&app, "/validate", &review("CREATE", &web)).await;
    assert_eq!(response["allowed"], true, "{response}");

    // api 1.3.0 is inside the range but excluded by the sidecar
    cluster.set(vec![deployment("api", &["shop/api:1.3.0"], json!({}))]);
    let response = call(&app, "/validate", &review("CREATE", &web)).await;
    assert_eq!(response["allowed"], false);
    assert!(response["status"]["message"]
        .as_str()
        .unwrap()
        .contains("forward dependency check failed"));
}

/// Story: Upgrading a service past what its dependents accept is refused
#[tokio::test]
async fn story_upgrade_blocked_by_dependent() {
    let cluster = Arc::new(FakeCluster::default());
    let app = app(cluster.clone());

    let web = admit(&app, &deployment("web", &["shop/web:2.0.0"], json!({}))).await;
    cluster.set(vec![web]);

    let api_v2 = deployment("api", &["shop/api:2.0.0"], json!({}));
    let response = call(&app, "/validate", &review("UPDATE", &api_v2)).await;
    assert_eq!(response["allowed"], false);
    let message = response["status"]["message"].as_str().unwrap();
    assert!(message.contains("reverse dependency check failed"), "{message}");
    assert!(message.contains("web"), "{message}");

    let api_patch = deployment("api", &["shop/api:1.9.3"], json!({}));
    let response = call(&app, "/validate", &review("UPDATE", &api_patch)).await;
    assert_eq!(response["allowed"], true, "{response}");
}

/// Story: The version label overrides the image tag during validation
#[tokio::test]
async fn story_version_label_overrides_image() {
    let cluster = Arc::new(FakeCluster::default());
    let app = app(cluster.clone());

    let web = admit(&app, &deployment("web", &["shop/web:2.0.0"], json!({}))).await;
    cluster.set(vec![web]);

    let pinned = deployment(
        "api",
        &["shop/api:latest"],
        json!({VERSION_LABEL: "1.5.0"}),
    );
    let response = call(&app, "/validate", &review("UPDATE", &pinned)).await;
    assert_eq!(response["allowed"], true, "{response}");
}

/// Story: An image the registry does not know blocks admission
#[tokio::test]
async fn story_unknown_image_denied_at_mutation() {
    let app = app(Arc::new(FakeCluster::default()));

    let object = deployment("web", &["shop/web:9.9.9"], json!({}));
    let response = call(&app, "/mutate", &review("CREATE", &object)).await;
    assert_eq!(response["allowed"], false);
    assert!(response["status"]["message"]
        .as_str()
        .unwrap()
        .contains("manifest unknown"));
}

/// Story: Removing a workload is never blocked
#[tokio::test]
async fn story_delete_is_always_allowed() {
    let cluster = Arc::new(FakeCluster::default());
    let app = app(cluster.clone());

    let web = admit(&app, &deployment("web", &["shop/web:2.0.0"], json!({}))).await;
    cluster.set(vec![web.clone()]);

    let response = call(&app, "/validate", &review("DELETE", &web)).await;
    assert_eq!(response["allowed"], true);
}
