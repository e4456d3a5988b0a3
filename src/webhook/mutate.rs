//! Mutating admission for workloads
//!
//! Resolves the workload's version and dependency constraints from its
//! images and patches them onto the object's labels and annotations. The
//! patch never touches anything outside `/metadata/labels` and
//! `/metadata/annotations`.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{extract::State, Json};
use json_patch::{AddOperation, PatchOperation};
use jsonptr::PointerBuf;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
};
use tracing::{debug, error, info, warn};

use super::WebhookState;
use crate::workload::{Workload, WorkloadObject};

/// Handle mutating admission review for workloads
pub async fn mutate_handler(
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

    let response = mutate_workload(&state, &req).await;
    Json(response.into_review())
}

async fn mutate_workload(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let uid = &request.uid;

    if matches!(request.operation, Operation::Delete) {
        return AdmissionResponse::from(request);
    }

    let obj = match &request.object {
        Some(obj) => obj,
        None => {
            debug!(uid = %uid, "No object in request, allowing unchanged");
            return AdmissionResponse::from(request);
        }
    };

    let mut workload = match WorkloadObject::from_dynamic(&request.kind.kind, obj) {
        Ok(w) => w,
        Err(e) => {
            warn!(uid = %uid, kind = %request.kind.kind, error = %e, "Rejecting workload");
            return AdmissionResponse::from(request).deny(e.to_string());
        }
    };

    let published = match state
        .checker
        .mutate(&mut workload, state.lookup.as_ref())
        .await
    {
        Ok(p) => p,
        Err(e) => {
            warn!(uid = %uid, workload = %workload.name(), error = %e, "Dependency resolution failed");
            return AdmissionResponse::from(request).deny(e.to_string());
        }
    };

    let patch_ops = build_patch_operations(&obj.metadata, workload.metadata());
    if patch_ops.is_empty() {
        debug!(uid = %uid, workload = %workload.name(), "Metadata already current");
        return AdmissionResponse::from(request);
    }

    info!(
        uid = %uid,
        workload = %workload.name(),
        version = %published.version,
        patch_ops = patch_ops.len(),
        "Patching workload metadata"
    );

    match AdmissionResponse::from(request).with_patch(json_patch::Patch(patch_ops)) {
        Ok(response) => response,
        Err(e) => {
            error!(uid = %uid, error = %e, "Failed to serialize patch");
            AdmissionResponse::from(request).deny(format!("patch serialization error: {e}"))
        }
    }
}

/// JSON patch turning `original`'s labels and annotations into `updated`'s
fn build_patch_operations(original: &ObjectMeta, updated: &ObjectMeta) -> Vec<PatchOperation> {
    let mut ops = Vec::new();
    map_patch(
        "labels",
        original.labels.as_ref(),
        updated.labels.as_ref(),
        &mut ops,
    );
    map_patch(
        "annotations",
        original.annotations.as_ref(),
        updated.annotations.as_ref(),
        &mut ops,
    );
    ops
}

fn map_patch(
    field: &str,
    original: Option<&BTreeMap<String, String>>,
    updated: Option<&BTreeMap<String, String>>,
    ops: &mut Vec<PatchOperation>,
) {
    let Some(updated) = updated else {
        return;
    };

    match original {
        None => ops.push(PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(["metadata", field]),
            value: serde_json::to_value(updated).unwrap_or_default(),
        })),
        Some(original) => {
            for (key, value) in updated {
                if original.get(key) != Some(value) {
                    // Add on an existing member replaces it
                    ops.push(PatchOperation::Add(AddOperation {
                        path: PointerBuf::from_tokens(["metadata", field, key.as_str()]),
                        value: serde_json::Value::String(value.clone()),
                    }));
                }
            }
        }
    }
}
