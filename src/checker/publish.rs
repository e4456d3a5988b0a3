//! Writing resolved versions and constraints back onto workload metadata

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::constraint::Dependencies;
use crate::workload::{dependency_annotation_key, VERSION_LABEL};

/// Record `version` and `deps` on `meta`
///
/// The version label is always written, an empty version clearing a stale
/// one. Each dependency annotation is replaced wholesale since `deps` is the
/// complete set for the workload. Other labels and annotations are left
/// alone, including annotations for targets no longer declared.
pub fn publish_metadata(meta: &mut ObjectMeta, version: &str, deps: &Dependencies) {
    meta.labels
        .get_or_insert_with(BTreeMap::new)
        .insert(VERSION_LABEL.to_string(), version.to_string());

    let annotations = meta.annotations.get_or_insert_with(BTreeMap::new);
    for (target, expr) in deps.iter() {
        annotations.insert(dependency_annotation_key(target), expr.to_string());
    }
}
