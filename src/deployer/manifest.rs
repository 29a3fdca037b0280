//! Rendered manifest comparison
//!
//! A Helm manifest is a stream of YAML documents. Both sides are split into
//! resources keyed by namespace, name, kind and apiVersion, then each
//! resource's text is compared. Document order does not count as a change;
//! any other textual edit to a resource does, including key order and
//! comments. Only leading and trailing whitespace of a document is ignored.

use serde_yaml::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Reports whether two rendered manifest sets differ
pub trait ManifestDiffer: Send + Sync {
    /// # Arguments
    /// * `current` - Manifest of the deployed revision
    /// * `proposed` - Manifest produced by a dry-run upgrade
    /// * `namespace` - Namespace assumed for resources that do not set one
    fn has_differences(&self, current: &str, proposed: &str, namespace: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestChange {
    Added(String),
    Removed(String),
    Modified(String),
}

/// Split a manifest stream into resources keyed by
/// `"{namespace}, {name}, {kind} ({apiVersion})"`
///
/// Values are the trimmed document text; parsing is only used for the key.
/// Documents that are empty or only comments are skipped. A document that
/// does not parse or carries no identity is kept under a positional key.
fn parse_manifest(manifest: &str, default_namespace: &str) -> BTreeMap<String, String> {
    let mut resources = BTreeMap::new();

    for (index, document) in split_documents(manifest).into_iter().enumerate() {
        let raw = document.trim().to_string();
        if raw.lines().all(|l| l.trim().is_empty() || l.trim_start().starts_with('#')) {
            continue;
        }

        match serde_yaml::from_str::<Value>(&raw) {
            Ok(Value::Null) => continue,
            Ok(value) => {
                let key = resource_key(&value, default_namespace)
                    .unwrap_or_else(|| format!("document {index}"));
                resources.insert(key, raw);
            }
            Err(e) => {
                warn!(error = %e, document = index, "Unparseable manifest document, keying by position");
                resources.insert(format!("document {index}"), raw);
            }
        }
    }

    resources
}

fn split_documents(manifest: &str) -> Vec<String> {
    let mut documents = vec![String::new()];
    for line in manifest.lines() {
        if line.trim_end() == "---" || line.starts_with("--- ") {
            documents.push(String::new());
            continue;
        }
        if let Some(current) = documents.last_mut() {
            current.push_str(line);
            current.push('\n');
        }
    }
    documents
}

fn resource_key(value: &Value, default_namespace: &str) -> Option<String> {
    let kind = value.get("kind")?.as_str()?;
    let api_version = value.get("apiVersion").and_then(Value::as_str).unwrap_or("");
    let metadata = value.get("metadata")?;
    let name = metadata.get("name")?.as_str()?;
    let namespace = metadata
        .get("namespace")
        .and_then(Value::as_str)
        .filter(|ns| !ns.is_empty())
        .unwrap_or(default_namespace);
    Some(format!("{namespace}, {name}, {kind} ({api_version})"))
}

/// Per-resource changes between two manifest streams, sorted by resource key
pub fn manifest_changes(current: &str, proposed: &str, namespace: &str) -> Vec<ManifestChange> {
    let before = parse_manifest(current, namespace);
    let after = parse_manifest(proposed, namespace);
    let mut changes = Vec::new();

    for (key, resource) in &before {
        match after.get(key) {
            None => changes.push(ManifestChange::Removed(key.clone())),
            Some(updated) if updated != resource => {
                changes.push(ManifestChange::Modified(key.clone()))
            }
            Some(_) => {}
        }
    }
    for key in after.keys() {
        if !before.contains_key(key) {
            changes.push(ManifestChange::Added(key.clone()));
        }
    }

    changes.sort_by(|a, b| change_key(a).cmp(change_key(b)));
    changes
}

fn change_key(change: &ManifestChange) -> &str {
    match change {
        ManifestChange::Added(k) | ManifestChange::Removed(k) | ManifestChange::Modified(k) => k,
    }
}

/// Per-resource text differ used in production
#[derive(Debug, Default, Clone, Copy)]
pub struct YamlManifestDiffer;

impl ManifestDiffer for YamlManifestDiffer {
    fn has_differences(&self, current: &str, proposed: &str, namespace: &str) -> bool {
        let changes = manifest_changes(current, proposed, namespace);
        for change in &changes {
            debug!(change = ?change, "Manifest change");
        }
        !changes.is_empty()
    }
}
