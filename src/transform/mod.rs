//! Pure functions over parsed Kubernetes list documents.
//!
//! The original system embeds a jq/yq-style expression interpreter and
//! evaluates a handful of fixed expression strings against it. The set of
//! expressions actually used by the dumper is closed and known at compile
//! time, so here each one is a named, typed function over a `serde_json::Value`
//! tree instead of a string fed to a general-purpose evaluator — see
//! SPEC_FULL.md §4.1 for the rationale. `serde_json_path` is used for the one
//! place a read-only path query earns its keep (enumerating pod containers);
//! everything that mutates the tree (delete, redact, select) is a direct walk.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use serde_json_path::JsonPath;

/// Fields considered volatile on any object's `metadata`, deleted during
/// cleaning so the snapshot is diffable across runs.
const VOLATILE_METADATA_FIELDS: &[&str] = &[
    "managedFields",
    "uid",
    "creationTimestamp",
    "generation",
    "resourceVersion",
];

const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

pub fn yaml_to_value(yaml: &str) -> Result<Value> {
    serde_yaml::from_str(yaml).context("parsing yaml document")
}

pub fn json_to_value(json: &str) -> Result<Value> {
    serde_json::from_str(json).context("parsing json document")
}

pub fn value_to_yaml(value: &Value) -> Result<String> {
    Ok(serde_yaml::to_string(value)?)
}

pub fn value_to_json_compact(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub fn value_to_json_pretty(value: &Value) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// `jsonToYaml` / `evalJsonToYaml(".", json)` — pure conversion.
pub fn json_to_yaml(json: &str) -> Result<String> {
    value_to_yaml(&json_to_value(json)?)
}

/// `yamlToJsonCompact`.
pub fn yaml_to_json_compact(yaml: &str) -> Result<String> {
    value_to_json_compact(&yaml_to_value(yaml)?)
}

/// `yamlToJsonPretty`.
pub fn yaml_to_json_pretty(yaml: &str) -> Result<String> {
    value_to_json_pretty(&yaml_to_value(yaml)?)
}

fn items_mut(list: &mut Value) -> Result<&mut Vec<Value>> {
    list.get_mut("items")
        .and_then(Value::as_array_mut)
        .context("document has no `items` array")
}

pub fn items(list: &Value) -> &[Value] {
    list.get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// `DefaultCleaningQuery`: drop volatile per-item metadata fields and the
/// list-level `metadata` object, preserving `kind`/`apiVersion`/`items`.
pub fn clean_resource_list(list: &mut Value) -> Result<()> {
    if let Some(items) = list.get_mut("items").and_then(Value::as_array_mut) {
        for item in items.iter_mut() {
            if let Some(metadata) = item.get_mut("metadata").and_then(Value::as_object_mut) {
                for field in VOLATILE_METADATA_FIELDS {
                    metadata.remove(*field);
                }
                if let Some(annotations) = metadata.get_mut("annotations").and_then(Value::as_object_mut) {
                    annotations.remove(LAST_APPLIED_ANNOTATION);
                    if annotations.is_empty() {
                        metadata.remove("annotations");
                    }
                }
            }
        }
    }
    if let Some(root) = list.as_object_mut() {
        root.remove("metadata");
    }
    Ok(())
}

/// `.items[].data.[] = ""` — blanks every Secret data value, keeps the keys.
pub fn redact_secret_values(list: &mut Value) -> Result<()> {
    let items = items_mut(list)?;
    for item in items.iter_mut() {
        if let Some(data) = item.get_mut("data").and_then(Value::as_object_mut) {
            for (_, value) in data.iter_mut() {
                *value = Value::String(String::new());
            }
        }
    }
    Ok(())
}

/// Deletes every item for which `predicate` returns true, preserving the
/// relative order of the survivors. This is the Rust equivalent of
/// `del(.items[] | select(predicate))`.
pub fn delete_items_matching<F>(list: &mut Value, mut predicate: F) -> Result<()>
where
    F: FnMut(&Value) -> bool,
{
    let items = items_mut(list)?;
    items.retain(|item| !predicate(item));
    Ok(())
}

/// `.items = [.items[] | select(.metadata.namespace=="ns")]`, returning a new
/// document rather than mutating in place (the caller keeps the full list
/// around to select further namespaces from it).
pub fn select_namespace(list: &Value, namespace: &str) -> Value {
    let mut selected = list.clone();
    if let Some(obj) = selected.as_object_mut() {
        let filtered: Vec<Value> = items(list)
            .iter()
            .filter(|item| item_namespace(item) == Some(namespace))
            .cloned()
            .collect();
        obj.insert("items".into(), Value::Array(filtered));
    }
    selected
}

fn item_namespace(item: &Value) -> Option<&str> {
    item.get("metadata")?.get("namespace")?.as_str()
}

/// `[.items[].metadata.namespace] | unique | .[]` preserving insertion order.
pub fn distinct_namespaces(list: &Value) -> Vec<String> {
    let mut seen = Vec::new();
    for item in items(list) {
        if let Some(ns) = item_namespace(item) {
            if !seen.iter().any(|s: &String| s == ns) {
                seen.push(ns.to_string());
            }
        }
    }
    seen
}

/// Enumerates `(podName, containerName)` pairs for every item's
/// `spec.containers[*].name`, in item-then-container order. Uses
/// `serde_json_path` for the read-only traversal per SPEC_FULL.md §4.1.
pub fn pod_containers(list: &Value) -> Result<Vec<(String, String)>> {
    let containers_path = JsonPath::parse("$.spec.containers[*].name")
        .context("compiling pod container JSONPath")?;
    let name_path = JsonPath::parse("$.metadata.name").context("compiling pod name JSONPath")?;

    let mut pairs = Vec::new();
    for item in items(list) {
        let Some(pod_name) = name_path
            .query(item)
            .exactly_one()
            .ok()
            .and_then(Value::as_str)
        else {
            continue;
        };
        for container in containers_path.query(item).all() {
            let Some(container_name) = container.as_str() else {
                continue;
            };
            pairs.push((pod_name.to_string(), container_name.to_string()));
        }
    }
    Ok(pairs)
}

/// `.items[]` emitted one compact JSON object per line, optionally wrapped
/// as `{"_": item}` — backs `Format::JsonLines`/`Format::JsonLinesWrapped`.
pub fn items_to_json_lines(list: &Value, wrapped: bool) -> Result<String> {
    let mut out = String::new();
    for item in items(list) {
        let line = if wrapped {
            let mut envelope = serde_json::Map::with_capacity(1);
            envelope.insert("_".to_string(), item.clone());
            serde_json::to_string(&Value::Object(envelope))?
        } else {
            serde_json::to_string(item)?
        };
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

pub fn require_items_array(list: &Value, context: &str) -> Result<()> {
    if list.get("items").is_none() {
        bail!("{context}: document has no `items` array");
    }
    Ok(())
}
