//! `Discovery` (C3): enumerate namespaces and fan out one call per API group
//! to build the flattened `(name, groupVersion, namespaced, verbs)` catalogue
//! the rest of the dump works from. Grounded in the teacher's
//! `scanners/info.rs` (raw `/api`/`/apis` fetches over `request_text`)
//! generalised from a diagnostic dump into the structured catalogue §4.3
//! describes, since the teacher leans on `kube::discovery::Discovery`
//! where this core instead needs the per-group availability/error rows.

use futures::future::join_all;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;

use crate::error::DumpError;
use crate::restclient::RestClient;
use crate::transform;

/// One row of `api_resources.yaml`. `available=false` carries `error` and no
/// other field is meaningful; such descriptors are emitted but never dumped.
#[derive(Clone, Debug, Deserialize)]
pub struct ResourceDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub group_version: String,
    #[serde(default)]
    pub namespaced: bool,
    #[serde(default)]
    pub verbs: Vec<String>,
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub short_names: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ResourceDescriptor {
    fn from_value(value: &Value) -> Option<Self> {
        // `name` containing `/` denotes a subresource and is dropped at
        // construction per §3's ResourceDescriptor invariant. An unavailable
        // row (`discover_group`'s error case) carries no `name` at all and
        // must still become a descriptor, just one that defaults `name` to
        // `""` and carries `available:false`/`error`.
        if value.get("name").and_then(Value::as_str).is_some_and(|n| n.contains('/')) {
            return None;
        }
        serde_json::from_value(json_with_snake_case(value)).ok()
    }
}

/// The discovery payload uses Kubernetes' camelCase field names; reshape to
/// the snake_case `ResourceDescriptor` expects rather than pull in a second
/// serde attribute set.
fn json_with_snake_case(value: &Value) -> Value {
    let mut out = value.clone();
    if let Some(obj) = out.as_object_mut() {
        if let Some(gv) = obj.remove("groupVersion") {
            obj.insert("group_version".into(), gv);
        }
        if let Some(sn) = obj.remove("shortNames") {
            obj.insert("short_names".into(), sn);
        }
    }
    out
}

pub struct Discovery {
    client: RestClient,
}

impl Discovery {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }

    /// `listNamespaces`: GET `/api/<ver>/namespaces`, converted to YAML and
    /// cleaned via the DefaultCleaningQuery.
    #[instrument(skip(self))]
    pub async fn list_namespaces(&self, core_version: &str) -> Result<Value, DumpError> {
        let body = self.client.get(&format!("/api/{core_version}/namespaces")).await?;
        let mut list = transform::json_to_value(&body).map_err(|e| DumpError::Discovery(e.to_string()))?;
        transform::clean_resource_list(&mut list)
            .map_err(|e| DumpError::Transform { expr: "DefaultCleaningQuery".into(), source: e })?;
        Ok(list)
    }

    /// `listApiResources`: `/apis` plus the implicit core group, fanned out
    /// with the discoveryTransformer and concatenated under a synthetic
    /// `APIResourceList` wrapper.
    #[instrument(skip(self))]
    pub async fn list_api_resources(&self, core_version: &str) -> Result<Value, DumpError> {
        let mut group_versions = vec![core_version.to_string()];
        group_versions.extend(self.preferred_group_versions().await?);

        let core_version = core_version.to_string();
        let rows = join_all(
            group_versions
                .into_iter()
                .map(|gv| discover_group(self.client.clone(), gv, core_version.clone())),
        )
        .await;

        let items: Vec<Value> = rows.into_iter().flatten().collect();
        Ok(json!({
            "kind": "APIResourceList",
            "items": items,
        }))
    }

    async fn preferred_group_versions(&self) -> Result<Vec<String>, DumpError> {
        let body = self.client.get("/apis").await?;
        let doc: Value = serde_json::from_str(&body)
            .map_err(|e| DumpError::Discovery(format!("parsing /apis response: {e}")))?;
        let groups = doc
            .get("groups")
            .and_then(Value::as_array)
            .ok_or_else(|| DumpError::Discovery("/apis response has no `groups` array".into()))?;

        Ok(groups
            .iter()
            .filter_map(|g| g.get("preferredVersion")?.get("groupVersion")?.as_str())
            .map(str::to_string)
            .collect())
    }
}

/// The discoveryTransformer of §4.3 step 2: on error, a single
/// `available:false` row; on success, the group's `resources` array,
/// annotated and stripped of subresources/volatile fields, or the same
/// unavailable row if that leaves nothing.
async fn discover_group(client: RestClient, group_version: String, core_version: String) -> Vec<Value> {
    let path = if group_version == core_version {
        format!("/api/{group_version}")
    } else {
        format!("/apis/{group_version}")
    };

    let unavailable = |msg: String| {
        vec![json!({
            "groupVersion": group_version,
            "available": false,
            "error": msg,
        })]
    };

    let body = match client.get(&path).await {
        Ok(body) => body,
        Err(e) => return unavailable(e.to_string()),
    };

    let doc: Value = match serde_json::from_str(&body) {
        Ok(doc) => doc,
        Err(e) => return unavailable(format!("parsing {path} response: {e}")),
    };

    let resources = doc.get("resources").and_then(Value::as_array).cloned().unwrap_or_default();

    let rows: Vec<Value> = resources
        .into_iter()
        .filter(|r| !r.get("name").and_then(Value::as_str).unwrap_or_default().contains('/'))
        .map(|mut r| {
            if let Some(obj) = r.as_object_mut() {
                obj.insert("groupVersion".into(), Value::String(group_version.clone()));
                obj.insert("available".into(), Value::Bool(true));
                obj.remove("storageVersionHash");
                obj.remove("singularName");
            }
            r
        })
        .collect();

    if rows.is_empty() {
        return unavailable("no resources returned".into());
    }
    rows
}

/// Deserialize the filtered `api_resources.yaml` document into descriptors,
/// used by DumpEngine to build the §4.5 step 5 worklist.
pub fn descriptors(api_resources: &Value) -> Vec<ResourceDescriptor> {
    transform::items(api_resources)
        .iter()
        .filter_map(ResourceDescriptor::from_value)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::mockcluster::MockCluster;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    #[tokio::test]
    async fn list_namespaces_cleans_and_keeps_shape() {
        let cluster = MockCluster::start().await;
        cluster
            .mount(
                Mock::given(method("GET"))
                    .and(path("/api/v1/namespaces"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                        "kind": "NamespaceList",
                        "metadata": {"resourceVersion": "1"},
                        "items": [
                            {"metadata": {"name": "a", "uid": "u1"}},
                            {"metadata": {"name": "b", "uid": "u2"}},
                        ]
                    }))),
            )
            .await;

        let discovery = Discovery::new(RestClient::new(cluster.client()));
        let list = discovery.list_namespaces("v1").await.unwrap();
        assert!(list.get("metadata").is_none());
        assert_eq!(transform::items(&list).len(), 2);
        assert!(transform::items(&list)[0].get("metadata").unwrap().get("uid").is_none());
    }

    #[tokio::test]
    async fn list_api_resources_marks_failing_group_unavailable() {
        let cluster = MockCluster::start().await;
        cluster
            .mount(
                Mock::given(method("GET"))
                    .and(path("/apis"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                        "groups": [
                            {"preferredVersion": {"groupVersion": "bad.example.com/v1"}},
                        ]
                    }))),
            )
            .await;
        cluster
            .mount(
                Mock::given(method("GET"))
                    .and(path("/api/v1"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                        "resources": [
                            {"name": "pods", "namespaced": true, "kind": "Pod", "verbs": ["get", "list"]},
                            {"name": "pods/log", "namespaced": true, "kind": "Pod", "verbs": ["get"]},
                        ]
                    }))),
            )
            .await;
        cluster
            .mount(
                Mock::given(method("GET"))
                    .and(path("/apis/bad.example.com/v1"))
                    .respond_with(ResponseTemplate::new(503).set_body_string("unavailable")),
            )
            .await;

        let discovery = Discovery::new(RestClient::new(cluster.client()));
        let api_resources = discovery.list_api_resources("v1").await.unwrap();
        let descriptors = descriptors(&api_resources);

        let pods = descriptors.iter().find(|d| d.name == "pods").unwrap();
        assert!(pods.available);
        assert_eq!(pods.group_version, "v1");
        assert!(descriptors.iter().all(|d| d.name != "pods/log"));

        let bad = descriptors.iter().find(|d| d.group_version == "bad.example.com/v1").unwrap();
        assert!(!bad.available);
        assert!(bad.error.is_some());
    }
}
