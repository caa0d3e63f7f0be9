//! `DumpEngine` (C5): the `dump()` entry point. Prepares the output tree,
//! writes the three top-level artefacts, fans out one `ResourceWriter` per
//! resource kind through a bounded pool, and aggregates worker errors.
//! Grounded in the teacher's `gather/gather.rs` `GatherConfig::collect`
//! fetch-then-fan-out shape, with the unbounded `join_all` there replaced
//! by a `buffer_unordered`-bounded stream for the `poolSize` semantics
//! §4.5/§5 require (the teacher has no bounded-pool concept of its own;
//! `futures::stream` is already in its dependency table for the `join_all`
//! it does use).

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use futures::stream::{self, StreamExt};
use tracing::instrument;

use crate::discovery::{descriptors, Discovery, ResourceDescriptor};
use crate::error::{DumpError, DumpResult};
use crate::filter;
use crate::format::{self, Format};
use crate::restclient::RestClient;
use crate::transform;
use crate::writer::ResourceWriter;

/// Append-only, mutex-guarded error collection shared across workers. The
/// only lock in the engine is the one around this append, matching §5's
/// "no worker holds any lock across an HTTP call" rule.
#[derive(Default)]
struct WorkerErrorLog(Mutex<Vec<String>>);

impl WorkerErrorLog {
    fn push(&self, message: String) {
        self.0.lock().expect("worker error log mutex poisoned").push(message);
    }

    fn into_result(self) -> DumpResult<()> {
        let errors = self.0.into_inner().expect("worker error log mutex poisoned");
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DumpError::AggregateWorker(errors.len(), errors.join("\n")))
        }
    }
}

pub struct DumpParams<'a> {
    pub root: &'a Path,
    pub namespace_excludes: &'a [String],
    pub gvk_excludes: &'a [String],
    pub no_logs: bool,
    pub gzip: bool,
    pub format: Format,
    /// `<= 0` means unbounded concurrency.
    pub pool_size: isize,
}

/// Called once per completed worker (success or failure), before that
/// worker's outcome is recorded. Runs on the worker's own task; callers
/// needing ordering must serialize internally (§4.5/§5).
pub type OnProgress = Box<dyn Fn() + Send + Sync>;

/// `dump(root, nsExcludes, gvkExcludes, noLogs, gzip, format, poolSize,
/// onProgress) -> error`, per §6's invocation surface.
#[instrument(skip(client, params, on_progress), fields(root = %params.root.display()))]
pub async fn dump(client: RestClient, params: DumpParams<'_>, on_progress: Option<OnProgress>) -> DumpResult<()> {
    let namespace_excludes = filter::compile_namespace_excludes(params.namespace_excludes)?;
    let gvk_excludes = filter::compile_gvk_excludes(params.gvk_excludes)?;

    prepare_root(params.root)?;

    let core_version = client.core_api_version().await.map_err(|e| DumpError::Discovery(e.to_string()))?;
    let discovery = Discovery::new(client.clone());

    let mut namespaces = discovery.list_namespaces(&core_version).await?;
    filter::exclude_namespaces(&mut namespaces, &namespace_excludes)?;
    write_top_level(params.root, &format!("namespaces_{core_version}"), &namespaces, params.format, params.gzip)?;

    let known_namespaces = create_namespace_skeleton(params.root, &namespaces)?;

    let mut api_resources = discovery.list_api_resources(&core_version).await?;
    filter::exclude_resources(&mut api_resources, &gvk_excludes)?;
    write_top_level(params.root, "api_resources", &api_resources, params.format, params.gzip)?;

    let worklist = build_worklist(&api_resources, &core_version);
    let error_log = WorkerErrorLog::default();

    run_workers(client.clone(), &params, &core_version, worklist, known_namespaces, &error_log, on_progress).await;

    let version = client.server_version().await.map_err(|e| DumpError::Discovery(e.to_string()))?;
    let version_yaml = transform::value_to_yaml(&version).map_err(|e| DumpError::Transform { expr: "/version".into(), source: e })?;
    format::write_document(params.root, "version", &version_yaml, params.format, params.gzip)
        .map_err(|e| DumpError::Writer(e.to_string()))?;

    error_log.into_result()
}

/// §4.5 step 1: recursive delete + recreate.
fn prepare_root(root: &Path) -> DumpResult<()> {
    if root.exists() {
        fs::remove_dir_all(root).map_err(|e| DumpError::Writer(format!("clearing {root:?}: {e}")))?;
    }
    fs::create_dir_all(root).map_err(|e| DumpError::Writer(format!("creating {root:?}: {e}")))
}

fn write_top_level(
    root: &Path,
    stem: &str,
    document: &serde_json::Value,
    format: Format,
    gzip: bool,
) -> DumpResult<()> {
    let yaml = transform::value_to_yaml(document).map_err(|e| DumpError::Transform { expr: stem.to_string(), source: e })?;
    format::write_document(root, stem, &yaml, format, gzip).map_err(|e| DumpError::Writer(e.to_string()))?;
    Ok(())
}

/// §4.5 step 3: the namespace directory skeleton, including a `log/`
/// subdirectory for each — created before any worker starts so no worker
/// races on directory creation, and so §3's "filtered-out namespaces are
/// silently skipped" rule has something concrete to check against.
fn create_namespace_skeleton(root: &Path, namespaces: &serde_json::Value) -> DumpResult<HashSet<String>> {
    let mut known = HashSet::new();
    for item in transform::items(namespaces) {
        let Some(name) = item.get("metadata").and_then(|m| m.get("name")).and_then(|n| n.as_str()) else {
            continue;
        };
        let dir = root.join(format::namespace_dir(name));
        fs::create_dir_all(dir.join("log")).map_err(|e| DumpError::Writer(format!("creating {dir:?}: {e}")))?;
        known.insert(name.to_string());
    }
    Ok(known)
}

/// §4.5 step 5: project the filtered discovery document to the worklist,
/// skipping unavailable descriptors, descriptors without `get`, and the
/// core `namespaces` resource (already dumped in step 2).
fn build_worklist(api_resources: &serde_json::Value, core_version: &str) -> Vec<ResourceDescriptor> {
    descriptors(api_resources)
        .into_iter()
        .filter(|d| d.available)
        .filter(|d| d.verbs.iter().any(|v| v == "get"))
        .filter(|d| !(d.name == "namespaces" && d.group_version == core_version))
        .collect()
}

/// §4.5 step 6: bounded worker pool via `buffer_unordered`. `pool_size <= 0`
/// is unbounded (capped at the worklist length, since that is already the
/// maximum useful concurrency).
async fn run_workers(
    client: RestClient,
    params: &DumpParams<'_>,
    core_version: &str,
    worklist: Vec<ResourceDescriptor>,
    known_namespaces: HashSet<String>,
    error_log: &WorkerErrorLog,
    on_progress: Option<OnProgress>,
) {
    let concurrency = if params.pool_size <= 0 {
        worklist.len().max(1)
    } else {
        params.pool_size as usize
    };

    let root: PathBuf = params.root.to_path_buf();
    let format = params.format;
    let gzip = params.gzip;
    let no_logs = params.no_logs;

    let tasks = worklist.into_iter().map(|descriptor| {
        let writer = ResourceWriter::new(client.clone(), root.clone(), format, gzip, no_logs);
        let known_namespaces = known_namespaces.clone();
        let core_version = core_version.to_string();
        async move { (descriptor.clone(), writer.write(&descriptor, &core_version, &known_namespaces).await) }
    });

    let mut results = stream::iter(tasks).buffer_unordered(concurrency);
    while let Some((descriptor, result)) = results.next().await {
        if let Err(e) = result {
            error_log.push(format!(
                "write resource {} ({}): {e}",
                descriptor.name, descriptor.group_version
            ));
        }
        if let Some(cb) = &on_progress {
            cb();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::mockcluster::MockCluster;
    use serde_json::json;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    async fn mount_happy_path(cluster: &MockCluster) {
        cluster
            .mount(
                Mock::given(method("GET"))
                    .and(path("/api"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({"versions": ["v1"]}))),
            )
            .await;
        cluster
            .mount(
                Mock::given(method("GET"))
                    .and(path("/version"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({"gitVersion": "v1.30.0"}))),
            )
            .await;
        cluster
            .mount(
                Mock::given(method("GET"))
                    .and(path("/api/v1/namespaces"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                        "items": [{"metadata": {"name": "a"}}, {"metadata": {"name": "b"}}]
                    }))),
            )
            .await;
        cluster
            .mount(
                Mock::given(method("GET"))
                    .and(path("/apis"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({"groups": []}))),
            )
            .await;
        cluster
            .mount(
                Mock::given(method("GET"))
                    .and(path("/api/v1"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                        "resources": [
                            {"name": "foos", "namespaced": true, "kind": "Foo", "verbs": ["get", "list"]}
                        ]
                    }))),
            )
            .await;
    }

    #[tokio::test]
    async fn happy_path_writes_top_level_artefacts_and_namespace_skeleton() {
        let cluster = MockCluster::start().await;
        mount_happy_path(&cluster).await;
        cluster
            .mount(
                Mock::given(method("GET"))
                    .and(path("/api/v1/foos"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                        "items": [
                            {"metadata": {"name": "x", "namespace": "a"}},
                            {"metadata": {"name": "y", "namespace": "b"}},
                        ]
                    }))),
            )
            .await;

        let dir = tempdir().unwrap();
        let params = DumpParams {
            root: dir.path(),
            namespace_excludes: &[],
            gvk_excludes: &[],
            no_logs: true,
            gzip: false,
            format: Format::Yaml,
            pool_size: 4,
        };

        dump(RestClient::new(cluster.client()), params, None).await.unwrap();

        assert!(dir.path().join("namespaces_v1.yaml").exists());
        assert!(dir.path().join("api_resources.yaml").exists());
        assert!(dir.path().join("version.yaml").exists());
        assert!(dir.path().join("a/foos_v1.yaml").exists());
        assert!(dir.path().join("b/foos_v1.yaml").exists());
        assert!(dir.path().join("a/log").is_dir());
    }

    #[tokio::test]
    async fn namespace_exclusion_removes_directory_and_listing_entry() {
        let cluster = MockCluster::start().await;
        mount_happy_path(&cluster).await;
        cluster
            .mount(
                Mock::given(method("GET"))
                    .and(path("/api/v1/foos"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                        "items": [
                            {"metadata": {"name": "x", "namespace": "a"}},
                            {"metadata": {"name": "y", "namespace": "b"}},
                        ]
                    }))),
            )
            .await;

        let dir = tempdir().unwrap();
        let params = DumpParams {
            root: dir.path(),
            namespace_excludes: &["^b$".to_string()],
            gvk_excludes: &[],
            no_logs: true,
            gzip: false,
            format: Format::Yaml,
            pool_size: 4,
        };

        dump(RestClient::new(cluster.client()), params, None).await.unwrap();

        let namespaces_doc = std::fs::read_to_string(dir.path().join("namespaces_v1.yaml")).unwrap();
        assert!(namespaces_doc.contains('a'));
        assert!(!namespaces_doc.contains('b'));
        assert!(!dir.path().join("b").exists());
    }

    #[tokio::test]
    async fn on_progress_fires_once_per_completed_worker() {
        let cluster = MockCluster::start().await;
        mount_happy_path(&cluster).await;
        cluster
            .mount(
                Mock::given(method("GET"))
                    .and(path("/api/v1/foos"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                        "items": [{"metadata": {"name": "x", "namespace": "a"}}]
                    }))),
            )
            .await;

        let dir = tempdir().unwrap();
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls_in_closure = calls.clone();
        let params = DumpParams {
            root: dir.path(),
            namespace_excludes: &[],
            gvk_excludes: &[],
            no_logs: true,
            gzip: false,
            format: Format::Yaml,
            pool_size: 0,
        };

        dump(
            RestClient::new(cluster.client()),
            params,
            Some(Box::new(move || {
                calls_in_closure.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            })),
        )
        .await
        .unwrap();

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn worker_errors_are_aggregated_not_fatal() {
        let cluster = MockCluster::start().await;
        mount_happy_path(&cluster).await;
        cluster
            .mount(
                Mock::given(method("GET"))
                    .and(path("/api/v1/foos"))
                    .respond_with(ResponseTemplate::new(404).set_body_json(json!({"code": 404}))),
            )
            .await;

        let dir = tempdir().unwrap();
        let params = DumpParams {
            root: dir.path(),
            namespace_excludes: &[],
            gvk_excludes: &[],
            no_logs: true,
            gzip: false,
            format: Format::Yaml,
            pool_size: 0,
        };

        let err = dump(RestClient::new(cluster.client()), params, None).await.unwrap_err();
        assert!(matches!(err, DumpError::AggregateWorker(1, _)));
        assert!(dir.path().join("version.yaml").exists());
    }
}
