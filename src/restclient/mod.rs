//! Thin REST layer over `kube::Client`: retrying GETs, a couple of
//! discovery-flavoured helpers, and the write operations a dump never calls
//! but a reconciler built on top of this core would.

pub mod auth;

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use kube::core::ErrorResponse;
use kube::Client;
use serde_json::Value;
use tokio::time::timeout;
use tracing::instrument;

use crate::error::DumpError;
use crate::transform;

const TIMEOUT: Duration = Duration::from_secs(5 * 60);
const RETRIES: usize = 5;
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
pub const FIELD_MANAGER: &str = "cluster-dump";

/// One RestClient per worker, matching §3's ownership note: retry state and
/// any future response-transformer state never leak across workers.
#[derive(Clone)]
pub struct RestClient {
    client: Client,
}

impl RestClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn backoff() -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(INITIAL_BACKOFF)
            .with_max_times(RETRIES)
    }

    fn should_retry(err: &DumpError) -> bool {
        matches!(err, DumpError::Http { status, .. } if *status == 0 || *status >= 500)
    }

    async fn get_once(client: &Client, path: &str) -> Result<String, DumpError> {
        let request = http::Request::get(path)
            .body(Vec::new())
            .map_err(|e| DumpError::Http {
                status: 0,
                body: format!("building request for {path}: {e}"),
            })?;

        match timeout(TIMEOUT, client.request_text(request)).await {
            Err(_) => Err(DumpError::Http {
                status: 0,
                body: format!("{path}: timed out after {TIMEOUT:?}"),
            }),
            Ok(Ok(body)) => Ok(body),
            Ok(Err(kube::Error::Api(ErrorResponse { code, message, .. }))) => {
                Err(DumpError::Http { status: code, body: message })
            }
            Ok(Err(e)) => Err(DumpError::Http { status: 0, body: e.to_string() }),
        }
    }

    /// `GET path`, retried per the fixed backoff budget. `path` must begin
    /// with `/` and already carry any query string.
    #[instrument(skip(self), fields(path))]
    pub async fn get(&self, path: &str) -> Result<String, DumpError> {
        let client = self.client.clone();
        let path = path.to_string();
        (move || {
            let client = client.clone();
            let path = path.clone();
            async move { Self::get_once(&client, &path).await }
        })
        .retry(Self::backoff())
        .when(Self::should_retry)
        .await
    }

    /// `get`, but the IgnoreNotFoundTransformer: 404/405 become `Ok(None)`
    /// instead of an error, matching `logs.rs`'s 400-as-empty handling in
    /// the teacher, generalised to the two status codes §4.3/§4.6 require.
    pub async fn get_ignore_not_found(&self, path: &str) -> Result<Option<String>, DumpError> {
        match self.get(path).await {
            Ok(body) => Ok(Some(body)),
            Err(DumpError::Http { status: 404 | 405, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `GET /api`, returning the last entry of `.versions`, memoised by the
    /// caller (Discovery holds the cached value for the lifetime of a dump).
    pub async fn core_api_version(&self) -> Result<String, DumpError> {
        let body = self.get("/api").await?;
        let doc: Value = serde_json::from_str(&body)
            .map_err(|e| DumpError::Discovery(format!("parsing /api response: {e}")))?;
        doc.get("versions")
            .and_then(Value::as_array)
            .and_then(|versions| versions.last())
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DumpError::Discovery("/api returned no versions".into()))
    }

    /// `GET /version` — server build info, written verbatim to `version.yaml`.
    pub async fn server_version(&self) -> Result<Value, DumpError> {
        let body = self.get("/version").await?;
        serde_json::from_str(&body)
            .map_err(|e| DumpError::Discovery(format!("parsing /version response: {e}")))
    }

    /// Ad-hoc diagnostic helper reintroduced from the original implementation
    /// (SPEC_FULL.md §11): pretty-prints whatever JSON the path returns. Never
    /// called by the dump path itself, which only ever needs compact JSON.
    pub async fn pretty_print_json(&self, path: &str) -> Result<String, DumpError> {
        let body = self.get(path).await?;
        let value = transform::json_to_value(&body)
            .map_err(|e| DumpError::Transform { expr: path.to_string(), source: e })?;
        transform::value_to_json_pretty(&value)
            .map_err(|e| DumpError::Transform { expr: path.to_string(), source: e })
    }

    /// `POST path` with a JSON body. Out of the dump's write path; specified
    /// for a reconciler layered on top of this core (§4.2).
    pub async fn create(&self, path: &str, body: &Value) -> Result<String, DumpError> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| DumpError::Writer(format!("encoding create body: {e}")))?;
        let request = http::Request::post(path)
            .header("content-type", "application/json")
            .body(payload)
            .map_err(|e| DumpError::Http { status: 0, body: e.to_string() })?;
        self.send(request).await
    }

    /// Server-side apply: PATCH with `application/apply-patch+yaml` and a
    /// fixed `fieldManager` query parameter.
    pub async fn apply(&self, path: &str, body: &Value) -> Result<String, DumpError> {
        let yaml = transform::value_to_yaml(body)
            .map_err(|e| DumpError::Transform { expr: path.to_string(), source: e })?;
        let query_sep = if path.contains('?') { '&' } else { '?' };
        let uri = format!("{path}{query_sep}fieldManager={FIELD_MANAGER}");
        let request = http::Request::patch(uri)
            .header("content-type", "application/apply-patch+yaml")
            .body(yaml.into_bytes())
            .map_err(|e| DumpError::Http { status: 0, body: e.to_string() })?;
        self.send(request).await
    }

    /// GETs the object first to read `metadata.resourceVersion`, splices it
    /// into `body`, then PUTs.
    pub async fn replace(&self, path: &str, body: &Value) -> Result<String, DumpError> {
        let current = self.get(path).await?;
        let current: Value = serde_json::from_str(&current)
            .map_err(|e| DumpError::Discovery(format!("parsing current object at {path}: {e}")))?;
        let resource_version = current
            .get("metadata")
            .and_then(|m| m.get("resourceVersion"))
            .cloned();

        let mut body = body.clone();
        if let (Some(rv), Some(metadata)) = (resource_version, body.get_mut("metadata")) {
            if let Some(metadata) = metadata.as_object_mut() {
                metadata.insert("resourceVersion".to_string(), rv);
            }
        }

        let payload = serde_json::to_vec(&body)
            .map_err(|e| DumpError::Writer(format!("encoding replace body: {e}")))?;
        let request = http::Request::put(path)
            .header("content-type", "application/json")
            .body(payload)
            .map_err(|e| DumpError::Http { status: 0, body: e.to_string() })?;
        self.send(request).await
    }

    pub async fn delete(&self, path: &str) -> Result<String, DumpError> {
        let request = http::Request::delete(path)
            .body(Vec::new())
            .map_err(|e| DumpError::Http { status: 0, body: e.to_string() })?;
        self.send(request).await
    }

    async fn send(&self, request: http::Request<Vec<u8>>) -> Result<String, DumpError> {
        match timeout(TIMEOUT, self.client.request_text(request)).await {
            Err(_) => Err(DumpError::Http { status: 0, body: format!("timed out after {TIMEOUT:?}") }),
            Ok(Ok(body)) => Ok(body),
            Ok(Err(kube::Error::Api(ErrorResponse { code, message, .. }))) => {
                Err(DumpError::Http { status: code, body: message })
            }
            Ok(Err(e)) => Err(DumpError::Http { status: 0, body: e.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::mockcluster::MockCluster;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    #[tokio::test]
    async fn get_returns_body_on_200() {
        let cluster = MockCluster::start().await;
        cluster
            .mount(
                Mock::given(method("GET"))
                    .and(path("/api"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({"versions": ["v1"]}))),
            )
            .await;

        let rc = RestClient::new(cluster.client());
        let body = rc.get("/api").await.unwrap();
        assert!(body.contains("v1"));
    }

    #[tokio::test]
    async fn get_ignore_not_found_maps_404_to_none() {
        let cluster = MockCluster::start().await;
        cluster
            .mount(
                Mock::given(method("GET"))
                    .and(path("/apis/missing.example.com/v1/widgets"))
                    .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                        "kind": "Status",
                        "code": 404,
                        "message": "not found"
                    }))),
            )
            .await;

        let rc = RestClient::new(cluster.client());
        let result = rc
            .get_ignore_not_found("/apis/missing.example.com/v1/widgets")
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn get_ignore_not_found_propagates_other_errors() {
        let cluster = MockCluster::start().await;
        cluster
            .mount(
                Mock::given(method("GET"))
                    .and(path("/apis/broken.example.com/v1/widgets"))
                    .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                        "kind": "Status",
                        "code": 403,
                        "message": "forbidden"
                    }))),
            )
            .await;

        let rc = RestClient::new(cluster.client());
        let err = rc
            .get_ignore_not_found("/apis/broken.example.com/v1/widgets")
            .await
            .unwrap_err();
        assert!(matches!(err, DumpError::Http { status: 403, .. }));
    }

    #[tokio::test]
    async fn core_api_version_picks_last_entry() {
        let cluster = MockCluster::start().await;
        cluster
            .mount(
                Mock::given(method("GET"))
                    .and(path("/api"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({"versions": ["v1beta1", "v1"]}))),
            )
            .await;

        let rc = RestClient::new(cluster.client());
        assert_eq!(rc.core_api_version().await.unwrap(), "v1");
    }
}
