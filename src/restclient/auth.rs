use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use kube::config::{
    AuthInfo, Cluster, Context, KubeConfigOptions, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use kube::{Client, Config};

use crate::error::DumpError;

/// Resolved connection to a cluster: a configured `kube::Client` plus the
/// base URL it was built from. `kube::Config::infer` already implements the
/// "service-account token in pod, else kubeconfig" resolution order the
/// original `NewKc` hand-rolled with environment variables — see
/// SPEC_FULL.md §11.
#[derive(Clone)]
pub struct ClusterEndpoint {
    client: Client,
    base_url: String,
}

impl ClusterEndpoint {
    /// In-pod service account token plus `KUBERNETES_SERVICE_HOST`/`_PORT`,
    /// falling back to `$HOME/.kube/config` and its current context.
    pub async fn infer() -> Result<Self, DumpError> {
        let mut config = Config::infer()
            .await
            .map_err(|e| DumpError::Auth(format!("inferring cluster config: {e}")))?;
        config.accept_invalid_certs = true;
        Self::from_config(config)
    }

    /// Kubeconfig at `path` (or the default search path when `None`),
    /// selecting `context` by name or falling back to `.current-context`.
    pub async fn from_kubeconfig_context(
        path: Option<PathBuf>,
        context: Option<String>,
        insecure_skip_tls_verify: bool,
    ) -> Result<Self, DumpError> {
        let kubeconfig = match path {
            Some(path) => Kubeconfig::read_from(&path)
                .map_err(|e| DumpError::Auth(format!("reading kubeconfig {path:?}: {e}")))?,
            None => Kubeconfig::read()
                .map_err(|e| DumpError::Auth(format!("reading default kubeconfig: {e}")))?,
        };

        let options = KubeConfigOptions {
            context,
            ..Default::default()
        };

        let mut config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| DumpError::Auth(format!("resolving kubeconfig context: {e}")))?;
        config.accept_invalid_certs = insecure_skip_tls_verify;
        Self::from_config(config)
    }

    /// Explicit `(cluster, bearer token)`, used when neither a service
    /// account nor a kubeconfig is available.
    pub fn from_token(
        cluster_url: http::Uri,
        token: String,
        insecure_skip_tls_verify: bool,
    ) -> Result<Self, DumpError> {
        let mut config = Config::new(cluster_url);
        config.auth_info.token = Some(token.into());
        config.accept_invalid_certs = insecure_skip_tls_verify;
        Self::from_config(config)
    }

    /// Explicit `(cluster, client cert, client key)`, both PEM-encoded.
    /// `kube::Config` only learns a client identity through a kubeconfig's
    /// `client-certificate-data`/`client-key-data` fields, which are
    /// themselves base64 of the PEM bytes, so this builds the same
    /// single-context synthetic `Kubeconfig` the teacher's
    /// `gather/server.rs::prepare_kubeconfig` constructs out of typed
    /// `Cluster`/`Context`/`AuthInfo` values rather than a hand-rolled
    /// HTTP/TLS stack.
    pub async fn from_cert_and_key(
        cluster_url: http::Uri,
        cert_pem: &[u8],
        key_pem: &[u8],
        insecure_skip_tls_verify: bool,
    ) -> Result<Self, DumpError> {
        let name = "cluster-dump".to_string();
        let kubeconfig = Kubeconfig {
            current_context: Some(name.clone()),
            auth_infos: vec![NamedAuthInfo {
                name: name.clone(),
                auth_info: Some(AuthInfo {
                    client_certificate_data: Some(STANDARD.encode(cert_pem)),
                    client_key_data: Some(STANDARD.encode(key_pem)),
                    ..Default::default()
                }),
            }],
            contexts: vec![NamedContext {
                name: name.clone(),
                context: Some(Context {
                    cluster: name.clone(),
                    user: name.clone().into(),
                    ..Default::default()
                }),
            }],
            clusters: vec![NamedCluster {
                name: name.clone(),
                cluster: Some(Cluster {
                    server: Some(cluster_url.to_string()),
                    insecure_skip_tls_verify: Some(insecure_skip_tls_verify),
                    ..Default::default()
                }),
            }],
            ..Default::default()
        };

        let options = KubeConfigOptions { context: Some(name), ..Default::default() };
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| DumpError::Auth(format!("building client-cert config: {e}")))?;
        config.accept_invalid_certs = insecure_skip_tls_verify;
        Self::from_config(config)
    }

    fn from_config(config: Config) -> Result<Self, DumpError> {
        let base_url = config.cluster_url.to_string();
        let client = Client::try_from(config)
            .map_err(|e| DumpError::Auth(format!("building http client: {e}")))?;
        Ok(Self { client, base_url })
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}
