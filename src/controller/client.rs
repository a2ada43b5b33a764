//! Kubernetes API access for the reconciler
//!
//! The reconciler only talks to the cluster through [`KubeClient`], which
//! covers exactly the API surface it consumes. [`KubeClientImpl`] backs it
//! with a real `kube::Client`; tests substitute an in-memory cluster.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::client::{Body, ClientBuilder, DynBody};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tower::BoxError;
use tower::util::{BoxLayer, BoxService};
use tracing::debug;

use crate::controller::error::Result;
use crate::crd::PodSecurityPolicy;
use crate::resources::common::{FIELD_MANAGER, KUBE_SYSTEM};

/// A Kubernetes kind the deployer can upsert.
///
/// Each kind decides how its `Api` handle is scoped: cluster-scoped kinds
/// ignore the namespace, namespaced kinds fall back to `kube-system` when
/// the object does not name one.
pub trait PolicyResource:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;

    fn kind_name() -> String {
        Self::kind(&()).to_string()
    }

    /// Reject objects that deserialized but cannot be what the template
    /// meant, such as a binding without a role.
    fn check_shape(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

impl PolicyResource for PodSecurityPolicy {
    fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
        Api::all(client)
    }
}

impl PolicyResource for ClusterRole {
    fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
        Api::all(client)
    }
}

impl PolicyResource for ClusterRoleBinding {
    fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
        Api::all(client)
    }

    fn check_shape(&self) -> std::result::Result<(), String> {
        if self.role_ref.name.is_empty() {
            return Err("roleRef.name is empty".to_string());
        }
        Ok(())
    }
}

impl PolicyResource for Role {
    fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
        Api::namespaced(client, namespace.unwrap_or(KUBE_SYSTEM))
    }
}

impl PolicyResource for RoleBinding {
    fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
        Api::namespaced(client, namespace.unwrap_or(KUBE_SYSTEM))
    }

    fn check_shape(&self) -> std::result::Result<(), String> {
        if self.role_ref.name.is_empty() {
            return Err("roleRef.name is empty".to_string());
        }
        Ok(())
    }
}

/// Trait abstracting the Kubernetes operations the reconciler needs
///
/// This trait allows substituting an in-memory cluster in tests while using
/// the real client in production.
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Probe the API server; returns its git version
    async fn server_version(&self) -> Result<String, kube::Error>;

    /// Annotations of a namespace, `None` if the namespace does not exist
    async fn namespace_annotations(
        &self,
        namespace: &str,
    ) -> Result<Option<BTreeMap<String, String>>, kube::Error>;

    /// Merge `annotations` into the namespace's existing annotations
    async fn merge_namespace_annotations(
        &self,
        namespace: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), kube::Error>;

    async fn create<K: PolicyResource>(&self, object: &K) -> Result<(), kube::Error>;

    /// Unconditionally overwrite an existing object
    async fn replace<K: PolicyResource>(&self, object: &K) -> Result<(), kube::Error>;

    async fn get_opt<K: PolicyResource>(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<K>, kube::Error>;

    async fn delete<K: PolicyResource>(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<(), kube::Error>;
}

/// Real Kubernetes client implementation
#[derive(Clone)]
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn server_version(&self) -> Result<String, kube::Error> {
        let info = self.client.apiserver_version().await?;
        Ok(info.git_version)
    }

    async fn namespace_annotations(
        &self,
        namespace: &str,
    ) -> Result<Option<BTreeMap<String, String>>, kube::Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = api.get_opt(namespace).await?;
        Ok(ns.map(|ns| ns.metadata.annotations.unwrap_or_default()))
    }

    async fn merge_namespace_annotations(
        &self,
        namespace: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), kube::Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());

        let patch = serde_json::json!({
            "metadata": {
                "annotations": annotations
            }
        });

        api.patch(
            namespace,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;

        debug!("Patched annotations on namespace {}", namespace);
        Ok(())
    }

    async fn create<K: PolicyResource>(&self, object: &K) -> Result<(), kube::Error> {
        let api = K::api(self.client.clone(), object.namespace().as_deref());
        api.create(&post_params(), object).await?;
        debug!("Created {} {}", K::kind_name(), object.name_any());
        Ok(())
    }

    async fn replace<K: PolicyResource>(&self, object: &K) -> Result<(), kube::Error> {
        let api = K::api(self.client.clone(), object.namespace().as_deref());
        let name = object.name_any();
        api.replace(&name, &post_params(), object).await?;
        debug!("Replaced {} {}", K::kind_name(), name);
        Ok(())
    }

    async fn get_opt<K: PolicyResource>(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<K>, kube::Error> {
        K::api(self.client.clone(), namespace).get_opt(name).await
    }

    async fn delete<K: PolicyResource>(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<(), kube::Error> {
        K::api(self.client.clone(), namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        debug!("Deleted {} {}", K::kind_name(), name);
        Ok(())
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

/// The default service stack kube builds from a [`Config`]
pub type TransportService = BoxService<http::Request<Body>, http::Response<Box<DynBody>>, BoxError>;

/// Middleware wrapped around every API request, e.g. for instrumentation
pub type TransportLayer =
    BoxLayer<TransportService, http::Request<Body>, http::Response<Box<DynBody>>, BoxError>;

/// Build a client from a kubeconfig file.
///
/// `timeout` bounds connecting, reading and writing on every request made
/// through the client. When `transport` is set it wraps the whole service
/// stack, so it sees every call the reconciler makes.
pub async fn connect(
    kubeconfig: &Path,
    timeout: Duration,
    transport: Option<&TransportLayer>,
) -> Result<Client> {
    let kubeconfig = Kubeconfig::read_from(kubeconfig)?;
    let mut config =
        Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
    config.connect_timeout = Some(timeout);
    config.read_timeout = Some(timeout);
    config.write_timeout = Some(timeout);

    let builder: ClientBuilder<TransportService> = ClientBuilder::try_from(config)?;
    let client = match transport {
        Some(layer) => builder.with_layer(layer).build(),
        None => builder.build(),
    };
    Ok(client)
}
