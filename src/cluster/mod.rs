//! Cluster state access
//!
//! Reconciliation reads two objects straight from cluster storage: the
//! configuration map and the identity issuer secret. It never goes
//! through the control plane's own API, so an upgrade can proceed when
//! that API is down.
//!
//! Two stores are provided:
//! - [`ApiServerCluster`] talks to the Kubernetes API server using a kubeconfig
//! - [`ManifestCluster`] serves objects parsed from previously rendered manifests

pub mod api;
pub mod kubeconfig;
pub mod manifest;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

use crate::model::{ConfigDecodeError, Configs};

pub use api::ApiServerCluster;
pub use kubeconfig::{ConnectError, Kubeconfig};
pub use manifest::{ManifestCluster, ManifestError};

pub const DEFAULT_NAMESPACE: &str = "mesh-system";

/// Configuration map holding the global, proxy and install documents
pub const CONFIG_MAP_NAME: &str = "mesh-config";

/// Secret holding the identity issuer credentials
pub const ISSUER_SECRET_NAME: &str = "mesh-identity-issuer";
pub const ISSUER_KEY_NAME: &str = "key.pem";
pub const ISSUER_CRT_NAME: &str = "crt.pem";

/// Annotation carrying the issuer certificate expiry on the secret
pub const ISSUER_EXPIRY_ANNOTATION: &str = "meshplane.io/identity-issuer-expiry";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    ConfigMap,
    Secret,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::ConfigMap => write!(f, "configmap"),
            ObjectKind::Secret => write!(f, "secret"),
        }
    }
}

/// Names one namespaced object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(kind: ObjectKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Failure reading cluster state
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("{0} not found")]
    NotFound(ObjectRef),

    #[error("not authorized to read {object}: {message}")]
    Unauthorized { object: ObjectRef, message: String },

    #[error("cluster unreachable: {0}")]
    Unreachable(String),

    #[error("unexpected HTTP {status} reading {object}")]
    Api { object: ObjectRef, status: u16 },

    #[error("invalid response for {object}: {message}")]
    InvalidResponse { object: ObjectRef, message: String },

    #[error("invalid stored configuration: {0}")]
    InvalidConfig(#[from] ConfigDecodeError),
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound(_))
    }
}

/// Read access to the low-level objects of a cluster
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// String data of a configuration map
    async fn config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, FetchError>;

    /// Decoded data of a secret
    async fn secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, FetchError>;
}

/// Fetch the stored configuration of the control plane in `namespace`.
pub async fn fetch_configs(
    cluster: &dyn ClusterStore,
    namespace: &str,
) -> Result<Configs, FetchError> {
    let data = cluster.config_map(namespace, CONFIG_MAP_NAME).await?;
    let configs = Configs::from_config_map(&data)?;
    info!(namespace, "Fetched control plane configuration");
    Ok(configs)
}
