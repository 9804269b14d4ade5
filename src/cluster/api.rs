//! Kubernetes API server access

use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::kubeconfig::{ConnectError, ResolvedContext};
use super::{ClusterStore, FetchError, ObjectKind, ObjectRef};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads ConfigMaps and Secrets from the core/v1 API
pub struct ApiServerCluster {
    client: reqwest::Client,
    server: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DataObject {
    #[serde(default)]
    data: BTreeMap<String, String>,
}

impl ApiServerCluster {
    pub fn new(context: &ResolvedContext) -> Result<Self, ConnectError> {
        let mut builder = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .use_rustls_tls();

        if let Some(ca_pem) = &context.ca_pem {
            let certs = reqwest::Certificate::from_pem_bundle(ca_pem)
                .map_err(|e| ConnectError::Tls(format!("certificate authority: {}", e)))?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        if let Some(identity_pem) = &context.client_identity_pem {
            let identity = reqwest::Identity::from_pem(identity_pem)
                .map_err(|e| ConnectError::Tls(format!("client certificate: {}", e)))?;
            builder = builder.identity(identity);
        }

        if context.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| ConnectError::Client(e.to_string()))?;

        Ok(Self {
            client,
            server: context.server.clone(),
            token: context.token.clone(),
        })
    }

    fn url(&self, object: &ObjectRef) -> String {
        let collection = match object.kind {
            ObjectKind::ConfigMap => "configmaps",
            ObjectKind::Secret => "secrets",
        };
        format!(
            "{}/api/v1/namespaces/{}/{}/{}",
            self.server, object.namespace, collection, object.name
        )
    }

    async fn get<T: DeserializeOwned>(&self, object: &ObjectRef) -> Result<T, FetchError> {
        let url = self.url(object);
        debug!(%url, "Reading object from API server");

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Unreachable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                response
                    .json::<T>()
                    .await
                    .map_err(|e| FetchError::InvalidResponse {
                        object: object.clone(),
                        message: e.to_string(),
                    })
            }
            StatusCode::NOT_FOUND => Err(FetchError::NotFound(object.clone())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let status = response.status();
                let message = response.text().await.unwrap_or_else(|_| status.to_string());
                Err(FetchError::Unauthorized {
                    object: object.clone(),
                    message: status_message(&message).unwrap_or_else(|| status.to_string()),
                })
            }
            status => Err(FetchError::Api {
                object: object.clone(),
                status: status.as_u16(),
            }),
        }
    }
}

/// Extract `message` from a Kubernetes Status body
fn status_message(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct Status {
        message: Option<String>,
    }
    serde_json::from_str::<Status>(body).ok()?.message
}

#[async_trait]
impl ClusterStore for ApiServerCluster {
    async fn config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, FetchError> {
        let object = ObjectRef::new(ObjectKind::ConfigMap, namespace, name);
        let config_map: DataObject = self.get(&object).await?;
        Ok(config_map.data)
    }

    async fn secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, FetchError> {
        let object = ObjectRef::new(ObjectKind::Secret, namespace, name);
        let secret: DataObject = self.get(&object).await?;

        let mut data = BTreeMap::new();
        for (key, encoded) in secret.data {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| FetchError::InvalidResponse {
                    object: object.clone(),
                    message: format!("data key {}: {}", key, e),
                })?;
            data.insert(key, decoded);
        }
        Ok(data)
    }
}
