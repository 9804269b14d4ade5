//! Cluster state from rendered manifests
//!
//! Lets an upgrade run against the output of a previous `install` or
//! `upgrade` instead of a live cluster. Only ConfigMaps and Secrets are
//! kept; every other object in the bundle is skipped.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{ClusterStore, FetchError, ObjectKind, ObjectRef};

const DEFAULT_OBJECT_NAMESPACE: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid {kind}: {message}")]
    InvalidObject { kind: String, message: String },
}

type ObjectKey = (String, String);

/// In-memory cluster built from manifest text
#[derive(Debug, Clone, Default)]
pub struct ManifestCluster {
    config_maps: BTreeMap<ObjectKey, BTreeMap<String, String>>,
    secrets: BTreeMap<ObjectKey, BTreeMap<String, Vec<u8>>>,
}

impl ManifestCluster {
    /// Read manifests from a file, a directory of `.yaml`/`.yml` files, or
    /// stdin when `source` is `-`.
    pub fn read(source: &str) -> Result<Self, ManifestError> {
        if source == "-" {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .map_err(|source| ManifestError::Io {
                    path: PathBuf::from("<stdin>"),
                    source,
                })?;
            return Self::from_yaml(&text);
        }

        let path = Path::new(source);
        let mut cluster = Self::default();
        for file in manifest_files(path)? {
            let text = std::fs::read_to_string(&file).map_err(|source| ManifestError::Io {
                path: file.clone(),
                source,
            })?;
            cluster.add_yaml(&text)?;
        }
        Ok(cluster)
    }

    /// Parse a multi-document YAML stream.
    pub fn from_yaml(text: &str) -> Result<Self, ManifestError> {
        let mut cluster = Self::default();
        cluster.add_yaml(text)?;
        Ok(cluster)
    }

    pub fn add_yaml(&mut self, text: &str) -> Result<(), ManifestError> {
        for document in serde_yaml::Deserializer::from_str(text) {
            let value = Value::deserialize(document)?;
            self.add_object(&value)?;
        }
        Ok(())
    }

    pub fn insert_config_map(
        &mut self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) {
        self.config_maps
            .insert((namespace.to_string(), name.to_string()), data);
    }

    pub fn insert_secret(&mut self, namespace: &str, name: &str, data: BTreeMap<String, Vec<u8>>) {
        self.secrets
            .insert((namespace.to_string(), name.to_string()), data);
    }

    pub fn is_empty(&self) -> bool {
        self.config_maps.is_empty() && self.secrets.is_empty()
    }

    fn add_object(&mut self, value: &Value) -> Result<(), ManifestError> {
        if value.is_null() {
            return Ok(());
        }

        let kind = value.get("kind").and_then(Value::as_str).unwrap_or_default();
        match kind {
            "List" => {
                if let Some(items) = value.get("items").and_then(Value::as_sequence) {
                    for item in items {
                        self.add_object(item)?;
                    }
                }
            }
            "ConfigMap" => {
                let (namespace, name) = object_key(kind, value)?;
                let data = string_map(kind, value.get("data"))?;
                debug!(%namespace, %name, "Loaded configmap from manifest");
                self.config_maps.insert((namespace, name), data);
            }
            "Secret" => {
                let (namespace, name) = object_key(kind, value)?;
                let mut data = BTreeMap::new();
                for (key, encoded) in string_map(kind, value.get("data"))? {
                    let compact: String = encoded.split_whitespace().collect();
                    let decoded = base64::engine::general_purpose::STANDARD
                        .decode(compact.as_bytes())
                        .map_err(|e| ManifestError::InvalidObject {
                            kind: kind.to_string(),
                            message: format!("{}/{}: data key {}: {}", namespace, name, key, e),
                        })?;
                    data.insert(key, decoded);
                }
                for (key, plain) in string_map(kind, value.get("stringData"))? {
                    data.insert(key, plain.into_bytes());
                }
                debug!(%namespace, %name, "Loaded secret from manifest");
                self.secrets.insert((namespace, name), data);
            }
            _ => {}
        }

        Ok(())
    }
}

fn manifest_files(path: &Path) -> Result<Vec<PathBuf>, ManifestError> {
    let io_err = |source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    };

    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(path).map_err(io_err)? {
        let entry_path = entry.map_err(io_err)?.path();
        let is_yaml = entry_path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext == "yaml" || ext == "yml")
            .unwrap_or(false);
        if entry_path.is_file() && is_yaml {
            files.push(entry_path);
        }
    }
    files.sort();
    Ok(files)
}

fn object_key(kind: &str, value: &Value) -> Result<ObjectKey, ManifestError> {
    let metadata = value.get("metadata");
    let name = metadata
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| ManifestError::InvalidObject {
            kind: kind.to_string(),
            message: "missing metadata.name".to_string(),
        })?;
    let namespace = metadata
        .and_then(|m| m.get("namespace"))
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_OBJECT_NAMESPACE);
    Ok((namespace.to_string(), name.to_string()))
}

fn string_map(
    kind: &str,
    value: Option<&Value>,
) -> Result<BTreeMap<String, String>, ManifestError> {
    let mut map = BTreeMap::new();
    let Some(value) = value else { return Ok(map) };
    if value.is_null() {
        return Ok(map);
    }

    let mapping = value.as_mapping().ok_or_else(|| ManifestError::InvalidObject {
        kind: kind.to_string(),
        message: "data must be a mapping".to_string(),
    })?;

    for (key, entry) in mapping {
        let key = scalar_to_string(key);
        let entry = scalar_to_string(entry);
        match (key, entry) {
            (Some(key), Some(entry)) => {
                map.insert(key, entry);
            }
            _ => {
                return Err(ManifestError::InvalidObject {
                    kind: kind.to_string(),
                    message: "data keys and values must be scalars".to_string(),
                })
            }
        }
    }
    Ok(map)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

#[async_trait]
impl ClusterStore for ManifestCluster {
    async fn config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, FetchError> {
        self.config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                FetchError::NotFound(ObjectRef::new(ObjectKind::ConfigMap, namespace, name))
            })
    }

    async fn secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, FetchError> {
        self.secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                FetchError::NotFound(ObjectRef::new(ObjectKind::Secret, namespace, name))
            })
    }
}
