//! CLI configuration file

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cluster::DEFAULT_NAMESPACE;
use crate::duration;
use crate::options::{DEFAULT_ANCHOR_LIFETIME, DEFAULT_ISSUER_LIFETIME};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Where the control plane lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Control plane namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Kubeconfig path (KUBECONFIG or ~/.kube/config when unset)
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context (current context when unset)
    #[serde(default)]
    pub context: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            kubeconfig: None,
            context: None,
        }
    }
}

/// Lifetimes of generated identity certificates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_issuer_lifetime", with = "duration::compound")]
    pub issuer_lifetime: Duration,

    #[serde(default = "default_anchor_lifetime", with = "duration::compound")]
    pub anchor_lifetime: Duration,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            issuer_lifetime: default_issuer_lifetime(),
            anchor_lifetime: default_anchor_lifetime(),
        }
    }
}

fn default_namespace() -> String { DEFAULT_NAMESPACE.to_string() }
fn default_issuer_lifetime() -> Duration { DEFAULT_ISSUER_LIFETIME }
fn default_anchor_lifetime() -> Duration { DEFAULT_ANCHOR_LIFETIME }

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl Config {
    /// Load `path`, or the defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
