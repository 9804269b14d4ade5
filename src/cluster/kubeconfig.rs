//! Kubeconfig loading
//!
//! Supports the subset needed to reach an API server: server URL, CA
//! bundle, TLS verification toggle, bearer tokens and client certificates.

use base64::Engine;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("no kubeconfig found; set KUBECONFIG or pass --kubeconfig")]
    NoKubeconfig,

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid kubeconfig {path}: {message}")]
    Invalid { path: PathBuf, message: String },

    #[error("context {0:?} not found in kubeconfig")]
    MissingContext(String),

    #[error("cluster {0:?} not found in kubeconfig")]
    MissingCluster(String),

    #[error("user {0:?} not found in kubeconfig")]
    MissingUser(String),

    #[error("invalid TLS material: {0}")]
    Tls(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Kubeconfig {
    #[serde(rename = "current-context", default)]
    pub current_context: String,

    #[serde(default)]
    pub clusters: Vec<NamedCluster>,

    #[serde(default)]
    pub contexts: Vec<NamedContext>,

    #[serde(default)]
    pub users: Vec<NamedUser>,

    /// Directory relative file references resolve against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterEntry,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterEntry {
    pub server: String,

    #[serde(default)]
    pub certificate_authority_data: Option<String>,

    #[serde(default)]
    pub certificate_authority: Option<PathBuf>,

    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextEntry,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextEntry {
    pub cluster: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default)]
    pub user: UserEntry,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserEntry {
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub token_file: Option<PathBuf>,

    #[serde(default)]
    pub client_certificate_data: Option<String>,

    #[serde(default)]
    pub client_key_data: Option<String>,

    #[serde(default)]
    pub client_certificate: Option<PathBuf>,

    #[serde(default)]
    pub client_key: Option<PathBuf>,
}

/// Connection settings for one context
#[derive(Debug, Clone)]
pub struct ResolvedContext {
    pub server: String,
    pub ca_pem: Option<Vec<u8>>,
    pub insecure_skip_tls_verify: bool,
    pub token: Option<String>,
    /// Client certificate and key, concatenated PEM
    pub client_identity_pem: Option<Vec<u8>>,
}

impl Kubeconfig {
    /// Pick the kubeconfig path: explicit, then the first `KUBECONFIG`
    /// entry, then `~/.kube/config`.
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }

        if let Ok(paths) = std::env::var("KUBECONFIG") {
            if let Some(first) = std::env::split_paths(&paths).find(|p| !p.as_os_str().is_empty()) {
                return Some(first);
            }
        }

        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".kube").join("config"))
            .filter(|p| p.exists())
    }

    pub fn load(path: &Path) -> Result<Self, ConnectError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConnectError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&content).map_err(|e| ConnectError::Invalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Resolve the named context, or the current one.
    pub fn resolve(&self, context: Option<&str>) -> Result<ResolvedContext, ConnectError> {
        let context_name = context.unwrap_or(&self.current_context);
        let context = self
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .map(|c| &c.context)
            .ok_or_else(|| ConnectError::MissingContext(context_name.to_string()))?;

        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| ConnectError::MissingCluster(context.cluster.clone()))?;

        let user = if context.user.is_empty() {
            UserEntry::default()
        } else {
            self.users
                .iter()
                .find(|u| u.name == context.user)
                .map(|u| u.user.clone())
                .ok_or_else(|| ConnectError::MissingUser(context.user.clone()))?
        };

        let ca_pem = self.inline_or_file(
            cluster.certificate_authority_data.as_deref(),
            cluster.certificate_authority.as_deref(),
        )?;

        let token = match (&user.token, &user.token_file) {
            (Some(token), _) => Some(token.clone()),
            (None, Some(file)) => {
                let bytes = self.read_file(file)?;
                Some(String::from_utf8_lossy(&bytes).trim().to_string())
            }
            (None, None) => None,
        };

        let cert = self.inline_or_file(
            user.client_certificate_data.as_deref(),
            user.client_certificate.as_deref(),
        )?;
        let key = self.inline_or_file(user.client_key_data.as_deref(), user.client_key.as_deref())?;
        let client_identity_pem = match (cert, key) {
            (Some(mut cert), Some(key)) => {
                if !cert.ends_with(b"\n") {
                    cert.push(b'\n');
                }
                cert.extend_from_slice(&key);
                Some(cert)
            }
            (None, None) => None,
            _ => {
                return Err(ConnectError::Tls(
                    "client certificate and key must be set together".to_string(),
                ))
            }
        };

        Ok(ResolvedContext {
            server: cluster.server.trim_end_matches('/').to_string(),
            ca_pem,
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
            token,
            client_identity_pem,
        })
    }

    fn inline_or_file(
        &self,
        data: Option<&str>,
        file: Option<&Path>,
    ) -> Result<Option<Vec<u8>>, ConnectError> {
        if let Some(data) = data {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(data.trim())
                .map_err(|e| ConnectError::Tls(format!("invalid base64 data: {}", e)))?;
            return Ok(Some(decoded));
        }
        file.map(|f| self.read_file(f)).transpose()
    }

    fn read_file(&self, file: &Path) -> Result<Vec<u8>, ConnectError> {
        let path = if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.base_dir.join(file)
        };
        std::fs::read(&path).map_err(|source| ConnectError::Io { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: dev
clusters:
- name: dev-cluster
  cluster:
    server: https://127.0.0.1:6443/
    certificate-authority-data: Q0EtUEVN
- name: prod-cluster
  cluster:
    server: https://prod.example.com
    insecure-skip-tls-verify: true
contexts:
- name: dev
  context:
    cluster: dev-cluster
    user: dev-user
- name: prod
  context:
    cluster: prod-cluster
    user: prod-user
- name: dangling
  context:
    cluster: nowhere
users:
- name: dev-user
  user:
    client-certificate-data: Q0VSVA==
    client-key-data: S0VZ
- name: prod-user
  user:
    token: secret-token
"#;

    #[test]
    fn test_resolve_current_context() {
        let config = Kubeconfig::from_yaml(KUBECONFIG).unwrap();
        let resolved = config.resolve(None).unwrap();

        assert_eq!(resolved.server, "https://127.0.0.1:6443");
        assert_eq!(resolved.ca_pem.as_deref(), Some(b"CA-PEM".as_slice()));
        assert_eq!(
            resolved.client_identity_pem.as_deref(),
            Some(b"CERT\nKEY".as_slice())
        );
        assert!(resolved.token.is_none());
    }

    #[test]
    fn test_resolve_named_context() {
        let config = Kubeconfig::from_yaml(KUBECONFIG).unwrap();
        let resolved = config.resolve(Some("prod")).unwrap();

        assert_eq!(resolved.token.as_deref(), Some("secret-token"));
        assert!(resolved.insecure_skip_tls_verify);
        assert!(resolved.ca_pem.is_none());
    }

    #[test]
    fn test_missing_references() {
        let config = Kubeconfig::from_yaml(KUBECONFIG).unwrap();

        assert!(matches!(
            config.resolve(Some("staging")),
            Err(ConnectError::MissingContext(_))
        ));
        assert!(matches!(
            config.resolve(Some("dangling")),
            Err(ConnectError::MissingCluster(_))
        ));
    }

    #[test]
    fn test_token_file_relative_to_kubeconfig() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("token"), "file-token\n").unwrap();
        let path = dir.path().join("config");
        std::fs::write(
            &path,
            r#"
current-context: ctx
clusters:
- name: c
  cluster:
    server: https://api.local
contexts:
- name: ctx
  context:
    cluster: c
    user: u
users:
- name: u
  user:
    token-file: token
"#,
        )
        .unwrap();

        let config = Kubeconfig::load(&path).unwrap();
        let resolved = config.resolve(None).unwrap();
        assert_eq!(resolved.token.as_deref(), Some("file-token"));
    }

    #[test]
    fn test_locate_prefers_explicit_path() {
        let explicit = PathBuf::from("/tmp/explicit-kubeconfig");
        assert_eq!(Kubeconfig::locate(Some(&explicit)), Some(explicit));
    }
}
