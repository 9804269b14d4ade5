//! Config loading and defaults integration tests

use std::path::PathBuf;
use std::time::Duration;

use meshctl::config::{Config, ConfigError};
use meshctl::options::{DEFAULT_ANCHOR_LIFETIME, DEFAULT_ISSUER_LIFETIME};

#[test]
fn test_missing_file_uses_defaults() {
    let config = Config::load(&PathBuf::from("/nonexistent/meshctl.toml")).unwrap();

    assert_eq!(config.cluster.namespace, "mesh-system");
    assert!(config.cluster.kubeconfig.is_none());
    assert!(config.cluster.context.is_none());
    assert_eq!(config.identity.issuer_lifetime, DEFAULT_ISSUER_LIFETIME);
    assert_eq!(config.identity.anchor_lifetime, DEFAULT_ANCHOR_LIFETIME);
}

#[test]
fn test_config_with_all_fields() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("meshctl.toml");
    std::fs::write(
        &path,
        r#"
[cluster]
namespace = "mesh-prod"
kubeconfig = "/etc/meshctl/kubeconfig"
context = "prod"

[identity]
issuer_lifetime = "720h"
anchor_lifetime = "43800h"
"#,
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.cluster.namespace, "mesh-prod");
    assert_eq!(
        config.cluster.kubeconfig,
        Some(PathBuf::from("/etc/meshctl/kubeconfig"))
    );
    assert_eq!(config.cluster.context.as_deref(), Some("prod"));
    assert_eq!(config.identity.issuer_lifetime, Duration::from_secs(720 * 3600));
    assert_eq!(
        config.identity.anchor_lifetime,
        Duration::from_secs(43800 * 3600)
    );
}

#[test]
fn test_partial_sections_fill_defaults() {
    let config: Config = toml::from_str(
        r#"
[identity]
issuer_lifetime = "48h"
"#,
    )
    .unwrap();

    assert_eq!(config.cluster.namespace, "mesh-system");
    assert_eq!(config.identity.issuer_lifetime, Duration::from_secs(48 * 3600));
    assert_eq!(config.identity.anchor_lifetime, DEFAULT_ANCHOR_LIFETIME);
}

#[test]
fn test_invalid_duration_is_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("meshctl.toml");
    std::fs::write(&path, "[identity]\nissuer_lifetime = \"one year\"\n").unwrap();

    assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
}

#[test]
fn test_oversized_duration_is_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("meshctl.toml");
    std::fs::write(
        &path,
        "[identity]\nanchor_lifetime = \"99999999999999999999999h\"\n",
    )
    .unwrap();

    assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
}

#[test]
fn test_config_serializes_back() {
    let config = Config::default();
    let text = toml::to_string(&config).unwrap();
    assert!(text.contains("issuer_lifetime = \"8760h0m0s\""));

    let back: Config = toml::from_str(&text).unwrap();
    assert_eq!(back.identity.issuer_lifetime, config.identity.issuer_lifetime);
}
