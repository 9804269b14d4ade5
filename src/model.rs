//! Stored control-plane configuration
//!
//! The configuration map holds three JSON documents under the keys
//! `global`, `proxy` and `install`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::duration;

pub const GLOBAL_KEY: &str = "global";
pub const PROXY_KEY: &str = "proxy";
pub const INSTALL_KEY: &str = "install";

/// Install metadata recorded at each install/upgrade
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallRecord {
    /// Assigned once on first install
    #[serde(default)]
    pub uuid: String,

    /// Version of the CLI that last wrote this record
    #[serde(default)]
    pub cli_version: String,

    /// Flags that were changed from their defaults
    #[serde(default)]
    pub flags: Vec<InstallFlag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallFlag {
    pub name: String,
    pub value: String,
}

impl InstallFlag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    /// Control plane namespace
    #[serde(default)]
    pub namespace: String,

    #[serde(default)]
    pub cni_enabled: bool,

    /// Control plane version
    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_context: Option<IdentityContext>,

    /// Present when proxies are injected automatically
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_inject_context: Option<AutoInjectContext>,

    #[serde(default)]
    pub omit_webhook_side_effects: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityContext {
    #[serde(default)]
    pub trust_domain: String,

    /// PEM bundle of trust anchor certificates
    #[serde(default)]
    pub trust_anchors_pem: String,

    #[serde(default, with = "duration::seconds")]
    pub issuance_lifetime: Duration,

    #[serde(default, with = "duration::seconds")]
    pub clock_skew_allowance: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoInjectContext {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    #[serde(default)]
    pub proxy_image: Image,

    #[serde(default)]
    pub proxy_init_image: Image,

    #[serde(default)]
    pub control_port: u16,

    #[serde(default)]
    pub admin_port: u16,

    #[serde(default)]
    pub inbound_port: u16,

    #[serde(default)]
    pub outbound_port: u16,

    #[serde(default)]
    pub ignore_inbound_ports: Vec<PortRange>,

    #[serde(default)]
    pub ignore_outbound_ports: Vec<PortRange>,

    #[serde(default)]
    pub resource: ResourceRequirements,

    #[serde(default)]
    pub proxy_uid: i64,

    #[serde(default)]
    pub log_level: String,

    #[serde(default)]
    pub disable_external_profiles: bool,

    #[serde(default)]
    pub proxy_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(default)]
    pub image_name: String,

    #[serde(default)]
    pub pull_policy: String,
}

/// A single port (`8080`) or an inclusive range (`4000-4100`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortRange {
    pub port_range: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default)]
    pub request_cpu: String,

    #[serde(default)]
    pub request_memory: String,

    #[serde(default)]
    pub limit_cpu: String,

    #[serde(default)]
    pub limit_memory: String,
}

/// Error decoding the configuration map
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigDecodeError {
    #[error("configuration is missing the {0:?} document")]
    Missing(&'static str),

    #[error("invalid {key:?} document: {message}")]
    Invalid { key: &'static str, message: String },
}

/// The full stored configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configs {
    pub global: GlobalConfig,
    pub proxy: ProxyConfig,
    pub install: InstallRecord,
}

impl Configs {
    /// Decode from configuration map data.
    ///
    /// A missing `install` document decodes as an empty record; repair
    /// fills it in later.
    pub fn from_config_map(data: &BTreeMap<String, String>) -> Result<Self, ConfigDecodeError> {
        let global = decode_required(data, GLOBAL_KEY)?;
        let proxy = decode_required(data, PROXY_KEY)?;
        let install = match data.get(INSTALL_KEY).map(|s| s.trim()) {
            None | Some("") => InstallRecord::default(),
            Some(raw) => decode(INSTALL_KEY, raw)?,
        };

        Ok(Self {
            global,
            proxy,
            install,
        })
    }

    /// Encode into configuration map data.
    pub fn to_config_map(&self) -> Result<BTreeMap<String, String>, serde_json::Error> {
        let mut data = BTreeMap::new();
        data.insert(GLOBAL_KEY.to_string(), serde_json::to_string(&self.global)?);
        data.insert(PROXY_KEY.to_string(), serde_json::to_string(&self.proxy)?);
        data.insert(INSTALL_KEY.to_string(), serde_json::to_string(&self.install)?);
        Ok(data)
    }
}

fn decode_required<T: serde::de::DeserializeOwned>(
    data: &BTreeMap<String, String>,
    key: &'static str,
) -> Result<T, ConfigDecodeError> {
    match data.get(key).map(|s| s.trim()) {
        None | Some("") => Err(ConfigDecodeError::Missing(key)),
        Some(raw) => decode(key, raw),
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    key: &'static str,
    raw: &str,
) -> Result<T, ConfigDecodeError> {
    serde_json::from_str(raw).map_err(|e| ConfigDecodeError::Invalid {
        key,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();
        data.insert(
            "global".to_string(),
            r#"{"namespace":"mesh-system","version":"0.1.0","identityContext":{"trustDomain":"cluster.local","trustAnchorsPem":"PEM","issuanceLifetime":"86400s","clockSkewAllowance":"20s"}}"#.to_string(),
        );
        data.insert(
            "proxy".to_string(),
            r#"{"proxyImage":{"imageName":"ghcr.io/meshplane/proxy","pullPolicy":"IfNotPresent"},"adminPort":4191}"#.to_string(),
        );
        data.insert(
            "install".to_string(),
            r#"{"uuid":"abc","cliVersion":"0.0.9","flags":[{"name":"ha","value":"true"}]}"#.to_string(),
        );
        data
    }

    #[test]
    fn test_decode_config_map() {
        let configs = Configs::from_config_map(&sample_map()).unwrap();

        let idctx = configs.global.identity_context.as_ref().unwrap();
        assert_eq!(idctx.trust_domain, "cluster.local");
        assert_eq!(idctx.issuance_lifetime, Duration::from_secs(86400));
        assert_eq!(idctx.clock_skew_allowance, Duration::from_secs(20));
        assert_eq!(configs.proxy.admin_port, 4191);
        assert_eq!(configs.install.uuid, "abc");
        assert_eq!(configs.install.flags, vec![InstallFlag::new("ha", "true")]);
    }

    #[test]
    fn test_missing_install_is_tolerated() {
        let mut data = sample_map();
        data.remove("install");

        let configs = Configs::from_config_map(&data).unwrap();
        assert_eq!(configs.install, InstallRecord::default());
    }

    #[test]
    fn test_missing_global_is_an_error() {
        let mut data = sample_map();
        data.remove("global");

        let err = Configs::from_config_map(&data).unwrap_err();
        assert!(matches!(err, ConfigDecodeError::Missing("global")));
    }

    #[test]
    fn test_invalid_proxy_is_an_error() {
        let mut data = sample_map();
        data.insert("proxy".to_string(), "{not json".to_string());

        let err = Configs::from_config_map(&data).unwrap_err();
        assert!(matches!(err, ConfigDecodeError::Invalid { key: "proxy", .. }));
    }

    #[test]
    fn test_encode_is_decodable() {
        let configs = Configs::from_config_map(&sample_map()).unwrap();
        let data = configs.to_config_map().unwrap();
        assert_eq!(Configs::from_config_map(&data).unwrap(), configs);
    }
}
