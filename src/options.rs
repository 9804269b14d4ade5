//! Typed install options
//!
//! Options are rebuilt from the merged flag set on every invocation, so a
//! recorded flag goes through the same parser and validation as one given
//! on the command line.

use clap::FromArgMatches;
use std::time::Duration;
use tracing::debug;

use crate::cli::{recordable_command, RecordableArgs};
use crate::duration::parse_duration;
use crate::error::{Result, UpgradeError};
use crate::flags::FlagSet;
use crate::model::{
    AutoInjectContext, Configs, GlobalConfig, Image, PortRange, ProxyConfig, ResourceRequirements,
};

pub const DEFAULT_ISSUER_LIFETIME: Duration = Duration::from_secs(8760 * 3600);
pub const DEFAULT_ANCHOR_LIFETIME: Duration = Duration::from_secs(87600 * 3600);

const HA_CONTROLLER_REPLICAS: u32 = 3;
const HA_PROXY_CPU_REQUEST: &str = "100m";
const HA_PROXY_MEMORY_REQUEST: &str = "20Mi";

const LOG_LEVELS: &[&str] = &["panic", "fatal", "error", "warn", "info", "debug"];
const PULL_POLICIES: &[&str] = &["Always", "IfNotPresent", "Never"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyOptions {
    pub version: String,
    pub log_level: String,
    pub uid: i64,
    pub inbound_port: u16,
    pub outbound_port: u16,
    pub admin_port: u16,
    pub control_port: u16,
    pub ignore_inbound_ports: Vec<String>,
    pub ignore_outbound_ports: Vec<String>,
    pub cpu_request: String,
    pub memory_request: String,
    pub cpu_limit: String,
    pub memory_limit: String,
    pub disable_external_profiles: bool,
}

/// Settings used when a new identity has to be generated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityOptions {
    pub trust_domain: String,
    pub issuance_lifetime: Duration,
    pub clock_skew_allowance: Duration,
    pub issuer_lifetime: Duration,
    pub anchor_lifetime: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    pub control_plane_version: String,
    pub controller_replicas: u32,
    pub controller_log_level: String,
    pub controller_uid: i64,
    pub ha: bool,
    pub proxy_auto_inject: bool,
    pub disable_h2_upgrade: bool,
    /// Install only; an upgrade always reads the cluster
    pub ignore_cluster: bool,
    pub registry: String,
    pub image_pull_policy: String,
    pub proxy: ProxyOptions,
    pub identity: IdentityOptions,
}

impl InstallOptions {
    /// Build options from a merged flag set.
    ///
    /// Every changed flag is passed back through the flag parser, so a
    /// recorded value the current version no longer accepts is reported
    /// as [`UpgradeError::InvalidOptions`].
    pub fn from_flags(flags: &FlagSet) -> Result<Self> {
        let args = flags.to_args();
        debug!(?args, "Building options from flags");

        let matches = recordable_command()
            .try_get_matches_from(&args)
            .map_err(|e| UpgradeError::InvalidOptions(clap_message(&e)))?;
        let parsed = RecordableArgs::from_arg_matches(&matches)
            .map_err(|e| UpgradeError::InvalidOptions(clap_message(&e)))?;

        let mut options = Self {
            control_plane_version: parsed.control_plane_version,
            controller_replicas: parsed.controller_replicas,
            controller_log_level: parsed.controller_log_level,
            controller_uid: parsed.controller_uid,
            ha: parsed.ha,
            proxy_auto_inject: parsed.proxy_auto_inject,
            disable_h2_upgrade: parsed.disable_h2_upgrade,
            ignore_cluster: false,
            registry: parsed.registry,
            image_pull_policy: parsed.image_pull_policy,
            proxy: ProxyOptions {
                version: parsed.proxy_version,
                log_level: parsed.proxy_log_level,
                uid: parsed.proxy_uid,
                inbound_port: parsed.inbound_port,
                outbound_port: parsed.outbound_port,
                admin_port: parsed.admin_port,
                control_port: parsed.control_port,
                ignore_inbound_ports: split_ports(&parsed.skip_inbound_ports),
                ignore_outbound_ports: split_ports(&parsed.skip_outbound_ports),
                cpu_request: parsed.proxy_cpu_request,
                memory_request: parsed.proxy_memory_request,
                cpu_limit: parsed.proxy_cpu_limit,
                memory_limit: parsed.proxy_memory_limit,
                disable_external_profiles: parsed.disable_external_profiles,
            },
            identity: IdentityOptions {
                trust_domain: parsed.identity_trust_domain,
                issuance_lifetime: duration_flag(
                    "identity-issuance-lifetime",
                    &parsed.identity_issuance_lifetime,
                )?,
                clock_skew_allowance: duration_flag(
                    "identity-clock-skew-allowance",
                    &parsed.identity_clock_skew_allowance,
                )?,
                issuer_lifetime: DEFAULT_ISSUER_LIFETIME,
                anchor_lifetime: DEFAULT_ANCHOR_LIFETIME,
            },
        };

        if options.ha {
            let replicas_set = flags
                .get("controller-replicas")
                .is_some_and(|flag| flag.is_changed());
            options.apply_ha_defaults(replicas_set);
        }

        Ok(options)
    }

    fn apply_ha_defaults(&mut self, replicas_set: bool) {
        if !replicas_set {
            self.controller_replicas = HA_CONTROLLER_REPLICAS;
        }
        if self.proxy.cpu_request.is_empty() {
            self.proxy.cpu_request = HA_PROXY_CPU_REQUEST.to_string();
        }
        if self.proxy.memory_request.is_empty() {
            self.proxy.memory_request = HA_PROXY_MEMORY_REQUEST.to_string();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.controller_replicas == 0 {
            return Err(invalid("--controller-replicas must be at least 1"));
        }
        if !LOG_LEVELS.contains(&self.controller_log_level.as_str()) {
            return Err(invalid(format!(
                "--controller-log-level must be one of: {}",
                LOG_LEVELS.join(", ")
            )));
        }
        if !PULL_POLICIES.contains(&self.image_pull_policy.as_str()) {
            return Err(invalid(format!(
                "--image-pull-policy must be one of: {}",
                PULL_POLICIES.join(", ")
            )));
        }

        let ports = [
            ("inbound-port", self.proxy.inbound_port),
            ("outbound-port", self.proxy.outbound_port),
            ("admin-port", self.proxy.admin_port),
            ("control-port", self.proxy.control_port),
        ];
        for (i, (name, port)) in ports.iter().enumerate() {
            if *port == 0 {
                return Err(invalid(format!("--{} must not be 0", name)));
            }
            if let Some((other, _)) = ports[..i].iter().find(|(_, p)| p == port) {
                return Err(invalid(format!(
                    "--{} and --{} must be different ports",
                    other, name
                )));
            }
        }

        for (name, ranges) in [
            ("skip-inbound-ports", &self.proxy.ignore_inbound_ports),
            ("skip-outbound-ports", &self.proxy.ignore_outbound_ports),
        ] {
            for range in ranges {
                validate_port_range(range)
                    .map_err(|reason| invalid(format!("--{}: {:?} {}", name, range, reason)))?;
            }
        }

        if self.identity.trust_domain.is_empty() {
            return Err(invalid("--identity-trust-domain must not be empty"));
        }
        if self.identity.issuance_lifetime.is_zero() {
            return Err(invalid("--identity-issuance-lifetime must be positive"));
        }
        if self.identity.clock_skew_allowance.is_zero() {
            return Err(invalid("--identity-clock-skew-allowance must be positive"));
        }
        if self.identity.issuer_lifetime.is_zero() || self.identity.anchor_lifetime.is_zero() {
            return Err(invalid("identity certificate lifetimes must be positive"));
        }

        Ok(())
    }

    /// Apply these options on top of stored configuration.
    ///
    /// The proxy configuration is replaced outright. Auto-injection is only
    /// ever turned on here; an upgrade never disables it.
    pub fn override_configs(&self, configs: &mut Configs) {
        configs.global.version = self.control_plane_version.clone();
        if self.proxy_auto_inject {
            configs.global.auto_inject_context = Some(AutoInjectContext::default());
        }
        configs.proxy = self.proxy_config();
    }

    /// Global configuration for a new control plane.
    pub fn global_config(&self, namespace: &str) -> GlobalConfig {
        GlobalConfig {
            namespace: namespace.to_string(),
            cni_enabled: false,
            version: self.control_plane_version.clone(),
            identity_context: None,
            auto_inject_context: self.proxy_auto_inject.then(AutoInjectContext::default),
            omit_webhook_side_effects: false,
        }
    }

    pub fn proxy_config(&self) -> ProxyConfig {
        let image = |name: &str| Image {
            image_name: format!("{}/{}", self.registry, name),
            pull_policy: self.image_pull_policy.clone(),
        };
        let ranges = |ports: &[String]| {
            ports
                .iter()
                .map(|p| PortRange {
                    port_range: p.clone(),
                })
                .collect()
        };

        ProxyConfig {
            proxy_image: image("proxy"),
            proxy_init_image: image("proxy-init"),
            control_port: self.proxy.control_port,
            admin_port: self.proxy.admin_port,
            inbound_port: self.proxy.inbound_port,
            outbound_port: self.proxy.outbound_port,
            ignore_inbound_ports: ranges(&self.proxy.ignore_inbound_ports),
            ignore_outbound_ports: ranges(&self.proxy.ignore_outbound_ports),
            resource: ResourceRequirements {
                request_cpu: self.proxy.cpu_request.clone(),
                request_memory: self.proxy.memory_request.clone(),
                limit_cpu: self.proxy.cpu_limit.clone(),
                limit_memory: self.proxy.memory_limit.clone(),
            },
            proxy_uid: self.proxy.uid,
            log_level: self.proxy.log_level.clone(),
            disable_external_profiles: self.proxy.disable_external_profiles,
            proxy_version: self.proxy.version.clone(),
        }
    }

    /// Image reference for control plane components.
    pub fn controller_image(&self) -> String {
        format!("{}/controller:{}", self.registry, self.control_plane_version)
    }
}

fn invalid(message: impl Into<String>) -> UpgradeError {
    UpgradeError::InvalidOptions(message.into())
}

fn clap_message(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let first = rendered.lines().next().unwrap_or_default();
    first.trim_start_matches("error: ").to_string()
}

fn duration_flag(name: &str, value: &str) -> Result<Duration> {
    parse_duration(value.trim()).map_err(|e| invalid(format!("--{}: {}", name, e)))
}

fn split_ports(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn validate_port_range(range: &str) -> std::result::Result<(), &'static str> {
    let parse = |p: &str| p.trim().parse::<u16>().map_err(|_| "is not a port or port range");
    match range.split_once('-') {
        None => parse(range).map(|_| ()),
        Some((lo, hi)) => {
            if parse(lo)? > parse(hi)? {
                return Err("has a lower bound above its upper bound");
            }
            Ok(())
        }
    }
}
