//! Reconciled values
//!
//! The single value tree handed to the renderer. It is assembled once,
//! after identity resolution, and cannot be changed afterwards.

use crate::flags::FlagSet;
use crate::identity::ResolvedIdentity;
use crate::model::{Configs, GlobalConfig, InstallRecord, ProxyConfig};
use crate::options::InstallOptions;

/// Settings for the control plane deployments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerValues {
    pub image: String,
    pub pull_policy: String,
    pub replicas: u32,
    pub log_level: String,
    pub uid: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledValues {
    namespace: String,
    global: GlobalConfig,
    proxy: ProxyConfig,
    install: InstallRecord,
    identity: ResolvedIdentity,
    controller: ControllerValues,
    disable_h2_upgrade: bool,
}

impl ReconciledValues {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn global(&self) -> &GlobalConfig {
        &self.global
    }

    pub fn proxy(&self) -> &ProxyConfig {
        &self.proxy
    }

    pub fn install(&self) -> &InstallRecord {
        &self.install
    }

    pub fn identity(&self) -> &ResolvedIdentity {
        &self.identity
    }

    pub fn controller(&self) -> &ControllerValues {
        &self.controller
    }

    pub fn disable_h2_upgrade(&self) -> bool {
        self.disable_h2_upgrade
    }

    pub fn auto_inject(&self) -> bool {
        self.global.auto_inject_context.is_some()
    }

    /// The configuration documents as they will be stored.
    pub fn configs(&self) -> Configs {
        Configs {
            global: self.global.clone(),
            proxy: self.proxy.clone(),
            install: self.install.clone(),
        }
    }
}

/// Assemble the value tree.
///
/// The merged flags are recorded into the install record and the resolved
/// identity is written into the global configuration, so the stored
/// configuration always describes what is rendered.
pub fn build(
    configs: Configs,
    flags: &FlagSet,
    options: &InstallOptions,
    identity: ResolvedIdentity,
) -> ReconciledValues {
    let Configs {
        mut global,
        proxy,
        mut install,
    } = configs;

    install.flags = flags.recorded();
    global.identity_context = Some(identity.to_identity_context());
    let namespace = global.namespace.clone();

    ReconciledValues {
        namespace,
        global,
        proxy,
        install,
        identity,
        controller: ControllerValues {
            image: options.controller_image(),
            pull_policy: options.image_pull_policy.clone(),
            replicas: options.controller_replicas,
            log_level: options.controller_log_level.clone(),
            uid: options.controller_uid,
        },
        disable_h2_upgrade: options.disable_h2_upgrade,
    }
}
