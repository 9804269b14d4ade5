//! Upgrade pipeline
//!
//! Fetch, repair, merge flags, resolve identity, build. Each stage runs
//! once, in order, and any failure stops the run before anything is
//! rendered.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info};

use crate::cluster::{fetch_configs, ClusterStore};
use crate::error::Result;
use crate::flags::{reconcile_flags, FlagSet};
use crate::identity::{Identity, IdentityGenerator, IdentityReconciler, ResolvedIdentity};
use crate::options::{InstallOptions, DEFAULT_ANCHOR_LIFETIME, DEFAULT_ISSUER_LIFETIME};
use crate::repair::repair_install;
use crate::values::{self, ReconciledValues};
use crate::CURRENT_VERSION;

/// Inputs of one install or upgrade besides cluster state
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Flags of this invocation, with their origins
    pub flags: FlagSet,
    pub ignore_cluster: bool,
    /// Lifetime of a generated issuer certificate
    pub issuer_lifetime: Duration,
    /// Lifetime of a generated trust anchor
    pub anchor_lifetime: Duration,
    pub now: DateTime<Utc>,
}

impl Invocation {
    pub fn new(flags: FlagSet) -> Self {
        Self {
            flags,
            ignore_cluster: false,
            issuer_lifetime: DEFAULT_ISSUER_LIFETIME,
            anchor_lifetime: DEFAULT_ANCHOR_LIFETIME,
            now: Utc::now(),
        }
    }
}

/// Reconcile the installed control plane with this invocation.
///
/// # Panics
///
/// Panics if `invocation.ignore_cluster` is set; an upgrade without
/// cluster state is a caller bug.
pub async fn upgrade(
    cluster: &dyn ClusterStore,
    generator: &dyn IdentityGenerator,
    namespace: &str,
    invocation: Invocation,
    generate_uuid: impl FnOnce() -> String,
) -> Result<ReconciledValues> {
    assert!(!invocation.ignore_cluster, "ignore cluster must be unset");

    let mut configs = fetch_configs(cluster, namespace).await?;
    if configs.global.namespace.is_empty() {
        debug!(namespace, "Stored configuration has no namespace, filling it in");
        configs.global.namespace = namespace.to_string();
    }

    configs.install = repair_install(configs.install, CURRENT_VERSION, generate_uuid);
    info!(
        uuid = %configs.install.uuid,
        recorded = configs.install.flags.len(),
        "Repaired install record"
    );

    let flags = reconcile_flags(&configs.install.flags, invocation.flags.clone());
    let options = build_options(&flags, &invocation)?;
    options.override_configs(&mut configs);

    let identity = Identity::from_context(configs.global.identity_context.as_ref());
    let resolved = resolve_identity(
        cluster,
        generator,
        namespace,
        identity,
        &options,
        &invocation,
    )
    .await?;

    Ok(values::build(configs, &flags, &options, resolved))
}

/// Typed, validated options for merged flags.
pub(crate) fn build_options(flags: &FlagSet, invocation: &Invocation) -> Result<InstallOptions> {
    let mut options = InstallOptions::from_flags(flags)?;
    options.ignore_cluster = invocation.ignore_cluster;
    options.identity.issuer_lifetime = invocation.issuer_lifetime;
    options.identity.anchor_lifetime = invocation.anchor_lifetime;
    options.validate()?;
    Ok(options)
}

pub(crate) async fn resolve_identity(
    cluster: &dyn ClusterStore,
    generator: &dyn IdentityGenerator,
    namespace: &str,
    identity: Identity,
    options: &InstallOptions,
    invocation: &Invocation,
) -> Result<ResolvedIdentity> {
    IdentityReconciler::new(cluster, generator, namespace)
        .reconcile(
            identity,
            &options.identity,
            options.controller_replicas,
            invocation.now,
        )
        .await
}
