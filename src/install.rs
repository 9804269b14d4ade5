//! Install pipeline
//!
//! Same stages as an upgrade, starting from an empty install record and
//! always generating a new identity.

use tracing::info;

use crate::cluster::{ClusterStore, CONFIG_MAP_NAME};
use crate::error::{Result, UpgradeError};
use crate::identity::{Identity, IdentityGenerator};
use crate::model::{Configs, InstallRecord};
use crate::repair::repair_install;
use crate::upgrade::{build_options, resolve_identity, Invocation};
use crate::values::{self, ReconciledValues};
use crate::CURRENT_VERSION;

/// Build values for a new control plane.
///
/// Unless `invocation.ignore_cluster` is set, an existing configuration
/// map in `namespace` aborts the install.
pub async fn install(
    cluster: &dyn ClusterStore,
    generator: &dyn IdentityGenerator,
    namespace: &str,
    invocation: Invocation,
    generate_uuid: impl FnOnce() -> String,
) -> Result<ReconciledValues> {
    if !invocation.ignore_cluster {
        match cluster.config_map(namespace, CONFIG_MAP_NAME).await {
            Ok(_) => return Err(UpgradeError::AlreadyInstalled(namespace.to_string())),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }

    let install = repair_install(InstallRecord::default(), CURRENT_VERSION, generate_uuid);
    info!(uuid = %install.uuid, namespace, "Installing new control plane");

    let options = build_options(&invocation.flags, &invocation)?;
    let configs = Configs {
        global: options.global_config(namespace),
        proxy: options.proxy_config(),
        install,
    };

    let resolved = resolve_identity(
        cluster,
        generator,
        namespace,
        Identity::Absent,
        &options,
        &invocation,
    )
    .await?;

    Ok(values::build(configs, &invocation.flags, &options, resolved))
}
