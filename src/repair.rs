//! Install record repair
//!
//! Older control planes may have no install record, or one missing the
//! fields later versions expect. Repair fills them in so the rest of the
//! pipeline can rely on them.

use tracing::debug;

use crate::model::InstallRecord;

/// Normalize an install record.
///
/// - an empty `uuid` is filled from `generate_uuid`; an existing one is kept
/// - `cli_version` is always set to `cli_version`
/// - `flags` are left alone; they are merged separately
pub fn repair_install(
    mut install: InstallRecord,
    cli_version: &str,
    generate_uuid: impl FnOnce() -> String,
) -> InstallRecord {
    if install.uuid.is_empty() {
        install.uuid = generate_uuid();
        debug!(uuid = %install.uuid, "Assigned install uuid");
    }

    install.cli_version = cli_version.to_string();

    install
}
