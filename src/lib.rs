//! meshctl: install and upgrade the Meshplane control plane
//!
//! An upgrade reads the configuration an earlier install stored in the
//! cluster, repairs it, merges the flags recorded there with the flags of
//! this run, and reuses the existing mesh identity when it is still valid.
//! The result is a [`values::ReconciledValues`] tree that [`render`] turns
//! into manifests.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod duration;
pub mod error;
pub mod flags;
pub mod identity;
pub mod install;
pub mod model;
pub mod options;
pub mod render;
pub mod repair;
pub mod status;
pub mod tls;
pub mod upgrade;
pub mod values;

pub use error::UpgradeError;

/// Version of this CLI, recorded in the install record
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");
