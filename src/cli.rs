//! Command-line interface
//!
//! The recordable flags are shared by `install` and `upgrade`. Their long
//! names are what the install record stores, so renaming one breaks
//! precedence for control planes installed by earlier versions.

use clap::{ArgAction, Args, Command, Parser, Subcommand};
use std::path::PathBuf;

use crate::CURRENT_VERSION;

#[derive(Parser, Debug)]
#[command(name = "meshctl")]
#[command(about = "Install and upgrade the Meshplane control plane")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, env = "MESHCTL_CONFIG", default_value = "meshctl.toml", global = true)]
    pub config: PathBuf,

    /// Control plane namespace (overrides config file)
    #[arg(long, env = "MESHCTL_NAMESPACE", global = true)]
    pub namespace: Option<String>,

    /// Path to the kubeconfig file (overrides config file and KUBECONFIG)
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use (overrides config file)
    #[arg(long, env = "MESHCTL_CONTEXT", global = true)]
    pub context: Option<String>,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Output manifests to install the control plane
    Install(InstallArgs),

    /// Output manifests to upgrade an existing control plane
    ///
    /// Flag defaults come from the installed control plane: any flag
    /// recorded at install time applies again unless it is set here.
    Upgrade(UpgradeArgs),
}

#[derive(Debug, Args)]
pub struct InstallArgs {
    /// Do not check for an existing control plane
    #[arg(long)]
    pub ignore_cluster: bool,

    #[command(flatten)]
    pub flags: RecordableArgs,
}

#[derive(Debug, Args)]
pub struct UpgradeArgs {
    /// Read the current configuration from rendered manifests instead of the cluster
    ///
    /// Accepts a file, a directory of YAML files, or `-` for stdin. This flag
    /// is not recorded in the install record.
    #[arg(long, value_name = "PATH")]
    pub from_manifests: Option<String>,

    #[command(flatten)]
    pub flags: RecordableArgs,
}

/// Flags persisted into the install record
#[derive(Debug, Clone, Args)]
pub struct RecordableArgs {
    /// Control plane version (never recorded)
    #[arg(long, default_value = CURRENT_VERSION)]
    pub control_plane_version: String,

    /// Replicas of each control plane component
    #[arg(long, default_value_t = 1)]
    pub controller_replicas: u32,

    /// Log level for control plane components
    #[arg(long, default_value = "info")]
    pub controller_log_level: String,

    /// Run control plane components under this user ID
    #[arg(long, default_value_t = 2103)]
    pub controller_uid: i64,

    /// Enable high availability defaults
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, require_equals = true,
          default_value_t = false, default_missing_value = "true")]
    pub ha: bool,

    /// Inject proxies automatically into annotated workloads
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, require_equals = true,
          default_value_t = false, default_missing_value = "true")]
    pub proxy_auto_inject: bool,

    /// Prevent the proxy from upgrading HTTP/1 connections to HTTP/2
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, require_equals = true,
          default_value_t = false, default_missing_value = "true")]
    pub disable_h2_upgrade: bool,

    /// Disable service profiles for services outside the mesh
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, require_equals = true,
          default_value_t = false, default_missing_value = "true")]
    pub disable_external_profiles: bool,

    /// Container registry for control plane and proxy images
    #[arg(long, default_value = "ghcr.io/meshplane")]
    pub registry: String,

    /// Image pull policy (Always, IfNotPresent, Never)
    #[arg(long, default_value = "IfNotPresent")]
    pub image_pull_policy: String,

    /// Proxy image tag
    #[arg(long, default_value = CURRENT_VERSION)]
    pub proxy_version: String,

    /// Proxy log filter
    #[arg(long, default_value = "warn,meshplane=info")]
    pub proxy_log_level: String,

    /// Run the proxy under this user ID
    #[arg(long, default_value_t = 2102)]
    pub proxy_uid: i64,

    /// Proxy port for inbound traffic
    #[arg(long, default_value_t = 4143)]
    pub inbound_port: u16,

    /// Proxy port for outbound traffic
    #[arg(long, default_value_t = 4140)]
    pub outbound_port: u16,

    /// Proxy port serving metrics and health
    #[arg(long, default_value_t = 4191)]
    pub admin_port: u16,

    /// Proxy port for control plane traffic
    #[arg(long, default_value_t = 4190)]
    pub control_port: u16,

    /// Inbound ports that bypass the proxy (comma-separated ports or ranges)
    #[arg(long, default_value = "")]
    pub skip_inbound_ports: String,

    /// Outbound ports that bypass the proxy (comma-separated ports or ranges)
    #[arg(long, default_value = "")]
    pub skip_outbound_ports: String,

    /// Proxy CPU request
    #[arg(long, default_value = "")]
    pub proxy_cpu_request: String,

    /// Proxy memory request
    #[arg(long, default_value = "")]
    pub proxy_memory_request: String,

    /// Proxy CPU limit
    #[arg(long, default_value = "")]
    pub proxy_cpu_limit: String,

    /// Proxy memory limit
    #[arg(long, default_value = "")]
    pub proxy_memory_limit: String,

    /// Trust domain for mesh identities (used when generating an identity)
    #[arg(long, default_value = "cluster.local")]
    pub identity_trust_domain: String,

    /// Lifetime of certificates issued to proxies
    #[arg(long, default_value = "24h")]
    pub identity_issuance_lifetime: String,

    /// Clock skew tolerated when validating proxy certificates
    #[arg(long, default_value = "20s")]
    pub identity_clock_skew_allowance: String,
}

/// A standalone command holding only the recordable flags.
///
/// Used to discover the flag schema and to re-parse a merged flag set.
pub fn recordable_command() -> Command {
    RecordableArgs::augment_args(Command::new("meshctl").no_binary_name(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, FromArgMatches};

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_bool_flag_forms() {
        let matches = recordable_command()
            .try_get_matches_from(["--ha", "--proxy-auto-inject=false"])
            .unwrap();
        let args = RecordableArgs::from_arg_matches(&matches).unwrap();
        assert!(args.ha);
        assert!(!args.proxy_auto_inject);
        assert!(!args.disable_h2_upgrade);
    }

    #[test]
    fn test_defaults() {
        let matches = recordable_command()
            .try_get_matches_from(Vec::<String>::new())
            .unwrap();
        let args = RecordableArgs::from_arg_matches(&matches).unwrap();
        assert_eq!(args.controller_replicas, 1);
        assert_eq!(args.control_plane_version, CURRENT_VERSION);
        assert_eq!(args.identity_trust_domain, "cluster.local");
        assert_eq!(args.skip_inbound_ports, "");
    }

    #[test]
    fn test_upgrade_parses_from_manifests() {
        let cli = Cli::try_parse_from([
            "meshctl",
            "upgrade",
            "--from-manifests",
            "install.yaml",
            "--controller-replicas",
            "2",
        ])
        .unwrap();

        match cli.command {
            Commands::Upgrade(args) => {
                assert_eq!(args.from_manifests.as_deref(), Some("install.yaml"));
                assert_eq!(args.flags.controller_replicas, 2);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
