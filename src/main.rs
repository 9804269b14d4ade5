//! meshctl: install and upgrade the Meshplane control plane
//!
//! Manifests go to stdout; logs and status lines go to stderr so the
//! output can be piped straight into `kubectl apply -f -`.

use std::fmt;
use std::io::Write;
use std::path::PathBuf;

use clap::{CommandFactory, FromArgMatches};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use meshctl::cli::{recordable_command, Cli, Commands};
use meshctl::cluster::{ApiServerCluster, ClusterStore, ConnectError, Kubeconfig, ManifestCluster};
use meshctl::config::Config;
use meshctl::flags::FlagSet;
use meshctl::identity::RcgenIdentityGenerator;
use meshctl::upgrade::Invocation;
use meshctl::{install, render, status, upgrade};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    let (ok_message, fail_message) = match &cli.command {
        Commands::Install(_) => (status::INSTALL_OK_MESSAGE, status::INSTALL_FAIL_MESSAGE),
        Commands::Upgrade(_) => (status::UPGRADE_OK_MESSAGE, status::UPGRADE_FAIL_MESSAGE),
    };

    if let Err(e) = init_tracing(cli.verbose) {
        exit_with_failure(&e, fail_message);
    }

    let config = Config::load(&cli.config).unwrap_or_else(|e| exit_with_failure(&e, fail_message));
    debug!(config = %cli.config.display(), "Loaded configuration");

    let namespace = cli
        .namespace
        .clone()
        .unwrap_or_else(|| config.cluster.namespace.clone());

    // The recordable flags of whichever subcommand ran
    let flags = match matches.subcommand() {
        Some((_, sub_matches)) => FlagSet::from_matches(&recordable_command(), sub_matches),
        None => FlagSet::new(),
    };

    let mut invocation = Invocation::new(flags);
    invocation.issuer_lifetime = config.identity.issuer_lifetime;
    invocation.anchor_lifetime = config.identity.anchor_lifetime;

    let manifest = match run(&cli, &config, &namespace, invocation).await {
        Ok(manifest) => manifest,
        Err(e) => exit_with_failure(&e, fail_message),
    };

    let mut stdout = std::io::stdout().lock();
    if let Err(e) = stdout.write_all(&manifest).and_then(|()| stdout.flush()) {
        exit_with_failure(&e, fail_message);
    }
    eprint!("{}", status::ok(ok_message));
}

/// Log to stderr; `RUST_LOG` adds to the default directive.
fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let default_directive = if verbose { "meshctl=debug" } else { "meshctl=warn" };
    let filter = EnvFilter::builder()
        .from_env()?
        .add_directive(default_directive.parse()?);

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}

fn exit_with_failure(error: &dyn fmt::Display, help: &str) -> ! {
    eprint!("{}", status::fail(error, help));
    std::process::exit(1);
}

/// Run the selected pipeline and render its output into a buffer.
async fn run(
    cli: &Cli,
    config: &Config,
    namespace: &str,
    mut invocation: Invocation,
) -> anyhow::Result<Vec<u8>> {
    let generator = RcgenIdentityGenerator;
    let new_uuid = || uuid::Uuid::new_v4().to_string();

    let values = match &cli.command {
        Commands::Install(args) => {
            invocation.ignore_cluster = args.ignore_cluster;
            let cluster: Box<dyn ClusterStore> = if args.ignore_cluster {
                Box::new(ManifestCluster::default())
            } else {
                Box::new(connect(cli, config)?)
            };
            info!(namespace, "Rendering install manifests");
            install::install(cluster.as_ref(), &generator, namespace, invocation, new_uuid).await?
        }
        Commands::Upgrade(args) => {
            let cluster: Box<dyn ClusterStore> = match &args.from_manifests {
                Some(source) => Box::new(ManifestCluster::read(source)?),
                None => Box::new(connect(cli, config)?),
            };
            info!(namespace, "Rendering upgrade manifests");
            upgrade::upgrade(cluster.as_ref(), &generator, namespace, invocation, new_uuid).await?
        }
    };

    let mut manifest = Vec::new();
    render::render(&values, &mut manifest)?;
    Ok(manifest)
}

/// Build an API server client from the kubeconfig.
///
/// `--kubeconfig` wins over `KUBECONFIG`, which wins over the config file.
fn connect(cli: &Cli, config: &Config) -> Result<ApiServerCluster, ConnectError> {
    let explicit: Option<PathBuf> = match (&cli.kubeconfig, std::env::var_os("KUBECONFIG")) {
        (Some(path), _) => Some(path.clone()),
        (None, None) => config.cluster.kubeconfig.clone(),
        (None, Some(_)) => None,
    };
    let path = Kubeconfig::locate(explicit.as_deref()).ok_or(ConnectError::NoKubeconfig)?;
    debug!(kubeconfig = %path.display(), "Using kubeconfig");

    let context = cli.context.as_deref().or(config.cluster.context.as_deref());
    let resolved = Kubeconfig::load(&path)?.resolve(context)?;
    ApiServerCluster::new(&resolved)
}
