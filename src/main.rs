//! Local Volume Coordinator CLI
//!
//! Runs one coordinator operation against the cluster, or against an
//! in-memory store seeded from a file with `--standalone`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use local_volume_coordinator::quantity::{format_binary_si, parse_quantity};
use local_volume_coordinator::storage_class::{
    parse_parameters, LVM_TYPE_PARAM, THICK_CONTIGUOUS_PARAM, VOLUME_GROUPS_PARAM,
};
use local_volume_coordinator::{
    CoordinatorConfig, CoordinatorMetrics, InMemoryStore, KubeStore, ProvisioningRequest,
    SpecBuilder, VolumeCoordinator, VolumeStoreRef, VolumeType,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Local Volume Coordinator - LVM logical volume provisioning for Kubernetes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Coordinator configuration file (YAML)
    #[arg(long, env = "COORDINATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Finalizer token placed on created volumes
    #[arg(long, env = "FINALIZER_TOKEN")]
    finalizer: Option<String>,

    /// Convergence timeout in seconds
    #[arg(long, env = "POLL_TIMEOUT_SECS")]
    poll_timeout_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run against an in-memory store (no Kubernetes)
    #[arg(long, env = "STANDALONE")]
    standalone: bool,

    /// LVMVolumeGroup list (YAML) to seed the in-memory store with
    #[arg(long, env = "SEED_GROUPS", requires = "standalone")]
    seed_groups: Option<PathBuf>,

    /// Print Prometheus metrics after the command
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a logical volume and wait until it is ready
    Provision {
        /// Volume ID
        name: String,
        /// Requested size (e.g. 10Gi)
        #[arg(long)]
        size: String,
        /// Thin or Thick
        #[arg(long, default_value = "Thick")]
        lvm_type: VolumeType,
        /// Storage class volume group list (YAML)
        #[arg(long)]
        volume_groups: String,
        /// Node to place the volume on
        #[arg(long)]
        node: Option<String>,
        /// Allocate contiguous extents (thick only)
        #[arg(long)]
        contiguous: bool,
    },
    /// Release the finalizer and delete a logical volume
    Deprovision {
        /// Volume ID
        name: String,
    },
    /// Request a new size for a logical volume
    Expand {
        /// Volume ID
        name: String,
        /// New size (e.g. 20Gi)
        #[arg(long)]
        size: String,
        /// Wait until the new size is reported
        #[arg(long)]
        wait: bool,
    },
    /// List eligible volume groups with their free space
    Groups {
        /// Thin or Thick
        #[arg(long, default_value = "Thick")]
        lvm_type: VolumeType,
        /// Storage class volume group list (YAML)
        #[arg(long)]
        volume_groups: String,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting Local Volume Coordinator");
    info!("  Version: {}", local_volume_coordinator::VERSION);
    info!("  Standalone mode: {}", args.standalone);

    let config = load_config(&args)?;
    let store = build_store(&args).await?;
    let metrics = Arc::new(CoordinatorMetrics::new()?);
    let coordinator = VolumeCoordinator::new(store, config, metrics.clone())?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, canceling");
            on_signal.cancel();
        }
    });

    run(&coordinator, args.command, &cancel).await?;

    if args.print_metrics {
        print!("{}", metrics.gather_text()?);
    }
    Ok(())
}

async fn run(
    coordinator: &VolumeCoordinator,
    command: Command,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    match command {
        Command::Provision {
            name,
            size,
            lvm_type,
            volume_groups,
            node,
            contiguous,
        } => {
            let parameters = storage_class_parameters(lvm_type, volume_groups, contiguous);
            let (lvm_type, selector) = parse_parameters(&parameters)?;
            let size = parse_quantity(&size)?;
            let request = ProvisioningRequest::new(name, size, lvm_type, selector)
                .with_preferred_node(node.unwrap_or_default())
                .with_contiguous(SpecBuilder::is_contiguous(&parameters, lvm_type));

            let provisioned = coordinator.provision(&request, cancel).await?;
            println!(
                "{}\t{}\t{}",
                provisioned.volume_id, provisioned.node, provisioned.volume_group
            );
        }
        Command::Deprovision { name } => {
            coordinator.deprovision(&name, cancel).await?;
            println!("{}\tdeleted", name);
        }
        Command::Expand { name, size, wait } => {
            let updated = coordinator.expand(&name, &size).await?;
            if wait {
                let attempts = coordinator.wait_for_size(&name, &size, cancel).await?;
                info!("{} reached {} after {} attempts", name, updated.spec.size, attempts);
            }
            println!("{}\t{}", name, updated.spec.size);
        }
        Command::Groups {
            lvm_type,
            volume_groups,
        } => {
            let parameters = storage_class_parameters(lvm_type, volume_groups, false);
            let (lvm_type, selector) = parse_parameters(&parameters)?;
            for group in coordinator
                .eligible_groups(&selector, lvm_type, cancel)
                .await?
            {
                println!(
                    "{}\t{}\t{}",
                    group.name,
                    group.node.as_deref().unwrap_or("-"),
                    format_binary_si(group.free_space)
                );
            }
        }
    }
    Ok(())
}

/// Storage class parameters equivalent to the command line flags
fn storage_class_parameters(
    lvm_type: VolumeType,
    volume_groups: String,
    contiguous: bool,
) -> BTreeMap<String, String> {
    let mut parameters = BTreeMap::new();
    parameters.insert(LVM_TYPE_PARAM.to_string(), lvm_type.to_string());
    parameters.insert(VOLUME_GROUPS_PARAM.to_string(), volume_groups);
    if contiguous {
        parameters.insert(THICK_CONTIGUOUS_PARAM.to_string(), "true".to_string());
    }
    parameters
}

// =============================================================================
// Setup
// =============================================================================

fn load_config(args: &Args) -> anyhow::Result<CoordinatorConfig> {
    let mut config = match &args.config {
        Some(path) => CoordinatorConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CoordinatorConfig::default(),
    };

    if let Some(token) = &args.finalizer {
        config.finalizer.token = token.clone();
    }
    if let Some(timeout) = args.poll_timeout_secs {
        config.poll.timeout_secs = Some(timeout);
    }
    config.validate()?;
    Ok(config)
}

async fn build_store(args: &Args) -> anyhow::Result<VolumeStoreRef> {
    if !args.standalone {
        let store = KubeStore::try_default()
            .await
            .context("connecting to the Kubernetes API server")?;
        return Ok(Arc::new(store));
    }

    let store = InMemoryStore::new();
    if let Some(path) = &args.seed_groups {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let count = store.seed_volume_groups_from_yaml(&yaml)?;
        info!("Seeded {} LVMVolumeGroups from {}", count, path.display());
    }
    Ok(Arc::new(store))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn"] {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }

    // Logs go to stderr, command output to stdout
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUPS: &str = "- name: lvg-a\n  thin:\n    poolName: pool1\n";

    #[test]
    fn test_flags_follow_storage_class_rules() {
        let thick = storage_class_parameters(VolumeType::Thick, "- name: lvg-a\n".into(), true);
        let (lvm_type, selector) = parse_parameters(&thick).unwrap();
        assert_eq!(lvm_type, VolumeType::Thick);
        assert!(selector.contains_key("lvg-a"));
        assert!(SpecBuilder::is_contiguous(&thick, lvm_type));

        let thin = storage_class_parameters(VolumeType::Thin, GROUPS.into(), true);
        let (lvm_type, selector) = parse_parameters(&thin).unwrap();
        assert_eq!(selector.get("lvg-a").map(String::as_str), Some("pool1"));
        assert!(!SpecBuilder::is_contiguous(&thin, lvm_type));
    }

    #[test]
    fn test_thin_flags_need_a_pool() {
        let parameters = storage_class_parameters(VolumeType::Thin, "- name: lvg-a\n".into(), false);
        assert!(parse_parameters(&parameters).is_err());
    }
}
