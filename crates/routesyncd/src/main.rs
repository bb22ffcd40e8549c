//! routesyncd - route and allow-list reconciliation tool
//!
//! Applies route intents to a router described by a JSON inventory file.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use routesyncd::{
    AllowListPlan, AllowListReconciler, CancellationToken, CidrSet, FileInventory, IpPrefix,
    Route, RouteReconciler, RouteReconcilerConfig, RouteSyncConfig, DEFAULT_CONFIG_PATH,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Route reconciliation for whole-resource-replace routers
#[derive(Parser, Debug)]
#[command(name = "routesyncd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// JSON inventory file holding routers, allow-lists and nodes
    #[arg(short = 'i', long, default_value = "/var/lib/routesync/inventory.json")]
    inventory: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Route a destination CIDR to a node
    Create {
        /// Destination CIDR
        #[arg(short, long)]
        destination: IpPrefix,
        /// Target node name
        #[arg(short, long)]
        node: String,
    },
    /// Remove the route for a destination CIDR
    Delete {
        #[arg(short, long)]
        destination: IpPrefix,
    },
    /// List routes on the configured router
    List,
    /// Show the allow-list changes needed to reach the given CIDRs
    AllowlistPlan {
        /// Allow-list identifier, defaults to allow_list.allow_list_id
        #[arg(long)]
        list: Option<String>,
        /// Desired CIDRs
        #[arg(long = "cidr", num_args = 0..)]
        cidrs: Vec<String>,
    },
    /// Make the allow-list equal to the given CIDRs
    AllowlistSync {
        #[arg(long)]
        list: Option<String>,
        #[arg(long = "cidr", num_args = 0..)]
        cidrs: Vec<String>,
    },
    /// Validate the configuration file and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("routesyncd failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = RouteSyncConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    if let Command::CheckConfig = args.command {
        config.validate().context("invalid configuration")?;
        info!(path = %args.config.display(), "Configuration is valid");
        return Ok(());
    }
    config.validate().context("invalid configuration")?;

    let inventory = Arc::new(FileInventory::new(&args.inventory));
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match args.command {
        Command::Create { destination, node } => {
            let reconciler = route_reconciler(&config, inventory);
            let outcome = reconciler
                .create_route(&config.cluster_name, &Route::new(destination, node), &cancel)
                .await?;
            println!(
                "{} {}",
                destination,
                if outcome.is_committed() { "created" } else { "unchanged" }
            );
        }
        Command::Delete { destination } => {
            let reconciler = route_reconciler(&config, inventory);
            let outcome = reconciler
                .delete_route(&config.cluster_name, &Route::new(destination, ""), &cancel)
                .await?;
            println!(
                "{} {}",
                destination,
                if outcome.is_committed() { "deleted" } else { "unchanged" }
            );
        }
        Command::List => {
            let reconciler = route_reconciler(&config, inventory);
            for route in reconciler.list_routes(&config.cluster_name, &cancel).await? {
                println!("{}", route);
            }
        }
        Command::AllowlistPlan { list, cidrs } => {
            let list_id = allow_list_id(&config, list)?;
            let desired = CidrSet::parse(&cidrs)?;
            let plan = allow_list_reconciler(&config, inventory)
                .plan(&list_id, &desired, &cancel)
                .await?;
            print_plan(&list_id, &plan);
        }
        Command::AllowlistSync { list, cidrs } => {
            if !config.allow_list.manage_security_groups {
                bail!("allow-list management is disabled (allow_list.manage_security_groups)");
            }
            let list_id = allow_list_id(&config, list)?;
            let desired = CidrSet::parse(&cidrs)?;
            let plan = allow_list_reconciler(&config, inventory)
                .sync(&list_id, &desired, &cancel)
                .await?;
            print_plan(&list_id, &plan);
        }
        Command::CheckConfig => {}
    }

    Ok(())
}

fn route_reconciler(config: &RouteSyncConfig, inventory: Arc<FileInventory>) -> RouteReconciler {
    let mut settings = RouteReconcilerConfig::new(config.router.router_id.clone())
        .with_family(config.family())
        .with_retry(config.retry_policy());
    if let Some(timeout) = config.operation_timeout() {
        settings = settings.with_operation_timeout(timeout);
    }
    RouteReconciler::new(inventory.clone(), inventory, settings)
}

fn allow_list_reconciler(
    config: &RouteSyncConfig,
    inventory: Arc<FileInventory>,
) -> AllowListReconciler {
    let reconciler = AllowListReconciler::new(inventory, config.retry_policy());
    match config.operation_timeout() {
        Some(timeout) => reconciler.with_timeout(timeout),
        None => reconciler,
    }
}

fn allow_list_id(config: &RouteSyncConfig, explicit: Option<String>) -> anyhow::Result<String> {
    explicit
        .or_else(|| config.allow_list.allow_list_id.clone())
        .context("no allow-list given and allow_list.allow_list_id is not set")
}

fn print_plan(list_id: &str, plan: &AllowListPlan) {
    if plan.is_empty() {
        println!("{} in sync", list_id);
        return;
    }
    for cidr in plan.to_add.to_sorted_strings() {
        println!("+ {}", cidr);
    }
    for cidr in plan.to_remove.to_sorted_strings() {
        println!("- {}", cidr);
    }
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted, cancelling");
                cancel.cancel();
            }
            Err(e) => warn!("Failed to install interrupt handler: {}", e),
        }
    });
}
