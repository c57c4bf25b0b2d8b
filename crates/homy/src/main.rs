use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use homy::api;
use homy::config::LoggingConfig;
use homy::config::StoreConfig;
use homy::discovery::is_plausible_address;
use homy::discovery::HttpTransport;
use homy::discovery::Transport;
use homy::store::JsonFileStore;
use homy::store::MemoryStore;
use homy::Config;
use homy::DiscoveryMachine;
use homy::DiscoveryTarget;
use homy::Onboarding;
use homy::Store;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "homy", version, about = "Add a smart-home device and discover its entities")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe one address and store the entities it exposes
    Discover {
        /// IPv4 address, `.local` name or URL of the device
        address: String,

        /// Name to give the device
        #[arg(short, long, default_value = "My device")]
        name: String,
    },
    /// Serve the onboarding API until Ctrl+C
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    init_logging(&config.logging);
    tracing::info!("homy {} starting", env!("CARGO_PKG_VERSION"));

    let store = open_store(&config.store)?;
    let transport: Arc<dyn Transport> = Arc::new(
        HttpTransport::new(config.discovery.timeout()).context("Failed to set up HTTP client")?,
    );

    match cli.command {
        Command::Discover { address, name } => {
            discover(&config, transport, store, DiscoveryTarget { name, address }).await
        }
        Command::Serve => serve(&config, transport, store).await,
    }
}

fn init_logging(config: &LoggingConfig) {
    let targets = config.overrides.iter().fold(
        Targets::new().with_default(LevelFilter::from(config.level)),
        |targets, (target, level)| targets.with_target(target.clone(), LevelFilter::from(*level)),
    );

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(targets)
        .init();
}

fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match &config.path {
        Some(path) => Arc::new(
            JsonFileStore::open(path)
                .with_context(|| format!("Failed to open store at {}", path.display()))?,
        ),
        None => {
            tracing::info!("No store path configured, devices are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };
    Ok(store)
}

async fn discover(
    config: &Config,
    transport: Arc<dyn Transport>,
    store: Arc<dyn Store>,
    target: DiscoveryTarget,
) -> anyhow::Result<()> {
    if !is_plausible_address(&target.address) {
        anyhow::bail!("'{}' is not a valid device address", target.address);
    }

    let mut machine = DiscoveryMachine::new(transport, store.clone(), &config.discovery);
    machine.start(target);
    let state = machine.settled().await;

    let trace: Vec<String> = machine.history().iter().map(ToString::to_string).collect();
    println!("{}", trace.join(" -> "));

    if let Some(device) = machine.device().and_then(|id| store.device(id).transpose()) {
        let device = device?;
        println!("{} ({}) at {}", device.name, device.id, device.address);
        for entity in &device.entities {
            println!("  {}", entity.internal_name);
        }
    }

    match state.failure() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

async fn serve(
    config: &Config,
    transport: Arc<dyn Transport>,
    store: Arc<dyn Store>,
) -> anyhow::Result<()> {
    let onboarding = Onboarding::new(transport, store.clone(), &config.discovery);
    let state = Arc::new(api::AppState::new(onboarding, store));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received shutdown signal"),
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
        }
        shutdown_tx.send(()).ok();
    });

    api::serve(&config.api, state, shutdown_rx)
        .await
        .map_err(|e| anyhow::anyhow!("API server failed: {}", e))?;

    tracing::info!("homy shutdown complete");
    Ok(())
}
