//! KLF200 MQTT bridge - main entry point
//!
//! Loads and validates the configuration before opening any connection,
//! starts the daemon and waits for a termination signal. Exit code 0 on a
//! clean shutdown, non-zero on a startup failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use klf200_bridge::config::{BrokerSettings, DEFAULT_BROKER_PATH, DEFAULT_CONFIG_PATH};
use klf200_bridge::{BridgeConfig, Daemon};

/// KLF200 MQTT bridge configuration
#[derive(Parser, Debug)]
#[command(name = "klf200-bridge")]
#[command(about = "MQTT bridge daemon for the Velux KLF-200 window/blind gateway")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Path of the bridge configuration file
    #[arg(long, env = "KLF200_BRIDGE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Path of the operator broker settings file
    #[arg(long, default_value = DEFAULT_BROKER_PATH)]
    broker_config: PathBuf,

    /// Override the snapshot data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

/// Initialize logging from the configured level; `RUST_LOG` and `--debug`
/// take precedence
fn initialize_logging(level: &str, debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupt received"),
                _ = sigterm.recv() => info!("termination signal received"),
            }
        }
        Err(e) => {
            warn!("cannot install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
    info!("interrupt received");
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // configuration errors are fatal and must abort before any connection
    let mut config = match BridgeConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("klf200-bridge: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    initialize_logging(&config.logging.level, cli.debug);
    info!("starting klf200-bridge v{}", env!("CARGO_PKG_VERSION"));

    let broker = match BrokerSettings::load(&cli.broker_config) {
        Ok(broker) => broker,
        Err(e) => {
            error!("broker settings: {e}");
            return ExitCode::FAILURE;
        }
    };

    let daemon = match Daemon::start(config, broker).await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!("startup failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    wait_for_shutdown().await;
    daemon.shutdown().await;
    ExitCode::SUCCESS
}
