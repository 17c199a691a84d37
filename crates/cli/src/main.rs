use std::sync::Arc;

use clap::{Parser, Subcommand};

use fx_terminal_automation::AutomationEngine;
use fx_terminal_broker::{GatewayBroker, GatewayClient};
use fx_terminal_core::{Broker, ConfigLoader, MonitorStore};
use fx_terminal_execution::OrderExecutor;
use fx_terminal_server::{ApiServer, AppState};

#[derive(Parser)]
#[command(name = "fx-terminal")]
#[command(about = "Real-time trading terminal backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the terminal server with the streaming and automation loops
    Serve {
        /// Override the listen host
        #[arg(long)]
        host: Option<String>,
        /// Override the listen port
        #[arg(long)]
        port: Option<u16>,
        /// Config profile overlay (config/Config.<profile>.toml)
        #[arg(long)]
        profile: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Serve {
            host,
            port,
            profile,
        } => serve(host, port, profile.as_deref()).await?,
    }

    Ok(())
}

async fn serve(host: Option<String>, port: Option<u16>, profile: Option<&str>) -> anyhow::Result<()> {
    let mut config = match profile {
        Some(profile) => ConfigLoader::load_with_profile(profile)?,
        None => ConfigLoader::load()?,
    };
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let client = GatewayClient::new(&config.gateway);
    let broker: Arc<dyn Broker> = Arc::new(GatewayBroker::new(client));
    let monitors = Arc::new(MonitorStore::new());
    let executor = Arc::new(OrderExecutor::new(broker.clone(), monitors.clone()));

    let engine = Arc::new(AutomationEngine::new(
        broker.clone(),
        executor.clone(),
        monitors.clone(),
        config.automation.clone(),
    ));
    let automation_events = engine.events();
    let automation = engine.spawn();
    tracing::info!(
        cycle_secs = config.automation.cycle_secs,
        "automation engine started"
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(broker, executor, monitors, automation_events, config);
    let server = tokio::spawn(async move {
        if let Err(e) = ApiServer::new(state).serve(&addr).await {
            tracing::error!("Server error: {e}");
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl+C, shutting down");
    automation.abort();
    server.abort();
    Ok(())
}
