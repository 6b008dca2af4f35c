use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use portico::adapter::HTTP_PROTOCOL;
use portico::{Adapter, AdapterEvent, ApiDocument, Config, GatewayContext, HttpAdapter};

#[derive(Parser)]
#[command(name = "portico", version, about = "Serve AsyncAPI channels over HTTP")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP adapter for one declared server
    Serve {
        /// Gateway configuration (YAML). Defaults apply if missing.
        #[arg(short, long, default_value = "portico.yaml")]
        config: PathBuf,
        /// AsyncAPI description (YAML or JSON)
        #[arg(short, long)]
        api: PathBuf,
        /// Name of the declared server to serve
        #[arg(short, long)]
        server: String,
        /// Reply to every inbound message with its own payload
        #[arg(long)]
        echo: bool,
    },
    /// List the channels a server publishes on
    Channels {
        #[arg(short, long, default_value = "portico.yaml")]
        config: PathBuf,
        #[arg(short, long)]
        api: PathBuf,
        #[arg(short, long)]
        server: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Serve {
            config,
            api,
            server,
            echo,
        } => serve(&config, &api, &server, echo).await,
        Command::Channels {
            config,
            api,
            server,
        } => {
            let (_, context) = load_context(&config, &api, &server).await?;
            for channel in context.subscribed_channels() {
                println!("{channel}");
            }
            Ok(())
        }
    }
}

async fn load_context(
    config_path: &Path,
    api_path: &Path,
    server: &str,
) -> Result<(Config, GatewayContext)> {
    let mut config = Config::load(config_path)
        .await
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    config.merge_env_server_variables();

    let api = ApiDocument::load(api_path)
        .await
        .with_context(|| format!("failed to load API description {}", api_path.display()))?;
    let context = GatewayContext::from_config(server, Arc::new(api), &config)?;
    Ok((config, context))
}

async fn serve(config_path: &Path, api_path: &Path, server: &str, echo: bool) -> Result<()> {
    let (config, context) = load_context(config_path, api_path, server).await?;
    if context.protocol() != HTTP_PROTOCOL {
        warn!(
            server = %server,
            protocol = %context.protocol(),
            "Server is not declared as http, serving it over HTTP anyway"
        );
    }

    let (tx, mut rx) = mpsc::channel(config.server.event_buffer.max(1));
    let adapter = HttpAdapter::builder(Arc::new(context), tx)
        .settings(config.server.clone())
        .build()?;
    adapter
        .connect()
        .await
        .context("failed to start HTTP adapter")?;

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    break;
                };
                route_event(&adapter, event, echo).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                adapter.shutdown();
                break;
            }
        }
    }

    Ok(())
}

async fn route_event(adapter: &HttpAdapter, event: AdapterEvent, echo: bool) {
    match event {
        AdapterEvent::ServerReady(data) => {
            info!(adapter = %data.adapter, server = %data.server, address = %data.address, "Server ready");
        }
        AdapterEvent::Connect(data) => {
            info!(channel = %data.channel, connection = %data.connection, "Client connected");
        }
        AdapterEvent::Message(data) => {
            info!(
                channel = %data.message.channel(),
                payload = %data.message.payload(),
                "Message received"
            );
            if echo && let Err(e) = adapter.send(&data.message).await {
                error!(error = %e, "Failed to send reply");
            }
        }
        AdapterEvent::Error(info) => {
            warn!(kind = ?info.kind, message = %info.message, "Request rejected");
        }
    }
}
