// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use hermit_client::Client;
use hermit_model::LlamaGenerator;
use hermit_sandbox::Shell;
use hermit_server::{ChatLog, Server, Terminal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Commands::Server => run_server().await,
        Commands::Client => run_client().await,
    };
    if let Err(e) = &result {
        error!("fatal: {e:#}");
    }
    result
}

/// `LOG_LEVEL` seeds the filter; `RUST_LOG`-style directives are accepted too.
fn init_logging() {
    let directives = std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase();
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_server() -> anyhow::Result<()> {
    let config = hermit_config::server_from_env()?;
    let llama = hermit_config::llama_from_env()?;
    let system = std::fs::read_to_string(&config.system_path)
        .with_context(|| format!("reading system prompt {}", config.system_path.display()))?;

    let generator = Arc::new(LlamaGenerator::connect(&llama).await?);
    let chat = ChatLog::new(system, config.default_goal.clone());
    let terminal = Terminal::new(config.stream_response);
    let mut server = Server::bind(config, chat, generator, terminal).await?;

    let outcome = tokio::select! {
        res = server.serve() => res.map_err(anyhow::Error::from),
        _ = shutdown_signal() => Ok(()),
    };
    info!("server stopped");
    outcome
}

async fn run_client() -> anyhow::Result<()> {
    let config = hermit_config::client_from_env()?;
    let shell = Shell::from_config(&config).await?;
    let mut client = Client::new(shell, config);

    let outcome = tokio::select! {
        res = client.run() => res.map_err(anyhow::Error::from),
        _ = shutdown_signal() => Ok(()),
    };
    info!("cleaning up");
    client.shutdown().await?;
    outcome
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                _ = term.recv() => info!("received SIGTERM"),
            }
        }
        Err(e) => {
            warn!("cannot install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            info!("received SIGINT");
        }
    }
}
