//! sockfetch: HTTP pages over raw TCP sockets
//!
//! Two halves:
//! - `serve`: a TCP server that answers 3-byte commands by fetching the
//!   matching destination and sending back its content
//! - `fetch`: a one-shot client that fetches a destination, prints the
//!   response headers and saves the page as `{hostname}.html`
//!
//! Configuration via CLI arguments, environment toggles or a TOML file.

mod buffer;
mod client;
mod config;
mod destinations;
mod protocol;
mod response;
mod server;
mod tracker;

use client::{AddressFamily, FileStore, HttpFetcher};
use config::{Config, Mode};
use server::{CommandPolicy, Server};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match config.mode.clone() {
        Mode::Serve => run_server(config).await,
        Mode::Fetch { index } => run_fetch(config, index).await,
        Mode::Destinations => {
            for (index, host) in config.destinations.iter() {
                println!("{index:>2} {host}");
            }
            Ok(())
        }
    }
}

fn build_fetcher(config: &Config) -> HttpFetcher {
    let family = if config.ipv6 {
        AddressFamily::V6
    } else {
        AddressFamily::V4
    };

    HttpFetcher::new(
        Arc::new(config.destinations.clone()),
        FileStore::new(&config.output_dir),
    )
    .with_port(config.port)
    .with_family(family)
    .with_timeout(config.timeout)
}

/// Serve commands until SIGINT or SIGTERM
async fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let policy = CommandPolicy::from_config(&config);

    info!(
        listen = %config.listen,
        permitted_command = policy.permitted,
        allow_all_commands = policy.allow_all,
        local_destination = policy.local,
        ipv6 = config.ipv6,
        "Starting sockfetch server"
    );

    let server = Server::new(config.listen.clone(), policy, build_fetcher(&config));
    server.run(shutdown_signal()).await?;
    Ok(())
}

/// Fetch one destination, print its headers and save its content
async fn run_fetch(
    config: Config,
    index: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let fallback = config
        .destinations
        .fallback_index()
        .ok_or("destination table is empty")?;

    let index = match index {
        Some(index) if config.destinations.get(index).is_some() => index,
        Some(index) => {
            warn!(
                index,
                max = config.destinations.len() - 1,
                fallback,
                "Invalid destination, pick a number within the table"
            );
            fallback
        }
        None => fallback,
    };

    info!(
        host = config.destinations.get(index).unwrap_or("?"),
        ipv6 = config.ipv6,
        "Starting fetch"
    );

    let fetched = build_fetcher(&config).fetch_page(index).await?;
    info!(host = %fetched.host, length = fetched.content.len(), "Fetch complete");
    if let Some(headers) = fetched.headers {
        println!("{}\n", String::from_utf8_lossy(&headers));
    }
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
