//! SOCKS5 Proxy Server - Entry Point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use socks5proxy::friendly_name::FriendlyNames;
use socks5proxy::{ProxyConfig, Server, VERSION};

#[derive(Parser, Debug)]
#[command(name = "socks5proxy", about = "A SOCKS5 proxy server (RFC 1928)")]
struct Cli {
    /// Path to proxy.json
    #[arg(long, default_value = "proxy.json")]
    config: PathBuf,

    /// Path to appsettings.json (logging configuration)
    #[arg(long, default_value = "appsettings.json")]
    appsettings: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logging = socks5proxy::config::LoggingConfig::load(&cli.appsettings);
    socks5proxy::util::init_tracing(&logging)?;

    let config = match ProxyConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            let resolved = cli.config.canonicalize().unwrap_or(cli.config.clone());
            error!(error = %e, config_path = %resolved.display(), "failed to load proxy configuration");
            std::process::exit(1);
        }
    };

    info!(version = VERSION, config_path = %cli.config.display(), "starting SOCKS5 proxy server");

    let friendly_names = Arc::new(FriendlyNames::build(&config.ip_address_mappings));

    let server = Server::bind(config.listen_addr(), friendly_names)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.listen_addr()))?;

    info!(bind_addr = %server.local_addr()?, "server listening");

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                return Err(e);
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received, draining connections");
            server.shutdown().await;
        }
    }

    info!("server stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
