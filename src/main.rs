//! jumpgate
//!
//! A SOCKS5 proxy that tunnels every connection through an SSH jump host,
//! authenticating with a private key and verifying the host against a
//! pre-shared public key.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

use jumpgate::config::TunnelConfig;
use jumpgate::{Socks5Proxy, StaticKeyGetter};

/// jumpgate - SOCKS5 tunnel through an SSH jump host
#[derive(Parser, Debug)]
#[command(name = "jumpgate", version, about)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/jumpgate/jumpgate.toml")]
    config: PathBuf,

    /// Generate default configuration and exit
    #[arg(long)]
    generate_config: bool,

    /// Override jump host address (host:port)
    #[arg(short, long)]
    jumpbox: Option<String>,

    /// Override private key path
    #[arg(short, long)]
    key: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new(Level::DEBUG.to_string())
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Handle --generate-config
    if cli.generate_config {
        let config = TunnelConfig::default();
        let content = toml::to_string_pretty(&config)?;
        println!("{}", content);
        return Ok(());
    }

    // Load configuration
    let mut config = TunnelConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    // Apply CLI overrides
    if let Some(jumpbox) = cli.jumpbox {
        config.jumpbox_url = jumpbox;
    }
    if let Some(key) = cli.key {
        config.private_key_path = key;
    }

    info!("Starting jumpgate");
    info!("  Jump host: {}", config.jumpbox_url);
    info!("  User: {}", config.jumpbox_user);
    info!("  Private key: {}", config.private_key_path.display());

    let private_key = std::fs::read_to_string(&config.private_key_path).with_context(|| {
        format!(
            "Failed to read private key from {}",
            config.private_key_path.display()
        )
    })?;

    let host_key = config.jumpbox_host_key.as_deref().ok_or_else(|| {
        anyhow!("jumpbox_host_key is required; trust-on-first-use is not supported")
    })?;
    let key_getter =
        StaticKeyGetter::from_openssh(host_key).context("Failed to parse jumpbox_host_key")?;

    let proxy = Socks5Proxy::new(Arc::new(key_getter)).with_user(config.jumpbox_user.clone());
    proxy.start(&private_key, &config.jumpbox_url).await?;

    let addr = proxy.addr().await?;
    info!("SOCKS5 proxy available on {}", addr);
    println!("{}", addr);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    Ok(())
}
