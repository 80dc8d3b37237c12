use anyhow::Result;
use clap::Parser;
use dhcpd::{Config, DhcpServer};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// DHCP Server - lease addresses from a single pool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/dhcpd/config.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dhcpd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting DHCP Server");

    let config = match Config::from_file(&args.config) {
        Ok(cfg) => {
            info!("Loaded configuration from {}", args.config);
            cfg
        }
        Err(e) if is_not_found(&e) => {
            error!("Failed to load configuration from {}: {}", args.config, e);
            info!("Using default configuration");
            Config::default()
        }
        Err(e) => {
            error!("Invalid configuration in {}: {}", args.config, e);
            return Err(e);
        }
    };

    if let Err(e) = config.validate() {
        error!("{}", e);
        return Err(e.into());
    }

    let config = Arc::new(config);
    let dhcp_server = DhcpServer::new(Arc::clone(&config))?;

    info!(
        "DHCP server {} serving {}-{} on addresses: {:?}",
        config.dhcp.server_id,
        config.dhcp.pool.first,
        config.dhcp.pool.last,
        config.listen_addresses
    );

    // Run DHCP server (blocks)
    if let Err(e) = dhcp_server.run().await {
        error!("DHCP server error: {}", e);
        return Err(e);
    }

    Ok(())
}

/// Only a missing file falls back to the defaults; a file that does not parse is fatal
fn is_not_found(e: &anyhow::Error) -> bool {
    e.downcast_ref::<std::io::Error>()
        .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
}
