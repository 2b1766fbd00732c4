use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use leasekeeper::{ConfigFile, DhcpServer, Result};

#[derive(Parser)]
#[command(name = "leasekeeper")]
#[command(author, version, about = "A small DHCPv4 server with sticky leases", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "dhcp_config.yaml")]
    config: PathBuf,

    /// Network interface to bind to; overrides `interface` in the config file
    #[arg(short, long)]
    iface: Option<String>,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Run,
    ShowConfig,
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let file = ConfigFile::load(&cli.config)?;
    let config = file.validate()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let interface = config.interface_or(cli.iface.as_deref()).to_string();
            info!("Starting DHCP server with config: {:?}", cli.config);
            let server = DhcpServer::new(config, &interface)?;

            tokio::select! {
                result = server.run() => result,
                _ = tokio::signal::ctrl_c() => {
                    info!(
                        "Received shutdown signal, stopping server ({} active lease(s) discarded)",
                        server.allocator().active_lease_count().await
                    );
                    Ok(())
                }
            }
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&file)?);
            Ok(())
        }
        Commands::CheckConfig => {
            println!(
                "Configuration OK: network {}, range {} - {} ({} addresses), {} reservation(s), lease {}s",
                config.network,
                config.range_start,
                config.range_end,
                config.range_size(),
                config.reserved_addresses.len(),
                config.lease_duration_seconds
            );
            Ok(())
        }
    }
}
