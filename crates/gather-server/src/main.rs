//! Gather session server binary.
//!
//! Run with: `cargo run -p gather-server -- --port 23456`

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use clap::Parser;
use gather_config::{CliArgs, Config, default_config_dir};
use gather_net::TransportHandler;
use gather_net::udp::{UdpServer, UdpServerConfig};
use gather_server::GameServer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);
    let mut config = Config::load_or_create(&config_dir)?;
    config.apply_cli_overrides(&args);
    config.validate()?;

    gather_log::init_logging(
        config.debug.log_dir.as_deref(),
        cfg!(debug_assertions),
        Some(&config),
    );

    let ip: IpAddr = config.server.bind_address.parse()?;
    let bind_addr = SocketAddr::new(ip, config.server.port);
    info!(
        "Gather server starting on {bind_addr} (max {} connections, client versions {}..={})",
        config.server.max_connections,
        config.server.min_client_version,
        config.server.max_client_version,
    );

    let server = Arc::new(GameServer::new(&config.server));
    let transport_config = UdpServerConfig {
        max_connections: config.server.max_connections,
        idle_timeout: config.server.idle_timeout(),
        ..Default::default()
    };
    let transport = Arc::new(UdpServer::bind(
        bind_addr,
        Arc::clone(&server) as Arc<dyn TransportHandler>,
        transport_config,
    )?);

    let stats_task = {
        let server = Arc::clone(&server);
        let interval = config.server.stats_interval();
        tokio::spawn(async move { server.run_stats(interval).await })
    };
    let transport_task = {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move { transport.run().await })
    };

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");

    transport.shutdown();
    server.shutdown();
    transport_task.await??;
    stats_task.await?;

    info!("Final stats: {}", server.stats());
    Ok(())
}
