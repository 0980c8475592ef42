//! meshcore daemon binary
//!
//! Loads configuration, builds the local node and runs the mesh manager
//! over the UDP bearer.

use clap::Parser;
use meshcore::bearer::now_ms;
use meshcore::{bearer_channel, Config, MeshManager, UdpBearer};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Bluetooth Mesh node over UDP
#[derive(Parser, Debug)]
#[command(name = "meshcore", version, about)]
struct Args {
    /// Path to configuration file (overrides default search paths)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Additional UDP peer to send PDUs to (repeatable)
    #[arg(short, long, value_name = "ADDR")]
    peer: Vec<SocketAddr>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let args = Args::parse();

    info!("meshcore starting");

    let (config, loaded_paths) = if let Some(config_path) = &args.config {
        match Config::load_file(config_path) {
            Ok(config) => (config, vec![config_path.clone()]),
            Err(e) => {
                error!("Failed to load configuration from {}: {}", config_path.display(), e);
                std::process::exit(1);
            }
        }
    } else {
        match Config::load() {
            Ok(result) => result,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        }
    };

    if loaded_paths.is_empty() {
        info!("No config files found, using defaults");
    } else {
        for path in &loaded_paths {
            info!(path = %path.display(), "Loaded config file");
        }
    }

    let bearer_config = config.bearer.udp.clone();
    let event_buffer = config.manager.event_buffer.max(1);

    let mut manager = match MeshManager::from_config(config) {
        Ok(manager) => manager,
        Err(e) => {
            error!("Failed to create mesh manager: {}", e);
            std::process::exit(1);
        }
    };

    let (bearer_tx, bearer_rx) = bearer_channel(event_buffer);
    let mut bearer = match UdpBearer::bind(&bearer_config, bearer_tx).await {
        Ok(bearer) => bearer,
        Err(e) => {
            error!("Failed to start UDP bearer: {}", e);
            std::process::exit(1);
        }
    };
    for peer in args.peer {
        bearer.add_peer(peer);
    }
    info!(
        local_addr = ?bearer.local_addr(),
        "Bearer ready"
    );

    manager.attach_bearer(Box::new(bearer), bearer_rx);
    manager.register_default_models(now_ms());

    if let Some(node) = manager.network().local_node() {
        info!(
            name = %node.name,
            address = %node.primary_address,
            elements = node.element_count(),
            iv_index = %manager.network().iv_index(),
            "Local node"
        );
    }

    // Log application events until the manager stops.
    if let Some(mut events) = manager.take_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                info!(?event, "Mesh event");
            }
        });
    }

    let handle = manager.handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        let _ = handle.shutdown().await;
    });

    info!("meshcore running, press Ctrl+C to exit");

    if let Err(e) = manager.run().await {
        error!("Mesh manager failed: {}", e);
        std::process::exit(1);
    }

    info!("meshcore shutdown complete");
}
