//! Room Hub - Entry Point
//!
//! Loads configuration, creates the hub and its rooms, and accepts
//! WebSocket connections.

use std::env;

use tokio::net::TcpListener;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use room_hub::{handlers, Hub, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=room_hub=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("room_hub=info")),
        )
        .init();

    let mut config = ServerConfig::from_env()?;

    // Bind address from command line overrides the environment
    if let Some(addr) = env::args().nth(1) {
        config.addr = addr;
    }

    // Create hub, rooms and the default event catalogue
    let hub = Hub::new(config.hub.clone());
    hub.create_rooms(config.rooms.iter().cloned());
    handlers::install(&hub);
    info!("Hub started with rooms {:?}", hub.room_names());

    // Start TCP listener
    let listener = TcpListener::bind(&config.addr).await?;
    info!("WebSocket Hub listening on {}", config.addr);

    // Connection accept loop
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("New connection from {}", addr);
                let hub = hub.clone();

                // Handshake runs in its own task
                tokio::spawn(async move {
                    match hub.on_connect(stream).await {
                        Ok(client) => info!("Client {} connected from {}", client.id(), addr),
                        Err(e) => error!("Connection from {} rejected: {}", addr, e),
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
