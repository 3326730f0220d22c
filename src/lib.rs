//! Room-based WebSocket Broadcast Hub Library
//!
//! A WebSocket hub built with tokio-tungstenite that groups connected clients
//! into named rooms and fans messages out to room members.
//!
//! # Features
//! - WebSocket connection handling with ping/pong keepalive
//! - Static set of named rooms
//! - Subscribe / unsubscribe per room
//! - Parallel fan-out with per-client ordering
//! - Drop-newest backpressure for slow clients
//! - String-keyed event dispatch table
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Hub` owns the registries and a single teardown loop
//! - Each `Room` runs a membership control loop and a fan-out worker pool
//! - Each connection runs a read task and a write task
//!
//! # Wire format
//! One event per text frame, encoded as `[type, payload]`:
//! ```text
//! ["subscribe:chat", null]
//! ["chat:message", {"from": "A", "message": "hi"}]
//! ```
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use room_hub::{handlers, Hub, HubConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8383").await.unwrap();
//!     let hub = Hub::new(HubConfig::default());
//!     hub.create_rooms(["chat"]);
//!     handlers::install(&hub);
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         let hub = hub.clone();
//!         tokio::spawn(async move { hub.on_connect(stream).await });
//!     }
//! }
//! ```

pub mod client;
pub mod config;
mod connection;
pub mod error;
pub mod event;
pub mod handlers;
pub mod hub;
pub mod room;
pub mod router;
pub mod types;

// Re-export main types for convenience
pub use client::{Client, Delivery};
pub use config::{HubConfig, Keepalive, RoomConfig, ServerConfig};
pub use error::{CodecError, ConfigError, HubError};
pub use event::Event;
pub use hub::Hub;
pub use room::Room;
pub use router::{EventHandler, Router};
pub use types::ClientId;
