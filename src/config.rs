//! Runtime configuration
//!
//! Queue capacities, worker pool size and keepalive timings. Every value has
//! a default; `from_env` overrides individual values from environment
//! variables.
//!
//! # Environment Variables
//!
//! - `HUB_ADDR`: bind address (default: 127.0.0.1:8383)
//! - `HUB_ROOMS`: comma-separated room names (default: chat)
//! - `HUB_UNREGISTER_BUFFER`: unregister signal queue (default: 256)
//! - `HUB_CLIENT_CAPACITY`: initial client registry capacity (default: 1024)
//! - `HUB_OUTBOUND_BUFFER`: per-client outbound queue (default: 1000)
//! - `ROOM_CONTROL_BUFFER`: per-room membership queue (default: 64)
//! - `ROOM_BROADCAST_BUFFER`: per-room broadcast queue (default: 256)
//! - `ROOM_WORKERS`: fan-out workers per room (default: 100)
//! - `CLIENT_PONG_WAIT_SECS`: read deadline in seconds (default: 60)
//! - `CLIENT_MAX_MESSAGE_SIZE`: max inbound frame size in bytes (default: 512)

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8383";

/// Rooms created when `HUB_ROOMS` is unset
pub const DEFAULT_ROOMS: &[&str] = &["chat"];

/// Connection keepalive settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    /// Time allowed between pongs before the next read fails
    pub pong_wait: Duration,
    /// Ping period, must be shorter than `pong_wait`
    pub ping_interval: Duration,
    /// Maximum inbound message size in bytes
    pub max_message_size: usize,
}

impl Keepalive {
    /// Keepalive with the ping interval derived as 9/10 of `pong_wait`
    pub fn with_pong_wait(pong_wait: Duration) -> Self {
        Self {
            pong_wait,
            ping_interval: pong_wait * 9 / 10,
            max_message_size: 512,
        }
    }
}

impl Default for Keepalive {
    fn default() -> Self {
        Self::with_pong_wait(Duration::from_secs(60))
    }
}

/// Per-room queue and worker settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomConfig {
    /// Capacity of the subscribe/unsubscribe queue
    pub control_buffer: usize,
    /// Capacity of the shared broadcast queue
    pub broadcast_buffer: usize,
    /// Number of fan-out workers
    pub workers: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            control_buffer: 64,
            broadcast_buffer: 256,
            workers: 100,
        }
    }
}

/// Hub settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Capacity of the unregister signal queue
    pub unregister_buffer: usize,
    /// Initial capacity of the client registry
    pub client_capacity: usize,
    /// Capacity of each client's outbound queue
    pub outbound_buffer: usize,
    pub keepalive: Keepalive,
    /// Settings applied to every room created by the hub
    pub room: RoomConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            unregister_buffer: 256,
            client_capacity: 1024,
            outbound_buffer: 1000,
            keepalive: Keepalive::default(),
            room: RoomConfig::default(),
        }
    }
}

/// Top-level server settings used by the binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: String,
    pub rooms: Vec<String>,
    pub hub: HubConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            rooms: DEFAULT_ROOMS.iter().map(|r| r.to_string()).collect(),
            hub: HubConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// Unset keys keep their defaults. Set keys must parse and, for
    /// capacities and durations, be non-zero.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("HUB_ADDR") {
            config.addr = addr;
        }
        if let Some(rooms) = lookup("HUB_ROOMS") {
            let rooms: Vec<String> = rooms
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect();
            if rooms.is_empty() {
                return Err(invalid("HUB_ROOMS", "at least one room name is required"));
            }
            if let Some(bad) = rooms.iter().find(|r| r.contains(':')) {
                return Err(invalid("HUB_ROOMS", format!("room name '{}' contains ':'", bad)));
            }
            config.rooms = rooms;
        }

        let hub = &mut config.hub;
        positive(&lookup, "HUB_UNREGISTER_BUFFER", &mut hub.unregister_buffer)?;
        positive(&lookup, "HUB_CLIENT_CAPACITY", &mut hub.client_capacity)?;
        positive(&lookup, "HUB_OUTBOUND_BUFFER", &mut hub.outbound_buffer)?;
        positive(&lookup, "ROOM_CONTROL_BUFFER", &mut hub.room.control_buffer)?;
        positive(&lookup, "ROOM_BROADCAST_BUFFER", &mut hub.room.broadcast_buffer)?;
        positive(&lookup, "ROOM_WORKERS", &mut hub.room.workers)?;

        let mut pong_wait_secs = hub.keepalive.pong_wait.as_secs();
        positive(&lookup, "CLIENT_PONG_WAIT_SECS", &mut pong_wait_secs)?;
        let max_message_size = hub.keepalive.max_message_size;
        hub.keepalive = Keepalive::with_pong_wait(Duration::from_secs(pong_wait_secs));
        hub.keepalive.max_message_size = max_message_size;
        positive(
            &lookup,
            "CLIENT_MAX_MESSAGE_SIZE",
            &mut hub.keepalive.max_message_size,
        )?;

        Ok(config)
    }
}

/// Overwrite `slot` with the parsed value of `key` when it is set
fn positive<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(());
    };
    let value: T = raw.trim().parse().map_err(|e: T::Err| invalid(key, e.to_string()))?;
    if value == T::default() {
        return Err(invalid(key, "must be greater than zero"));
    }
    *slot = value;
    Ok(())
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.into(),
    }
}
