//! KLF200 MQTT bridge
//!
//! A long-running daemon that connects a Velux KLF-200 class gateway to an
//! MQTT broker: actuator state comes out as retained topics, commands on
//! the bus go back in as gateway commands.
//!
//! # Components
//!
//! - [`codec`]: position scale conversions, actuator type map, status texts
//! - [`registry`]: authoritative device/scene snapshot with change
//!   detection and debounced persistence
//! - [`klf200`]: the authenticated gateway session (TLS, keepalive,
//!   backoff reconnect, discovery, commands)
//! - [`mqtt`]: the bus bridge (last will, topic routing, retained
//!   publication)
//! - [`daemon`]: startup sequence, event wiring and shutdown

pub mod codec;
pub mod config;
pub mod daemon;
pub mod error;
pub mod klf200;
pub mod mqtt;
pub mod registry;

// Re-export main types for convenience
pub use config::BridgeConfig;
pub use daemon::Daemon;
pub use error::{BridgeError, Result};
