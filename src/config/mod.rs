//! Configuration loading and validation
//!
//! The bridge reads one JSON configuration file maintained by the operator
//! UI, plus an optional broker settings file at a system path. Validation
//! happens before any external connection is opened; a validation failure
//! aborts startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Default path of the bridge configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/klf200-bridge/config.json";

/// Default path of the operator broker settings file
pub const DEFAULT_BROKER_PATH: &str = "/etc/klf200-bridge/broker.json";

/// Keepalive floor; the gateway drops idle sessions after 10-15 minutes,
/// but probing more often than once a minute is pointless
const MIN_KEEPALIVE_MS: u64 = 60_000;

/// Recommended minimum poll interval
const MIN_POLL_INTERVAL_MS: u64 = 10_000;

/// Top-level bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    pub klf200: Klf200Config,
    pub mqtt: MqttConfig,
    pub polling: PollingConfig,
    pub features: FeaturesConfig,
    pub logging: LoggingConfig,
    /// Directory holding the registry snapshot file
    pub data_dir: PathBuf,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            klf200: Klf200Config::default(),
            mqtt: MqttConfig::default(),
            polling: PollingConfig::default(),
            features: FeaturesConfig::default(),
            logging: LoggingConfig::default(),
            data_dir: PathBuf::from("/var/lib/klf200-bridge"),
        }
    }
}

/// Gateway connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Klf200Config {
    pub host: String,
    pub password: String,
    pub port: u16,
    /// Expected SHA-256 fingerprint of the gateway certificate; when unset
    /// any self-signed certificate is accepted
    pub tls_fingerprint: Option<String>,
    /// TCP+TLS handshake timeout in milliseconds
    pub connection_timeout: u64,
    /// Keepalive probe interval in milliseconds
    pub keepalive_interval: u64,
    /// First reconnect delay in milliseconds
    pub reconnect_base_delay: u64,
    /// Reconnect delay cap in milliseconds
    pub reconnect_max_delay: u64,
}

impl Default for Klf200Config {
    fn default() -> Self {
        Self {
            host: String::new(),
            password: String::new(),
            port: 51200,
            tls_fingerprint: None,
            connection_timeout: 10_000,
            keepalive_interval: 600_000,
            reconnect_base_delay: 5_000,
            reconnect_max_delay: 60_000,
        }
    }
}

impl Klf200Config {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout)
    }

    /// Keepalive interval, floored at one minute
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval.max(MIN_KEEPALIVE_MS))
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay)
    }

    /// Parse the configured fingerprint into raw digest bytes.
    ///
    /// Accepts `aa:bb:...` and bare hex forms, case-insensitive.
    pub fn fingerprint_bytes(&self) -> Result<Option<Vec<u8>>> {
        let Some(raw) = &self.tls_fingerprint else {
            return Ok(None);
        };
        let hex: String = raw.chars().filter(|c| *c != ':').collect();
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(BridgeError::config(format!(
                "tlsFingerprint must be a SHA-256 hex digest, got '{raw}'"
            )));
        }
        let bytes = (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
            .collect::<std::result::Result<Vec<u8>, _>>()
            .map_err(|e| BridgeError::config(format!("tlsFingerprint: {e}")))?;
        Ok(Some(bytes))
    }
}

/// Bus-side settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MqttConfig {
    pub topic_prefix: String,
    pub retain: bool,
    pub qos: u8,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "klf200".to_string(),
            retain: true,
            qos: 1,
        }
    }
}

/// Periodic state poll settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollingConfig {
    pub enabled: bool,
    /// Poll interval in milliseconds
    pub interval: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: 60_000,
        }
    }
}

impl PollingConfig {
    /// Poll interval, floored at the recommended minimum
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval.max(MIN_POLL_INTERVAL_MS))
    }
}

/// Feature toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeaturesConfig {
    pub auto_discovery: bool,
    pub publish_on_startup: bool,
    /// Parsed for the operator UI; not interpreted by the core
    pub home_assistant_discovery: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            auto_discovery: true,
            publish_on_startup: true,
            home_assistant_discovery: false,
        }
    }
}

/// Logging settings; rotation limits are consumed by the external log
/// collaborator, the core only uses the level
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    pub level: String,
    pub max_files: u32,
    pub max_size: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            max_files: 7,
            max_size: 10 * 1024 * 1024,
        }
    }
}

impl BridgeConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: BridgeConfig = serde_json::from_str(&raw)
            .map_err(|e| BridgeError::config(format!("invalid {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate mandatory fields; called before any connection is opened
    pub fn validate(&self) -> Result<()> {
        if self.klf200.host.trim().is_empty() {
            return Err(BridgeError::config("klf200.host is required"));
        }
        if self.klf200.password.is_empty() {
            return Err(BridgeError::config("klf200.password is required"));
        }
        if self.klf200.port == 0 {
            return Err(BridgeError::config("klf200.port must be in 1..=65535"));
        }
        if self.mqtt.qos > 2 {
            return Err(BridgeError::config(format!(
                "mqtt.qos must be 0, 1 or 2, got {}",
                self.mqtt.qos
            )));
        }
        if self.mqtt.topic_prefix.trim().is_empty() {
            return Err(BridgeError::config("mqtt.topicPrefix must not be empty"));
        }
        self.klf200.fingerprint_bytes()?;
        Ok(())
    }

    /// Path of the registry snapshot file
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("devices.json")
    }
}

/// Broker settings from the operator file; falls back to a local broker
/// without credentials when the file is absent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            tls: false,
        }
    }
}

impl BrokerSettings {
    /// Load broker settings, defaulting when the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| BridgeError::config(format!("invalid {}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(
                    path = %path.display(),
                    "broker settings file absent, using localhost:1883"
                );
                Ok(Self::default())
            }
            Err(e) => Err(BridgeError::config(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }
}
