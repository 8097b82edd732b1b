//! Error types for the KLF200 MQTT bridge
//!
//! One error enum covers the whole daemon. Recoverable failures are logged
//! and, where user-visible, reported on the errors topic; only configuration
//! errors at startup are fatal.

use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Error types for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration errors (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Gateway connection errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Gateway login failures
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Command issued while the gateway session is not connected
    #[error("Not connected to gateway")]
    NotConnected,

    /// Command addressed to a node the gateway never reported
    #[error("Unknown node: {0}")]
    UnknownNode(u8),

    /// Command refused by the gateway
    #[error("Command rejected: {0}")]
    CommandRejected(String),

    /// Device reported an error status
    #[error("Device error: {0}")]
    Device(String),

    /// Malformed or unexpected gateway frame
    #[error("Gateway protocol error: {0}")]
    Protocol(String),

    /// MQTT client errors
    #[error("MQTT error: {0}")]
    Mqtt(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Registry snapshot persistence errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl BridgeError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    /// Create an authentication error
    pub fn authentication<S: Into<String>>(msg: S) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a device error
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::Device(msg.into())
    }

    /// Create an MQTT error
    pub fn mqtt<S: Into<String>>(msg: S) -> Self {
        Self::Mqtt(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a persistence error
    pub fn persistence<S: Into<String>>(msg: S) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(anyhow::anyhow!(msg.into()))
    }

    /// Check if error is retryable through the reconnect schedule
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::Connection(_)
                | BridgeError::Timeout(_)
                | BridgeError::NotConnected
                | BridgeError::Io(_)
        )
    }

    /// Check if error indicates a gateway authentication issue
    pub fn is_auth_error(&self) -> bool {
        matches!(self, BridgeError::Authentication(_))
    }

    /// Severity label used for records on the errors topic
    pub fn severity(&self) -> &'static str {
        match self {
            BridgeError::Connection(_) | BridgeError::Timeout(_) | BridgeError::Mqtt(_) => {
                "warning"
            }
            _ => "error",
        }
    }
}

impl From<rumqttc::ClientError> for BridgeError {
    fn from(err: rumqttc::ClientError) -> Self {
        BridgeError::Mqtt(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for BridgeError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        BridgeError::Timeout("deadline elapsed".to_string())
    }
}
