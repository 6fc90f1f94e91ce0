//! Core error types for ssm-tunnel

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for the session lifecycle
#[derive(Error, Debug)]
pub enum TunnelError {
    /// The instance cannot accept a relay session right now
    #[error("Target unreachable: {0}")]
    TargetUnreachable(String),

    /// Credentials were rejected by the control plane
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// No usable local port could be obtained
    #[error("Local port unavailable: {0}")]
    PortUnavailable(String),

    /// The transport process did not come up
    #[error("Transport failed to start: {0}")]
    TransportStartFailed(String),

    /// The renewal command did not complete in time
    #[error("Renewal of session {session_id} timed out after {waited:?}")]
    RenewalTimeout {
        /// Session being renewed
        session_id: String,
        /// How long we polled before giving up
        waited: Duration,
    },

    /// The renewal command completed with a failure status
    #[error("Renewal failed: {0}")]
    RenewalFailed(String),

    /// Session is unknown to the registry or the control plane
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Any other control-plane fault
    #[error("Relay error: {0}")]
    Relay(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TunnelError {
    /// Errors that must be surfaced immediately without retrying
    pub fn is_fatal(&self) -> bool {
        matches!(self, TunnelError::Auth(_) | TunnelError::Config(_))
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}
