//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Opaque relay session identifier assigned by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Create a new session ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of the instance a session tunnels to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetId(pub String);

impl TargetId {
    /// Create a new target ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TargetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state reported by the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
    Other(String),
}

impl InstanceState {
    /// Parse the EC2 state name
    pub fn from_name(name: &str) -> Self {
        match name {
            "pending" => InstanceState::Pending,
            "running" => InstanceState::Running,
            "stopping" => InstanceState::Stopping,
            "stopped" => InstanceState::Stopped,
            "shutting-down" => InstanceState::ShuttingDown,
            "terminated" => InstanceState::Terminated,
            other => InstanceState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceState::Pending => write!(f, "pending"),
            InstanceState::Running => write!(f, "running"),
            InstanceState::Stopping => write!(f, "stopping"),
            InstanceState::Stopped => write!(f, "stopped"),
            InstanceState::ShuttingDown => write!(f, "shutting-down"),
            InstanceState::Terminated => write!(f, "terminated"),
            InstanceState::Other(s) => write!(f, "{}", s),
        }
    }
}

/// A compute instance as seen by the inventory. Read-only to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Instance ID (e.g. `i-0abc123`)
    pub id: TargetId,
    /// Value of the `Name` tag, or the ID when untagged
    pub name: String,
    /// Current lifecycle state
    pub state: InstanceState,
}

impl Instance {
    /// Case-insensitive substring match over name and ID
    pub fn matches(&self, filter: &str) -> bool {
        let filter = filter.trim().to_lowercase();
        filter.is_empty()
            || self.name.to_lowercase().contains(&filter)
            || self.id.as_str().to_lowercase().contains(&filter)
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Relay session is being opened
    Pending,
    /// Tunnel is up
    Active,
    /// A renewal is in flight or being retried
    Renewing,
    /// Torn down by the operator
    Terminated,
    /// Renewal or transport failed; see `Session::failure`
    Failed,
}

impl SessionState {
    /// Whether the session still owns a tunnel
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Active | SessionState::Renewing)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Pending => write!(f, "pending"),
            SessionState::Active => write!(f, "active"),
            SessionState::Renewing => write!(f, "renewing"),
            SessionState::Terminated => write!(f, "terminated"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// Snapshot of a tunneled session
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub target_id: TargetId,
    pub local_port: u16,
    pub remote_port: u16,
    pub state: SessionState,
    /// Relay expiry deadline, advanced on every successful renewal
    pub expires_at: Instant,
    /// Successful renewals so far
    pub renewals: u32,
    /// Renewal failures since the last success
    pub consecutive_failures: u32,
    /// Human-readable reason when `state` is `Failed`
    pub failure: Option<String>,
    /// Wall-clock creation time (Unix millis)
    pub created_at: u64,
    /// PID of the transport process, if one is running
    pub transport_pid: Option<u32>,
}

impl Session {
    /// Time left before the relay session expires (zero once passed)
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}
